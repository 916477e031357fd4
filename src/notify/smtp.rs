//! SMTP mail transport backed by lettre.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::config::EmailConfig;

use super::{MailError, Mailer};

/// Mailer delivering through a configured SMTP relay.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &EmailConfig) -> Result<Self, MailError> {
        let from: Mailbox = cfg
            .from_email
            .parse()
            .map_err(|e| MailError::Message(format!("invalid from address: {}", e)))?;

        let mut builder = SmtpTransport::relay(&cfg.smtp_server)
            .map_err(|e| MailError::Smtp(e.to_string()))?
            .port(cfg.smtp_port);
        if !cfg.smtp_user.is_empty() {
            builder = builder.credentials(Credentials::new(
                cfg.smtp_user.clone(),
                cfg.smtp_password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    /// Dial the relay once to confirm it is reachable. Failure is reported,
    /// not fatal: delivery retries on every dispatcher sweep anyway.
    pub fn verify(&self) -> bool {
        match self.transport.test_connection() {
            Ok(true) => true,
            Ok(false) => false,
            Err(e) => {
                tracing::warn!("SMTP connection check failed: {}", e);
                false
            }
        }
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| MailError::Message(format!("invalid recipient {}: {}", to, e)))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .body(body.to_string())
            .map_err(|e| MailError::Message(e.to_string()))?;

        self.transport
            .send(&email)
            .map(|_| ())
            .map_err(|e| MailError::Smtp(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_from_address() {
        let cfg = EmailConfig {
            smtp_server: "smtp.example.com".to_string(),
            from_email: "not-an-address".to_string(),
            ..Default::default()
        };
        assert!(matches!(SmtpMailer::new(&cfg), Err(MailError::Message(_))));
    }

    #[test]
    fn test_builds_with_credentials() {
        let cfg = EmailConfig {
            smtp_server: "smtp.example.com".to_string(),
            smtp_port: 587,
            smtp_user: "user".to_string(),
            smtp_password: "pass".to_string(),
            from_email: "monitor@example.com".to_string(),
        };
        assert!(SmtpMailer::new(&cfg).is_ok());
    }
}
