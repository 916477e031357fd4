//! Notification dispatch.
//!
//! The state machine enqueues alerts in the store; the dispatcher drains
//! them on its own sweep, independent of any target's schedule, so a slow or
//! failing mail server never blocks monitoring. Failed deliveries stay
//! pending and are retried on every sweep until they go through.

mod smtp;

pub use smtp::*;

use crate::db::Store;

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// Time between dispatcher sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

const ALERT_SUBJECT: &str = "Fedwatch uptime alert";

/// Mail delivery error types.
#[derive(Error, Debug)]
pub enum MailError {
    #[error("SMTP error: {0}")]
    Smtp(String),
    #[error("invalid message: {0}")]
    Message(String),
}

/// Outbound mail transport. Kept synchronous; the dispatcher moves calls to
/// a blocking thread.
pub trait Mailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// Drains pending notifications on a fixed interval.
pub struct Dispatcher {
    store: Arc<Store>,
    mailer: Arc<dyn Mailer>,
    default_recipient: String,
    task: Mutex<Option<(broadcast::Sender<()>, JoinHandle<()>)>>,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>, mailer: Arc<dyn Mailer>, default_recipient: String) -> Self {
        Self {
            store,
            mailer,
            default_recipient,
            task: Mutex::new(None),
        }
    }

    /// Start the sweep task. The first sweep runs immediately, delivering
    /// anything left pending by a previous run.
    pub async fn start(&self) {
        let (tx, mut rx) = broadcast::channel(1);
        let store = self.store.clone();
        let mailer = self.mailer.clone();
        let recipient = self.default_recipient.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        sweep(&store, mailer.clone(), &recipient).await;
                    }
                }
            }
        });

        *self.task.lock().await = Some((tx, handle));
    }

    /// Stop the sweep task, waiting for an in-flight sweep to finish.
    pub async fn stop(&self) {
        if let Some((tx, handle)) = self.task.lock().await.take() {
            let _ = tx.send(());
            let _ = handle.await;
        }
    }
}

/// One dispatcher sweep: deliver every pending notification, oldest first,
/// sequentially. Success flips `sent`; failure records the error and leaves
/// the notification pending for the next sweep.
pub(crate) async fn sweep(store: &Store, mailer: Arc<dyn Mailer>, default_recipient: &str) {
    let pending = match store.pending_notifications() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("Dispatcher: failed to fetch pending notifications: {}", e);
            return;
        }
    };

    if pending.is_empty() {
        return;
    }

    tracing::info!("Dispatcher: delivering {} pending notification(s)", pending.len());

    for notif in pending {
        let to = store
            .get_target(notif.target_id)
            .ok()
            .and_then(|t| t.notify_email)
            .unwrap_or_else(|| default_recipient.to_string());

        let mailer = mailer.clone();
        let message = notif.message.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            mailer.send(&to, ALERT_SUBJECT, &message)
        })
        .await
        .unwrap_or_else(|e| Err(MailError::Smtp(format!("delivery task failed: {}", e))));

        let mark = match &outcome {
            Ok(()) => {
                tracing::info!("Dispatcher: sent notification {}", notif.id);
                store.mark_notification_sent(notif.id, true, None)
            }
            Err(e) => {
                tracing::warn!("Dispatcher: failed to send notification {}: {}", notif.id, e);
                store.mark_notification_sent(notif.id, false, Some(&e.to_string()))
            }
        };
        if let Err(e) = mark {
            tracing::error!("Dispatcher: failed to update notification {}: {}", notif.id, e);
        }
    }
}
