//! fedwatch - peer-federated uptime monitor.
//!
//! Probes configured HTTP(S) endpoints, tracks up/down state with
//! deduplicated alerting, and exchanges health information with trusted peer
//! instances.

mod config;
mod db;
mod federation;
mod monitor;
mod notify;
mod probe;
mod web;

use config::Config;
use db::{Store, Target, TargetKind};
use federation::Federation;
use monitor::{RetentionSweep, Scheduler};
use notify::{Dispatcher, Mailer, SmtpMailer};
use probe::{HttpProber, PeerProber, RetryPolicy};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fedwatch=info".parse()?),
        )
        .init();

    let cfg = Config::load()?;
    tracing::info!("Starting fedwatch instance \"{}\" on port {}", cfg.name, cfg.port);
    tracing::info!("Using database at {}", cfg.database.path);

    let store = Arc::new(Store::new(&cfg.database.path)?);
    reconcile_targets(&store, &cfg)?;

    let timeout = Duration::from_secs(cfg.monitoring.timeout);
    let retry = RetryPolicy::new(
        cfg.monitoring.max_retries,
        Duration::from_secs(cfg.monitoring.retry_delay),
    );
    let http_prober = Arc::new(HttpProber::new(timeout, retry)?);
    let peer_prober = Arc::new(PeerProber::new(timeout, retry, cfg.notify_key.clone())?);

    let smtp = SmtpMailer::new(&cfg.email)?;
    if smtp.verify() {
        tracing::info!("SMTP connection verified");
    } else {
        tracing::warn!("SMTP connection could not be verified; deliveries will be retried");
    }
    let mailer: Arc<dyn Mailer> = Arc::new(smtp);

    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        http_prober,
        cfg.monitoring.failure_threshold,
    ));
    scheduler.start().await?;

    let federation = Arc::new(Federation::new(
        store.clone(),
        peer_prober,
        cfg.monitoring.failure_threshold,
        Duration::from_secs(cfg.monitoring.peer_check_interval),
    ));
    federation.start().await;

    let dispatcher = Dispatcher::new(store.clone(), mailer, cfg.admin_email.clone());
    dispatcher.start().await;

    let retention = RetentionSweep::new(store.clone(), cfg.max_days_logs);
    retention.start();

    let server = web::Server::new(
        store.clone(),
        federation.clone(),
        cfg.name.clone(),
        cfg.notify_key.clone(),
        cfg.port,
    );
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.start().await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tracing::info!(
        "Peers can monitor this instance at {}/api/health",
        cfg.base_url.trim_end_matches('/')
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    scheduler.stop_all().await;
    federation.stop().await;
    dispatcher.stop().await;
    retention.stop().await;
    server_handle.abort();

    tracing::info!("Goodbye");
    Ok(())
}

/// Bring the stored target list in line with the configuration: insert
/// services and peers that are new, delete rows whose URL left the config.
/// Existing rows keep their accumulated state.
fn reconcile_targets(store: &Store, cfg: &Config) -> Result<(), db::DbError> {
    let mut configured: HashSet<&str> = HashSet::new();

    for service in &cfg.services {
        configured.insert(service.url.as_str());
        if store.get_target_by_url(&service.url)?.is_none() {
            let mut target = Target {
                kind: TargetKind::Service,
                url: service.url.clone(),
                check_interval: service
                    .check_interval
                    .unwrap_or(cfg.monitoring.default_check_interval),
                notify_email: service.notify_email.clone(),
                ..Default::default()
            };
            store.add_target(&mut target)?;
            tracing::info!("Added service {}", service.url);
        }
    }

    for peer in &cfg.peers {
        configured.insert(peer.url.as_str());
        if store.get_target_by_url(&peer.url)?.is_none() {
            let mut target = Target {
                kind: TargetKind::Peer,
                url: peer.url.clone(),
                check_interval: cfg.monitoring.peer_check_interval as i64,
                notify_email: Some(peer.admin_email.clone()),
                ..Default::default()
            };
            store.add_target(&mut target)?;
            tracing::info!("Added peer {}", peer.url);
        }
    }

    for target in store.get_targets()? {
        if !configured.contains(target.url.as_str()) {
            store.delete_target(target.id)?;
            tracing::info!("Removed {}", target.url);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{PeerEntry, ServiceEntry};
    use db::TargetStatus;
    use tempfile::NamedTempFile;

    fn base_config() -> Config {
        Config {
            name: "test".to_string(),
            admin_email: "ops@example.com".to_string(),
            port: 3015,
            base_url: "https://up.example.com".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_reconcile_adds_and_removes_targets() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let mut cfg = base_config();
        cfg.services.push(ServiceEntry {
            url: "https://a.example".to_string(),
            check_interval: Some(15),
            notify_email: None,
        });
        cfg.peers.push(PeerEntry {
            url: "https://peer.example".to_string(),
            admin_email: "admin@peer.example".to_string(),
        });

        reconcile_targets(&store, &cfg).unwrap();
        let targets = store.get_targets().unwrap();
        assert_eq!(targets.len(), 2);
        let svc = store
            .get_target_by_url("https://a.example")
            .unwrap()
            .unwrap();
        assert_eq!(svc.kind, TargetKind::Service);
        assert_eq!(svc.check_interval, 15);
        let peer = store
            .get_target_by_url("https://peer.example")
            .unwrap()
            .unwrap();
        assert_eq!(peer.kind, TargetKind::Peer);
        assert_eq!(peer.notify_email.as_deref(), Some("admin@peer.example"));

        // Dropping the service from the config deletes its row
        cfg.services.clear();
        reconcile_targets(&store, &cfg).unwrap();
        let targets = store.get_targets().unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].url, "https://peer.example");
    }

    #[test]
    fn test_reconcile_keeps_existing_state() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();

        let mut cfg = base_config();
        cfg.services.push(ServiceEntry {
            url: "https://a.example".to_string(),
            check_interval: None,
            notify_email: None,
        });
        reconcile_targets(&store, &cfg).unwrap();

        // Simulate accumulated state, then reconcile again
        let target = store
            .get_target_by_url("https://a.example")
            .unwrap()
            .unwrap();
        let update = db::ProbeOutcomeUpdate {
            status: TargetStatus::Down,
            consecutive_failures: 2,
            alerted: false,
            last_check: chrono::Utc::now(),
            response_time: None,
            name: None,
        };
        let log = db::NewLogEntry {
            status: TargetStatus::Down,
            response_time: None,
            message: None,
        };
        store.record_outcome(target.id, &update, &log, None).unwrap();

        reconcile_targets(&store, &cfg).unwrap();
        let fetched = store.get_target(target.id).unwrap();
        assert_eq!(fetched.status, TargetStatus::Down);
        assert_eq!(fetched.consecutive_failures, 2);
    }
}
