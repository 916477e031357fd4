//! Peer federation.
//!
//! Peers run the same probe/state-machine/notification pipeline as services,
//! but are checked through the JSON health protocol on one shared interval
//! instead of per-target timers. Each instance keeps its own independent
//! view; there is no consensus between peers.

use crate::db::{Store, TargetKind, TargetStatus};
use crate::monitor::record;
use crate::probe::PeerProber;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// Body of the `/api/health` peer protocol response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: String,
    pub instance_name: String,
    pub uptime_seconds: i64,
    pub services_monitored: i64,
    pub services_up: i64,
    pub services_down: i64,
    pub timestamp: String,
}

/// Runs the shared peer-check sweep.
pub struct Federation {
    store: Arc<Store>,
    prober: Arc<PeerProber>,
    failure_threshold: i64,
    interval: Duration,
    started_at: Instant,
    task: Mutex<Option<(broadcast::Sender<()>, JoinHandle<()>)>>,
}

impl Federation {
    pub fn new(
        store: Arc<Store>,
        prober: Arc<PeerProber>,
        failure_threshold: i64,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            prober,
            failure_threshold,
            interval,
            started_at: Instant::now(),
            task: Mutex::new(None),
        }
    }

    /// Seconds since this instance started, reported to peers.
    pub fn uptime_seconds(&self) -> i64 {
        self.started_at.elapsed().as_secs() as i64
    }

    /// Build the health snapshot served to peers.
    pub fn health_snapshot(
        &self,
        instance_name: &str,
    ) -> Result<HealthSnapshot, crate::db::DbError> {
        let stats = self.store.target_stats()?;
        Ok(HealthSnapshot {
            status: "ok".to_string(),
            instance_name: instance_name.to_string(),
            uptime_seconds: self.uptime_seconds(),
            services_monitored: stats.total,
            services_up: stats.up,
            services_down: stats.down,
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    /// Start the shared sweep. The first sweep runs immediately, then on the
    /// configured interval.
    pub async fn start(&self) {
        let (tx, mut rx) = broadcast::channel(1);
        let store = self.store.clone();
        let prober = self.prober.clone();
        let threshold = self.failure_threshold;
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        sweep(&store, &prober, threshold).await;
                    }
                }
            }
        });

        *self.task.lock().await = Some((tx, handle));
        tracing::info!("Federation: peer sweep started (every {:?})", self.interval);
    }

    /// Stop the sweep, waiting for an in-flight pass to finish.
    pub async fn stop(&self) {
        if let Some((tx, handle)) = self.task.lock().await.take() {
            let _ = tx.send(());
            let _ = handle.await;
        }
    }
}

/// Check every configured peer sequentially through the shared pipeline.
async fn sweep(store: &Store, prober: &PeerProber, failure_threshold: i64) {
    let peers = match store.targets_by_kind(TargetKind::Peer) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("Federation: failed to load peers: {}", e);
            return;
        }
    };

    for peer in peers {
        tracing::debug!("Checking peer {}", peer.url);
        let result = prober.check(&peer.url).await;
        if result.status == TargetStatus::Down {
            tracing::warn!(
                "Peer {} is down: {}",
                peer.url,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        if let Err(e) = record(store, &peer, &result, Utc::now(), failure_threshold) {
            tracing::error!("Federation: failed to record outcome for {}: {}", peer.url, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Target;
    use crate::probe::RetryPolicy;
    use tempfile::NamedTempFile;

    fn federation(store: Arc<Store>) -> Federation {
        let prober = Arc::new(
            PeerProber::new(
                Duration::from_secs(1),
                RetryPolicy::new(0, Duration::from_millis(10)),
                None,
            )
            .unwrap(),
        );
        Federation::new(store, prober, 3, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_health_snapshot_counts_services() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());

        for (url, status) in [
            ("https://a.example", TargetStatus::Up),
            ("https://b.example", TargetStatus::Down),
        ] {
            let mut t = Target {
                url: url.to_string(),
                status,
                ..Default::default()
            };
            store.add_target(&mut t).unwrap();
        }

        let fed = federation(store);
        let snap = fed.health_snapshot("test-instance").unwrap();
        assert_eq!(snap.status, "ok");
        assert_eq!(snap.instance_name, "test-instance");
        assert_eq!(snap.services_monitored, 2);
        assert_eq!(snap.services_up, 1);
        assert_eq!(snap.services_down, 1);
        assert!(snap.uptime_seconds >= 0);
    }

    #[test]
    fn test_health_snapshot_wire_format() {
        let snap = HealthSnapshot {
            status: "ok".to_string(),
            instance_name: "p1".to_string(),
            uptime_seconds: 12,
            services_monitored: 3,
            services_up: 2,
            services_down: 1,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
        };
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["instance_name"], "p1");
        assert_eq!(value["uptime_seconds"], 12);
        assert_eq!(value["services_monitored"], 3);
        assert_eq!(value["services_up"], 2);
        assert_eq!(value["services_down"], 1);
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_sweep_records_unreachable_peer_as_down() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut peer = Target {
            kind: TargetKind::Peer,
            url: format!("http://{}", addr),
            notify_email: Some("admin@peer.example".to_string()),
            ..Default::default()
        };
        let id = store.add_target(&mut peer).unwrap();

        let prober = PeerProber::new(
            Duration::from_secs(1),
            RetryPolicy::new(0, Duration::from_millis(10)),
            None,
        )
        .unwrap();
        sweep(&store, &prober, 3).await;

        let fetched = store.get_target(id).unwrap();
        assert_eq!(fetched.status, TargetStatus::Down);
        assert_eq!(fetched.consecutive_failures, 1);
        assert!(store.pending_notifications().unwrap().is_empty());
    }
}
