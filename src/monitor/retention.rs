//! Log retention sweep.

use crate::db::Store;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Deletes probe logs past the retention window on a daily interval.
pub struct RetentionSweep {
    store: Arc<Store>,
    max_days: i64,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl RetentionSweep {
    pub fn new(store: Arc<Store>, max_days: i64) -> Self {
        Self {
            store,
            max_days,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the background task. The first sweep runs immediately.
    pub fn start(&self) {
        let store = self.store.clone();
        let max_days = self.max_days;
        let stop = self.stop.clone();

        tokio::spawn(async move {
            let (tx, _) = tokio::sync::broadcast::channel(1);
            {
                let mut stop_guard = stop.lock().await;
                *stop_guard = Some(tx.clone());
            }

            let mut rx = tx.subscribe();
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        prune(&store, max_days);
                    }
                }
            }
        });
    }

    /// Stop the background task.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}

fn prune(store: &Store, max_days: i64) {
    let cutoff = Utc::now() - ChronoDuration::days(max_days);
    match store.delete_logs_before(cutoff) {
        Ok(0) => {}
        Ok(deleted) => tracing::info!("Retention: removed {} old log entries", deleted),
        Err(e) => tracing::error!("Retention: failed to prune logs: {}", e),
    }
}
