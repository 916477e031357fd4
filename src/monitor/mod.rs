//! Target scheduler: one independent probe loop per monitored service.

mod retention;
mod state;

pub use retention::*;
pub use state::*;

use crate::db::{DbError, Store, Target, TargetKind, TargetStatus};
use crate::probe::HttpProber;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

struct TargetTask {
    stop: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the per-target probe tasks, indexed by target identity.
///
/// Each task runs on its own interval, re-reads the target's persisted state
/// before every probe, and is serialized with itself: overdue ticks are
/// skipped, never queued.
pub struct Scheduler {
    store: Arc<Store>,
    prober: Arc<HttpProber>,
    failure_threshold: i64,
    tasks: RwLock<HashMap<i64, TargetTask>>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, prober: Arc<HttpProber>, failure_threshold: i64) -> Self {
        Self {
            store,
            prober,
            failure_threshold,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Start watching every service target currently in the store.
    pub async fn start(&self) -> Result<(), DbError> {
        let targets = self.store.targets_by_kind(TargetKind::Service)?;
        tracing::info!("Starting scheduler with {} service target(s)", targets.len());
        for target in targets {
            self.watch(target).await;
        }
        Ok(())
    }

    /// Watch a target, replacing any existing task for the same identity.
    /// The first probe runs immediately; later ones follow the target's
    /// configured interval.
    pub async fn watch(&self, target: Target) {
        let mut tasks = self.tasks.write().await;

        if let Some(prev) = tasks.remove(&target.id) {
            let _ = prev.stop.send(());
            let _ = prev.handle.await;
        }

        tracing::info!("Scheduler: watching {}", target.url);

        let id = target.id;
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let store = self.store.clone();
        let prober = self.prober.clone();
        let threshold = self.failure_threshold;
        let handle = tokio::spawn(run_target_loop(store, prober, target, threshold, stop_rx));

        tasks.insert(
            id,
            TargetTask {
                stop: stop_tx,
                handle,
            },
        );
    }

    /// Stop watching one target, draining its in-flight cycle.
    pub async fn unwatch(&self, id: i64) {
        let task = self.tasks.write().await.remove(&id);
        if let Some(task) = task {
            let _ = task.stop.send(());
            let _ = task.handle.await;
            tracing::info!("Scheduler: stopped watching target {}", id);
        }
    }

    /// Stop every task and wait for all in-flight probe cycles to finish.
    pub async fn stop_all(&self) {
        let tasks: Vec<TargetTask> = {
            let mut map = self.tasks.write().await;
            map.drain().map(|(_, t)| t).collect()
        };
        for task in &tasks {
            let _ = task.stop.send(());
        }
        for task in tasks {
            let _ = task.handle.await;
        }
        tracing::info!("All monitors stopped");
    }
}

/// Run the probe loop for a single target.
async fn run_target_loop(
    store: Arc<Store>,
    prober: Arc<HttpProber>,
    target: Target,
    failure_threshold: i64,
    mut stop_rx: broadcast::Receiver<()>,
) {
    // Startup jitter so many targets do not fire at once
    let jitter = rand::random::<u64>() % 500;
    tokio::time::sleep(Duration::from_millis(jitter)).await;

    let interval_secs = target.check_interval.max(1) as u64;
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {
                // Re-read the current persisted state so external edits are
                // honored on the next cycle.
                let current = match store.get_target(target.id) {
                    Ok(t) => t,
                    Err(DbError::NotFound) => break,
                    Err(e) => {
                        tracing::error!("Failed to refresh target {}: {}", target.id, e);
                        continue;
                    }
                };
                check_and_record(&store, &prober, &current, failure_threshold).await;
            }
        }
    }
}

/// One probe-and-record cycle. Persistence failures are logged and the cycle
/// abandoned; the next tick proceeds normally.
async fn check_and_record(
    store: &Store,
    prober: &HttpProber,
    target: &Target,
    failure_threshold: i64,
) {
    tracing::debug!("Checking service {}", target.url);
    let result = prober.check(&target.url).await;

    match result.status {
        TargetStatus::Up => tracing::debug!(
            "{} is up ({}ms)",
            target.url,
            result.response_time_ms.unwrap_or_default()
        ),
        _ => tracing::warn!(
            "{} is down: {}",
            target.url,
            result.error.as_deref().unwrap_or("unknown error")
        ),
    }

    if let Err(e) = state::record(store, target, &result, Utc::now(), failure_threshold) {
        tracing::error!("Failed to record outcome for {}: {}", target.url, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::RetryPolicy;
    use tempfile::NamedTempFile;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn serve_ok() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let _ = sock
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                    .await;
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_watch_probes_immediately_and_drains_on_stop() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let url = serve_ok().await;

        let mut target = Target {
            url: url.clone(),
            check_interval: 60,
            ..Default::default()
        };
        let id = store.add_target(&mut target).unwrap();

        let prober = Arc::new(
            HttpProber::new(
                Duration::from_secs(2),
                RetryPolicy::new(0, Duration::from_millis(10)),
            )
            .unwrap(),
        );
        let scheduler = Scheduler::new(store.clone(), prober, 3);
        scheduler.start().await.unwrap();

        // Startup jitter is below 500ms; the first probe follows right after.
        tokio::time::sleep(Duration::from_millis(900)).await;
        scheduler.stop_all().await;

        let fetched = store.get_target(id).unwrap();
        assert_eq!(fetched.status, TargetStatus::Up);
        assert!(fetched.last_check.is_some());
        assert!(fetched.response_time.is_some());
    }

    #[tokio::test]
    async fn test_unwatch_is_idempotent() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let prober = Arc::new(
            HttpProber::new(
                Duration::from_secs(1),
                RetryPolicy::new(0, Duration::from_millis(10)),
            )
            .unwrap(),
        );
        let scheduler = Scheduler::new(store.clone(), prober, 3);

        let mut target = Target {
            url: "http://127.0.0.1:9".to_string(),
            check_interval: 60,
            ..Default::default()
        };
        let id = store.add_target(&mut target).unwrap();

        scheduler.watch(store.get_target(id).unwrap()).await;
        scheduler.unwatch(id).await;
        scheduler.unwatch(id).await;
        scheduler.stop_all().await;
    }
}
