use crate::alerting::AlertRegistry;
use crate::metrics::MetricStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

/// Retention worker that periodically drops old samples and closed alerts
pub struct RetentionWorker {
    store: Arc<MetricStore>,
    registry: Arc<AlertRegistry>,
    retention: Duration,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl RetentionWorker {
    pub fn new(
        store: Arc<MetricStore>,
        registry: Arc<AlertRegistry>,
        retention: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            retention,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Retention worker started with interval {:?}", self.interval);

            let mut interval = time::interval(self.interval);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;

                let now = chrono::Utc::now().timestamp_millis();
                let (samples, alerts) = self.run_once(now);

                if samples > 0 || alerts > 0 {
                    tracing::info!(
                        "Retention worker expired {} samples and {} closed alerts",
                        samples,
                        alerts
                    );
                }
            }

            tracing::info!("Retention worker stopped");
        })
    }

    /// Expire everything older than the retention window at `now`
    pub fn run_once(&self, now: i64) -> (usize, usize) {
        let retention = i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(retention);
        let samples = self.store.expire_before(cutoff);
        let alerts = self.registry.expire_closed(cutoff);
        (samples, alerts)
    }

    /// Stop the worker
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if worker is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
