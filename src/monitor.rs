//! Staleness monitor
//!
//! Periodically counts PENDING launch logs and the subset older than the
//! staleness threshold, and reports both as gauges. Purely observational:
//! it never writes to the store, and a failed read only skips one tick.

use crate::launch_log_store::LaunchLogStore;
use crate::metrics::metrics;
use crate::types::LaunchLogStatus;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const PENDING_GAUGE: &str = "pending_log";
pub const LONG_PENDING_GAUGE: &str = "long_pending_log";

/// Destination for named numeric gauges
pub trait MetricsSink: Send + Sync {
    fn gauge(&self, name: &str, value: f64);
}

/// Counts produced by one monitor tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessReport {
    pub pending: usize,
    pub long_pending: usize,
}

pub struct StalenessMonitor {
    store: Arc<dyn LaunchLogStore>,
    sink: Arc<dyn MetricsSink>,
    interval: Duration,
    threshold: chrono::Duration,
}

impl StalenessMonitor {
    pub fn new(
        store: Arc<dyn LaunchLogStore>,
        sink: Arc<dyn MetricsSink>,
        interval: Duration,
        threshold: Duration,
    ) -> Self {
        Self {
            store,
            sink,
            interval,
            threshold: chrono::Duration::from_std(threshold)
                .unwrap_or_else(|_| chrono::Duration::minutes(10)),
        }
    }

    /// One scan as of `now`; emits both gauges on success
    pub async fn tick(&self, now: DateTime<Utc>) -> crate::errors::LaunchResult<StalenessReport> {
        let pending = self
            .store
            .find_all_with_status(LaunchLogStatus::Pending)
            .await?;

        let cutoff = now - self.threshold;
        let long_pending = pending.iter().filter(|l| l.created_at < cutoff).count();

        self.sink.gauge(PENDING_GAUGE, pending.len() as f64);
        self.sink.gauge(LONG_PENDING_GAUGE, long_pending as f64);

        let report = StalenessReport {
            pending: pending.len(),
            long_pending,
        };
        debug!(pending = report.pending, long_pending = report.long_pending, "staleness scan");
        Ok(report)
    }

    /// Run until the shutdown flag flips to `true`
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            threshold_secs = self.threshold.num_seconds(),
            "staleness monitor started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of an interval fires immediately; skip it so the
        // first scan happens one interval after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        metrics().monitor_scan_errors.inc();
                        warn!(error = %e, "staleness scan failed, retrying next tick");
                    }
                }
            }
        }
        info!("staleness monitor stopped");
    }
}
