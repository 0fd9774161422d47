//! Metrics collection and export module

use crate::monitor::{MetricsSink, LONG_PENDING_GAUGE, PENDING_GAUGE};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub requests_total: IntCounterVec,
    pub requests_failed: IntCounterVec,
    pub transactions_dispatched: IntCounter,
    pub transactions_rejected: IntCounter,
    pub monitor_scan_errors: IntCounter,

    // Gauges
    pub pending_log: IntGauge,
    pub long_pending_log: IntGauge,
    pub managed_keys: IntGauge,

    // Histograms
    pub request_latency: HistogramVec,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("launcher_requests_total", "Requests received per operation"),
            &["operation"],
        )?;

        let requests_failed = IntCounterVec::new(
            Opts::new("launcher_requests_failed", "Failed requests per operation and error kind"),
            &["operation", "kind"],
        )?;

        let transactions_dispatched = IntCounter::with_opts(Opts::new(
            "launcher_transactions_dispatched",
            "Signed transactions accepted by the network",
        ))?;

        let transactions_rejected = IntCounter::with_opts(Opts::new(
            "launcher_transactions_rejected",
            "Launch logs failed before broadcast",
        ))?;

        let monitor_scan_errors = IntCounter::with_opts(Opts::new(
            "launcher_monitor_scan_errors",
            "Staleness monitor ticks that could not read the store",
        ))?;

        let pending_log = IntGauge::with_opts(Opts::new(
            "pending_log",
            "Launch logs currently in PENDING",
        ))?;

        let long_pending_log = IntGauge::with_opts(Opts::new(
            "long_pending_log",
            "PENDING launch logs older than the staleness threshold",
        ))?;

        let managed_keys =
            IntGauge::with_opts(Opts::new("launcher_managed_keys", "Signing keys loaded"))?;

        let request_latency = HistogramVec::new(
            HistogramOpts::new("launcher_request_latency_seconds", "Coordinator request latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation"],
        )?;

        // Register all metrics
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(requests_failed.clone()))?;
        registry.register(Box::new(transactions_dispatched.clone()))?;
        registry.register(Box::new(transactions_rejected.clone()))?;
        registry.register(Box::new(monitor_scan_errors.clone()))?;
        registry.register(Box::new(pending_log.clone()))?;
        registry.register(Box::new(long_pending_log.clone()))?;
        registry.register(Box::new(managed_keys.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            requests_failed,
            transactions_dispatched,
            transactions_rejected,
            monitor_scan_errors,
            pending_log,
            long_pending_log,
            managed_keys,
            request_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every registered metric
    pub fn encode_text(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    pub fn record_request(&self, operation: &str) {
        self.requests_total.with_label_values(&[operation]).inc();
    }

    pub fn record_failure(&self, operation: &str, kind: &str) {
        self.requests_failed
            .with_label_values(&[operation, kind])
            .inc();
    }
}

impl MetricsSink for Metrics {
    fn gauge(&self, name: &str, value: f64) {
        match name {
            PENDING_GAUGE => self.pending_log.set(value as i64),
            LONG_PENDING_GAUGE => self.long_pending_log.set(value as i64),
            _ => {
                tracing::debug!("Unknown gauge name: {}", name);
            }
        }
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Sink that forwards gauges to the global registry
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsHandle;

impl MetricsSink for MetricsHandle {
    fn gauge(&self, name: &str, value: f64) {
        metrics().gauge(name, value);
    }
}

/// Timer helper for measuring request duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }

    /// Timer for an operation that began at `start`
    pub fn started_at(operation: &'static str, start: Instant) -> Self {
        Self { start, operation }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Finish the timer and record to the latency histogram
    pub fn finish(self) {
        metrics()
            .request_latency
            .with_label_values(&[self.operation])
            .observe(self.elapsed_secs());
    }
}
