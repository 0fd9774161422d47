//! Structured logging and request context

use std::time::Instant;
use uuid::Uuid;

/// Structured logger for launch events, tagged with one request id
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    request_id: String,
}

impl StructuredLogger {
    pub fn new(request_id: String) -> Self {
        Self { request_id }
    }

    pub fn log_create_accepted(&self, log_id: u64, item_type: &str, item_id: &str, gas_price: &str) {
        tracing::info!(
            request_id = %self.request_id,
            log_id = %log_id,
            item_type = %item_type,
            item_id = %item_id,
            gas_price = %gas_price,
            "Launch request accepted"
        );
    }

    pub fn log_lookup(&self, key: &str, matches: usize) {
        tracing::debug!(
            request_id = %self.request_id,
            key = %key,
            matches = %matches,
            "Launch log lookup"
        );
    }

    pub fn log_transition(&self, log_id: u64, hash: &str, from: &str, to: &str) {
        tracing::info!(
            request_id = %self.request_id,
            log_id = %log_id,
            hash = %hash,
            from = %from,
            to = %to,
            "Launch log transition"
        );
    }

    pub fn log_rejected(&self, operation: &str, kind: &str, error: &str, latency_ms: u64) {
        tracing::warn!(
            request_id = %self.request_id,
            operation = %operation,
            kind = %kind,
            error = %error,
            latency_ms = %latency_ms,
            "Request rejected"
        );
    }
}

/// Per-request context passed through a coordinator operation
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request ID
    pub request_id: String,

    /// Operation name
    pub operation: &'static str,

    /// When the request entered the coordinator
    pub started_at: Instant,

    /// Structured logger instance
    pub logger: StructuredLogger,
}

impl RequestContext {
    pub fn new(operation: &'static str) -> Self {
        let request_id = Uuid::new_v4().to_string();
        Self {
            request_id: request_id.clone(),
            operation,
            started_at: Instant::now(),
            logger: StructuredLogger::new(request_id),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}
