//! Service middleware for metrics and request tracking.
//!
//! ## Metrics Exposed
//!
//! - `request` - request count and latency by path pattern, method, status
//! - `callback` - redirect callback deliveries by outcome
//! - `batch_verification` - provider count and latency of `/api/verify`

use axum::{extract::Request, middleware::Next, response::Response};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::info;

/// Metrics middleware that records request counts and latency.
///
/// Uses tracing for now; the log lines are aggregated downstream.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    info!(
        target: "stamp_kernel::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request_metric"
    );

    response
}

fn id_pattern() -> Option<&'static regex_lite::Regex> {
    static PATTERN: OnceLock<Option<regex_lite::Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            regex_lite::Regex::new(
                r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}|[0-9a-f]{32}",
            )
            .ok()
        })
        .as_ref()
}

/// Normalize path for metrics to avoid high cardinality.
///
/// Replaces UUIDs and session keys with a placeholder.
fn normalize_path(path: &str) -> String {
    match id_pattern() {
        Some(pattern) => pattern.replace_all(path, ":id").to_string(),
        None => path.to_string(),
    }
}

/// Record the outcome of a redirect callback delivery.
pub fn record_callback(outcome: &str) {
    info!(
        target: "stamp_kernel::metrics",
        metric_type = "callback",
        outcome = outcome,
        "callback_metric"
    );
}

/// Record a multi-provider verification request.
pub fn record_batch_verification(provider_count: usize, valid_count: usize, latency_ms: u64) {
    info!(
        target: "stamp_kernel::metrics",
        metric_type = "batch_verification",
        provider_count = provider_count,
        valid_count = valid_count,
        latency_ms = latency_ms,
        "batch_verification_metric"
    );
}
