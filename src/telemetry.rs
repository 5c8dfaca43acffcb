//! Metric-style log events.
//!
//! Events are emitted through `tracing` under dedicated targets so they can be
//! aggregated from logs:
//!
//! - `stamp_kernel::metrics` - verification and flow outcomes
//! - `stamp_kernel::session` - session misses (not found vs expired)

use tracing::{info, warn};

/// Outcome label for a single provider verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Claim satisfied.
    Valid,
    /// Claim not met or payload malformed.
    Invalid,
    /// Evidence source failed.
    Error,
}

impl VerificationOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Error => "error",
        }
    }
}

/// Record a provider verification.
pub fn record_verification(provider: &str, outcome: VerificationOutcome, latency_ms: u64) {
    info!(
        target: "stamp_kernel::metrics",
        metric_type = "verification",
        provider = provider,
        result = outcome.as_str(),
        latency_ms = latency_ms,
        "verification_metric"
    );
}

/// Record a session-backed verification that found no usable session.
///
/// `reason` is `"not_found"` or `"expired"`.
pub fn record_session_miss(provider: &str, session_key: &str, reason: &str) {
    warn!(
        target: "stamp_kernel::session",
        provider = provider,
        session_key = session_key,
        reason = reason,
        "session unavailable for verification"
    );
}

/// Record the terminal state of an authorization flow.
pub fn record_flow_outcome(platform: &str, outcome: &str, latency_ms: u64) {
    info!(
        target: "stamp_kernel::metrics",
        metric_type = "auth_flow",
        platform = platform,
        outcome = outcome,
        latency_ms = latency_ms,
        "auth_flow_metric"
    );
}
