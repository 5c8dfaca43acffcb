//! # stamp-kernel
//!
//! Provider verification, session-backed authorization flows and stamp
//! scoring.
//!
//! The kernel answers one question:
//!
//! > Given a caller's payload, does the claimed credential hold, and what is
//! > it worth?
//!
//! ## Core Contract
//!
//! 1. A [`Provider`] turns a [`RequestPayload`] into a [`VerificationResult`]
//!    using external evidence it fetches through a collaborator trait
//! 2. An [`AuthFlowController`] drives a redirect-based authorization, keeping
//!    challenge state in a [`SessionCache`] until the callback arrives
//! 3. A [`ScoringAggregator`] turns weights and verified providers into an
//!    ordered, categorized view
//!
//! ## Architecture
//!
//! ```text
//! RequestPayload → ProviderRegistry → Provider → EvidenceSource / OAuthClient
//!                         ↑                ↓
//!               AuthFlowController    SessionCache (Memory or Postgres)
//!                         ↓
//!             VerificationResult → score_platforms → ScoringAggregator
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same payload + same evidence + same clock → identical result
//! - Registry and category fingerprints are stable across runs
//! - Score ordering is a stable sort; ties keep their input order

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod clock;
pub mod config;
pub mod evidence;
pub mod fingerprint;
pub mod flow;
pub mod provider;
pub mod scoring;
pub mod session;
pub mod telemetry;
pub mod types;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use types::{
    is_evm_address, normalize_address, proof_keys, Category, PlatformCategory, PlatformGroupSpec,
    PlatformScoreSpec, PlatformSpec, ProviderSpec, RequestPayload, ResultError, TierHierarchy,
    UnknownTier, VerificationRecord, VerificationResult,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{KernelConfig, SessionBackend};
pub use evidence::{AccessToken, EvidenceError, EvidenceRequest, EvidenceSource, OAuthClient, RawEvidence};
#[cfg(feature = "http")]
pub use evidence::{HttpEvidenceSource, HttpOAuthClient, OAuthEndpoints};
pub use provider::{
    CheckError, CheckOutcome, EvidenceCheck, ExpiryRule, FlowContext, OAuthExchangeProvider, Provider,
    ProviderConfig, ProviderDescriptor, ProviderError, ProviderKind, ProviderRegistry, RecordPolicy,
    RecordWhen, SessionBackedProvider, StatelessProvider, SESSION_UNAVAILABLE,
};
pub use session::{InMemorySessionCache, SessionCache, SessionConfig, SessionError, SessionKey, SessionRecord};
#[cfg(feature = "postgres")]
pub use session::{PostgresConfig, PostgresSessionCache};
pub use flow::{
    AuthFlowController, AuthorizationSurface, AuthorizationUrl, CallbackRouter, CancelHandle, CancelReason,
    ConnectGrant, ConnectService, Delivery, FlowEnvironment, FlowError, FlowOutcome, FlowRequest, FlowState,
    StateSigner, SurfaceError, SurfaceHandle,
};
pub use scoring::{
    included_providers, score_platforms, selected_providers, AggregateView, ScoringAggregator,
    SelectedProviders, StampWeights, WeightValue,
};
pub use catalog::{register_catalog, CatalogSources};

// Service re-exports (when service feature is enabled)
#[cfg(feature = "service")]
pub use service::{create_router, ServiceState};

/// Schema version for all wire types.
/// Increment on breaking changes to any schema type.
pub const STAMP_KERNEL_SCHEMA_VERSION: &str = "1.0.0";
