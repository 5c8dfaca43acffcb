//! Core types for the stamp kernel.

pub mod payload;
pub mod result;
pub mod tier;
pub mod platform;

pub use payload::{RequestPayload, proof_keys, normalize_address, is_evm_address};
pub use result::{VerificationResult, VerificationRecord, ResultError};
pub use tier::{TierHierarchy, UnknownTier};
pub use platform::{
    ProviderSpec, PlatformGroupSpec, PlatformSpec, PlatformScoreSpec,
    PlatformCategory, Category,
};
