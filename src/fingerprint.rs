//! Canonical fingerprints for static configuration.
//!
//! The provider registry and category configuration expose a short hash so
//! clients can tell whether the set of providers they cached is still the
//! one the kernel serves.
//!
//! ## Determinism
//!
//! - Struct fields serialize in declaration order
//! - Maps must be `BTreeMap` (never `HashMap`) in fingerprinted data
//! - Output is xxHash64 of the compact JSON encoding

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Serialize a value to canonical JSON bytes.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// Compute the fingerprint of a serializable value.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<u64, serde_json::Error> {
    Ok(xxh64(&to_canonical_bytes(value)?, 0))
}

/// Compute the fingerprint and render it as 16 hex characters.
pub fn fingerprint_hex<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(format!("{:016x}", fingerprint(value)?))
}
