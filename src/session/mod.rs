//! Session cache for multi-step verification flows.
//!
//! Step one of a flow (opening an authorization surface, a sign-in
//! challenge) creates a session; step two arrives later through an external
//! redirect and resumes it by key.
//!
//! ## Expiry
//!
//! Expiry is checked on every read, never by a background sweep. A record
//! created at `t` with TTL `n` is readable strictly before `t + n` and gone
//! from `t + n` on.
//!
//! ## Concurrency
//!
//! Sessions are isolated by key. A single key supports sequential,
//! single-writer access; no cross-key locking is needed.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use memory::InMemorySessionCache;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresSessionCache};

/// Opaque, unguessable session correlator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Wrap an existing key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generate a fresh key from a random v4 UUID (32 hex characters).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for SessionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Errors from session cache operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No session exists under the key.
    #[error("Session not found: {0}")]
    NotFound(SessionKey),
    /// The session existed but its TTL elapsed.
    #[error("Session expired: {0}")]
    Expired(SessionKey),
    /// `create` was called for a live key.
    #[error("Session already exists: {0}")]
    AlreadyExists(SessionKey),
    /// The backing store failed.
    #[error("Session backend error: {0}")]
    Backend(String),
}

impl SessionError {
    /// Whether the error means "no usable session" (as opposed to a store failure).
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Expired(_))
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Expired(_) => "expired",
            Self::AlreadyExists(_) => "already_exists",
            Self::Backend(_) => "backend",
        }
    }
}

/// State of one in-flight multi-step flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    session_key: SessionKey,
    fields: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
    ttl_seconds: i64,
}

impl SessionRecord {
    /// Create an empty record.
    pub fn new(session_key: SessionKey, created_at: DateTime<Utc>, ttl_seconds: i64) -> Self {
        Self {
            session_key,
            fields: BTreeMap::new(),
            created_at,
            ttl_seconds,
        }
    }

    /// Rebuild a record read from a backing store.
    pub fn from_parts(
        session_key: SessionKey,
        fields: BTreeMap<String, String>,
        created_at: DateTime<Utc>,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            session_key,
            fields,
            created_at,
            ttl_seconds,
        }
    }

    /// Session key.
    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    /// All fields.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// A single field.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time to live in seconds.
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// First instant at which the record is no longer readable.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.ttl_seconds)
    }

    /// Whether the record is expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub(crate) fn set_field(&mut self, name: &str, value: &str) {
        self.fields.insert(name.to_string(), value.to_string());
    }
}

/// Session cache tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time to live of new sessions, in seconds (default: 86400).
    pub ttl_seconds: i64,
    /// Maximum live sessions for in-memory backends (default: 10000).
    pub capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 86_400,
            capacity: 10_000,
        }
    }
}

/// Key → fields store backing multi-step flows.
///
/// Backends may be in-memory, a distributed cache, or a database; core logic
/// only sees this contract.
#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Create an empty session. Fails if a live session already uses the key.
    async fn create(&self, key: &SessionKey) -> Result<(), SessionError>;

    /// Set one field of a live session.
    async fn set(&self, key: &SessionKey, field: &str, value: &str) -> Result<(), SessionError>;

    /// Load a live session.
    async fn load(&self, key: &SessionKey) -> Result<SessionRecord, SessionError>;

    /// Remove a session and return it, if it was still live.
    async fn consume(&self, key: &SessionKey) -> Result<SessionRecord, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generated_keys_are_distinct_and_opaque() {
        let a = SessionKey::generate();
        let b = SessionKey::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_record_expiry_boundary() {
        let created = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let record = SessionRecord::new(SessionKey::from("k"), created, 60);

        assert!(!record.is_expired_at(created + Duration::seconds(59)));
        assert!(record.is_expired_at(created + Duration::seconds(60)));
    }

    #[test]
    fn test_missing_errors() {
        assert!(SessionError::NotFound("a".into()).is_missing());
        assert!(SessionError::Expired("a".into()).is_missing());
        assert!(!SessionError::Backend("down".into()).is_missing());
        assert_eq!(SessionError::Expired("a".into()).kind(), "expired");
    }
}
