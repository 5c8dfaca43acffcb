//! In-memory session cache.

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use super::{SessionCache, SessionConfig, SessionError, SessionKey, SessionRecord};

/// Capacity used when the configured one is zero.
const FALLBACK_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1_000) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

/// Session cache held in process memory.
///
/// Bounded by an LRU: when full, the least recently touched session is
/// evicted. The lock is held only for the map operation itself, never across
/// an `.await`.
pub struct InMemorySessionCache {
    entries: Mutex<LruCache<SessionKey, SessionRecord>>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
}

impl InMemorySessionCache {
    /// Create a cache using the system clock.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a cache with an explicit clock.
    pub fn with_clock(config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(FALLBACK_CAPACITY);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            config,
            clock,
        }
    }

    /// Number of stored sessions (expired ones included until observed).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no sessions are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Configured TTL in seconds.
    pub fn ttl_seconds(&self) -> i64 {
        self.config.ttl_seconds
    }

    /// Run `f` on the live record for `key`, dropping it if it has expired.
    fn with_live<T>(
        &self,
        key: &SessionKey,
        f: impl FnOnce(&mut SessionRecord) -> T,
    ) -> Result<T, SessionError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let expired = match entries.get_mut(key) {
            None => return Err(SessionError::NotFound(key.clone())),
            Some(record) if record.is_expired_at(now) => true,
            Some(record) => return Ok(f(record)),
        };

        if expired {
            entries.pop(key);
        }
        Err(SessionError::Expired(key.clone()))
    }
}

impl Default for InMemorySessionCache {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

#[async_trait]
impl SessionCache for InMemorySessionCache {
    async fn create(&self, key: &SessionKey) -> Result<(), SessionError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        if let Some(existing) = entries.peek(key) {
            if !existing.is_expired_at(now) {
                return Err(SessionError::AlreadyExists(key.clone()));
            }
        }

        let record = SessionRecord::new(key.clone(), now, self.config.ttl_seconds);
        if let Some((evicted, _)) = entries.push(key.clone(), record) {
            if &evicted != key {
                tracing::debug!(
                    target: "stamp_kernel::session",
                    evicted = %evicted,
                    "session evicted at capacity"
                );
            }
        }
        Ok(())
    }

    async fn set(&self, key: &SessionKey, field: &str, value: &str) -> Result<(), SessionError> {
        self.with_live(key, |record| record.set_field(field, value))
    }

    async fn load(&self, key: &SessionKey) -> Result<SessionRecord, SessionError> {
        self.with_live(key, |record| record.clone())
    }

    async fn consume(&self, key: &SessionKey) -> Result<SessionRecord, SessionError> {
        let now = self.clock.now();
        let record = self
            .entries
            .lock()
            .pop(key)
            .ok_or_else(|| SessionError::NotFound(key.clone()))?;

        if record.is_expired_at(now) {
            return Err(SessionError::Expired(key.clone()));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn cache_with_clock(ttl_seconds: i64, capacity: usize) -> (InMemorySessionCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
        ));
        let cache = InMemorySessionCache::with_clock(
            SessionConfig {
                ttl_seconds,
                capacity,
            },
            clock.clone(),
        );
        (cache, clock)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (cache, _) = cache_with_clock(86_400, 10);
        let key = SessionKey::from("sessionKey");

        cache.create(&key).await.unwrap();
        cache.set(&key, "address", "0x5867b46bd12769e0b7522a5b64acd7c1eacb183a").await.unwrap();
        cache.set(&key, "signature", "signature").await.unwrap();

        let record = cache.load(&key).await.unwrap();
        assert_eq!(record.field("address"), Some("0x5867b46bd12769e0b7522a5b64acd7c1eacb183a"));
        assert_eq!(record.field("signature"), Some("signature"));
        assert_eq!(record.ttl_seconds(), 86_400);
    }

    #[tokio::test]
    async fn test_create_rejects_live_key() {
        let (cache, _) = cache_with_clock(60, 10);
        let key = SessionKey::from("dup");

        cache.create(&key).await.unwrap();
        assert_eq!(
            cache.create(&key).await,
            Err(SessionError::AlreadyExists(key.clone()))
        );
    }

    #[tokio::test]
    async fn test_expiry_is_checked_on_read_at_boundary() {
        let (cache, clock) = cache_with_clock(86_400, 10);
        let key = SessionKey::from("ttl");
        cache.create(&key).await.unwrap();

        clock.advance_secs(86_399);
        assert!(cache.load(&key).await.is_ok());

        clock.advance_secs(1);
        assert_eq!(cache.load(&key).await, Err(SessionError::Expired(key.clone())));
        // Observed expiry removes the record.
        assert_eq!(cache.load(&key).await, Err(SessionError::NotFound(key.clone())));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_set_on_expired_session_fails() {
        let (cache, clock) = cache_with_clock(10, 10);
        let key = SessionKey::from("late");
        cache.create(&key).await.unwrap();

        clock.advance_secs(10);
        assert_eq!(
            cache.set(&key, "address", "0x1").await,
            Err(SessionError::Expired(key.clone()))
        );
    }

    #[tokio::test]
    async fn test_expired_key_can_be_created_again() {
        let (cache, clock) = cache_with_clock(10, 10);
        let key = SessionKey::from("reuse");
        cache.create(&key).await.unwrap();

        clock.advance_secs(11);
        cache.create(&key).await.unwrap();
        assert!(cache.load(&key).await.unwrap().fields().is_empty());
    }

    #[tokio::test]
    async fn test_consume_removes_session() {
        let (cache, _) = cache_with_clock(60, 10);
        let key = SessionKey::from("once");
        cache.create(&key).await.unwrap();
        cache.set(&key, "code", "abc").await.unwrap();

        let record = cache.consume(&key).await.unwrap();
        assert_eq!(record.field("code"), Some("abc"));
        assert_eq!(cache.consume(&key).await, Err(SessionError::NotFound(key.clone())));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated_by_key() {
        let (cache, _) = cache_with_clock(60, 10);
        let a = SessionKey::from("a");
        let b = SessionKey::from("b");
        cache.create(&a).await.unwrap();
        cache.create(&b).await.unwrap();

        cache.set(&a, "address", "0xaaa").await.unwrap();
        cache.set(&b, "address", "0xbbb").await.unwrap();

        assert_eq!(cache.load(&a).await.unwrap().field("address"), Some("0xaaa"));
        assert_eq!(cache.load(&b).await.unwrap().field("address"), Some("0xbbb"));
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let (cache, _) = cache_with_clock(60, 2);
        let keys: Vec<SessionKey> = ["k1", "k2", "k3"].iter().map(|k| SessionKey::from(*k)).collect();

        for key in &keys {
            cache.create(key).await.unwrap();
        }

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.load(&keys[0]).await, Err(SessionError::NotFound(keys[0].clone())));
        assert!(cache.load(&keys[2]).await.is_ok());
    }
}
