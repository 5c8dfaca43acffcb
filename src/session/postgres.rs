//! PostgreSQL session cache for multi-instance deployments.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS stamp_sessions (
//!     session_key TEXT PRIMARY KEY,
//!     fields      JSONB NOT NULL DEFAULT '{}'::jsonb,
//!     created_at  TIMESTAMPTZ NOT NULL,
//!     ttl_seconds BIGINT NOT NULL
//! );
//! ```
//!
//! Expiry is evaluated against the injected [`Clock`], not the database
//! clock, so application instances agree with the in-memory backend.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use super::{SessionCache, SessionConfig, SessionError, SessionKey, SessionRecord};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stamp_sessions (
    session_key TEXT PRIMARY KEY,
    fields      JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at  TIMESTAMPTZ NOT NULL,
    ttl_seconds BIGINT NOT NULL
)
"#;

/// Configuration for PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/stamps".to_string()),
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            min_connections: env_or("DB_MIN_CONNECTIONS", 2),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_or("DB_MAX_LIFETIME_SECS", 1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn backend(err: sqlx::Error) -> SessionError {
    SessionError::Backend(err.to_string())
}

/// Session cache stored in a PostgreSQL table.
pub struct PostgresSessionCache {
    pool: PgPool,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
}

impl PostgresSessionCache {
    /// Connect a pool and make sure the table exists.
    pub async fn new(pg: PostgresConfig, config: SessionConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = pg.max_connections,
            min_connections = pg.min_connections,
            connect_timeout_secs = pg.connect_timeout_secs,
            "Initializing PostgreSQL session pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .min_connections(pg.min_connections)
            .acquire_timeout(Duration::from_secs(pg.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(pg.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(pg.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&pg.database_url)
            .await?;

        let cache = Self {
            pool,
            config,
            clock: Arc::new(SystemClock),
        };
        cache.ensure_schema().await?;
        Ok(cache)
    }

    /// Replace the clock used for expiry checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Create the sessions table if missing.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> Result<SessionRecord, sqlx::Error> {
        let key: String = row.try_get("session_key")?;
        let fields: Json<BTreeMap<String, String>> = row.try_get("fields")?;
        let created_at: chrono::DateTime<chrono::Utc> = row.try_get("created_at")?;
        let ttl_seconds: i64 = row.try_get("ttl_seconds")?;
        Ok(SessionRecord::from_parts(
            SessionKey::new(key),
            fields.0,
            created_at,
            ttl_seconds,
        ))
    }

    async fn fetch(&self, key: &SessionKey) -> Result<Option<SessionRecord>, SessionError> {
        let row = sqlx::query(
            r#"
            SELECT session_key, fields, created_at, ttl_seconds
            FROM stamp_sessions
            WHERE session_key = $1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref()
            .map(Self::parse_row)
            .transpose()
            .map_err(backend)
    }

    async fn delete(&self, key: &SessionKey) -> Result<(), SessionError> {
        sqlx::query("DELETE FROM stamp_sessions WHERE session_key = $1")
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl SessionCache for PostgresSessionCache {
    async fn create(&self, key: &SessionKey) -> Result<(), SessionError> {
        let now = self.clock.now();

        // Replaces an expired row, never a live one.
        let result = sqlx::query(
            r#"
            INSERT INTO stamp_sessions (session_key, fields, created_at, ttl_seconds)
            VALUES ($1, '{}'::jsonb, $2, $3)
            ON CONFLICT (session_key) DO UPDATE
            SET fields = '{}'::jsonb, created_at = EXCLUDED.created_at, ttl_seconds = EXCLUDED.ttl_seconds
            WHERE stamp_sessions.created_at + make_interval(secs => stamp_sessions.ttl_seconds) <= $2
            "#,
        )
        .bind(key.as_str())
        .bind(now)
        .bind(self.config.ttl_seconds)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(SessionError::AlreadyExists(key.clone()));
        }
        Ok(())
    }

    async fn set(&self, key: &SessionKey, field: &str, value: &str) -> Result<(), SessionError> {
        self.load(key).await?;

        sqlx::query(
            r#"
            UPDATE stamp_sessions
            SET fields = fields || jsonb_build_object($2::text, $3::text)
            WHERE session_key = $1
            "#,
        )
        .bind(key.as_str())
        .bind(field)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn load(&self, key: &SessionKey) -> Result<SessionRecord, SessionError> {
        let record = self
            .fetch(key)
            .await?
            .ok_or_else(|| SessionError::NotFound(key.clone()))?;

        if record.is_expired_at(self.clock.now()) {
            self.delete(key).await?;
            return Err(SessionError::Expired(key.clone()));
        }
        Ok(record)
    }

    async fn consume(&self, key: &SessionKey) -> Result<SessionRecord, SessionError> {
        let row = sqlx::query(
            r#"
            DELETE FROM stamp_sessions
            WHERE session_key = $1
            RETURNING session_key, fields, created_at, ttl_seconds
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let record = row
            .as_ref()
            .map(Self::parse_row)
            .transpose()
            .map_err(backend)?
            .ok_or_else(|| SessionError::NotFound(key.clone()))?;

        if record.is_expired_at(self.clock.now()) {
            return Err(SessionError::Expired(key.clone()));
        }
        Ok(record)
    }
}
