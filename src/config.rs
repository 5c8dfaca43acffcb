//! Environment-driven kernel configuration.
//!
//! ## Variables
//!
//! | Variable | Default |
//! |----------|---------|
//! | `STAMP_SESSION_TTL_SECS` | 86400 |
//! | `STAMP_SESSION_CAPACITY` | 10000 |
//! | `STAMP_SESSION_BACKEND` | `memory` (`postgres` needs the feature) |
//! | `STAMP_FLOW_TIMEOUT_SECS` | 300 |
//! | `STAMP_CALLBACK_SECRET` | development secret (logged as a warning) |
//! | `STAMP_CALLBACK_BASE_URL` | `http://localhost:8002/api/callback` |
//! | `STAMP_EVIDENCE_TIMEOUT_SECS` | 10 |
//! | `STAMP_ALLOW_LIST_URL` | unset (provider disabled) |
//! | `STAMP_IDENA_URL` | unset (providers disabled) |
//! | `STAMP_CYBER_PROFILE_URL` | unset (providers disabled) |
//! | `GOOGLE_CLIENT_ID` / `GOOGLE_CLIENT_SECRET` / `GOOGLE_CALLBACK` | unset (provider disabled) |
//! | `HOST` | `0.0.0.0` |
//! | `PORT` | 8002 |

use std::fmt;
use std::time::Duration;

use crate::session::SessionConfig;

const DEVELOPMENT_SECRET: &[u8] = b"development_only_callback_secret_not_for_production";

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

/// Where sessions are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackend {
    /// In-process LRU.
    Memory,
    /// PostgreSQL table.
    Postgres,
}

impl std::str::FromStr for SessionBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("unknown session backend: {}", other)),
        }
    }
}

/// Google OAuth client registration.
#[derive(Clone)]
pub struct GoogleCredentials {
    /// Client id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
    /// Registered redirect URI.
    pub redirect_uri: String,
}

impl fmt::Debug for GoogleCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleCredentials")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

/// Kernel configuration.
#[derive(Clone)]
pub struct KernelConfig {
    /// Session TTL in seconds.
    pub session_ttl_secs: i64,
    /// In-memory session capacity.
    pub session_capacity: usize,
    /// Session storage.
    pub session_backend: SessionBackend,
    /// Maximum wait for an authorization redirect.
    pub flow_timeout_secs: u64,
    /// HMAC key for callback state.
    pub callback_secret: Vec<u8>,
    /// Redirect landing URL.
    pub callback_base_url: String,
    /// Timeout of a single evidence request.
    pub evidence_timeout_secs: u64,
    /// Allow-list lookup URL template.
    pub allow_list_url: Option<String>,
    /// Idena lookup URL template.
    pub idena_url: Option<String>,
    /// CyberConnect lookup URL template.
    pub cyber_profile_url: Option<String>,
    /// Google OAuth registration.
    pub google: Option<GoogleCredentials>,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl fmt::Debug for KernelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelConfig")
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("session_capacity", &self.session_capacity)
            .field("session_backend", &self.session_backend)
            .field("flow_timeout_secs", &self.flow_timeout_secs)
            .field("callback_secret", &"***")
            .field("callback_base_url", &self.callback_base_url)
            .field("evidence_timeout_secs", &self.evidence_timeout_secs)
            .field("allow_list_url", &self.allow_list_url)
            .field("idena_url", &self.idena_url)
            .field("cyber_profile_url", &self.cyber_profile_url)
            .field("google", &self.google)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 86_400,
            session_capacity: 10_000,
            session_backend: SessionBackend::Memory,
            flow_timeout_secs: 300,
            callback_secret: DEVELOPMENT_SECRET.to_vec(),
            callback_base_url: "http://localhost:8002/api/callback".to_string(),
            evidence_timeout_secs: 10,
            allow_list_url: None,
            idena_url: None,
            cyber_profile_url: None,
            google: None,
            host: "0.0.0.0".to_string(),
            port: 8002,
        }
    }
}

impl KernelConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let callback_secret = match env_opt("STAMP_CALLBACK_SECRET") {
            Some(secret) => secret.into_bytes(),
            None => {
                tracing::warn!(
                    "STAMP_CALLBACK_SECRET not set, using development secret. \
                     Set this for production!"
                );
                defaults.callback_secret.clone()
            }
        };

        let google = match (
            env_opt("GOOGLE_CLIENT_ID"),
            env_opt("GOOGLE_CLIENT_SECRET"),
            env_opt("GOOGLE_CALLBACK"),
        ) {
            (Some(client_id), Some(client_secret), Some(redirect_uri)) => Some(GoogleCredentials {
                client_id,
                client_secret,
                redirect_uri,
            }),
            _ => None,
        };

        Self {
            session_ttl_secs: env_or("STAMP_SESSION_TTL_SECS", defaults.session_ttl_secs),
            session_capacity: env_or("STAMP_SESSION_CAPACITY", defaults.session_capacity),
            session_backend: env_or("STAMP_SESSION_BACKEND", defaults.session_backend),
            flow_timeout_secs: env_or("STAMP_FLOW_TIMEOUT_SECS", defaults.flow_timeout_secs),
            callback_secret,
            callback_base_url: env_opt("STAMP_CALLBACK_BASE_URL").unwrap_or(defaults.callback_base_url),
            evidence_timeout_secs: env_or("STAMP_EVIDENCE_TIMEOUT_SECS", defaults.evidence_timeout_secs),
            allow_list_url: env_opt("STAMP_ALLOW_LIST_URL"),
            idena_url: env_opt("STAMP_IDENA_URL"),
            cyber_profile_url: env_opt("STAMP_CYBER_PROFILE_URL"),
            google,
            host: env_opt("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
        }
    }

    /// Session cache settings.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            ttl_seconds: self.session_ttl_secs,
            capacity: self.session_capacity,
        }
    }

    /// Flow timeout.
    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_timeout_secs)
    }

    /// Evidence request timeout.
    pub fn evidence_timeout(&self) -> Duration {
        Duration::from_secs(self.evidence_timeout_secs)
    }

    /// Whether the callback secret is the built-in development one.
    pub fn uses_development_secret(&self) -> bool {
        self.callback_secret == DEVELOPMENT_SECRET
    }
}
