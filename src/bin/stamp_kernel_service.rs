//! Stamp Kernel Service Binary
//!
//! Runs the Stamp Kernel as a REST API service:
//! - Structured JSON logging for Cloud Logging
//! - Request tracing with correlation IDs
//! - Graceful shutdown handling
//! - Health check endpoints
//!
//! ## Configuration
//!
//! See [`stamp_kernel::config`] for the kernel variables. Additionally:
//! - `DATABASE_URL`, `DB_*`: PostgreSQL pool, used when `STAMP_SESSION_BACKEND=postgres`
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//!
//! ## Usage
//!
//! ```bash
//! STAMP_CALLBACK_SECRET=... STAMP_ALLOW_LIST_URL=... cargo run --bin stamp_kernel_service --features service
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use stamp_kernel::catalog::google_authorization_template;
use stamp_kernel::service::{create_router, FlowTemplate, ServiceState};
use stamp_kernel::{
    register_catalog, AuthorizationUrl, CatalogSources, EvidenceSource, HttpEvidenceSource, HttpOAuthClient,
    InMemorySessionCache, KernelConfig, OAuthClient, OAuthEndpoints, PostgresConfig, PostgresSessionCache,
    ProviderRegistry, SessionBackend, SessionCache,
};

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stamp_kernel_service=info,stamp_kernel=info,tower_http=info,sqlx=warn".into());

    if log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .flatten_event(true),
            )
            .init();
    }
}

/// Request logging middleware that adds correlation ID and timing
async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let trace_id = request
        .headers()
        .get("X-Cloud-Trace-Context")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split('/').next().unwrap_or(s).to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let method = request.method().clone();
    let uri = request.uri().path().to_string();

    let span = info_span!(
        "request",
        trace_id = %trace_id,
        method = %method,
        path = %uri,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let response = next.run(request).instrument(span.clone()).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    span.record("status", status);
    span.record("latency_ms", latency.as_millis() as u64);

    info!(
        target: "stamp_kernel_service::access",
        trace_id = %trace_id,
        method = %method,
        path = %uri,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request completed"
    );

    response
}

async fn connect_sessions(config: &KernelConfig) -> Result<Arc<dyn SessionCache>, Box<dyn std::error::Error>> {
    match config.session_backend {
        SessionBackend::Memory => {
            info!(capacity = config.session_capacity, "Using in-memory session cache");
            Ok(Arc::new(InMemorySessionCache::new(config.session())))
        }
        SessionBackend::Postgres => {
            info!("Connecting to PostgreSQL...");
            let connect_start = Instant::now();

            let cache = match tokio::time::timeout(
                Duration::from_secs(30),
                PostgresSessionCache::new(PostgresConfig::from_env(), config.session()),
            )
            .await
            {
                Ok(Ok(cache)) => cache,
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    return Err(e.into());
                }
                Err(_) => {
                    tracing::error!("PostgreSQL connection timeout after 30s");
                    return Err("Database connection timeout".into());
                }
            };

            info!(
                latency_ms = connect_start.elapsed().as_millis() as u64,
                "PostgreSQL connection established"
            );
            Ok(Arc::new(cache))
        }
    }
}

fn evidence_source(url: &Option<String>, timeout: Duration) -> Result<Option<Arc<dyn EvidenceSource>>, Box<dyn std::error::Error>> {
    Ok(match url {
        Some(url) => Some(Arc::new(HttpEvidenceSource::new(url.clone(), timeout)?)),
        None => None,
    })
}

fn catalog_sources(config: &KernelConfig, sessions: Arc<dyn SessionCache>) -> Result<CatalogSources, Box<dyn std::error::Error>> {
    let timeout = config.evidence_timeout();

    let google: Option<Arc<dyn OAuthClient>> = match &config.google {
        Some(google) => Some(Arc::new(HttpOAuthClient::new(
            OAuthEndpoints::google(&google.client_id, &google.client_secret, &google.redirect_uri),
            timeout,
        )?)),
        None => None,
    };

    Ok(CatalogSources {
        allow_list: evidence_source(&config.allow_list_url, timeout)?,
        idena: evidence_source(&config.idena_url, timeout)?,
        google,
        cyber_profile: evidence_source(&config.cyber_profile_url, timeout)?,
        sessions: Some(sessions),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let version = env!("CARGO_PKG_VERSION");
    let build_sha = option_env!("BUILD_SHA").unwrap_or("dev");

    info!(version = version, build_sha = build_sha, "Starting Stamp Kernel Service");

    let config = KernelConfig::from_env();
    if config.uses_development_secret() {
        warn!("Callback state is signed with the development secret. This is a SECURITY RISK in production!");
    }
    info!(config = ?config, "Configuration loaded");

    let sessions = connect_sessions(&config).await?;

    let mut registry = ProviderRegistry::new();
    register_catalog(&mut registry, &catalog_sources(&config, Arc::clone(&sessions))?)?;
    info!(
        provider_count = registry.len(),
        registry_fingerprint = %registry.fingerprint()?,
        "Provider registry initialized"
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let google_flow = config.google.as_ref().map(|google| {
        FlowTemplate::new(
            "Google",
            AuthorizationUrl::Template(google_authorization_template(&google.client_id, &google.redirect_uri)),
        )
    });

    let mut state = ServiceState::new(registry, sessions, config);
    if let Some(template) = google_flow {
        state = state.with_flow("Google", template);
        info!("Google authorization flow enabled");
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    info!(address = %addr, version = version, "Stamp Kernel Service listening");

    let listener = TcpListener::bind(addr).await?;

    let shutdown_signal = async {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
            _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
        }
    };

    info!("Ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Stamp Kernel Service shutdown complete");

    Ok(())
}
