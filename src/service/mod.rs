//! Stamp Kernel REST Service
//!
//! Exposes provider verification and scoring as a REST API, and lands the
//! redirects of authorization flows.
//!
//! ## Endpoints
//!
//! - `POST /api/verify` - Verify a payload against one or more providers
//! - `GET /api/providers` - List registered providers and platforms
//! - `POST /api/score` - Score and order platforms for display
//! - `POST /api/flows` - Start an authorization flow, returns its URL
//! - `GET /api/flows/:id` - Poll a flow
//! - `DELETE /api/flows/:id` - Report a closed authorization surface
//! - `GET /api/callback` - Redirect landing for authorization flows
//! - `GET /health` - Detailed service health check
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health/startup` - Startup probe

pub mod flows;
pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::{metrics_middleware, record_batch_verification, record_callback};
pub use flows::{FlowStatus, FlowTable, FlowTemplate, StartFlowRequest, StartFlowResponse};
pub use routes::{create_router, ErrorResponse};
pub use state::ServiceState;
