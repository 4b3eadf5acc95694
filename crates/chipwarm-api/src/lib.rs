//! Chipwarm API crate - axum HTTP server, route handlers, SSE streaming.
//!
//! Exposes chip provisioning, session connect/disconnect/status and the
//! simulation controls over JSON, behind bearer-token authentication.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
