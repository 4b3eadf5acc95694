//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression,
//! authentication, rate limiting and all endpoint handlers.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use chipwarm_core::error::ChipwarmError;

use crate::handlers;
use crate::rate_limit::RateLimiter;
use crate::state::AppState;

fn local_origins(port: u16) -> Vec<HeaderValue> {
    let dev_port = port.saturating_add(1);
    [port, dev_port]
        .into_iter()
        .flat_map(|p| [format!("http://127.0.0.1:{p}"), format!("http://localhost:{p}")])
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect()
}

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // CORS: localhost origins on the configured port and port+1.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(local_origins(state.config.general.port)))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    // Routes that do NOT require authentication.
    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/register", post(handlers::register))
        .route("/plans", get(handlers::list_plans))
        .route("/plans/{id}", get(handlers::get_plan));

    let limiter = RateLimiter::new(state.config.api.rate_limit_per_sec);

    let rate_limited_routes = Router::new()
        .route("/auth/profile", get(handlers::profile))
        .route("/auth/logout", post(handlers::logout))
        .route("/plans/purchase", post(handlers::purchase_plan))
        .route("/plans/user", get(handlers::user_plans))
        .route("/chips", get(handlers::list_chips).post(handlers::create_chip))
        .route(
            "/chips/{id}",
            get(handlers::get_chip).delete(handlers::delete_chip),
        )
        .route("/chips/{id}/status", patch(handlers::update_chip_status))
        .route("/sessions/connect", post(handlers::connect_session))
        .route("/sessions/disconnect", post(handlers::disconnect_session))
        .route("/sessions/status/{chip_id}", get(handlers::session_status))
        .route("/simulations/start", post(handlers::start_simulation))
        .route("/simulations/{id}", get(handlers::get_simulation))
        .route("/simulations/{id}/pause", post(handlers::pause_simulation))
        .route("/simulations/{id}/resume", post(handlers::resume_simulation))
        .route("/simulations/{id}/stop", post(handlers::stop_simulation))
        .route(
            "/simulations/{id}/messages",
            get(handlers::simulation_messages),
        )
        .layer(axum::middleware::from_fn(
            crate::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::Extension(limiter));

    // SSE stream exempt from rate limiting.
    let stream_routes = Router::new().route("/stream", get(handlers::stream));

    let protected_routes =
        rate_limited_routes
            .merge(stream_routes)
            .route_layer(axum::middleware::from_fn_with_state(
                state.clone(),
                crate::auth::require_auth,
            ));

    public_routes
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the router on 127.0.0.1 until `shutdown` resolves.
pub async fn start_server(
    port: u16,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), ChipwarmError> {
    let addr = format!("127.0.0.1:{}", port);
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ChipwarmError::Api(format!("Failed to bind: {}", e)))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ChipwarmError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
