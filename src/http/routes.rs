use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session control
        .route("/voice/start", post(handlers::start_session))
        .route("/voice/end", post(handlers::end_session))
        .route("/voice/error/dismiss", post(handlers::dismiss_error))
        // Session queries
        .route("/voice/status", get(handlers::get_status))
        .route("/voice/logs", get(handlers::get_logs))
        // Allow cross-origin front-ends
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
