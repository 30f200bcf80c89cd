use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Resolution and execution
            .route("/resolve", post(handlers::api::resolve))
            .route("/ask", post(handlers::api::ask))
            .route("/validate", post(handlers::api::validate))
            // Learning
            .route("/feedback", post(handlers::api::feedback))
            .route("/learning", get(handlers::api::learning))
            // Health
            .route("/monitor", get(handlers::api::monitor))
            .route(
                "/monitor/circuits/{fingerprint}/reset",
                post(handlers::api::reset_circuit),
            )
            .route("/cache", delete(handlers::api::clear_cache))
            .route("/status", get(handlers::api::system_status)),
    )
}
