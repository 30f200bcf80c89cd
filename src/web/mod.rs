pub mod handlers;
pub mod routes;
pub mod state;

use axum::http::StatusCode;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::WebConfig;
use crate::error::EngineError;
use state::AppState;

/// Serves the JSON API until the listener fails.
pub async fn run_server(config: WebConfig, state: Arc<AppState>) -> std::io::Result<()> {
    let app = routes::api_routes()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);
    axum::serve(listener, app).await
}

/// Maps engine errors to bounded, user-safe responses. Details stay in the log.
pub(crate) fn error_response(err: EngineError) -> (StatusCode, String) {
    match err {
        EngineError::InvalidInput(message) => (StatusCode::BAD_REQUEST, message),
        EngineError::Validation(_) => (
            StatusCode::BAD_REQUEST,
            "The SQL did not pass validation".to_string(),
        ),
        EngineError::Cancelled => (
            StatusCode::REQUEST_TIMEOUT,
            "The request was cancelled".to_string(),
        ),
        EngineError::Timeout(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            "The request took too long".to_string(),
        ),
        other => {
            error!("Request failed: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            )
        }
    }
}
