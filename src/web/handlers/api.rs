use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::learning::{CaptureOutcome, LearnedQuery, LearningStats};
use crate::engine::monitor::Dashboard;
use crate::engine::query::{Intent, ParsedQuery, Question};
use crate::engine::resolver::{Answer, Resolution, ResolverStatus};
use crate::engine::validator::ValidationResult;
use crate::web::error_response;
use crate::web::state::AppState;

// Request types

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub question: String,
    /// Output of the upstream NL-understanding step.
    pub parsed: ParsedQuery,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub sql: String,
    #[serde(default)]
    pub allow_write: bool,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub question: String,
    pub sql: String,
    pub intent: Option<Intent>,
    pub helpful: bool,
    #[serde(default)]
    pub latency_ms: u64,
}

// Response types

#[derive(Debug, Serialize)]
pub struct LearningOverview {
    pub enabled: bool,
    pub stats: Option<LearningStats>,
    pub candidates: Vec<LearnedQuery>,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub schema_refreshed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub engine: ResolverStatus,
}

/// Cancels when the handler future is dropped, i.e. the client went away.
fn request_token() -> (CancellationToken, tokio_util::sync::DropGuard) {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    (token, guard)
}

pub async fn resolve(
    state: State<Arc<AppState>>,
    Json(payload): Json<ResolveRequest>,
) -> Result<Json<Resolution>, (StatusCode, String)> {
    let question = Question::new(payload.question).map_err(error_response)?;
    let (cancel, _guard) = request_token();

    let resolution = state
        .resolver
        .resolve(question.as_str(), &payload.parsed, &cancel)
        .await
        .map_err(error_response)?;
    Ok(Json(resolution))
}

pub async fn ask(
    state: State<Arc<AppState>>,
    Json(payload): Json<ResolveRequest>,
) -> Result<Json<Answer>, (StatusCode, String)> {
    let question = Question::new(payload.question).map_err(error_response)?;
    info!("Answering question: {}", question);
    let (cancel, _guard) = request_token();

    let answer = state
        .resolver
        .answer(question.as_str(), &payload.parsed, &cancel)
        .await
        .map_err(error_response)?;
    Ok(Json(answer))
}

pub async fn validate(
    state: State<Arc<AppState>>,
    Json(payload): Json<ValidateRequest>,
) -> Json<ValidationResult> {
    Json(
        state
            .resolver
            .validator()
            .validate_with(&payload.sql, payload.allow_write),
    )
}

pub async fn feedback(
    state: State<Arc<AppState>>,
    Json(payload): Json<FeedbackRequest>,
) -> Result<Json<CaptureOutcome>, (StatusCode, String)> {
    let question = Question::new(payload.question).map_err(error_response)?;
    let outcome = state
        .resolver
        .submit_feedback(
            question.as_str(),
            &payload.sql,
            payload.intent,
            payload.helpful,
            payload.latency_ms,
        )
        .await
        .map_err(error_response)?;

    outcome.map(Json).ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Learning is disabled".to_string(),
        )
    })
}

pub async fn learning(state: State<Arc<AppState>>) -> Json<LearningOverview> {
    let Some(store) = state.resolver.learning().cloned() else {
        return Json(LearningOverview {
            enabled: false,
            stats: None,
            candidates: Vec::new(),
        });
    };

    let stats = state.resolver.learning_stats().await;
    let candidates = tokio::task::spawn_blocking(move || store.get_promotion_candidates(10))
        .await
        .unwrap_or_else(|e| {
            error!("Promotion candidate task failed: {}", e);
            Vec::new()
        });

    Json(LearningOverview {
        enabled: true,
        stats,
        candidates,
    })
}

pub async fn monitor(state: State<Arc<AppState>>) -> Json<Dashboard> {
    Json(state.resolver.monitor().get_dashboard())
}

pub async fn reset_circuit(
    state: State<Arc<AppState>>,
    Path(fingerprint): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.resolver.monitor().reset_circuit(&fingerprint) {
        info!("Circuit {} reset by operator", fingerprint);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            format!("No circuit for fingerprint '{}'", fingerprint),
        ))
    }
}

pub async fn clear_cache(state: State<Arc<AppState>>) -> impl IntoResponse {
    state.resolver.clear_cache();
    StatusCode::NO_CONTENT
}

pub async fn system_status(state: State<Arc<AppState>>) -> Json<SystemStatus> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        schema_refreshed_at: state
            .schema_manager
            .as_ref()
            .and_then(|manager| manager.last_refresh()),
        engine: state.resolver.status(),
    })
}
