use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::message::{
    Category, HistoryItem, MessageRecord, SenderHistory, Sentiment, Urgency, MAX_BODY_CHARS,
};
use crate::moderation::ModerationVerdict;
use crate::pipeline::{
    CategorizationRun, LayerReport, ModerationRun, Pipeline, PriorityOverrides, PriorityRun,
    ProcessSummary,
};
use crate::signals::{self, SignalReport};
use crate::store::StoreError;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Bearer credential required on scoring endpoints. `None` disables
    /// auth (local runs, tests).
    pub internal_key: Option<String>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            internal_key: std::env::var("INTERNAL_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/moderate", post(moderate))
        .route("/categorize", post(categorize))
        .route("/prioritize", post(prioritize))
        .route("/process", post(process))
        .route("/debug/signals", get(debug_signals))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ------------------------------------------------------------
// Errors
// ------------------------------------------------------------

/// This is an internal service boundary: 500s carry the underlying
/// failure in `details` on purpose. Nothing here is end-user facing.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "missing or invalid credential".to_string(),
                None,
            ),
            ApiError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                "message not found".to_string(),
                Some(id),
            ),
            ApiError::Internal(details) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
                Some(details),
            ),
        };
        (
            status,
            Json(ErrorBody {
                success: false,
                error,
                details,
            }),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ApiError::NotFound(id),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

fn authorize(headers: &HeaderMap, state: &AppState) -> Result<(), ApiError> {
    let Some(expected) = &state.internal_key else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match provided {
        Some(token) if token == expected => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

/// Required-and-bounded check for message bodies.
fn validate_body(body: Option<&str>) -> Result<&str, ApiError> {
    let body = body.unwrap_or("");
    if body.trim().is_empty() {
        return Err(ApiError::BadRequest("message_body is required".to_string()));
    }
    if body.chars().count() > MAX_BODY_CHARS {
        return Err(ApiError::BadRequest(format!(
            "message_body exceeds {MAX_BODY_CHARS} characters"
        )));
    }
    Ok(body)
}

fn require(field: Option<&str>, name: &str) -> Result<String, ApiError> {
    match field.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ApiError::BadRequest(format!("{name} is required"))),
    }
}

fn history_from(bodies: &[String]) -> SenderHistory {
    let total = bodies.len() as u32;
    SenderHistory::from_recent(
        bodies.iter().map(|b| HistoryItem::new(b.clone())).collect(),
        total,
    )
}

// ------------------------------------------------------------
// /moderate
// ------------------------------------------------------------

#[derive(Deserialize)]
struct ModerateReq {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    message_body: Option<String>,
    #[serde(default)]
    vent_link_id: Option<String>,
    #[serde(default)]
    owner_id: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    message_history: Vec<String>,
    #[serde(default)]
    is_pre_submission: bool,
}

#[derive(Serialize)]
struct PreSubmissionResp {
    success: bool,
    should_block: bool,
    block_reason: Option<&'static str>,
    verdict: ModerationVerdict,
    layers: Vec<LayerReport>,
}

#[derive(Serialize)]
struct ModerateResp {
    success: bool,
    #[serde(flatten)]
    run: ModerationRun,
}

async fn moderate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ModerateReq>,
) -> Result<Response, ApiError> {
    authorize(&headers, &state)?;
    let body = validate_body(req.message_body.as_deref())?;
    let vent_link_id = require(req.vent_link_id.as_deref(), "vent_link_id")?;
    let inline_history = history_from(&req.message_history);

    // Pre-submission mode (or no stored id to write back to) stays
    // entirely off the store.
    let stored_id = match req.message_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() && !req.is_pre_submission => Some(id.to_string()),
        _ => None,
    };
    let Some(message_id) = stored_id else {
        let outcome = state.pipeline.moderate_text(body, &inline_history).await;
        return Ok(Json(PreSubmissionResp {
            success: true,
            should_block: outcome.verdict.flagged,
            block_reason: outcome.verdict.block_reason(),
            verdict: outcome.verdict,
            layers: outcome.layers,
        })
        .into_response());
    };

    let mut msg = MessageRecord::draft(&vent_link_id, body);
    msg.id = message_id;
    msg.owner_id = req.owner_id.clone();
    if let Some(created_at) = req.created_at {
        msg.created_at = created_at;
    }
    // Trigger-supplied history wins; otherwise the store is consulted.
    let history = (!inline_history.recent.is_empty()).then_some(inline_history);
    let run = state
        .pipeline
        .moderate_message(&msg, history, Utc::now())
        .await?;
    Ok(Json(ModerateResp { success: true, run }).into_response())
}

// ------------------------------------------------------------
// /categorize
// ------------------------------------------------------------

#[derive(Deserialize)]
struct CategorizeReq {
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Serialize)]
struct CategorizeResp {
    success: bool,
    #[serde(flatten)]
    run: CategorizationRun,
}

async fn categorize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CategorizeReq>,
) -> Result<Json<CategorizeResp>, ApiError> {
    authorize(&headers, &state)?;
    let message_id = require(req.message_id.as_deref(), "message_id")?;
    let msg = state.pipeline.fetch_message(&message_id).await?;
    let run = state.pipeline.categorize_message(&msg).await?;
    Ok(Json(CategorizeResp { success: true, run }))
}

// ------------------------------------------------------------
// /prioritize
// ------------------------------------------------------------

#[derive(Deserialize)]
struct PrioritizeReq {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    category: Option<Category>,
    #[serde(default)]
    sentiment: Option<Sentiment>,
    #[serde(default)]
    urgency: Option<Urgency>,
}

#[derive(Serialize)]
struct PrioritizeResp {
    success: bool,
    #[serde(flatten)]
    run: PriorityRun,
}

async fn prioritize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PrioritizeReq>,
) -> Result<Json<PrioritizeResp>, ApiError> {
    authorize(&headers, &state)?;
    let message_id = require(req.message_id.as_deref(), "message_id")?;
    let msg = state.pipeline.fetch_message(&message_id).await?;
    let overrides = PriorityOverrides {
        category: req.category,
        sentiment: req.sentiment,
        urgency: req.urgency,
    };
    let run = state
        .pipeline
        .prioritize_message(&msg, overrides, Utc::now())
        .await?;
    Ok(Json(PrioritizeResp { success: true, run }))
}

// ------------------------------------------------------------
// /process
// ------------------------------------------------------------

#[derive(Deserialize)]
struct ProcessReq {
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Serialize)]
struct ProcessResp {
    success: bool,
    #[serde(flatten)]
    summary: ProcessSummary,
}

async fn process(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ProcessReq>,
) -> Result<Json<ProcessResp>, ApiError> {
    authorize(&headers, &state)?;
    let message_id = require(req.message_id.as_deref(), "message_id")?;
    let summary = state.pipeline.process_message(&message_id).await?;
    Ok(Json(ProcessResp {
        success: summary.errors.is_empty(),
        summary,
    }))
}

// ------------------------------------------------------------
// /debug/signals
// ------------------------------------------------------------

#[derive(Serialize)]
struct SignalsOut {
    #[serde(flatten)]
    report: SignalReport,
    is_question: bool,
    chars: usize,
}

async fn debug_signals(Query(q): Query<HashMap<String, String>>) -> Json<SignalsOut> {
    let text = q.get("text").cloned().unwrap_or_default();
    Json(SignalsOut {
        report: signals::extract(&text),
        is_question: signals::looks_like_question(&text),
        chars: text.chars().count(),
    })
}
