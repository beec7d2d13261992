use crate::error::ApiError;
use crate::service::AuditService;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use cancelstuff_assistant::Subscription;
use cancelstuff_session::SessionSummary;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Default upload cap: 10 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Multipart field carrying the statement.
const UPLOAD_FIELD: &str = "csv";

/// Shared application state.
pub struct AppState {
    pub service: Arc<AuditService>,
}

/// The HTTP front-end.
pub struct GatewayServer;

impl GatewayServer {
    pub fn build(service: Arc<AuditService>) -> Router {
        Self::build_with_upload_limit(service, DEFAULT_MAX_UPLOAD_BYTES)
    }

    pub fn build_with_upload_limit(service: Arc<AuditService>, max_upload_bytes: usize) -> Router {
        let state = Arc::new(AppState { service });

        Router::new()
            .route("/api/health", get(health_handler))
            .route("/api/start", post(start_handler))
            .route("/api/chat", post(chat_handler))
            .route("/api/report", post(report_handler))
            .route("/api/end", post(end_handler))
            .layer(DefaultBodyLimit::max(max_upload_bytes))
            .with_state(state)
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    service: &'static str,
    sessions: Vec<SessionSummary>,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        ok: true,
        service: "cancelstuff",
        sessions: state.service.list_sessions(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    session_id: Uuid,
    message: String,
    cost: Option<f64>,
    subscriptions: Vec<Subscription>,
}

async fn start_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<StartResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(UPLOAD_FIELD) {
            let filename = field.file_name().unwrap_or("upload.csv").to_string();
            let bytes = field.bytes().await?;
            upload = Some((filename, bytes));
            break;
        }
    }
    let Some((filename, bytes)) = upload else {
        return Err(ApiError::bad_request("No CSV file uploaded"));
    };

    info!(filename = %filename, bytes = bytes.len(), "Upload received");
    let outcome = state.service.start_session(&bytes, &filename).await?;
    Ok(Json(StartResponse {
        session_id: outcome.session_id,
        message: outcome.message,
        cost: outcome.cost_usd,
        subscriptions: outcome.subscriptions,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    session_id: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    message: String,
    cost: Option<f64>,
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let (Some(session_id), Some(message)) = (req.session_id, req.message) else {
        return Err(ApiError::bad_request("Missing sessionId or message"));
    };
    let id = parse_session_id(&session_id)?;
    let outcome = state.service.chat(id, &message).await?;
    Ok(Json(ChatResponse {
        message: outcome.message,
        cost: outcome.cost_usd,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest {
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReportResponse {
    html: String,
    cost: Option<f64>,
}

async fn report_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<ReportResponse>, ApiError> {
    let Some(session_id) = req.session_id else {
        return Err(ApiError::bad_request("Missing sessionId"));
    };
    let id = parse_session_id(&session_id)?;
    let outcome = state.service.generate_report(id).await?;
    Ok(Json(ReportResponse {
        html: outcome.html,
        cost: outcome.cost_usd,
    }))
}

/// Ending is best effort: any body, even an empty or malformed one, gets `ok`.
async fn end_handler(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    let id = serde_json::from_slice::<SessionRequest>(&body)
        .ok()
        .and_then(|req| req.session_id)
        .and_then(|raw| Uuid::parse_str(&raw).ok());
    if let Some(id) = id {
        state.service.end_session(id).await;
    }
    Json(serde_json::json!({ "ok": true }))
}

fn parse_session_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request("Invalid sessionId"))
}
