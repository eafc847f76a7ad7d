use super::state::AppState;
use crate::error::VoiceError;
use crate::live::{LogFilter, StreamingLog};
use crate::session::SessionSnapshot;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub status: String,
    pub message: String,
    pub snapshot: SessionSnapshot,
}

#[derive(Debug, Serialize)]
pub struct EndSessionResponse {
    pub status: String,
    pub message: String,
    pub snapshot: SessionSnapshot,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// all | important | errors (default: important)
    pub filter: Option<LogFilter>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub filter: LogFilter,
    pub entries: Vec<StreamingLog>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Failure hint for connect failures (rate_limited, model, auth, unknown)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub retry_count: u32,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /voice/start
/// Start a voice session (microphone + live connection)
pub async fn start_session(State(state): State<AppState>) -> impl IntoResponse {
    info!("Starting voice session");

    match state.controller.start().await {
        Ok(()) => {
            info!("Voice session started");
            (
                StatusCode::OK,
                Json(StartSessionResponse {
                    status: "chatting".to_string(),
                    message: "Voice session started".to_string(),
                    snapshot: state.controller.snapshot(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to start voice session: {}", e);

            let (status, hint) = match &e {
                VoiceError::InvalidState(_) => (StatusCode::CONFLICT, None),
                VoiceError::DeviceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, None),
                VoiceError::ConnectFailure { hint, .. } => (
                    StatusCode::BAD_GATEWAY,
                    serde_json::to_value(hint)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string)),
                ),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, None),
            };

            (
                status,
                Json(ErrorResponse {
                    error: format!("Failed to start voice session: {}", e),
                    hint,
                    retry_count: state.controller.snapshot().retry_count,
                }),
            )
                .into_response()
        }
    }
}

/// POST /voice/end
/// Send the closing message and wind the session down
pub async fn end_session(State(state): State<AppState>) -> impl IntoResponse {
    if state.controller.end().await {
        info!("Voice session ending");
        (
            StatusCode::ACCEPTED,
            Json(EndSessionResponse {
                status: "ending".to_string(),
                message: "Closing message sent".to_string(),
                snapshot: state.controller.snapshot(),
            }),
        )
            .into_response()
    } else {
        let snapshot = state.controller.snapshot();
        (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!("No session to end (phase: {})", snapshot.phase),
                hint: None,
                retry_count: snapshot.retry_count,
            }),
        )
            .into_response()
    }
}

/// GET /voice/status
/// Current session snapshot
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.controller.snapshot()))
}

/// GET /voice/logs?filter=all|important|errors
/// Recent diagnostic log entries
pub async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> impl IntoResponse {
    let filter = query.filter.unwrap_or_default();
    let entries = state.logs.entries(filter);
    (StatusCode::OK, Json(LogsResponse { filter, entries }))
}

/// POST /voice/error/dismiss
/// Clear the error surface
pub async fn dismiss_error(State(state): State<AppState>) -> impl IntoResponse {
    state.controller.dismiss_error();
    StatusCode::NO_CONTENT
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
