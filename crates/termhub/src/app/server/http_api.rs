//! HTTP control plane: session listing, rename, force-kill, split groups
//! and health.

use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use termhub_daemon::HubError;
use termhub_protocol::ErrorCategory;
use termhub_protocol::RenameRequest;
use tracing::warn;

use super::AppState;

#[derive(Debug, Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
}

pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    let body = ErrorResponse {
        error: message,
        code: None,
        category: None,
        retryable: None,
        suggestion: None,
    };
    (status, Json(body)).into_response()
}

fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorCategory::Busy => StatusCode::CONFLICT,
        ErrorCategory::External => StatusCode::BAD_GATEWAY,
        ErrorCategory::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn hub_error_response(err: &HubError) -> Response {
    let category = err.category();
    let message = err.to_string();
    let body = ErrorResponse {
        error: &message,
        code: Some(err.code()),
        category: Some(category),
        retryable: Some(err.is_retryable()),
        suggestion: Some(err.suggestion()),
    };
    (status_for(category), Json(body)).into_response()
}

pub(crate) async fn sessions_handler(State(state): State<AppState>) -> Response {
    Json(state.hub.list_sessions()).into_response()
}

pub(crate) async fn groups_handler(State(state): State<AppState>) -> Response {
    Json(state.hub.groups()).into_response()
}

pub(crate) async fn health_handler(State(state): State<AppState>) -> Response {
    Json(state.hub.health()).into_response()
}

pub(crate) async fn rename_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> Response {
    match state.hub.rename(&session_id, &request.name).await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "Rename failed");
            hub_error_response(&err)
        }
    }
}

pub(crate) async fn kill_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.hub.kill(&session_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "Kill failed");
            hub_error_response(&err)
        }
    }
}
