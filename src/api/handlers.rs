//! Route handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::AppState;
use super::auth::Authenticated;
use super::response::{ApiError, success};

pub(super) async fn health(State(state): State<AppState>) -> Response {
    success(
        StatusCode::OK,
        "service running",
        json!({
            "service": &*state.service_name,
            "environment": state.environment,
        }),
    )
}

#[derive(Debug, Default, Deserialize)]
struct TokenRequest {
    #[serde(default)]
    subject: Option<String>,
}

pub(super) async fn get_token(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request: TokenRequest = if body.iter().all(u8::is_ascii_whitespace) {
        TokenRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request("Invalid token request", e.to_string()))?
    };
    let subject = request
        .subject
        .unwrap_or_else(|| state.default_subject.to_string());

    let token = state.tokens.issue(&subject)?;
    info!(subject = %token.subject, expires_at = %token.expires_at, "Token issued");
    Ok(success(
        StatusCode::CREATED,
        "token created",
        json!({
            "token": token.token,
            "subject": token.subject,
            "expires_at": token.expires_at,
        }),
    ))
}

pub(super) async fn protected(auth: Authenticated) -> Response {
    info!(subject = %auth.subject, "Protected route accessed");
    success(
        StatusCode::OK,
        "authentic token",
        json!({ "subject": auth.subject }),
    )
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    #[serde(alias = "taskKind")]
    task_kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

pub(super) async fn submit_task(
    State(state): State<AppState>,
    auth: Authenticated,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: SubmitRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request("Invalid task request", e.to_string()))?;

    let task_id = state
        .dispatcher
        .submit(request.payload, &request.task_kind)
        .await?;

    info!(subject = %auth.subject, task_id = %task_id, kind = %request.task_kind, "Task submitted");
    Ok(success(
        StatusCode::OK,
        "Task queued",
        json!({ "task_id": task_id }),
    ))
}

pub(super) async fn task_status(
    State(state): State<AppState>,
    _auth: Authenticated,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    // Something that isn't a UUID was never handed out, so it is simply unknown.
    let id = Uuid::parse_str(&task_id).map_err(|_| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            "Task not found",
            format!("Task {task_id} not found"),
        )
    })?;

    let view = state.gateway.status(id).await?;

    let payload = serde_json::to_value(&view).map_err(|e| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Status lookup failed",
            e.to_string(),
        )
    })?;
    Ok(success(StatusCode::OK, view.summary(), payload))
}
