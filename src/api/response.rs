//! The `{status, message, payload}` envelope every endpoint answers with.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use tracing::{error, warn};

use crate::error::{AuthError, DispatchError, RegistryError};

#[derive(Debug, Serialize)]
pub struct Envelope {
    pub status: &'static str,
    pub message: String,
    pub payload: serde_json::Value,
}

/// A successful reply.
pub fn success(
    code: StatusCode,
    message: impl Into<String>,
    payload: serde_json::Value,
) -> Response {
    (
        code,
        Json(Envelope {
            status: "success",
            message: message.into(),
            payload,
        }),
    )
        .into_response()
}

/// An error reply: `payload` is `{"error_msg": detail}`.
#[derive(Debug)]
pub struct ApiError {
    pub code: StatusCode,
    pub message: &'static str,
    pub detail: String,
}

impl ApiError {
    pub fn new(code: StatusCode, message: &'static str, detail: impl Into<String>) -> Self {
        Self {
            code,
            message,
            detail: detail.into(),
        }
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Authentication Failed", detail)
    }

    pub fn bad_request(message: &'static str, detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.code,
            Json(Envelope {
                status: "error",
                message: self.message.to_string(),
                payload: json!({ "error_msg": self.detail }),
            }),
        )
            .into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthorized(reason) => {
                warn!(reason = %reason, "Rejected access token");
                Self::unauthorized(reason)
            }
            AuthError::InvalidSubject => Self::bad_request("Invalid token request", err.to_string()),
            AuthError::Signing(_) => {
                error!(error = %err, "Token signing failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "token not created", err.to_string())
            }
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::UnknownTaskKind(_) => Self::bad_request("Unknown task kind", err.to_string()),
            other => {
                error!(error = %other, "Task submission failed");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Task submission failed",
                    other.to_string(),
                )
            }
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "Task not found", err.to_string())
            }
            other => {
                error!(error = %other, "Status lookup failed");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Status lookup failed",
                    other.to_string(),
                )
            }
        }
    }
}
