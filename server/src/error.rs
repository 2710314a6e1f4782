//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Message shown to an editor whose expected version was overtaken.
pub const CONFLICT_MESSAGE: &str = "this record changed since you loaded it, please retry";

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Engine error: {0}")]
    Engine(#[from] agency_sync::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(rename = "currentVersion", skip_serializing_if = "Option::is_none")]
    current_version: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        use agency_sync::Error;

        let mut current_version = None;
        let (status, error_message, details) = match &self {
            AppError::Engine(e) => match e {
                Error::NotFound(_) | Error::VersionNotFound { .. } => {
                    (StatusCode::NOT_FOUND, e.to_string(), None)
                }
                Error::VersionConflict { actual, .. } => {
                    current_version = Some(*actual);
                    (
                        StatusCode::CONFLICT,
                        CONFLICT_MESSAGE.to_string(),
                        Some(e.to_string()),
                    )
                }
                Error::BackendUnavailable(_) => {
                    tracing::error!("Backend error: {}", e);
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Storage temporarily unavailable".to_string(),
                        None,
                    )
                }
                Error::DuplicateSubscriber(_) => (StatusCode::CONFLICT, e.to_string(), None),
                Error::SubscriberCallback { .. } => {
                    tracing::error!("Engine error: {:?}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                        None,
                    )
                }
            },
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
            current_version,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
