use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Failure taxonomy surfaced by the feedback pipeline.
///
/// The `Display` text is the user-facing message. It is deliberately generic:
/// raw backend or extractor output never reaches the client because it may
/// carry injected content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    #[error("We could not read any text from that document. Upload a text-based PDF, a clear scan, or a plain-text file.")]
    EmptyDocument,

    #[error("Some instructions in your input were ignored and replaced before analysis.")]
    InjectionDetected,

    #[error("The feedback service is temporarily unavailable. Please retry in a moment.")]
    BackendUnavailable,

    #[error("The feedback service returned a response we could not understand. Please retry.")]
    SchemaViolation,

    #[error("Your input is too large to analyse. Shorten the resume or job description and try again.")]
    PayloadTooLarge,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::EmptyDocument => "EMPTY_DOCUMENT",
            ErrorKind::InjectionDetected => "INJECTION_DETECTED",
            ErrorKind::BackendUnavailable => "BACKEND_UNAVAILABLE",
            ErrorKind::SchemaViolation => "SCHEMA_VIOLATION",
            ErrorKind::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::EmptyDocument => StatusCode::UNPROCESSABLE_ENTITY,
            // Advisory only; never returned as a failure by the pipeline.
            ErrorKind::InjectionDetected => StatusCode::OK,
            ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::SchemaViolation => StatusCode::BAD_GATEWAY,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Pipeline failure: {0:?}")]
    Pipeline(ErrorKind),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ErrorKind> for AppError {
    fn from(kind: ErrorKind) -> Self {
        AppError::Pipeline(kind)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Pipeline(kind) => {
                tracing::warn!("Pipeline failure surfaced to client: {}", kind.code());
                (kind.status(), kind.code(), kind.to_string())
            }
            AppError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "UNAVAILABLE",
                msg.clone(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL_KINDS: [ErrorKind; 5] = [
        ErrorKind::EmptyDocument,
        ErrorKind::InjectionDetected,
        ErrorKind::BackendUnavailable,
        ErrorKind::SchemaViolation,
        ErrorKind::PayloadTooLarge,
    ];

    #[test]
    fn test_every_kind_has_a_distinct_message() {
        let messages: HashSet<String> = ALL_KINDS.iter().map(|k| k.to_string()).collect();
        assert_eq!(messages.len(), ALL_KINDS.len());
    }

    #[test]
    fn test_kind_serializes_as_code() {
        for kind in ALL_KINDS {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.code()));
        }
    }

    #[test]
    fn test_pipeline_status_mapping() {
        assert_eq!(
            AppError::Pipeline(ErrorKind::BackendUnavailable)
                .into_response()
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Pipeline(ErrorKind::EmptyDocument)
                .into_response()
                .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::Pipeline(ErrorKind::PayloadTooLarge)
                .into_response()
                .status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
