use crate::services::{
    link_issuer::LinkError, movie_service::MovieError, multipart::MultipartError,
    storage_service::StorageError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::fmt;
use tracing::error;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// The JSON error body, shared by the HTTP routes and gateway handlers.
    pub fn body(&self) -> Value {
        json!({
            "error": self.message,
            "status": self.status.as_u16()
        })
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body())).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::bad_request(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ObjectNotFound { .. } => AppError::not_found(err.to_string()),
            StorageError::InvalidSignature | StorageError::LinkExpired => {
                AppError::new(StatusCode::FORBIDDEN, err.to_string())
            }
            StorageError::InvalidObjectKey | StorageError::InvalidBucketName { .. } => {
                AppError::bad_request(err.to_string())
            }
            other => {
                error!(error = %other, "storage failure");
                AppError::internal(other.to_string())
            }
        }
    }
}

impl From<LinkError> for AppError {
    fn from(err: LinkError) -> Self {
        error!(error = %err, "link generation failed");
        AppError::internal(err.to_string())
    }
}

impl From<MovieError> for AppError {
    fn from(err: MovieError) -> Self {
        match err {
            MovieError::NotFound(_) => AppError::not_found(err.to_string()),
            MovieError::Validation(msg) => AppError::bad_request(msg),
            MovieError::Multipart(err) => err.into(),
            MovieError::Link(err) => err.into(),
            MovieError::Upload(_) | MovieError::Store(_) => {
                error!(error = %err, "movie operation failed");
                AppError::internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movie_errors_map_to_statuses() {
        let cases = [
            (MovieError::NotFound("42".into()), StatusCode::NOT_FOUND),
            (MovieError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (
                MovieError::Multipart(MultipartError::MissingBoundary),
                StatusCode::BAD_REQUEST,
            ),
            (
                MovieError::Upload(StorageError::InvalidSigningKey),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn rejected_links_are_forbidden() {
        assert_eq!(AppError::from(StorageError::LinkExpired).status, StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::from(StorageError::InvalidSignature).status,
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn body_carries_message_and_status() {
        let body = AppError::not_found("Movie with ID 7 not found").body();
        assert_eq!(body["error"], "Movie with ID 7 not found");
        assert_eq!(body["status"], 404);
    }
}
