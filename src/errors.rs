//! Error types shared across layers.
//!
//! Each seam gets its own enum so callers can tell a storage outage from a
//! database failure. Cascades fold them into [`CascadeError`], which the
//! dispatcher always treats as transient (nack and redeliver).

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::io;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure to turn a wire message back into an event. Always permanent.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown event type `{0}`")]
    UnknownType(String),
    #[error("payload for `{kind}` does not decode: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Transient cascade failure. The phase rolled back and the event is redelivered.
#[derive(Debug, Error)]
pub enum CascadeError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("activity sink rejected entry: {0}")]
    Rejected(String),
}

/// Errors surfaced by the synchronous user-facing services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(Uuid),
    #[error("folder `{0}` not found")]
    FolderNotFound(Uuid),
    #[error("file `{0}` not found")]
    FileNotFound(Uuid),
    #[error("an item named `{0}` already exists here")]
    NameConflict(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid name `{0}`")]
    InvalidName(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Error answered by the HTTP object routes.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));
        (self.status, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => Self::new(StatusCode::NOT_FOUND, format!("object `{}` not found", key)),
            StorageError::InvalidKey(key) => Self::bad_request(format!("invalid object key `{}`", key)),
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

/// Return true if the SQLx error is a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::UnknownType("FolderShred".to_string());
        assert_eq!(err.to_string(), "unknown event type `FolderShred`");
    }

    #[test]
    fn test_cascade_error_wraps_storage() {
        let err: CascadeError = StorageError::Backend("timeout".into()).into();
        assert!(matches!(err, CascadeError::Storage(_)));
        assert_eq!(err.to_string(), "storage backend error: timeout");
    }

    #[test]
    fn test_storage_errors_map_to_status() {
        let err: AppError = StorageError::NotFound("k".into()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err: AppError = StorageError::InvalidKey("../k".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let err: AppError = StorageError::Backend("down".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "read-only");
        let err: StorageError = io_err.into();
        assert!(matches!(err, StorageError::Io(_)));
    }
}
