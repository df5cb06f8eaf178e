use std::fmt::Display;

use thiserror::Error;

/// Failure reported by a backend collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not authenticated")]
    Unauthenticated,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("aborted: {0}")]
    Aborted(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("internal backend error: {0}")]
    Internal(String),
}

impl BackendError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn internal(err: impl Display) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("codec: {err}"))
    }
}

pub type Result<T, E = BackendError> = std::result::Result<T, E>;
