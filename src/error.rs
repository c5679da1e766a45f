//! Error types for Cumulus.

use serde::Serialize;
use thiserror::Error;

/// Common error type for Cumulus.
#[derive(Error, Debug)]
pub enum CumulusError {
    /// Referenced node or user is absent, or not owned by the caller.
    #[error("{0} not found")]
    NotFound(String),

    /// A physical directory already exists at the target path.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A physical file already exists at the target path.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The mutation would push used space above the user's capacity.
    #[error("quota exceeded: requested {requested} bytes, {available} bytes available")]
    QuotaExceeded { requested: i64, available: i64 },

    /// An ancestor size walk stopped part way up the tree.
    ///
    /// `applied` ancestors received `delta` before the failure.
    #[error("size propagation from node {node_id} failed after {applied} ancestor(s) (delta {delta})")]
    PartialPropagation {
        node_id: i64,
        applied: usize,
        delta: i64,
    },

    /// Access to the resource is not allowed.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for CumulusError {
    fn from(e: sqlx::Error) -> Self {
        CumulusError::Database(e.to_string())
    }
}

/// Stable machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    Conflict,
    QuotaExceeded,
    PartialPropagationFailure,
    Forbidden,
    Validation,
    IoFailure,
    DatabaseFailure,
    ConfigFailure,
    /// Failure outside any domain operation, e.g. building a response.
    InternalError,
}

impl ErrorCode {
    /// Get the code as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::PartialPropagationFailure => "PARTIAL_PROPAGATION_FAILURE",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::IoFailure => "IO_FAILURE",
            ErrorCode::DatabaseFailure => "DATABASE_FAILURE",
            ErrorCode::ConfigFailure => "CONFIG_FAILURE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether the error comes from the service itself rather than the
    /// request. Details of these are not shown to clients.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ErrorCode::PartialPropagationFailure
                | ErrorCode::IoFailure
                | ErrorCode::DatabaseFailure
                | ErrorCode::ConfigFailure
                | ErrorCode::InternalError
        )
    }
}

impl CumulusError {
    /// Get the stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            CumulusError::NotFound(_) => ErrorCode::NotFound,
            CumulusError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            CumulusError::Conflict(_) => ErrorCode::Conflict,
            CumulusError::QuotaExceeded { .. } => ErrorCode::QuotaExceeded,
            CumulusError::PartialPropagation { .. } => ErrorCode::PartialPropagationFailure,
            CumulusError::Forbidden(_) => ErrorCode::Forbidden,
            CumulusError::Validation(_) => ErrorCode::Validation,
            CumulusError::Io(_) => ErrorCode::IoFailure,
            CumulusError::Database(_) => ErrorCode::DatabaseFailure,
            CumulusError::Config(_) => ErrorCode::ConfigFailure,
        }
    }
}

/// Result type alias for Cumulus operations.
pub type Result<T> = std::result::Result<T, CumulusError>;
