//! Application Error Taxonomy
//!
//! Every fallible path in the pipeline classifies its failure into one of
//! five kinds. The kind decides two things: the RPC error code returned at
//! the API boundary, and whether a bus consumer acks or naks the message
//! that triggered the failure.

use thiserror::Error;

/// Crate-wide error type carrying the retry policy for bus consumers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Validation failure (unspecified enum, non-positive quantity,
    /// missing limit price, unknown symbol). Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A referenced row (order, account, holding) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A state transition was refused (terminal order status, duplicate
    /// settlement, insufficient balance at commit time). Acked and logged.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient failure talking to the database, the bus, or the
    /// market-data service. Nak so the message is redelivered.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Unexpected failure (serialization, invariant breach). Nak and
    /// capture context.
    #[error("internal: {0}")]
    Internal(String),
}

impl AppError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        AppError::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        AppError::Unavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    /// Whether a bus consumer should nak (redeliver) after this failure.
    ///
    /// InvalidArgument / NotFound / Conflict are deterministic: redelivery
    /// would fail the same way forever, so the message is acked and the
    /// failure logged instead.
    pub fn is_retriable(&self) -> bool {
        matches!(self, AppError::Unavailable(_) | AppError::Internal(_))
    }

    /// RPC error code string for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Unavailable(_) => "UNAVAILABLE",
            AppError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".to_string()),
            other => AppError::Unavailable(format!("database error: {}", other)),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Unavailable(format!("redis error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Unavailable(format!("market data request failed: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retriable() {
        assert!(AppError::unavailable("db down").is_retriable());
        assert!(AppError::internal("bad payload").is_retriable());
    }

    #[test]
    fn deterministic_errors_are_not_retriable() {
        assert!(!AppError::invalid_argument("quantity <= 0").is_retriable());
        assert!(!AppError::not_found("order").is_retriable());
        assert!(!AppError::conflict("order already filled").is_retriable());
    }

    #[test]
    fn sqlx_row_not_found_maps_to_not_found() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code(), "NOT_FOUND");
        assert!(!err.is_retriable());
    }
}
