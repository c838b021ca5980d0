//! Error types for outbox operations.

use thiserror::Error;

/// Comprehensive error type for outbox store operations
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Entry not found: {entry_id}")]
    EntryNotFound { entry_id: String },

    #[error("Entry '{entry_id}' is in state '{actual}', expected '{expected}'")]
    InvalidTransition {
        entry_id: String,
        expected: String,
        actual: String,
    },

    #[error("Storage operation failed: {message}")]
    StorageFailed { message: String },

    #[error("Serialization failed: {message}")]
    SerializationFailed { message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl OutboxError {
    /// Check if the error is transient and the operation may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageFailed { .. })
    }
}

/// Error type for input validation failures
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },
}

/// Classified outcome of one failed HTTP delivery attempt.
///
/// The first three kinds schedule a retry; `ClientError` is terminal.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Delivery timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Network failure: {message}")]
    Network { message: String },

    #[error("Remote returned server error {status}")]
    ServerError { status: u16 },

    #[error("Remote returned non-retryable client error {status}")]
    ClientError { status: u16 },
}

impl DeliveryError {
    /// Check if this failure should be retried.
    ///
    /// Timeouts, network failures, 5xx, and 429 are retryable; any other
    /// 4xx is terminal.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::ClientError { .. })
    }

    /// Short sub-kind label used in `last_error` strings and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Network { .. } => "network",
            Self::ServerError { .. } => "server_error",
            Self::ClientError { .. } => "client_error",
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
