//! Error types for transport operations.

use std::time::Duration;
use thiserror::Error;

/// Failure talking to the queue backend.
///
/// A receive that finds no messages is *not* an error; it yields an empty
/// batch. Everything here means the call itself did not complete.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Queue not found: {queue}")]
    QueueNotFound { queue: String },

    #[error("Receipt handle is invalid or expired: {receipt}")]
    InvalidReceipt { receipt: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Provider error ({provider}): {code} - {message}")]
    Provider {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Response could not be decoded: {message}")]
    Serialization { message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl TransportError {
    /// Check if error is transient and the same call may succeed later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::InvalidReceipt { .. } => false,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::Provider { .. } => true, // Service faults are usually transient
            Self::Serialization { .. } => false,
            Self::Validation(_) => false,
        }
    }

    /// Check if error reports a receipt handle that can no longer be used
    pub fn is_stale_receipt(&self) -> bool {
        matches!(self, Self::InvalidReceipt { .. })
    }
}

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
