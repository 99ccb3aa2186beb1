//! Error types for the consumer loop and message handlers.

use queue_worker_transport::TransportError;
use thiserror::Error;

/// Outcome reported by a handler that did not process a message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Processing failed; the message is left on the queue for redelivery
    #[error("Message processing failed: {message}")]
    Failed { message: String },

    /// The worker cannot make progress; the loop stops
    #[error("Unrecoverable handler failure: {message}")]
    Fatal { message: String },
}

impl HandlerError {
    /// Create a retryable failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Create a failure that stops the worker
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Check if the worker must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

/// Errors that end a consumer loop run
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Receive from {queue_url} failed: {source}")]
    Receive {
        queue_url: String,
        #[source]
        source: TransportError,
    },

    #[error("Handler stopped the worker while processing message {message_id}: {reason}")]
    Handler { message_id: String, reason: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
