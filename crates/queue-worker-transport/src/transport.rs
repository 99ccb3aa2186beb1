//! The receive/delete seam between the consumer loop and a queue backend.

use crate::error::{TransportError, ValidationError};
use crate::message::{Batch, QueueAddress, ReceiptHandle};
use async_trait::async_trait;

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;

/// Largest batch a single receive may request
pub const MAX_RECEIVE_BATCH: u32 = 10;

/// Longest server-side long-poll wait, in seconds
pub const MAX_WAIT_SECONDS: u32 = 20;

/// Network operations against a remote queue
///
/// Implementations issue exactly one backend call per method invocation and
/// never retry; retry policy belongs to the caller.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Receive up to `max_messages` messages, long-polling for up to
    /// `wait_seconds` when none are immediately available
    ///
    /// Returns an empty batch when the wait window elapses without messages.
    /// Returns an error only when the call itself fails.
    async fn receive(
        &self,
        queue: &QueueAddress,
        max_messages: u32,
        wait_seconds: u32,
    ) -> Result<Batch, TransportError>;

    /// Delete the delivery identified by `receipt`
    ///
    /// Deleting an already-deleted or expired handle may fail with
    /// [`TransportError::InvalidReceipt`]; callers treat that as non-fatal.
    async fn delete(&self, queue: &QueueAddress, receipt: &ReceiptHandle)
        -> Result<(), TransportError>;
}

/// Check receive parameters against the backend's allowed ranges
pub fn validate_receive_params(max_messages: u32, wait_seconds: u32) -> Result<(), ValidationError> {
    if max_messages == 0 || max_messages > MAX_RECEIVE_BATCH {
        return Err(ValidationError::OutOfRange {
            field: "max_messages".to_string(),
            message: format!("must be 1-{}, got {}", MAX_RECEIVE_BATCH, max_messages),
        });
    }

    if wait_seconds > MAX_WAIT_SECONDS {
        return Err(ValidationError::OutOfRange {
            field: "wait_seconds".to_string(),
            message: format!("must be 0-{}, got {}", MAX_WAIT_SECONDS, wait_seconds),
        });
    }

    Ok(())
}
