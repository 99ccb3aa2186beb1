//! Message handler seam.
//!
//! The consumer loop hands every received message to a [`MessageHandler`].
//! Returning `Ok(())` lets the loop delete the message; any error leaves it on
//! the queue, where it becomes visible again once its visibility timeout
//! lapses.
//!
//! # Delivery guarantees
//!
//! Delivery is at-least-once. A message can reach a handler more than once:
//! after a handler failure, after a delete that did not go through, or when
//! processing outlives the visibility timeout. Handlers must therefore be
//! idempotent, or deduplicate on [`Message::id`].

use crate::error::HandlerError;
use async_trait::async_trait;
use queue_worker_transport::{Message, MessageId};
use std::future::Future;
use tracing::info;

/// Processes one message at a time
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a message
    ///
    /// Return [`HandlerError::Failed`] to leave the message for redelivery and
    /// [`HandlerError::Fatal`] only when the worker cannot make progress at
    /// all.
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

/// Handler built from a closure over the message id and body
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`MessageHandler`]
///
/// ```rust
/// use queue_worker_core::{handler_fn, HandlerError};
///
/// let handler = handler_fn(|id, body| async move {
///     if body.is_empty() {
///         return Err(HandlerError::failed(format!("message {} has no body", id)));
///     }
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(MessageId, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(MessageId, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        (self.f)(message.id.clone(), message.body.clone()).await
    }
}

/// Handler that logs each message and always succeeds
#[derive(Debug, Clone, Default)]
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        info!(
            message_id = %message.id,
            receive_count = message.receive_count,
            body = %message.body,
            "Received message"
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
