//! # Consumer Loop
//!
//! Receives batches from a [`QueueTransport`], hands each message to a
//! [`MessageHandler`], and deletes the messages that were handled.
//!
//! ## Lifecycle
//!
//! ```text
//! POLLING ──batch──> PROCESSING ──done──> POLLING
//!    │                    │
//!    │ receive error      │ fatal handler error
//!    v                    v
//!  FATAL                FATAL
//!
//! cancellation / empty-poll limit ──> STOPPED
//! ```
//!
//! A message is deleted only after its handler returns `Ok`. A failed delete
//! is logged and skipped; the message will be redelivered, so handlers must
//! tolerate duplicates.

use crate::backoff::PollBackoff;
use crate::config::WorkerConfig;
use crate::error::{ConsumerError, HandlerError};
use crate::handler::MessageHandler;
use futures::StreamExt;
use queue_worker_transport::{Batch, ConfigurationError, Message, QueueAddress, QueueTransport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Counters for one run of the loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Completed receive calls
    pub polls: u64,
    /// Receive calls that returned no messages
    pub empty_polls: u64,
    /// Messages received
    pub received: u64,
    /// Messages whose handler succeeded
    pub handled: u64,
    /// Messages whose handler returned an error
    pub handler_failures: u64,
    /// Successful deletes
    pub deleted: u64,
    /// Deletes that returned an error
    pub delete_failures: u64,
}

/// What happened to a single message
#[derive(Debug)]
enum MessageOutcome {
    Deleted,
    DeleteFailed,
    HandlerFailed,
    Fatal {
        message_id: String,
        error: HandlerError,
    },
    /// Not dispatched because an earlier message stopped the worker
    Skipped,
}

impl ConsumerStats {
    fn record(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Deleted => {
                self.handled += 1;
                self.deleted += 1;
            }
            MessageOutcome::DeleteFailed => {
                self.handled += 1;
                self.delete_failures += 1;
            }
            MessageOutcome::HandlerFailed | MessageOutcome::Fatal { .. } => {
                self.handler_failures += 1;
            }
            MessageOutcome::Skipped => {}
        }
    }
}

/// Fetch, process, acknowledge
pub struct ConsumerLoop {
    transport: Arc<dyn QueueTransport>,
    handler: Arc<dyn MessageHandler>,
    queue: QueueAddress,
    config: WorkerConfig,
    backoff: PollBackoff,
}

impl ConsumerLoop {
    /// Create a loop over a validated configuration
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        handler: Arc<dyn MessageHandler>,
        config: WorkerConfig,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let queue = config.queue_address()?;
        let backoff = config.backoff();

        Ok(Self {
            transport,
            handler,
            queue,
            config,
            backoff,
        })
    }

    /// Replace the backoff policy derived from the configuration
    pub fn with_backoff(mut self, backoff: PollBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Run until cancelled, until the empty-poll limit is hit, or until a
    /// fatal error
    ///
    /// Handlers already running when `shutdown` fires are allowed to finish
    /// and their deletes are issued before this returns.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<ConsumerStats, ConsumerError> {
        let mut stats = ConsumerStats::default();
        let mut consecutive_empty: u32 = 0;

        info!(
            queue_url = %self.queue,
            queue_name = self.queue.name(),
            max_messages = self.config.max_messages,
            wait_seconds = self.config.wait_time_seconds,
            "Starting consumer loop"
        );

        loop {
            if shutdown.is_cancelled() {
                info!(queue_url = %self.queue, "Shutdown requested, stopping consumer loop");
                return Ok(stats);
            }

            let Some(batch) = self.receive_with_retry(&shutdown).await? else {
                info!(queue_url = %self.queue, "Shutdown requested while polling, stopping consumer loop");
                return Ok(stats);
            };
            stats.polls += 1;

            if batch.is_empty() {
                stats.empty_polls += 1;
                consecutive_empty = consecutive_empty.saturating_add(1);
                debug!(queue_url = %self.queue, consecutive_empty, "No new messages to process");

                if let Some(limit) = self.config.max_empty_polls {
                    if consecutive_empty >= limit {
                        info!(
                            queue_url = %self.queue,
                            empty_polls = consecutive_empty,
                            "Queue drained, stopping consumer loop"
                        );
                        return Ok(stats);
                    }
                }

                let delay = self.backoff.calculate_delay(consecutive_empty - 1);
                if !delay.is_zero() {
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                continue;
            }

            consecutive_empty = 0;
            stats.received += batch.len() as u64;
            self.process_batch(batch, &mut stats).await?;
        }
    }

    /// Receive one batch, retrying transient failures when configured
    ///
    /// Returns `Ok(None)` when cancelled while waiting.
    async fn receive_with_retry(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Option<Batch>, ConsumerError> {
        let mut attempt: u32 = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(None),
                result = self.transport.receive(
                    &self.queue,
                    self.config.max_messages,
                    self.config.wait_time_seconds,
                ) => result,
            };

            match result {
                Ok(batch) => {
                    debug!(queue_url = %self.queue, batch_size = batch.len(), "Received batch");
                    return Ok(Some(batch));
                }
                Err(e) if e.is_transient() && attempt < self.config.receive_retry_attempts => {
                    let delay = self.backoff.calculate_delay(attempt);
                    attempt += 1;
                    warn!(
                        queue_url = %self.queue,
                        error = %e,
                        attempt,
                        max_attempts = self.config.receive_retry_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Receive failed, retrying"
                    );

                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    error!(queue_url = %self.queue, error = %e, "Error receiving messages");
                    return Err(ConsumerError::Receive {
                        queue_url: self.queue.to_string(),
                        source: e,
                    });
                }
            }
        }
    }

    /// Dispatch every message of a batch and wait for all of them
    async fn process_batch(
        &self,
        batch: Batch,
        stats: &mut ConsumerStats,
    ) -> Result<(), ConsumerError> {
        let halted = AtomicBool::new(false);
        let limit = self.config.max_concurrent_handlers.max(1);

        let outcomes: Vec<MessageOutcome> = futures::stream::iter(batch)
            .map(|message| self.process_message(message, &halted))
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut fatal = None;
        for outcome in outcomes {
            stats.record(&outcome);
            if let MessageOutcome::Fatal { message_id, error } = outcome {
                fatal.get_or_insert((message_id, error));
            }
        }

        match fatal {
            Some((message_id, error)) => Err(ConsumerError::Handler {
                message_id,
                reason: error.to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn process_message(&self, message: Message, halted: &AtomicBool) -> MessageOutcome {
        if halted.load(Ordering::SeqCst) {
            debug!(message_id = %message.id, "Worker stopping, leaving message for redelivery");
            return MessageOutcome::Skipped;
        }

        debug!(
            message_id = %message.id,
            receive_count = message.receive_count,
            "Processing message"
        );

        match self.handler.handle(&message).await {
            Ok(()) => {}
            Err(error @ HandlerError::Fatal { .. }) => {
                halted.store(true, Ordering::SeqCst);
                error!(message_id = %message.id, error = %error, "Handler cannot continue");
                return MessageOutcome::Fatal {
                    message_id: message.id.to_string(),
                    error,
                };
            }
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    receive_count = message.receive_count,
                    error = %e,
                    "Error processing message, leaving it for redelivery"
                );
                return MessageOutcome::HandlerFailed;
            }
        }

        match self
            .transport
            .delete(&self.queue, &message.receipt_handle)
            .await
        {
            Ok(()) => {
                info!(message_id = %message.id, "Successfully deleted message");
                MessageOutcome::Deleted
            }
            Err(e) if e.is_stale_receipt() => {
                // Visibility expired while handling; the message comes back
                debug!(
                    message_id = %message.id,
                    error = %e,
                    "Receipt handle expired before delete"
                );
                MessageOutcome::DeleteFailed
            }
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Error deleting message");
                MessageOutcome::DeleteFailed
            }
        }
    }
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;
