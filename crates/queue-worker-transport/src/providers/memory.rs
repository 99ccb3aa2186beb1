//! In-memory queue transport for testing and development.
//!
//! This module provides a functional in-process queue that mirrors the
//! delivery semantics of a visibility-timeout queue:
//! - Received messages are hidden for the visibility timeout
//! - Every delivery gets a fresh receipt handle
//! - Messages not deleted in time become visible again (redelivery)
//! - Deleting with a stale or unknown handle is an error
//! - Receive long-polls until a message is sent or the wait elapses
//!
//! Queues are created on first use and keyed by queue address.

use crate::error::TransportError;
use crate::message::{Batch, Message, MessageId, QueueAddress, ReceiptHandle};
use crate::provider::InMemoryConfig;
use crate::transport::{validate_receive_params, QueueTransport};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A message stored in the queue
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: String,
    receive_count: u32,
}

/// A message hidden from receivers until its visibility timeout expires
struct InFlightMessage {
    message: StoredMessage,
    visible_at: Instant,
}

/// Internal queue state for a single queue
#[derive(Default)]
struct InMemoryQueue {
    /// Visible messages (FIFO order)
    messages: VecDeque<StoredMessage>,
    /// In-flight messages keyed by the receipt handle of their current delivery
    in_flight: HashMap<String, InFlightMessage>,
}

impl InMemoryQueue {
    /// Return expired in-flight messages to the front of the queue
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, in_flight)| in_flight.visible_at <= now)
            .map(|(handle, _)| handle.clone())
            .collect();

        for handle in expired {
            if let Some(in_flight) = self.in_flight.remove(&handle) {
                self.messages.push_front(in_flight.message);
            }
        }
    }

    fn take_batch(&mut self, max_messages: usize, visibility_timeout: Duration) -> Batch {
        let now = Instant::now();
        self.requeue_expired(now);

        let mut batch = Vec::new();
        while batch.len() < max_messages {
            let Some(mut stored) = self.messages.pop_front() else {
                break;
            };
            stored.receive_count += 1;

            let handle = ReceiptHandle::generate();
            batch.push(
                Message::new(
                    stored.message_id.clone(),
                    stored.body.clone(),
                    handle.clone(),
                )
                .with_receive_count(stored.receive_count),
            );

            self.in_flight.insert(
                handle.as_str().to_string(),
                InFlightMessage {
                    message: stored,
                    visible_at: now + visibility_timeout,
                },
            );
        }

        batch
    }
}

/// Thread-safe storage for all queues
#[derive(Default)]
struct QueueStorage {
    queues: HashMap<QueueAddress, InMemoryQueue>,
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// In-memory queue transport
#[derive(Clone)]
pub struct InMemoryTransport {
    storage: Arc<Mutex<QueueStorage>>,
    notify: Arc<Notify>,
    config: InMemoryConfig,
}

impl InMemoryTransport {
    /// Create new in-memory transport with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(Mutex::new(QueueStorage::default())),
            notify: Arc::new(Notify::new()),
            config,
        }
    }

    fn storage(&self) -> MutexGuard<'_, QueueStorage> {
        // A poisoned lock only means another test thread panicked mid-update
        self.storage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue a message and wake any waiting receivers
    pub fn send(&self, queue: &QueueAddress, body: impl Into<String>) -> MessageId {
        let message_id = MessageId::new();
        {
            let mut storage = self.storage();
            storage
                .queues
                .entry(queue.clone())
                .or_default()
                .messages
                .push_back(StoredMessage {
                    message_id: message_id.clone(),
                    body: body.into(),
                    receive_count: 0,
                });
        }
        self.notify.notify_waiters();
        message_id
    }

    /// Number of messages currently visible, including expired in-flight ones
    pub fn approximate_len(&self, queue: &QueueAddress) -> usize {
        let now = Instant::now();
        let storage = self.storage();
        storage.queues.get(queue).map_or(0, |q| {
            q.messages.len() + q.in_flight.values().filter(|m| m.visible_at <= now).count()
        })
    }

    /// Number of messages received but neither deleted nor expired
    pub fn in_flight_len(&self, queue: &QueueAddress) -> usize {
        let now = Instant::now();
        let storage = self.storage();
        storage.queues.get(queue).map_or(0, |q| {
            q.in_flight.values().filter(|m| m.visible_at > now).count()
        })
    }

    /// Earliest instant an in-flight message becomes visible again
    fn next_visibility(&self, queue: &QueueAddress) -> Option<Instant> {
        let storage = self.storage();
        storage
            .queues
            .get(queue)
            .and_then(|q| q.in_flight.values().map(|m| m.visible_at).min())
    }

    fn try_take(&self, queue: &QueueAddress, max_messages: u32) -> Batch {
        let mut storage = self.storage();
        storage
            .queues
            .entry(queue.clone())
            .or_default()
            .take_batch(max_messages as usize, self.config.visibility_timeout())
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn receive(
        &self,
        queue: &QueueAddress,
        max_messages: u32,
        wait_seconds: u32,
    ) -> Result<Batch, TransportError> {
        validate_receive_params(max_messages, wait_seconds)?;

        let deadline = Instant::now() + Duration::from_secs(u64::from(wait_seconds));
        loop {
            // Register interest before checking so a send in between is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.try_take(queue, max_messages);
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }

            let wake_at = self
                .next_visibility(queue)
                .map_or(deadline, |visible_at| visible_at.min(deadline));

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete(
        &self,
        queue: &QueueAddress,
        receipt: &ReceiptHandle,
    ) -> Result<(), TransportError> {
        let mut storage = self.storage();
        let Some(q) = storage.queues.get_mut(queue) else {
            return Err(TransportError::QueueNotFound {
                queue: queue.to_string(),
            });
        };

        // Expired deliveries are no longer owned by this handle
        q.requeue_expired(Instant::now());

        match q.in_flight.remove(receipt.as_str()) {
            Some(_) => Ok(()),
            None => Err(TransportError::InvalidReceipt {
                receipt: receipt.to_string(),
            }),
        }
    }
}
