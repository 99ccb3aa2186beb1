//! Common test utilities for queue-worker integration tests
//!
//! This module provides:
//! - A recording handler whose outcome and duration are scripted per message
//! - Worker configuration tuned for fast, deterministic runs
//! - Helpers to seed an in-memory queue

use async_trait::async_trait;
use queue_worker_core::{BackoffConfig, HandlerError, Message, MessageHandler, WorkerConfig};
use queue_worker_transport::{InMemoryConfig, InMemoryTransport, QueueAddress};
use std::sync::Mutex;
use std::time::Duration;

pub const QUEUE_URL: &str = "http://localhost:9324/000000000000/integration-queue";

/// One handler invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub body: String,
    pub receive_count: u32,
}

type Decide = dyn Fn(&Message) -> Result<(), HandlerError> + Send + Sync;
type Delay = dyn Fn(&Message) -> Duration + Send + Sync;

/// Handler that records deliveries and follows a script
pub struct RecordingHandler {
    deliveries: Mutex<Vec<Delivery>>,
    decide: Box<Decide>,
    delay: Box<Delay>,
}

#[allow(dead_code)]
impl RecordingHandler {
    /// Accept every message immediately
    pub fn accepting() -> Self {
        Self::deciding(|_| Ok(()))
    }

    pub fn deciding<F>(decide: F) -> Self
    where
        F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self {
            deliveries: Mutex::new(Vec::new()),
            decide: Box::new(decide),
            delay: Box::new(|_| Duration::ZERO),
        }
    }

    /// Spend the returned time on each message before deciding
    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&Message) -> Duration + Send + Sync + 'static,
    {
        self.delay = Box::new(delay);
        self
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self.deliveries.lock().unwrap().push(Delivery {
            body: message.body.clone(),
            receive_count: message.receive_count,
        });

        let delay = (self.delay)(message);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        (self.decide)(message)
    }
}

pub fn queue() -> QueueAddress {
    QueueAddress::new(QUEUE_URL).unwrap()
}

/// Short polls, no backoff, stop at the first empty poll
#[allow(dead_code)]
pub fn drain_config() -> WorkerConfig {
    WorkerConfig {
        wait_time_seconds: 0,
        max_empty_polls: Some(1),
        poll_backoff: BackoffConfig {
            enabled: false,
            ..BackoffConfig::default()
        },
        ..WorkerConfig::new(QUEUE_URL)
    }
}

pub fn transport_with_visibility(seconds: u64) -> InMemoryTransport {
    InMemoryTransport::new(InMemoryConfig {
        visibility_timeout_seconds: seconds,
    })
}

#[allow(dead_code)]
pub fn seed(transport: &InMemoryTransport, bodies: &[&str]) {
    let queue = queue();
    for body in bodies {
        transport.send(&queue, *body);
    }
}
