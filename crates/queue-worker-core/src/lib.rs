//! # Queue Worker Core
//!
//! The consumer loop of the queue worker: receive a batch, hand each message
//! to a handler, delete what was handled, repeat.
//!
//! ## Module Organization
//!
//! - [`consumer`] - The polling and acknowledgement loop
//! - [`handler`] - The message handler seam and closure adapter
//! - [`backoff`] - Delay policy between empty polls and receive retries
//! - [`config`] - Loop configuration and validation
//! - [`error`] - Handler and loop errors

pub mod backoff;
pub mod config;
pub mod consumer;
pub mod error;
pub mod handler;

pub use backoff::{BackoffConfig, PollBackoff};
pub use config::WorkerConfig;
pub use consumer::{ConsumerLoop, ConsumerStats};
pub use error::{ConsumerError, HandlerError};
pub use handler::{handler_fn, FnHandler, LoggingHandler, MessageHandler};

// Re-export the transport seam so callers need a single dependency
pub use queue_worker_transport::{
    Batch, ConfigurationError, Message, MessageId, QueueAddress, QueueTransport, ReceiptHandle,
    TransportError,
};
