//! # Queue Worker Transport
//!
//! Receive/delete transport for the queue worker.
//!
//! This library provides:
//! - The [`QueueTransport`] seam used by the consumer loop
//! - An AWS SQS implementation speaking the Query API with SigV4 signing
//! - An in-memory implementation with visibility timeouts for tests and
//!   local development
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for transport operations
//! - [`message`] - Messages, queue addresses and receipt handles
//! - [`provider`] - Provider configuration
//! - [`transport`] - The transport trait and receive limits
//! - [`providers`] - Concrete transports

pub mod error;
pub mod message;
pub mod provider;
pub mod providers;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use error::{ConfigurationError, TransportError, ValidationError};
pub use message::{Batch, Message, MessageId, QueueAddress, ReceiptHandle, Timestamp};
pub use provider::{InMemoryConfig, SqsConfig};
pub use providers::{InMemoryTransport, SqsTransport};
pub use transport::{validate_receive_params, QueueTransport, MAX_RECEIVE_BATCH, MAX_WAIT_SECONDS};
