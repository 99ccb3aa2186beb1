//! Message types and identifiers exchanged with the queue backend.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated address of a queue (the queue URL)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueAddress(Url);

impl QueueAddress {
    /// Create new queue address with validation
    ///
    /// The address must be an absolute `http` or `https` URL with a host, e.g.
    /// `https://sqs.us-east-1.amazonaws.com/123456789012/orders`.
    pub fn new(address: &str) -> Result<Self, ValidationError> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Required {
                field: "queue_url".to_string(),
            });
        }

        let url = Url::parse(trimmed).map_err(|e| ValidationError::InvalidFormat {
            field: "queue_url".to_string(),
            message: e.to_string(),
        })?;

        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(ValidationError::InvalidFormat {
                field: "queue_url".to_string(),
                message: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(ValidationError::InvalidFormat {
                field: "queue_url".to_string(),
                message: "missing host".to_string(),
            });
        }

        Ok(Self(url))
    }

    /// Get address as string
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Get the parsed URL
    pub fn url(&self) -> &Url {
        &self.0
    }

    /// Host header value (`host` or `host:port` for non-default ports)
    pub fn host(&self) -> String {
        let host = self.0.host_str().unwrap_or_default();
        match self.0.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// URL path, `/` when the address has none
    pub fn path(&self) -> &str {
        match self.0.path() {
            "" => "/",
            path => path,
        }
    }

    /// Queue name, taken from the last path segment
    pub fn name(&self) -> &str {
        self.0
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .unwrap_or_default()
    }
}

impl std::fmt::Display for QueueAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Unique identifier for messages within the queue system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque token identifying one delivery of a message
///
/// Required to delete (acknowledge) that delivery. Becomes unusable once the
/// backend's visibility timeout for the delivery expires.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    /// Create receipt handle from a backend-issued token
    pub fn new(handle: impl Into<String>) -> Result<Self, ValidationError> {
        let handle = handle.into();
        if handle.is_empty() {
            return Err(ValidationError::Required {
                field: "receipt_handle".to_string(),
            });
        }

        Ok(Self(handle))
    }

    /// Generate a fresh random handle
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get handle string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReceiptHandle {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message received from the queue
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub body: String,
    pub receipt_handle: ReceiptHandle,
    /// Approximate number of times the backend has delivered this message
    pub receive_count: u32,
    pub received_at: Timestamp,
}

impl Message {
    /// Create a message as received on its first delivery
    pub fn new(id: MessageId, body: impl Into<String>, receipt_handle: ReceiptHandle) -> Self {
        Self {
            id,
            body: body.into(),
            receipt_handle,
            receive_count: 1,
            received_at: Timestamp::now(),
        }
    }

    /// Set the delivery count reported by the backend
    pub fn with_receive_count(mut self, receive_count: u32) -> Self {
        self.receive_count = receive_count;
        self
    }

    /// Check if this delivery is a redelivery of an earlier attempt
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

/// Messages returned by one receive call, in the order the backend returned them
pub type Batch = Vec<Message>;

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
