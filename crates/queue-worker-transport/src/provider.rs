//! Provider configuration.

use crate::error::ConfigurationError;
use crate::transport::MAX_WAIT_SECONDS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// AWS SQS configuration
///
/// Credentials are static; how they are obtained is up to the caller.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Client-side HTTP timeout; must leave room for the longest long-poll wait
    pub request_timeout_seconds: u64,
}

impl Default for SqsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            request_timeout_seconds: 30,
        }
    }
}

impl SqsConfig {
    /// Check that the configuration can sign requests
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.region.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "aws.region".to_string(),
            });
        }

        if self.access_key_id.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigurationError::Missing {
                key: "aws.access_key_id".to_string(),
            });
        }

        if self.secret_access_key.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigurationError::Missing {
                key: "aws.secret_access_key".to_string(),
            });
        }

        if self.request_timeout_seconds <= u64::from(MAX_WAIT_SECONDS) {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "aws.request_timeout_seconds must exceed the {}s long-poll limit, got {}",
                    MAX_WAIT_SECONDS, self.request_timeout_seconds
                ),
            });
        }

        Ok(())
    }

    /// HTTP timeout applied to each request
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl fmt::Debug for SqsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "<REDACTED>");
        f.debug_struct("SqsConfig")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &redact(&self.secret_access_key))
            .field("session_token", &redact(&self.session_token))
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    /// How long a received message stays hidden before it is redelivered
    pub visibility_timeout_seconds: u64,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_seconds: 30,
        }
    }
}

impl InMemoryConfig {
    /// How long a received message stays hidden
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
