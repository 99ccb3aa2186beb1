//! Consumer loop configuration.

use crate::backoff::{BackoffConfig, PollBackoff};
use queue_worker_transport::{
    validate_receive_params, ConfigurationError, QueueAddress, MAX_RECEIVE_BATCH,
    MAX_WAIT_SECONDS,
};
use serde::{Deserialize, Serialize};

/// Settings for one consumer loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// URL of the queue to consume
    pub queue_url: String,

    /// Messages requested per receive (1..=10)
    pub max_messages: u32,

    /// Server-side long-poll wait per receive (0..=20)
    pub wait_time_seconds: u32,

    /// Handlers allowed to run at once within a batch; 1 keeps batch order
    pub max_concurrent_handlers: usize,

    /// Stop cleanly after this many consecutive empty polls
    pub max_empty_polls: Option<u32>,

    /// Extra attempts for a receive that failed transiently; 0 makes every
    /// receive failure fatal
    pub receive_retry_attempts: u32,

    /// Delay policy between empty polls and receive retries
    pub poll_backoff: BackoffConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_url: String::new(),
            max_messages: MAX_RECEIVE_BATCH,
            wait_time_seconds: MAX_WAIT_SECONDS,
            max_concurrent_handlers: 1,
            max_empty_polls: None,
            receive_retry_attempts: 0,
            poll_backoff: BackoffConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create a configuration with defaults for the given queue
    pub fn new(queue_url: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration and resolve the queue address
    pub fn queue_address(&self) -> Result<QueueAddress, ConfigurationError> {
        QueueAddress::new(&self.queue_url).map_err(|e| ConfigurationError::Invalid {
            message: format!("worker.queue_url: {}", e),
        })
    }

    /// Check every setting the loop depends on
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.queue_address()?;

        validate_receive_params(self.max_messages, self.wait_time_seconds).map_err(|e| {
            ConfigurationError::Invalid {
                message: e.to_string(),
            }
        })?;

        if self.max_concurrent_handlers == 0 {
            return Err(ConfigurationError::Invalid {
                message: "worker.max_concurrent_handlers must be at least 1".to_string(),
            });
        }

        if self.max_empty_polls == Some(0) {
            return Err(ConfigurationError::Invalid {
                message: "worker.max_empty_polls must be at least 1 when set".to_string(),
            });
        }

        let backoff = &self.poll_backoff;
        if backoff.multiplier < 1.0 || !backoff.multiplier.is_finite() {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "worker.poll_backoff.multiplier must be a finite value >= 1.0, got {}",
                    backoff.multiplier
                ),
            });
        }

        if backoff.initial_delay_ms > backoff.max_delay_ms {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "worker.poll_backoff.initial_delay_ms ({}) exceeds max_delay_ms ({})",
                    backoff.initial_delay_ms, backoff.max_delay_ms
                ),
            });
        }

        Ok(())
    }

    /// Backoff policy for empty polls and receive retries
    pub fn backoff(&self) -> PollBackoff {
        PollBackoff::from(&self.poll_backoff)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
