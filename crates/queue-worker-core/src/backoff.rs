//! # Poll Backoff Module
//!
//! Exponential backoff between polls that come back empty, and between
//! retries of a receive that failed transiently.
//!
//! Delays carry jitter so a fleet of workers started together does not poll
//! an idle queue in lockstep.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff policy for the polling loop
///
/// # Examples
///
/// ```rust
/// use queue_worker_core::backoff::PollBackoff;
/// use std::time::Duration;
///
/// // Default policy: 200ms initial, 5s max, 2.0x multiplier
/// let backoff = PollBackoff::default();
///
/// // Custom policy
/// let backoff = PollBackoff::new(Duration::from_millis(100), Duration::from_secs(2), 1.5);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PollBackoff {
    /// Delay after the first empty poll
    pub initial_delay: Duration,

    /// Maximum delay between polls
    pub max_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Whether to add jitter to delays
    pub use_jitter: bool,

    /// Jitter range as percentage (default 25% = ±25%)
    pub jitter_percent: f64,

    /// When false every delay is zero and the loop polls back to back
    pub enabled: bool,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            use_jitter: true,
            jitter_percent: 0.25,
            enabled: true,
        }
    }
}

impl PollBackoff {
    /// Create a new backoff policy with jitter enabled
    pub fn new(initial_delay: Duration, max_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_multiplier,
            ..Self::default()
        }
    }

    /// Policy that never sleeps
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Set custom jitter percentage (0.0 to 1.0)
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    /// Calculate the delay before the next poll
    ///
    /// Uses delay = initial * multiplier^attempt, capped at `max_delay`,
    /// then jittered when enabled.
    ///
    /// # Arguments
    ///
    /// * `attempt` - Number of consecutive empty polls (or failed receives)
    ///   before this one, 0-based
    ///
    /// # Examples
    ///
    /// ```rust
    /// use queue_worker_core::backoff::PollBackoff;
    /// use std::time::Duration;
    ///
    /// let backoff = PollBackoff::default().without_jitter();
    ///
    /// assert_eq!(backoff.calculate_delay(0), Duration::from_millis(200));
    /// assert_eq!(backoff.calculate_delay(1), Duration::from_millis(400));
    /// assert_eq!(backoff.calculate_delay(10), Duration::from_secs(5));
    /// ```
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }

        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        // Cap at max_delay; also guards against overflow to infinity
        let capped_delay_secs = base_delay_secs.min(self.max_delay.as_secs_f64());

        let final_delay_secs = if self.use_jitter {
            Self::add_jitter(capped_delay_secs, self.jitter_percent)
        } else {
            capped_delay_secs
        };

        Duration::from_secs_f64(final_delay_secs)
    }

    /// Applies random variation in range [delay * (1-jitter), delay * (1+jitter)]
    fn add_jitter(delay_secs: f64, jitter_percent: f64) -> f64 {
        let mut rng = rand::thread_rng();

        let jitter_range = delay_secs * jitter_percent;
        let jitter = rng.gen_range(-jitter_range..=jitter_range);

        (delay_secs + jitter).max(0.0)
    }
}

/// Serializable backoff settings, as found in worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub enabled: bool,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_percent: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        let defaults = PollBackoff::default();
        Self {
            enabled: defaults.enabled,
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            multiplier: defaults.backoff_multiplier,
            jitter_percent: defaults.jitter_percent,
        }
    }
}

impl From<&BackoffConfig> for PollBackoff {
    fn from(config: &BackoffConfig) -> Self {
        let backoff = PollBackoff {
            enabled: config.enabled,
            ..PollBackoff::new(
                Duration::from_millis(config.initial_delay_ms),
                Duration::from_millis(config.max_delay_ms),
                config.multiplier,
            )
        };

        if config.jitter_percent > 0.0 {
            backoff.with_jitter_percent(config.jitter_percent)
        } else {
            backoff.without_jitter()
        }
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
