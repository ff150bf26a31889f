//! Connection retry policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for establishing a link to the display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectPolicy {
    /// Number of connection attempts before giving up.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Delay after the first failed attempt in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for the delay between attempts in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Timeout for a single connection attempt in milliseconds.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Time the display gets to boot after a blind wake command.
    #[serde(default = "default_wake_wait_ms")]
    pub wake_wait_ms: u64,
}

fn default_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    3000
}

fn default_backoff_multiplier() -> f64 {
    1.5
}

fn default_attempt_timeout_ms() -> u64 {
    5000
}

fn default_wake_wait_ms() -> u64 {
    10_000
}

impl ConnectPolicy {
    /// Policy with a custom number of attempts.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            retries,
            ..Default::default()
        }
    }

    /// Delay to wait after the given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(base.min(self.max_delay_ms as f64) as u64)
    }

    /// Check if another attempt is allowed after `attempt` (0-indexed) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.retries
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn wake_wait(&self) -> Duration {
        Duration::from_millis(self.wake_wait_ms)
    }

    /// Longest a full connect sequence can take: every attempt timing out
    /// plus the delays between them.
    pub fn max_connect_time(&self) -> Duration {
        let attempts = self.retries.max(1);
        (0..attempts).fold(Duration::ZERO, |total, attempt| {
            let delay = if self.should_retry(attempt) {
                self.delay_for_attempt(attempt)
            } else {
                Duration::ZERO
            };
            total + self.attempt_timeout() + delay
        })
    }
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            wake_wait_ms: default_wake_wait_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ConnectPolicy::default();
        assert_eq!(policy.retries, 3);
        assert_eq!(policy.attempt_timeout(), Duration::from_secs(5));
        assert_eq!(policy.wake_wait(), Duration::from_secs(10));
    }

    #[test]
    fn test_delay_grows_then_caps() {
        let policy = ConnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(3000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(3000));
    }

    #[test]
    fn test_should_retry() {
        let policy = ConnectPolicy::with_retries(3);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert!(!ConnectPolicy::with_retries(1).should_retry(0));
    }

    #[test]
    fn test_max_connect_time() {
        assert_eq!(ConnectPolicy::default().max_connect_time(), Duration::from_secs(20));
        assert_eq!(ConnectPolicy::with_retries(1).max_connect_time(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let policy: ConnectPolicy = serde_json::from_str(r#"{"retries": 5}"#).unwrap();
        assert_eq!(policy.retries, 5);
        assert_eq!(policy.max_delay_ms, 3000);
    }
}
