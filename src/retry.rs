//! Bounded exponential backoff
//!
//! Shared by the SSE transport (event-stream reconnect) and the Ollama
//! adapter (transient request failures).

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Exponential backoff schedule with a retry cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Maximum number of retries after the first attempt (0 = fail fast).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl From<&ReconnectConfig> for Backoff {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            jitter: false,
        }
    }
}

impl Backoff {
    /// A schedule that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// Doubles from `initial_delay` and is capped at `max_delay`. Attempt `0`
    /// has no delay.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use mcphost::retry::Backoff;
    ///
    /// let backoff = Backoff::default();
    /// assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(1));
    /// assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(4));
    /// assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(30));
    /// ```
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.saturating_pow(attempt - 1);
        let base = self
            .initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter {
            base.mul_f64(1.0 + rand::random::<f64>() * 0.25)
        } else {
            base
        }
    }

    /// Whether another retry is allowed after `attempt` retries have run.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_then_caps() {
        let backoff = Backoff {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter: false,
        };
        assert_eq!(backoff.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(backoff.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let backoff = Backoff {
            jitter: true,
            ..Default::default()
        };
        let delay = backoff.delay_for_attempt(1);
        assert!(delay >= Duration::from_secs(1));
        assert!(delay <= Duration::from_millis(1250));
    }

    #[test]
    fn test_allows_counts_retries() {
        let backoff = Backoff {
            max_retries: 2,
            ..Default::default()
        };
        assert!(backoff.allows(0));
        assert!(backoff.allows(1));
        assert!(!backoff.allows(2));
        assert!(!Backoff::none().allows(0));
    }

    #[test]
    fn test_from_reconnect_config() {
        let config = ReconnectConfig {
            max_retries: 7,
            initial_backoff_ms: 50,
            max_backoff_ms: 400,
        };
        let backoff = Backoff::from(&config);
        assert_eq!(backoff.max_retries, 7);
        assert_eq!(backoff.initial_delay, Duration::from_millis(50));
        assert_eq!(backoff.max_delay, Duration::from_millis(400));
    }
}
