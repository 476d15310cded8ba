//! Optional bounded backoff between failed status polls.

use std::time::Duration;

use crate::config::RetryConfig;

/// Calculates the next backoff delay from the current delay and config.
///
/// The result is clamped to `max_delay_ms`.
pub fn next_delay(current: Duration, config: &RetryConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(Duration::from_millis(config.max_delay_ms))
}

/// Delay schedule for one poll loop.
///
/// Without a [`RetryConfig`] the loop keeps its fixed cadence even while
/// polls fail.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    config: Option<RetryConfig>,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(base: Duration, config: Option<RetryConfig>) -> Self {
        Self {
            base,
            config,
            current: None,
        }
    }

    /// Wait before the next poll.
    pub fn delay(&self) -> Duration {
        self.current.unwrap_or(self.base)
    }

    pub fn record_failure(&mut self) {
        let Some(config) = &self.config else {
            return;
        };
        self.current = Some(match self.current {
            None => Duration::from_millis(config.initial_delay_ms)
                .min(Duration::from_millis(config.max_delay_ms)),
            Some(current) => next_delay(current, config),
        });
    }

    pub fn record_success(&mut self) {
        self.current = None;
    }
}
