use crate::config::MessageBrokerConfig;
use std::time::Duration;

/// Header carrying how many times a message has already been redelivered
pub const RETRY_HEADER: &str = "x-retry-count";

/// What to do with a message whose handler failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Republish with `attempt` in the retry header after waiting `delay`
    Retry { attempt: u32, delay: Duration },
    DeadLetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &MessageBrokerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// No redelivery follows a failure at this count
    pub fn is_last_attempt(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// `retry_count` is the value read from the header, 0 when absent
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        if self.is_last_attempt(retry_count) {
            return RetryDecision::DeadLetter;
        }
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        RetryDecision::Retry {
            attempt: retry_count + 1,
            delay: self.base_delay.saturating_mul(factor),
        }
    }
}

pub fn dead_letter_exchange(queue: &str) -> String {
    format!("{}.dlx", queue)
}

pub fn dead_letter_queue(queue: &str) -> String {
    format!("{}.dlq", queue)
}
