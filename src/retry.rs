//! Reconnect policies for the agent

use std::time::Duration;

/// Delay between agent reconnect attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// RetryPolicy decides how long to wait before the next reconnect.
/// `attempt` counts consecutive failures, starting at 1. None means
/// give up.
pub trait RetryPolicy: Send {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;
}

/// FixedDelay waits the same time before every attempt
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl Default for FixedDelay {
    /// 10 seconds, forever
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy for FixedDelay {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay),
        }
    }
}

/// ExponentialBackoff doubles the delay after each consecutive failure,
/// up to `max`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    max_attempts: Option<u32>,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt >= max) {
            return None;
        }

        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        Some(self.initial.saturating_mul(factor).min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_never_gives_up_by_default() {
        let mut policy = FixedDelay::default();
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(10)));
        assert_eq!(policy.next_delay(u32::MAX - 1), Some(Duration::from_secs(10)));
    }

    #[test]
    fn fixed_delay_attempt_cap() {
        let mut policy = FixedDelay::new(Duration::from_millis(5)).with_max_attempts(3);
        assert!(policy.next_delay(2).is_some());
        assert!(policy.next_delay(3).is_none());
    }

    #[test]
    fn exponential_backoff_grows_then_caps() {
        let mut policy = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let delays: Vec<_> = (1..=7).map(|a| policy.next_delay(a).unwrap().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(policy.next_delay(200), Some(Duration::from_secs(30)));
    }
}
