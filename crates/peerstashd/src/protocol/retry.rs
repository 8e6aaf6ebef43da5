//! Retry state for timer-driven protocols.

use std::time::Duration;

/// Exponential backoff: a current delay and a number of retries left.
///
/// Drivers wait `delay()`, check their condition, then call `advance()`;
/// a false return means the budget is spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    delay: Duration,
    remaining: u32,
}

impl Backoff {
    pub fn new(initial: Duration, retries: u32) -> Self {
        Self {
            delay: initial,
            remaining: retries,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Use up one retry and double the delay.
    pub fn advance(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        self.delay = self.delay.saturating_mul(2);
        true
    }
}
