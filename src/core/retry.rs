//! Backoff between setup attempts for accounts whose initial fetch failed.
//!
//! Only the setup path backs off. Once an account is running, its
//! coordinator polls at a fixed interval.

use std::time::{Duration, Instant};

const BASE_DELAY: Duration = Duration::from_secs(30);
const MAX_DELAY: Duration = Duration::from_secs(600);
const BACKOFF_FACTOR: u32 = 2;

#[derive(Debug, Clone)]
pub struct SetupRetry {
    failed_attempts: u32,
    next_attempt: Instant,
}

impl SetupRetry {
    pub fn new(now: Instant) -> Self {
        Self {
            failed_attempts: 0,
            next_attempt: now,
        }
    }

    /// Records a failed setup and returns how long to wait before the next one.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        let delay = self.current_delay();
        self.next_attempt = now + delay;
        delay
    }

    pub fn current_delay(&self) -> Duration {
        if self.failed_attempts == 0 {
            return Duration::ZERO;
        }

        let factor = BACKOFF_FACTOR.saturating_pow(self.failed_attempts - 1);
        let delay_secs = BASE_DELAY.as_secs().saturating_mul(factor as u64);

        Duration::from_secs(delay_secs).min(MAX_DELAY)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_attempt
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }
}
