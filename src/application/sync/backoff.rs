//! Exponential reconnect backoff.

use std::time::Duration;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Reconnect schedule: `min(base * 2^(attempt - 1), max)`, for at most
/// `max_attempts` attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_DELAY,
            max: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl Backoff {
    #[must_use]
    pub const fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
        }
    }

    /// Delay before the given 1-based attempt. Attempt 0 is treated as 1.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        let exponent = attempt.saturating_sub(1).min(63);

        let delay_ms = base_ms
            .saturating_mul(2_u64.saturating_pow(exponent))
            .min(max_ms);
        Duration::from_millis(delay_ms)
    }

    /// Returns true if the given 1-based attempt may still be made.
    #[must_use]
    pub const fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1, 1000)]
    #[test_case(2, 2000)]
    #[test_case(3, 4000)]
    #[test_case(4, 8000)]
    #[test_case(5, 16000)]
    #[test_case(6, 30000 ; "capped")]
    #[test_case(7, 30000 ; "stays capped")]
    #[test_case(200, 30000 ; "no overflow")]
    #[test_case(0, 1000 ; "zero is first attempt")]
    fn test_delay(attempt: u32, expected_ms: u64) {
        assert_eq!(
            Backoff::default().delay(attempt),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn test_attempt_budget() {
        let backoff = Backoff::default();
        assert!(backoff.allows(5));
        assert!(!backoff.allows(6));
    }
}
