use std::time::Duration;

/// Consecutive stream errors after which a worker gives up.
pub const MAX_ERRORS: u32 = 10;

/// Reconnect schedule for stream workers.
///
/// The delay after the n-th consecutive error is `(2n)^2` seconds:
/// 4s, 16s, 36s, 64s, ... This is independent of the publisher's linear
/// retry interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_errors: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_errors: MAX_ERRORS,
        }
    }
}

impl ReconnectPolicy {
    /// Sleep before reconnecting after `consecutive_errors` failures.
    pub fn delay(&self, consecutive_errors: u32) -> Duration {
        let n = u64::from(consecutive_errors);
        Duration::from_secs((2 * n).pow(2))
    }

    /// True once the error budget is spent.
    pub fn exhausted(&self, consecutive_errors: u32) -> bool {
        consecutive_errors >= self.max_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_square_of_twice_the_error_count() {
        let policy = ReconnectPolicy::default();
        for n in 1..=9u32 {
            let expected = u64::from(2 * n).pow(2);
            assert_eq!(policy.delay(n), Duration::from_secs(expected), "n={n}");
        }
        assert_eq!(policy.delay(1), Duration::from_secs(4));
        assert_eq!(policy.delay(2), Duration::from_secs(16));
        assert_eq!(policy.delay(3), Duration::from_secs(36));
    }

    #[test]
    fn delay_strictly_increases() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<_> = (1..=9).map(|n| policy.delay(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn budget_is_ten_errors() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.exhausted(9));
        assert!(policy.exhausted(10));
        assert!(policy.exhausted(11));
    }
}
