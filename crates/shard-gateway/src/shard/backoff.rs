//! Reconnect backoff
//!
//! Each reconnect waits a random delay in `[interval, 3 * interval]`, capped; the
//! interval then grows by the configured multiplier until it reaches the cap.

use rand::Rng;
use shard_common::ReconnectConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct ReconnectBackoff {
    initial_ms: u64,
    max_ms: u64,
    multiplier: f64,
    interval_ms: u64,
}

impl ReconnectBackoff {
    pub(crate) fn new(config: &ReconnectConfig) -> Self {
        Self {
            initial_ms: config.initial_ms,
            max_ms: config.max_ms,
            multiplier: config.multiplier,
            interval_ms: config.initial_ms,
        }
    }

    /// Delay before the next attempt; advances the interval
    pub(crate) fn next_delay(&mut self) -> Duration {
        let low = self.interval_ms.min(self.max_ms);
        let high = self.interval_ms.saturating_mul(3).min(self.max_ms);
        let delay = if high > low {
            rand::thread_rng().gen_range(low..=high)
        } else {
            low
        };

        let grown = (self.interval_ms as f64 * self.multiplier).round() as u64;
        self.interval_ms = grown.max(self.interval_ms).min(self.max_ms);

        Duration::from_millis(delay)
    }

    /// Back to the floor after a successful READY or RESUMED
    pub(crate) fn reset(&mut self) {
        self.interval_ms = self.initial_ms;
    }

    pub(crate) fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> ReconnectBackoff {
        ReconnectBackoff::new(&ReconnectConfig::default())
    }

    #[test]
    fn test_first_delay_within_jitter_range() {
        for _ in 0..100 {
            let delay = backoff().next_delay();
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay <= Duration::from_millis(3_000));
        }
    }

    #[test]
    fn test_interval_doubles_until_cap() {
        let mut b = backoff();
        let expected = [2_000, 4_000, 8_000, 16_000, 30_000, 30_000];
        for ms in expected {
            let _ = b.next_delay();
            assert_eq!(b.interval(), Duration::from_millis(ms));
        }
        for _ in 0..20 {
            assert!(b.next_delay() <= Duration::from_millis(30_000));
        }
    }

    #[test]
    fn test_reset() {
        let mut b = backoff();
        for _ in 0..4 {
            let _ = b.next_delay();
        }
        b.reset();
        assert_eq!(b.interval(), Duration::from_millis(1_000));
    }

    #[test]
    fn test_multiplier_is_configurable() {
        let mut b = ReconnectBackoff::new(&ReconnectConfig {
            autoreconnect: true,
            initial_ms: 100,
            max_ms: 1_000,
            multiplier: 1.5,
        });
        let _ = b.next_delay();
        assert_eq!(b.interval(), Duration::from_millis(150));
    }
}
