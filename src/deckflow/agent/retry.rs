// SPDX-License-Identifier: MIT

//! Exponential backoff between retry attempts

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Backoff {
    /// Delay before the first retry; 0 disables waiting
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 10_000,
            jitter: true,
        }
    }
}

impl Backoff {
    pub fn exponential(base_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            ..Self::default()
        }
    }

    /// Delay to wait after the failed attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let factor = 2u64.saturating_pow(attempt.min(32));
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        if !self.jitter {
            return Duration::from_millis(ms);
        }
        // upper half: [ms/2, ms]
        let jitter = 0.5 + rand::random::<f64>() * 0.5;
        Duration::from_millis((ms as f64 * jitter) as u64)
    }

    pub(crate) async fn wait(&self, attempt: u32) {
        let delay = self.delay_for(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_base_means_no_delay() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_for(0), Duration::ZERO);
        assert_eq!(backoff.delay_for(5), Duration::ZERO);
    }

    #[test]
    fn test_doubles_and_caps() {
        let backoff = Backoff {
            base_delay_ms: 100,
            max_delay_ms: 500,
            jitter: false,
        };
        assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(400));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(60), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_upper_half() {
        let backoff = Backoff {
            base_delay_ms: 1000,
            max_delay_ms: 1000,
            jitter: true,
        };
        for _ in 0..50 {
            let d = backoff.delay_for(0);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1000));
        }
    }
}
