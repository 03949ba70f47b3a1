//! Retry delays and the give-up rule.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::{opt_secs, secs};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay between liveness checks while the channel is offline.
    #[serde(rename = "check_interval_secs", with = "secs")]
    pub check_interval: Duration,
    /// Base delay after a failed attempt or a finished recording.
    #[serde(rename = "retry_delay_secs", with = "secs")]
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
    #[serde(rename = "max_delay_secs", with = "secs")]
    pub max_delay: Duration,
    /// Add up to 25% random jitter to failure delays.
    pub use_jitter: bool,
    /// Give up after this many failed attempts in a row. 0 means never.
    pub max_consecutive_failures: u32,
    /// Give up when a failure streak has lasted this long.
    #[serde(rename = "max_failure_window_secs", with = "opt_secs")]
    pub max_failure_window: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(15),
            retry_delay: Duration::from_secs(15),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(300),
            use_jitter: false,
            max_consecutive_failures: 5,
            max_failure_window: None,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay_for_failure(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(64) as i32;
        let base = self.retry_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64()).max(0.0);

        let secs = if self.use_jitter {
            capped + capped * 0.25 * rand::random::<f64>()
        } else {
            capped
        };
        Duration::from_secs_f64(secs)
    }

    /// Whether the failure streak in `state` should end the run.
    pub fn exhausted(&self, state: &RetryState, now: Instant) -> bool {
        let by_count = self.max_consecutive_failures > 0
            && state.consecutive_failures >= self.max_consecutive_failures;
        let by_time = self
            .max_failure_window
            .is_some_and(|window| state.failing_for(now) >= window);
        by_count || by_time
    }
}

/// Failure bookkeeping, owned by the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    pub consecutive_failures: u32,
    pub last_attempt_at: Option<Instant>,
    streak_started: Option<Instant>,
}

impl RetryState {
    pub fn record_attempt(&mut self, now: Instant) {
        self.last_attempt_at = Some(now);
    }

    /// Count one failed attempt; returns the new streak length.
    pub fn record_failure(&mut self, now: Instant) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.streak_started.get_or_insert(now);
        self.consecutive_failures
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.streak_started = None;
    }

    /// Time since the first failure of the current streak.
    pub fn failing_for(&self, now: Instant) -> Duration {
        self.streak_started
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_delay_is_fixed() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_failure(1), Duration::from_secs(15));
        assert_eq!(policy.delay_for_failure(4), Duration::from_secs(15));
    }

    #[rstest]
    #[case(1, 10)]
    #[case(2, 20)]
    #[case(3, 40)]
    #[case(5, 60)]
    #[case(200, 60)]
    fn exponential_delay_is_capped(#[case] failures: u32, #[case] expected_secs: u64) {
        let policy = RetryPolicy {
            retry_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            ..Default::default()
        };
        assert_eq!(
            policy.delay_for_failure(failures),
            Duration::from_secs(expected_secs)
        );
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let policy = RetryPolicy {
            use_jitter: true,
            ..Default::default()
        };
        for _ in 0..50 {
            let d = policy.delay_for_failure(1);
            assert!(d >= Duration::from_secs(15));
            assert!(d <= Duration::from_secs_f64(15.0 * 1.25));
        }
    }

    #[test]
    fn exhausted_by_count() {
        let policy = RetryPolicy {
            max_consecutive_failures: 3,
            ..Default::default()
        };
        let now = Instant::now();
        let mut state = RetryState::default();
        state.record_failure(now);
        state.record_failure(now);
        assert!(!policy.exhausted(&state, now));
        state.record_failure(now);
        assert!(policy.exhausted(&state, now));

        state.reset();
        assert_eq!(state.consecutive_failures, 0);
        assert!(!policy.exhausted(&state, now));
    }

    #[test]
    fn zero_means_unlimited() {
        let policy = RetryPolicy {
            max_consecutive_failures: 0,
            ..Default::default()
        };
        let now = Instant::now();
        let mut state = RetryState::default();
        for _ in 0..1000 {
            state.record_failure(now);
        }
        assert!(!policy.exhausted(&state, now));
    }

    #[test]
    fn exhausted_by_failure_window() {
        let policy = RetryPolicy {
            max_consecutive_failures: 0,
            max_failure_window: Some(Duration::from_secs(600)),
            ..Default::default()
        };
        let t0 = Instant::now();
        let mut state = RetryState::default();
        state.record_failure(t0);
        state.record_failure(t0 + Duration::from_secs(300));
        assert!(!policy.exhausted(&state, t0 + Duration::from_secs(300)));
        assert!(policy.exhausted(&state, t0 + Duration::from_secs(600)));
    }
}
