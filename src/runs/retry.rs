// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Retry policy for failed steps.
//!
//! A step that fails with a retryable [`StepError`] moves to UP_FOR_RETRY, waits
//! `backoff.delay_for(attempt)` with its slots released, then RESTARTED. Once
//! `max_retries` retries are spent the next failure is final.

use std::time::Duration;

use crate::errors::StepError;

/// Exponential backoff: `first × factor^n`, capped at `max`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    pub first: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (0-indexed).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let first_ms = self.first.as_millis() as f64;
        let max_ms = self.max.as_millis() as f64;
        let exp = retry.min(i32::MAX as u32) as i32;
        let raw = first_ms * self.factor.powi(exp);

        if !raw.is_finite() || raw < 0.0 || raw >= max_ms {
            self.max
        } else {
            Duration::from_millis(raw.round() as u64)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// No retries at all.
    pub fn never() -> Self {
        Self::new(0, BackoffPolicy::default())
    }

    /// Returns the delay before the next attempt, or `None` when the failure is final.
    ///
    /// `retries_used` counts retries already performed for this step.
    pub fn next_delay(&self, retries_used: u32, err: &StepError) -> Option<Duration> {
        if !err.is_retryable() || retries_used >= self.max_retries {
            return None;
        }
        Some(self.backoff.delay_for(retries_used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            BackoffPolicy {
                first: Duration::from_millis(100),
                max: Duration::from_secs(1),
                factor: 2.0,
            },
        )
    }

    #[test]
    fn exponential_growth_is_capped() {
        let backoff = policy(0).backoff;
        assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(800));
        assert_eq!(backoff.delay_for(4), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn retries_stop_after_budget() {
        let p = policy(2);
        let err = StepError::fail("flaky");
        assert_eq!(p.next_delay(0, &err), Some(Duration::from_millis(100)));
        assert_eq!(p.next_delay(1, &err), Some(Duration::from_millis(200)));
        assert_eq!(p.next_delay(2, &err), None);
    }

    #[test]
    fn fatal_errors_are_never_retried() {
        let p = policy(5);
        assert_eq!(p.next_delay(0, &StepError::fatal("nope")), None);
        assert_eq!(p.next_delay(0, &StepError::Interrupted), None);
        assert_eq!(RetryPolicy::never().next_delay(0, &StepError::fail("x")), None);
    }
}
