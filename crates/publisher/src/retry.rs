//! # Retry
//!
//! Exponential backoff with jitter for failed publish attempts.
use std::time;

use rand::Rng;
use serde::Deserialize;

#[derive(Clone, Debug, PartialEq)]
/// Retry parameters for outbox entries.
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    pub backoff_coefficient: u32,
    /// The backoff interval after the first failed attempt.
    pub initial_interval: time::Duration,
    /// The maximum possible backoff between attempts.
    pub maximum_interval: time::Duration,
    /// Attempts allowed before an entry is declared dead.
    pub max_attempts: u32,
    /// Fraction of the interval randomly shaved off, in `[0, 1]`.
    pub jitter: f64,
}

impl RetryPolicy {
    /// Initialize a `RetryPolicyBuilder`.
    pub fn build(backoff_coefficient: u32, initial_interval: time::Duration) -> RetryPolicyBuilder {
        RetryPolicyBuilder::new(backoff_coefficient, initial_interval)
    }

    /// Backoff after `attempt` failed attempts (1-based), before jitter.
    pub fn retry_interval(&self, attempt: u32) -> time::Duration {
        let factor = self
            .backoff_coefficient
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let candidate = self
            .initial_interval
            .checked_mul(factor)
            .unwrap_or(self.maximum_interval);

        std::cmp::min(candidate, self.maximum_interval)
    }

    /// Backoff with jitter applied, never below zero nor above the cap.
    pub fn jittered_interval<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> time::Duration {
        let interval = self.retry_interval(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return interval;
        }
        let shave = rng.gen_range(0.0..=jitter);
        interval.mul_f64(1.0 - shave)
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicyBuilder::default().provide()
    }
}

/// Builder pattern struct to provide a `RetryPolicy`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetryPolicyBuilder {
    pub backoff_coefficient: u32,
    #[serde(rename = "initial_interval_ms", with = "millis")]
    pub initial_interval: time::Duration,
    #[serde(rename = "maximum_interval_ms", with = "millis")]
    pub maximum_interval: time::Duration,
    pub max_attempts: u32,
    pub jitter: f64,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: time::Duration::from_secs(300),
            max_attempts: 10,
            jitter: 0.2,
        }
    }
}

impl RetryPolicyBuilder {
    pub fn new(backoff_coefficient: u32, initial_interval: time::Duration) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            ..RetryPolicyBuilder::default()
        }
    }

    pub fn maximum_interval(mut self, interval: time::Duration) -> RetryPolicyBuilder {
        self.maximum_interval = interval;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> RetryPolicyBuilder {
        self.max_attempts = attempts;
        self
    }

    pub fn jitter(mut self, jitter: f64) -> RetryPolicyBuilder {
        self.jitter = jitter;
        self
    }

    /// Provide a `RetryPolicy` according to build parameters provided thus far.
    pub fn provide(&self) -> RetryPolicy {
        RetryPolicy {
            backoff_coefficient: self.backoff_coefficient,
            initial_interval: self.initial_interval,
            maximum_interval: std::cmp::max(self.maximum_interval, self.initial_interval),
            max_attempts: self.max_attempts.max(1),
            jitter: self.jitter,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
