//! Retry policy with exponential backoff and jitter
//!
//! Pure decision logic: given how many attempts an action has used and how
//! the last one failed, say whether to give up and how long to wait.

use std::sync::Arc;
use std::time::Duration;

use offsync_domain::constants::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_JITTER_FACTOR, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS,
    MAX_BACKOFF_EXPONENT, MAX_MAX_ATTEMPTS, MIN_MAX_ATTEMPTS,
};
use offsync_domain::{ErrorClass, OffsyncError, Result, RetryConfig};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Wait before the next attempt. Zero when giving up.
    pub delay: Duration,
    pub should_give_up: bool,
}

impl RetryDecision {
    fn give_up() -> Self {
        Self { delay: Duration::ZERO, should_give_up: true }
    }

    fn retry_after(delay: Duration) -> Self {
        Self { delay, should_give_up: false }
    }
}

/// Exponential backoff policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    /// Seeded jitter source; `None` uses the thread RNG.
    rng: Option<Arc<Mutex<StdRng>>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter_factor: DEFAULT_JITTER_FACTOR,
            rng: None,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `retry` config section.
    pub fn from_config(config: &RetryConfig) -> Result<Self> {
        Ok(Self::custom(config.max_attempts, config.base_delay(), config.max_delay())?
            .with_jitter_factor(config.jitter_factor))
    }

    /// Create a custom policy with validation
    pub fn custom(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Result<Self> {
        if !(MIN_MAX_ATTEMPTS..=MAX_MAX_ATTEMPTS).contains(&max_attempts) {
            return Err(OffsyncError::Config(format!(
                "max_attempts must be between {} and {}, got {}",
                MIN_MAX_ATTEMPTS, MAX_MAX_ATTEMPTS, max_attempts
            )));
        }

        if base_delay > max_delay {
            return Err(OffsyncError::Config(format!(
                "base_delay ({:?}) cannot be greater than max_delay ({:?})",
                base_delay, max_delay
            )));
        }

        Ok(Self { max_attempts, base_delay, max_delay, jitter_factor: DEFAULT_JITTER_FACTOR, rng: None })
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub fn without_jitter(self) -> Self {
        self.with_jitter_factor(0.0)
    }

    /// Draw jitter from a seeded generator so delays are reproducible.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Some(Arc::new(Mutex::new(StdRng::seed_from_u64(seed))));
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what happens after `attempts` failed executions.
    ///
    /// `attempts` counts executions since the last manual retry, including
    /// the one that just failed.
    pub fn decide(&self, attempts: u32, class: ErrorClass) -> RetryDecision {
        match class {
            ErrorClass::Permanent => RetryDecision::give_up(),
            ErrorClass::Transient if attempts >= self.max_attempts => RetryDecision::give_up(),
            ErrorClass::Transient => RetryDecision::retry_after(self.backoff_delay(attempts)),
        }
    }

    /// Jittered delay before attempt `attempts + 1`.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let delay = self.exponential_delay(attempts);
        self.apply_jitter(delay)
    }

    /// `base_delay * 2^(attempts - 1)`, capped at `max_delay`.
    fn exponential_delay(&self, attempts: u32) -> Duration {
        let base_millis = self.base_delay.as_millis() as u64;
        let max_millis = self.max_delay.as_millis() as u64;

        // Cap exponent to prevent overflow
        let exponent = attempts.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let multiplier = 2_u64.saturating_pow(exponent);

        Duration::from_millis(base_millis.saturating_mul(multiplier).min(max_millis))
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor == 0.0 {
            return delay;
        }

        let delay_millis = delay.as_millis() as f64;
        let jitter_range = delay_millis * self.jitter_factor;
        let bounds = -jitter_range / 2.0..=jitter_range / 2.0;

        let jitter = match &self.rng {
            Some(rng) => rng.lock().gen_range(bounds),
            None => rand::thread_rng().gen_range(bounds),
        };

        let max_millis = self.max_delay.as_millis() as f64;
        let final_millis = (delay_millis + jitter).clamp(0.0, max_millis) as u64;
        Duration::from_millis(final_millis)
    }
}
