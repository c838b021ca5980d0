//! # Delivery Backoff Module
//!
//! Retry scheduling for outbox deliveries: a stepped schedule with a hard
//! cap, plus jitter to prevent thundering herd against a recovering target.

use rand::Rng;
use std::time::Duration;

/// Backoff policy for outbox delivery retries.
///
/// Delays follow a fixed step schedule; attempts beyond the schedule use the
/// cap. Jitter (±25% by default) is applied on top.
///
/// # Examples
///
/// ```rust
/// use hookbridge_outbox::retry::DeliveryBackoff;
///
/// // Default schedule: 10s, 30s, 2m, 10m, 30m, then capped at 1h;
/// // at most 10 attempts.
/// let backoff = DeliveryBackoff::default();
/// assert_eq!(backoff.max_attempts, 10);
/// ```
#[derive(Debug, Clone)]
pub struct DeliveryBackoff {
    /// Step schedule indexed by completed attempts
    pub schedule: Vec<Duration>,

    /// Delay cap for attempts beyond the schedule
    pub max_delay: Duration,

    /// Attempts after which the entry is dead-lettered
    pub max_attempts: u32,

    /// Whether to add jitter to delays (recommended)
    pub use_jitter: bool,

    /// Jitter range as a fraction (default 25% = ±25%)
    pub jitter_fraction: f64,
}

impl Default for DeliveryBackoff {
    fn default() -> Self {
        Self {
            schedule: vec![
                Duration::from_secs(10),
                Duration::from_secs(30),
                Duration::from_secs(2 * 60),
                Duration::from_secs(10 * 60),
                Duration::from_secs(30 * 60),
            ],
            max_delay: Duration::from_secs(60 * 60),
            max_attempts: 10,
            use_jitter: true,
            jitter_fraction: 0.25,
        }
    }
}

impl DeliveryBackoff {
    /// Disable jitter (test determinism only).
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Override the attempt ceiling.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before the next attempt, given how many attempts have been made.
    ///
    /// `attempts` is the value the store tracks: 1 after the first claim.
    /// The first retry therefore uses the first schedule step.
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let index = attempts.saturating_sub(1) as usize;
        let base = self
            .schedule
            .get(index)
            .copied()
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.use_jitter {
            Self::add_jitter(base, self.jitter_fraction)
        } else {
            base
        }
    }

    /// Check whether another attempt is allowed after `attempts` so far.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Apply random variation in `[base * (1-f), base * (1+f)]`.
    fn add_jitter(base: Duration, fraction: f64) -> Duration {
        let base_secs = base.as_secs_f64();
        let range = base_secs * fraction;
        if range <= 0.0 {
            return base;
        }

        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(-range..=range);
        Duration::from_secs_f64((base_secs + jitter).max(0.0))
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
