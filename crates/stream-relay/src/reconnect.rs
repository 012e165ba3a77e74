use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Reconnect/backoff configuration shared by both transport variants.
#[derive(Clone, Copy, Debug)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            factor: 2.0,
            jitter: 0.0,
        }
    }
}

impl BackoffConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.initial_delay.is_zero() {
            return Err("Initial reconnect delay must be > 0".to_string());
        }
        if self.max_delay.is_zero() {
            return Err("Max reconnect delay must be > 0".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err("Max reconnect delay must be >= initial reconnect delay".to_string());
        }
        if self.factor < 1.0 || !self.factor.is_finite() {
            return Err("Backoff factor must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) || !self.jitter.is_finite() {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }
}

/// Delay before reconnection attempt `attempt` (0-based):
/// `min(initial * factor^attempt, max)`, optionally blended with jitter.
pub fn calculate_backoff(config: BackoffConfig, attempt: u32) -> Duration {
    let initial = config.initial_delay.as_secs_f64();
    let max = config.max_delay.as_secs_f64();
    let exponent = config.factor.powf(f64::from(attempt));
    let base = (initial * exponent).min(max);

    if config.jitter == 0.0 {
        return Duration::from_secs_f64(base);
    }

    let mut rng = rand::rng();
    let randomized = rng.random_range(0.0..=base);
    let blended = base * (1.0 - config.jitter) + randomized * config.jitter;
    Duration::from_secs_f64(blended)
}

/// A scheduled reconnection attempt.
///
/// Recomputed after every failed attempt and discarded once a connection
/// opens or the budget runs out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingRetry {
    /// 0-based index of the attempt being scheduled.
    pub attempt: u32,
    pub next_delay: Duration,
    pub deadline: Instant,
}

impl PendingRetry {
    /// Schedule retry `attempt`, or `None` if `max_attempts` are used up.
    pub fn schedule(
        config: BackoffConfig,
        attempt: u32,
        max_attempts: Option<u32>,
        now: Instant,
    ) -> Option<Self> {
        if let Some(max) = max_attempts
            && attempt >= max
        {
            return None;
        }
        let next_delay = calculate_backoff(config, attempt);
        Some(Self {
            attempt,
            next_delay,
            deadline: now + next_delay,
        })
    }
}
