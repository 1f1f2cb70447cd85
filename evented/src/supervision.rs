//! What happens to an instance after it failed.

use std::time::Duration;

use rand::Rng;

use crate::errors::{ConfigError, PersistenceError};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SupervisorStrategy {
    /// Stop on the first failure.
    #[default]
    Stop,
    /// Restart with exponentially growing, jittered delays.
    RestartWithBackoff(Backoff),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    random_factor: f64,
    max_restarts: Option<u32>,
    reset_after: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Decision {
    Stop,
    Restart { attempt: u32, delay: Duration },
}

// Implementations

impl SupervisorStrategy {
    pub fn restart_with_backoff(
        min: Duration,
        max: Duration,
        random_factor: f64,
    ) -> Result<Self, ConfigError> {
        Ok(SupervisorStrategy::RestartWithBackoff(Backoff::new(
            min,
            max,
            random_factor,
        )?))
    }

    /// Decide for the `attempt`-th consecutive failure, counting from 0.
    /// Replay corruption always stops.
    pub(crate) fn decide(
        &self,
        error: &PersistenceError,
        attempt: u32,
        rng: &mut impl Rng,
    ) -> Decision {
        if error.is_fatal() {
            return Decision::Stop;
        }

        match self {
            SupervisorStrategy::Stop => Decision::Stop,
            SupervisorStrategy::RestartWithBackoff(backoff) => {
                if backoff.max_restarts.is_some_and(|max| attempt >= max) {
                    return Decision::Stop;
                }

                Decision::Restart {
                    attempt,
                    delay: backoff.delay(attempt, rng),
                }
            }
        }
    }
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, random_factor: f64) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::BackoffRange {
                min_ms: min.as_millis(),
                max_ms: max.as_millis(),
            });
        }
        if !(0.0..=1.0).contains(&random_factor) {
            return Err(ConfigError::RandomFactor(random_factor));
        }

        Ok(Self {
            min,
            max,
            random_factor,
            max_restarts: None,
            reset_after: None,
        })
    }

    /// Give up and stop after this many consecutive restarts.
    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = Some(max_restarts);
        self
    }

    /// Forget earlier failures once an instance ran this long without failing.
    pub fn with_reset_after(mut self, reset_after: Duration) -> Self {
        self.reset_after = Some(reset_after);
        self
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn random_factor(&self) -> f64 {
        self.random_factor
    }

    pub fn reset_after(&self) -> Option<Duration> {
        self.reset_after
    }

    /// `min * 2^attempt` capped at `max`, stretched by up to `random_factor`
    /// and capped at `max` again.
    pub fn delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let base = self
            .min
            .checked_mul(2u32.saturating_pow(attempt))
            .map_or(self.max, |d| d.min(self.max));

        if self.random_factor == 0.0 {
            return base;
        }

        let jitter = 1.0 + rng.gen_range(0.0..1.0) * self.random_factor;

        Duration::try_from_secs_f64(base.as_secs_f64() * jitter)
            .map_or(self.max, |d| d.min(self.max))
    }
}
