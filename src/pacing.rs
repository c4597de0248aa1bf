use std::{ops::RangeInclusive, time::Duration};

use rand::Rng;

const INITIAL_DELAY_SECONDS: RangeInclusive<f64> = 2.0..=5.0;
const RETRY_DELAY_SECONDS: RangeInclusive<f64> = 3.0..=8.0;

/// Delays applied around extraction attempts.
pub trait PacingPolicy: Send + Sync {
    /// Applied once before the first attempt of every request.
    fn initial_delay(&self) -> Duration;

    /// Applied before attempt `attempt` (1-based). The first attempt gets none.
    fn retry_delay(&self, attempt: usize) -> Duration;
}

/// Uniform jitter, escalating linearly with the attempt index.
#[derive(Debug, Clone)]
pub struct RandomPacing {
    initial: RangeInclusive<f64>,
    retry_base: RangeInclusive<f64>,
}

impl Default for RandomPacing {
    fn default() -> Self {
        Self {
            initial: INITIAL_DELAY_SECONDS,
            retry_base: RETRY_DELAY_SECONDS,
        }
    }
}

impl PacingPolicy for RandomPacing {
    fn initial_delay(&self) -> Duration {
        Duration::from_secs_f64(rand::thread_rng().gen_range(self.initial.clone()))
    }

    fn retry_delay(&self, attempt: usize) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }

        let base = rand::thread_rng().gen_range(self.retry_base.clone());
        Duration::from_secs_f64(base * attempt as f64)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoPacing;

impl PacingPolicy for NoPacing {
    fn initial_delay(&self) -> Duration {
        Duration::ZERO
    }

    fn retry_delay(&self, _attempt: usize) -> Duration {
        Duration::ZERO
    }
}
