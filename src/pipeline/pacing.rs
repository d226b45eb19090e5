//! Inter-chunk pacing.
//!
//! The remote service enforces a request-rate limit. The driver asks a
//! [`Pacer`] how long to wait after each chunk; the pacer never sleeps itself,
//! so policies are plain state machines and the driver keeps control of
//! cancellation while waiting.

use crate::config::RatePolicy;
use crate::output::ChunkStatus;
use std::time::Duration;

/// Decides the delay before the next chunk.
pub trait Pacer: Send {
    /// Record the outcome of the chunk that just finished and return the
    /// delay before the next one starts.
    fn delay_after(&mut self, status: ChunkStatus) -> Duration;
}

/// Same interval after every chunk.
#[derive(Debug, Clone)]
pub struct FixedInterval {
    interval: Duration,
}

impl FixedInterval {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Pacer for FixedInterval {
    fn delay_after(&mut self, _status: ChunkStatus) -> Duration {
        self.interval
    }
}

/// Doubles the delay after each refused or failed chunk, up to `max`;
/// an extracted chunk resets it to `base`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
        }
    }
}

impl Pacer for ExponentialBackoff {
    fn delay_after(&mut self, status: ChunkStatus) -> Duration {
        match status {
            ChunkStatus::Extracted => {
                self.current = self.base;
                self.base
            }
            ChunkStatus::Refused | ChunkStatus::Failed => {
                let delay = self.current;
                self.current = self.current.saturating_mul(2).min(self.max);
                delay.max(self.base)
            }
        }
    }
}

/// No delay at all.
#[derive(Debug, Clone, Default)]
pub struct Unpaced;

impl Pacer for Unpaced {
    fn delay_after(&mut self, _status: ChunkStatus) -> Duration {
        Duration::ZERO
    }
}

/// Build the pacer for a configured policy.
pub fn pacer_for(policy: &RatePolicy) -> Box<dyn Pacer> {
    match policy {
        RatePolicy::Fixed(interval) => Box::new(FixedInterval::new(*interval)),
        RatePolicy::Backoff { base, max } => Box::new(ExponentialBackoff::new(*base, *max)),
        RatePolicy::Unpaced => Box::new(Unpaced),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn fixed_ignores_outcome() {
        let mut p = FixedInterval::new(secs(4));
        assert_eq!(p.delay_after(ChunkStatus::Extracted), secs(4));
        assert_eq!(p.delay_after(ChunkStatus::Failed), secs(4));
    }

    #[test]
    fn backoff_grows_on_failure_and_resets() {
        let mut p = ExponentialBackoff::new(secs(2), secs(10));
        assert_eq!(p.delay_after(ChunkStatus::Refused), secs(2));
        assert_eq!(p.delay_after(ChunkStatus::Failed), secs(4));
        assert_eq!(p.delay_after(ChunkStatus::Failed), secs(8));
        assert_eq!(p.delay_after(ChunkStatus::Failed), secs(10));
        assert_eq!(p.delay_after(ChunkStatus::Failed), secs(10));
        assert_eq!(p.delay_after(ChunkStatus::Extracted), secs(2));
        assert_eq!(p.delay_after(ChunkStatus::Failed), secs(2));
    }

    #[test]
    fn policy_builds_matching_pacer() {
        let mut p = pacer_for(&RatePolicy::Unpaced);
        assert_eq!(p.delay_after(ChunkStatus::Failed), Duration::ZERO);
        let mut p = pacer_for(&RatePolicy::Fixed(secs(3)));
        assert_eq!(p.delay_after(ChunkStatus::Extracted), secs(3));
    }
}
