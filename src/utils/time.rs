//! Clock sources for round-trip timing.
//!
//! All timestamps of one initiator come from a single [`Clock`], so elapsed
//! durations never mix time sources.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Time source used to stamp requests and replies
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Monotonic clock backed by Tokio's time driver.
///
/// Follows Tokio's paused clock under `test-util`, so deadlines and
/// measurements agree in tests that advance time manually.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut offset = self
            .offset
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self
            .offset
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.base + offset
    }
}

/// Elapsed time between two readings, clamped at zero
#[inline]
pub fn elapsed_between(start: Instant, end: Instant) -> Duration {
    end.saturating_duration_since(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_millis(250));
        assert_eq!(elapsed_between(start, clock.now()), Duration::from_millis(250));
    }

    #[test]
    fn test_elapsed_never_negative() {
        let clock = ManualClock::new();
        let earlier = clock.now();
        clock.advance(Duration::from_secs(1));
        assert_eq!(elapsed_between(clock.now(), earlier), Duration::ZERO);
    }
}
