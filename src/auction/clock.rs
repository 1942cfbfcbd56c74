//! Time sources for round deadlines
//!
//! Every deadline comparison goes through a [`Clock`] so that tests and the
//! simulator can drive time explicitly.

use super::types::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// Manually advanced simulation clock
#[derive(Debug, Default)]
pub struct SimClock {
    micros: AtomicU64,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, d: Duration) -> Timestamp {
        let step = d.as_micros() as u64;
        Timestamp(self.micros.fetch_add(step, Ordering::SeqCst) + step)
    }

    pub fn set(&self, t: Timestamp) {
        self.micros.store(t.0, Ordering::SeqCst);
    }
}

impl Clock for SimClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.micros.load(Ordering::SeqCst))
    }
}

/// Wall-clock time measured from construction
#[derive(Debug)]
pub struct WallClock {
    start: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.start.elapsed().as_micros() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_clock_advances_only_when_told() {
        let clock = SimClock::new();
        assert_eq!(clock.now(), Timestamp(0));
        assert_eq!(clock.advance(Duration::from_millis(250)), Timestamp::from_millis(250));
        assert_eq!(clock.now(), Timestamp(250_000));
        clock.set(Timestamp::from_millis(10));
        assert_eq!(clock.now(), Timestamp(10_000));
    }
}
