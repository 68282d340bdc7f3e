//! Monotonic tick sources consulted by the group-commit time trigger

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A monotonic tick counter
pub trait TickSource: Send + Sync {
    /// Ticks elapsed since the source was created
    fn ticks(&self) -> u64;
}

/// Ticks derived from the system's monotonic clock
#[derive(Debug)]
pub struct SystemTicks {
    origin: Instant,
    tick: Duration,
}

impl SystemTicks {
    /// One tick every `tick` (clamped to at least a millisecond)
    pub fn new(tick: Duration) -> Self {
        Self {
            origin: Instant::now(),
            tick: tick.max(Duration::from_millis(1)),
        }
    }

    /// One tick every `millis` milliseconds
    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }
}

impl TickSource for SystemTicks {
    fn ticks(&self) -> u64 {
        (self.origin.elapsed().as_nanos() / self.tick.as_nanos()) as u64
    }
}

/// A tick counter that only moves when told to
#[derive(Debug, Default)]
pub struct ManualTicks {
    ticks: Mutex<u64>,
}

impl ManualTicks {
    /// Start at tick zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, ticks: u64) {
        *self.ticks.lock() += ticks;
    }
}

impl TickSource for ManualTicks {
    fn ticks(&self) -> u64 {
        *self.ticks.lock()
    }
}
