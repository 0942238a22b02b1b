//! Virtual clock for the simulation.
//!
//! Time is measured in milliseconds of simulated time and only moves when the
//! simulation asks it to, either one fixed tick at a time or by jumping to the
//! run time of a deferred task.

/// Default tick length in milliseconds.
pub const DEFAULT_MS_PER_TICK: u64 = 1000;

/// Tick-based simulated clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimClock {
    now: u64,
    tick_ms: u64,
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new(DEFAULT_MS_PER_TICK)
    }
}

impl SimClock {
    /// Create a clock at time 0. A zero tick length is bumped to 1 ms.
    pub fn new(tick_ms: u64) -> Self {
        Self {
            now: 0,
            tick_ms: tick_ms.max(1),
        }
    }

    /// Current simulated time in milliseconds.
    #[inline]
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Length of one tick in milliseconds.
    #[inline]
    pub fn tick_ms(&self) -> u64 {
        self.tick_ms
    }

    /// Advance by one tick.
    #[inline]
    pub fn tick(&mut self) {
        self.now = self.now.saturating_add(self.tick_ms);
    }

    /// Advance by `n` ticks.
    pub fn tick_n(&mut self, n: u64) {
        for _ in 0..n {
            self.tick();
        }
    }

    /// Duration of `n` ticks in milliseconds.
    #[inline]
    pub fn ticks_to_ms(&self, n: u64) -> u64 {
        n.saturating_mul(self.tick_ms)
    }

    /// Jump to an absolute time. Never moves backward: if the clock is already
    /// past `t` it stays where it is.
    #[inline]
    pub fn jump_to(&mut self, t: u64) {
        if t > self.now {
            self.now = t;
        }
    }
}
