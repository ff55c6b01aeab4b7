//! Simulated Time and Clock Domains.
//!
//! Simulated time is counted in ticks of one picosecond. Components that
//! operate on a clock convert their latencies to cycles of that clock and
//! align scheduled events to clock edges.

/// Simulated time in picoseconds.
pub type Tick = u64;

/// A number of clock cycles of some clock domain.
pub type Cycles = u64;

/// Ticks per nanosecond.
pub const TICKS_PER_NS: Tick = 1_000;

/// Ticks per microsecond.
pub const TICKS_PER_US: Tick = 1_000_000;

/// A fixed-frequency clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockDomain {
    period: Tick,
}

impl ClockDomain {
    /// Creates a clock with the given period in ticks.
    ///
    /// A zero period is clamped to one tick so that edge arithmetic
    /// never divides by zero.
    pub fn new(period: Tick) -> Self {
        Self {
            period: period.max(1),
        }
    }

    /// Returns the clock period in ticks.
    pub fn period(&self) -> Tick {
        self.period
    }

    /// Converts a duration in ticks to cycles, rounding up.
    pub fn ticks_to_cycles(&self, ticks: Tick) -> Cycles {
        ticks.div_ceil(self.period)
    }

    /// Converts cycles to a duration in ticks.
    pub fn cycles_to_ticks(&self, cycles: Cycles) -> Tick {
        cycles * self.period
    }

    /// Returns the tick of the clock edge `cycles` cycles after the first
    /// edge at or after `now`.
    ///
    /// # Arguments
    ///
    /// * `now` - Current simulated time.
    /// * `cycles` - Number of whole cycles to add after alignment.
    pub fn edge(&self, now: Tick, cycles: Cycles) -> Tick {
        let aligned = now.div_ceil(self.period) * self.period;
        aligned + self.cycles_to_ticks(cycles)
    }
}

impl Default for ClockDomain {
    /// A 1 GHz clock.
    fn default() -> Self {
        Self::new(TICKS_PER_NS)
    }
}
