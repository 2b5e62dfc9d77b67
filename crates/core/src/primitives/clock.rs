//! Programmable clock divider.
//!
//! Counts down from the divisor once per driving clock tick. Reaching zero
//! marks a bit-cell boundary (`elapsed`) and reloads the counter; passing the
//! midpoint of the cell marks the sampling instant (`half_elapsed`). One
//! bit-cell lasts `divisor + 1` ticks, so divisor 0 means one tick per bit and
//! both events land on the same tick.

use serde::{Deserialize, Serialize};

/// Events produced by one divider tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DividerEvents {
    /// Bit-cell boundary
    pub elapsed: bool,
    /// Mid-cell sampling instant
    pub half_elapsed: bool,
}

/// Countdown timer paced by a divisor register
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockDivider {
    count: u32,
}

/// Count value at which `half_elapsed` fires for a given divisor.
pub fn half_point(divisor: u32) -> u32 {
    ((divisor as u64 + 1) >> 1) as u32
}

/// Number of driving clock ticks per bit-cell.
pub fn period(divisor: u32) -> u64 {
    divisor as u64 + 1
}

impl ClockDivider {
    pub fn new() -> Self {
        ClockDivider { count: 0 }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Current (pre-tick) count.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Schedule the next `elapsed` event `ticks + 1` ticks from now.
    pub fn load(&mut self, ticks: u32) {
        self.count = ticks;
    }

    /// Advance one driving clock tick.
    pub fn tick(&mut self, divisor: u32) -> DividerEvents {
        let events = DividerEvents {
            elapsed: self.count == 0,
            half_elapsed: self.count == half_point(divisor),
        };
        if events.elapsed {
            self.count = divisor;
        } else {
            self.count -= 1;
        }
        events
    }
}
