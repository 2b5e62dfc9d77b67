//! Bit-level port boundary.
//!
//! Engines only see plain input values and produce plain output values each
//! tick. A [`Port`] is where a platform binding (FPGA pins, a GPIO expander,
//! a socket to another simulator) plugs in; synchronizers, tri-state buffers
//! and DDR primitives all live on the far side of this trait.

use serde::{Deserialize, Serialize};

/// Output lanes and their enable, driven once per tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortOutput {
    pub value: u32,
    /// Output enable; false means the lanes are released (high impedance)
    pub oe: bool,
}

/// Platform binding for one engine's bus
pub trait Port {
    /// Number of lanes (1, 2 or 4)
    fn width(&self) -> u32;

    /// Input lanes for the current tick.
    fn sample(&mut self) -> u32;

    /// Accept the outputs the engine presents for the current tick.
    fn drive(&mut self, _out: PortOutput) {}
}

/// Port with nothing attached: reads a constant idle level, ignores outputs.
#[derive(Debug, Clone, Copy)]
pub struct NullPort {
    width: u32,
    idle: u32,
}

impl NullPort {
    pub fn new(width: u32, idle: u32) -> Self {
        NullPort { width, idle }
    }

    /// Idle-high single line, as a UART line at rest.
    pub fn uart() -> Self {
        NullPort::new(1, 1)
    }
}

impl Port for NullPort {
    fn width(&self) -> u32 {
        self.width
    }

    fn sample(&mut self) -> u32 {
        self.idle
    }
}

/// A net connecting one driver to one reader.
///
/// Holds the last driven value while enabled; when the driver releases the
/// lanes the net floats back to its pull level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Wire {
    width: u32,
    level: u32,
    pull: u32,
}

impl Wire {
    pub fn new(width: u32, pull: u32) -> Self {
        Wire { width, level: pull, pull }
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Port for Wire {
    fn width(&self) -> u32 {
        self.width
    }

    fn sample(&mut self) -> u32 {
        self.level
    }

    fn drive(&mut self, out: PortOutput) {
        let mask = if self.width >= 32 { u32::MAX } else { (1 << self.width) - 1 };
        self.level = if out.oe { out.value & mask } else { self.pull };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_port_is_idle() {
        let mut p = NullPort::uart();
        p.drive(PortOutput { value: 0, oe: true });
        assert_eq!(p.sample(), 1);
        assert_eq!(p.width(), 1);
    }

    #[test]
    fn test_wire_follows_driver() {
        let mut w = Wire::new(4, 0xF);
        w.drive(PortOutput { value: 0x1A, oe: true });
        assert_eq!(w.sample(), 0xA);
        w.drive(PortOutput { value: 0x3, oe: false });
        assert_eq!(w.sample(), 0xF);
    }
}
