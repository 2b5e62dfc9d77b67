//! Building blocks shared by the protocol engines.
//!
//! - [`ClockDivider`]: bit-cell and mid-cell events from a divisor register
//! - [`ShiftRegister`]: fixed-width serializer/deserializer, LSB- or MSB-first
//! - [`Port`]: bit-level boundary to the platform binding

mod clock;
mod shift_reg;
mod port;

pub use clock::{half_point, period, ClockDivider, DividerEvents};
pub use shift_reg::{mask, BitOrder, ShiftRegister};
pub use port::{NullPort, Port, PortOutput, Wire};

use crate::error::ConfigError;

/// Minimal register width able to hold `value` (at least one bit).
pub fn bits_for(value: u32) -> u32 {
    (32 - value.leading_zeros()).max(1)
}

/// Check a divisor against its register width.
pub fn check_divisor(divisor: u32, bits: u32) -> Result<(), ConfigError> {
    if bits == 0 || bits > 32 {
        return Err(ConfigError::InvalidDivisorBits(bits));
    }
    if bits < 32 && divisor >> bits != 0 {
        return Err(ConfigError::DivisorOverflow { divisor, bits });
    }
    Ok(())
}
