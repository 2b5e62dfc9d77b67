//! Fixed-width shift register.
//!
//! Serializes and deserializes parallel values a few bits per bus edge. The
//! bit order is fixed at construction:
//!
//! - [`BitOrder::LsbFirst`] (UART wire order): new bits enter at the top and
//!   the oldest bit leaves from bit 0, so after a full frame bit 0 holds the
//!   first bit on the wire.
//! - [`BitOrder::MsbFirst`] (SPI field order): new bits enter at bit 0 and
//!   the top `n` bits leave first.
//!
//! Every operation is a single register update; engines call at most one of
//! them per clock tick.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Direction bits travel through the register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitOrder {
    /// Oldest bit leaves from bit 0
    LsbFirst,
    /// Oldest bits leave from the top
    MsbFirst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftRegister {
    bits: u64,
    width: u32,
    order: BitOrder,
}

/// Mask with the low `n` bits set (n <= 64).
pub fn mask(n: u32) -> u64 {
    if n >= 64 { u64::MAX } else { (1u64 << n) - 1 }
}

impl ShiftRegister {
    pub fn new(width: u32, order: BitOrder) -> Result<Self, ConfigError> {
        if width == 0 || width > 64 {
            return Err(ConfigError::InvalidRegisterWidth(width));
        }
        Ok(ShiftRegister { bits: 0, width, order })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn order(&self) -> BitOrder {
        self.order
    }

    pub fn value(&self) -> u64 {
        self.bits
    }

    pub fn clear(&mut self) {
        self.bits = 0;
    }

    /// Replace the whole register.
    pub fn load(&mut self, value: u64) {
        self.bits = value & mask(self.width);
    }

    /// Load a `field_width`-bit value where it will leave the register
    /// first: the top for MSB-first, bit 0 for LSB-first. The other bits are
    /// cleared.
    pub fn load_field(&mut self, value: u64, field_width: u32) {
        let field_width = field_width.min(self.width);
        let value = value & mask(field_width);
        self.bits = match self.order {
            BitOrder::MsbFirst if field_width == 0 => 0,
            BitOrder::MsbFirst => value << (self.width - field_width),
            BitOrder::LsbFirst => value,
        };
    }

    /// The `n` bits that the next shift will push out, without shifting.
    pub fn peek_out(&self, n: u32) -> u64 {
        let n = n.min(self.width);
        if n == 0 {
            return 0;
        }
        match self.order {
            BitOrder::MsbFirst => (self.bits >> (self.width - n)) & mask(n),
            BitOrder::LsbFirst => self.bits & mask(n),
        }
    }

    /// Shift `n` bits of `symbol` in, returning the `n` bits shifted out.
    pub fn shift_in(&mut self, symbol: u64, n: u32) -> u64 {
        let n = n.min(self.width);
        if n == 0 {
            return 0;
        }
        let out = self.peek_out(n);
        let symbol = symbol & mask(n);
        self.bits = match self.order {
            BitOrder::MsbFirst => {
                let kept = if n == 64 { 0 } else { self.bits << n };
                (kept | symbol) & mask(self.width)
            }
            BitOrder::LsbFirst => {
                let kept = if n == 64 { 0 } else { self.bits >> n };
                kept | (symbol << (self.width - n))
            }
        };
        out
    }

    /// Shift `n` zero bits in, returning the bits shifted out.
    pub fn shift_out(&mut self, n: u32) -> u64 {
        self.shift_in(0, n)
    }

    /// Extract `len` bits starting at bit `lo`.
    pub fn field(&self, lo: u32, len: u32) -> u64 {
        if lo >= 64 {
            return 0;
        }
        (self.bits >> lo) & mask(len)
    }

    /// Extract a single bit.
    pub fn bit(&self, index: u32) -> bool {
        self.field(index, 1) != 0
    }
}
