//! SPI NOR flash readers.
//!
//! One engine, [`SpiFlashReader`], runs a list of chip-select frames. Each
//! frame is a command phase followed by optional address, dummy and data
//! phases; the constructors build that list for the three supported
//! transactions:
//!
//! | Constructor                     | Frames                                   |
//! |---------------------------------|------------------------------------------|
//! | [`SpiFlashReader::slow_read`]   | `READ` + address + data                  |
//! | [`SpiFlashReader::fast_read`]   | `FAST READ` + address + dummy + data     |
//! | [`SpiFlashReader::read_id`]     | `RSTEN`, `RST`, then `RDID` + ID data    |
//!
//! Command, address and data are all carried MSB-first over every lane of
//! the bus, so a quad-mode opcode takes two bus periods.
//!
//! [`FlashModel`] is the other end of the wire: a bit-level flash device used
//! by the test bench.

mod flash_model;
mod reader;

pub use flash_model::{FlashModel, FlashModelConfig, FLASH_SIZE, JEDEC_ID};
pub use reader::{ReaderState, SpiFlashReader, SpiInput, SpiPins, SpiStatus};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::primitives::{bits_for, check_divisor};

/// Command field width in bits
pub const CMD_WIDTH: u32 = 8;

/// SPI NOR opcodes
pub mod opcodes {
    /// Read data
    pub const READ: u8 = 0x03;
    /// Fast read, single lane
    pub const FAST_READ: u8 = 0x0B;
    /// Fast read, dual output
    pub const DOR: u8 = 0x3B;
    /// Fast read, quad output
    pub const QOR: u8 = 0x6B;
    /// Read JEDEC ID
    pub const RDID: u8 = 0x9F;
    /// Multiple I/O read ID
    pub const MIORDID: u8 = 0xAF;
    /// Reset enable
    pub const RSTEN: u8 = 0x66;
    /// Reset memory
    pub const RST: u8 = 0x99;
}

/// Mnemonic for logging.
pub fn opcode_name(opcode: u8) -> &'static str {
    match opcode {
        opcodes::READ => "READ",
        opcodes::FAST_READ => "FAST_READ",
        opcodes::DOR => "DOR",
        opcodes::QOR => "QOR",
        opcodes::RDID => "RDID",
        opcodes::MIORDID => "MIORDID",
        opcodes::RSTEN => "RSTEN",
        opcodes::RST => "RST",
        _ => "UNKNOWN",
    }
}

/// Bus protocol (lane count)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// One lane out (MOSI), one lane in (MISO)
    #[default]
    Standard,
    /// Two bidirectional lanes
    Dual,
    /// Four bidirectional lanes
    Quad,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Standard, Protocol::Dual, Protocol::Quad];

    pub fn bus_width(self) -> u32 {
        match self {
            Protocol::Standard => 1,
            Protocol::Dual => 2,
            Protocol::Quad => 4,
        }
    }

    /// Lanes are shared between directions and need turnaround.
    pub fn bidirectional(self) -> bool {
        self != Protocol::Standard
    }

    pub fn name(self) -> &'static str {
        match self {
            Protocol::Standard => "standard",
            Protocol::Dual => "dual",
            Protocol::Quad => "quad",
        }
    }

    /// Plain read has no dummy cycles and exists only on a single lane.
    pub fn read_opcode(self) -> Result<u8, ConfigError> {
        match self {
            Protocol::Standard => Ok(opcodes::READ),
            _ => Err(ConfigError::NoOpcode { command: "READ", protocol: self.name() }),
        }
    }

    pub fn fast_read_opcode(self) -> u8 {
        match self {
            Protocol::Standard => opcodes::FAST_READ,
            Protocol::Dual => opcodes::DOR,
            Protocol::Quad => opcodes::QOR,
        }
    }

    pub fn read_id_opcode(self) -> u8 {
        match self {
            Protocol::Standard => opcodes::RDID,
            Protocol::Dual | Protocol::Quad => opcodes::MIORDID,
        }
    }
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" | "extended" => Ok(Protocol::Standard),
            "dual" => Ok(Protocol::Dual),
            "quad" => Ok(Protocol::Quad),
            _ => Err(ConfigError::InvalidProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One chip-select frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub opcode: u8,
    /// Address bits sent after the opcode (0 = no address phase)
    pub addr_bits: u32,
    pub dummy_cycles: u32,
    /// Bits read back (0 = no data phase)
    pub data_bits: u32,
}

impl CommandFrame {
    /// A bare opcode with nothing after it.
    pub fn command(opcode: u8) -> Self {
        CommandFrame { opcode, addr_bits: 0, dummy_cycles: 0, data_bits: 0 }
    }

    pub fn name(&self) -> &'static str {
        opcode_name(self.opcode)
    }

    /// Bus periods from the first command symbol to the last data symbol.
    pub fn periods(&self, bus_width: u32) -> u64 {
        ((CMD_WIDTH + self.addr_bits + self.data_bits) / bus_width + self.dummy_cycles) as u64
    }
}

/// Bus clock settings shared by every reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusClock {
    /// Driving clock ticks per bus period, minus one; at least 1
    pub divisor: u32,
    /// Width of the divisor register; defaults to the width of `divisor`
    pub divisor_bits: Option<u32>,
}

impl Default for BusClock {
    fn default() -> Self {
        BusClock { divisor: 1, divisor_bits: None }
    }
}

impl BusClock {
    pub fn new(divisor: u32) -> Self {
        BusClock { divisor, divisor_bits: None }
    }

    /// Validate and return the effective divisor register width.
    pub fn validate(&self) -> Result<u32, ConfigError> {
        if self.divisor < 1 {
            return Err(ConfigError::DivisorTooSmall { divisor: self.divisor, min: 1 });
        }
        let bits = self.divisor_bits.unwrap_or_else(|| bits_for(self.divisor));
        check_divisor(self.divisor, bits)?;
        Ok(bits)
    }
}

/// Plain `READ` (0x03) configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowReadConfig {
    pub protocol: Protocol,
    pub addr_width: u32,
    pub data_width: u32,
    pub clock: BusClock,
}

impl Default for SlowReadConfig {
    fn default() -> Self {
        SlowReadConfig { protocol: Protocol::Standard, addr_width: 24, data_width: 32, clock: BusClock::default() }
    }
}

/// `FAST READ` family configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastReadConfig {
    pub protocol: Protocol,
    pub addr_width: u32,
    pub data_width: u32,
    pub dummy_cycles: u32,
    pub clock: BusClock,
}

impl Default for FastReadConfig {
    fn default() -> Self {
        FastReadConfig {
            protocol: Protocol::Standard,
            addr_width: 24,
            data_width: 32,
            dummy_cycles: 8,
            clock: BusClock::default(),
        }
    }
}

/// Read-ID configuration, including the reset preamble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadIdConfig {
    pub protocol: Protocol,
    /// Bits of ID read back
    pub id_width: u32,
    /// Bus periods with CS released after each reset command
    pub reset_wait_cycles: u32,
    pub clock: BusClock,
}

impl Default for ReadIdConfig {
    fn default() -> Self {
        ReadIdConfig { protocol: Protocol::Standard, id_width: 24, reset_wait_cycles: 1, clock: BusClock::default() }
    }
}

/// Address and data widths must be whole bytes, which also splits them
/// evenly across 1, 2 or 4 lanes.
pub(crate) fn check_field(field: &'static str, width: u32) -> Result<(), ConfigError> {
    if width == 0 || width % 8 != 0 {
        return Err(ConfigError::NotByteAligned { field, width });
    }
    if width > 64 {
        return Err(ConfigError::FieldTooWide { field, width });
    }
    Ok(())
}

/// Data words are addressed in units of their own size.
pub(crate) fn check_data_width(width: u32) -> Result<(), ConfigError> {
    check_field("data", width)?;
    if !(width / 8).is_power_of_two() {
        return Err(ConfigError::DataWidthNotPowerOfTwo(width));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("quad".parse::<Protocol>(), Ok(Protocol::Quad));
        assert_eq!("extended".parse::<Protocol>(), Ok(Protocol::Standard));
        assert_eq!(
            "octal".parse::<Protocol>(),
            Err(ConfigError::InvalidProtocol("octal".into()))
        );
    }

    #[test]
    fn test_opcodes_by_protocol() {
        assert_eq!(Protocol::Standard.fast_read_opcode(), 0x0B);
        assert_eq!(Protocol::Dual.fast_read_opcode(), 0x3B);
        assert_eq!(Protocol::Quad.fast_read_opcode(), 0x6B);
        assert_eq!(Protocol::Standard.read_id_opcode(), 0x9F);
        assert_eq!(Protocol::Quad.read_id_opcode(), 0xAF);
        assert_eq!(Protocol::Standard.read_opcode(), Ok(0x03));
        assert!(Protocol::Dual.read_opcode().is_err());
    }

    #[test]
    fn test_bus_clock_validation() {
        assert_eq!(BusClock::new(1).validate(), Ok(1));
        assert_eq!(
            BusClock::new(0).validate(),
            Err(ConfigError::DivisorTooSmall { divisor: 0, min: 1 })
        );
        let clock = BusClock { divisor: 20, divisor_bits: Some(4) };
        assert_eq!(clock.validate(), Err(ConfigError::DivisorOverflow { divisor: 20, bits: 4 }));
    }

    #[test]
    fn test_field_checks() {
        assert!(check_field("address", 24).is_ok());
        assert_eq!(
            check_field("address", 20),
            Err(ConfigError::NotByteAligned { field: "address", width: 20 })
        );
        assert_eq!(check_field("data", 72), Err(ConfigError::FieldTooWide { field: "data", width: 72 }));
        assert!(check_data_width(64).is_ok());
        assert_eq!(check_data_width(24), Err(ConfigError::DataWidthNotPowerOfTwo(24)));
    }

    #[test]
    fn test_frame_periods() {
        let frame = CommandFrame { opcode: 0x6B, addr_bits: 24, dummy_cycles: 15, data_bits: 32 };
        assert_eq!(frame.periods(4), 31);
        assert_eq!(frame.periods(1), 79);
        assert_eq!(CommandFrame::command(opcodes::RSTEN).periods(2), 4);
        assert_eq!(frame.name(), "QOR");
    }
}
