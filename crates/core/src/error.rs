//! Error types.
//!
//! Configuration faults are reported once, when an engine is built. The
//! engines never fail while ticking; only the benches can run out of tick
//! budget.

use std::io;
use thiserror::Error;

/// Result type for bench, trace and save-state operations
pub type Result<T> = std::result::Result<T, Error>;

/// Invalid engine configuration, detected at construction time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Unknown parity mode string
    #[error("invalid parity {0:?}; must be one of none, mark, space, even, odd")]
    InvalidParity(String),

    /// Unknown SPI protocol string
    #[error("invalid SPI protocol {0:?}; must be one of standard, dual, quad")]
    InvalidProtocol(String),

    /// UART data width outside the supported range
    #[error("invalid data width {0}; must be between 5 and 16 bits")]
    InvalidDataBits(u32),

    /// Divisor below the minimum the engine accepts
    #[error("invalid divisor {divisor}; must be at least {min}")]
    DivisorTooSmall { divisor: u32, min: u32 },

    /// Divisor does not fit the divisor register
    #[error("divisor {divisor} does not fit in a {bits}-bit register")]
    DivisorOverflow { divisor: u32, bits: u32 },

    /// Divisor register width outside 1..=32
    #[error("invalid divisor register width {0}; must be between 1 and 32 bits")]
    InvalidDivisorBits(u32),

    /// A field that must be whole bytes is not
    #[error("{field} width {width} is not byte aligned")]
    NotByteAligned { field: &'static str, width: u32 },

    /// Data width must be a power-of-two number of bytes
    #[error("data width {0} is not a power-of-two number of bytes")]
    DataWidthNotPowerOfTwo(u32),

    /// Shift register would exceed 64 bits
    #[error("{field} width {width} exceeds the 64-bit shift register")]
    FieldTooWide { field: &'static str, width: u32 },

    /// Shift register width outside 1..=64
    #[error("invalid shift register width {0}; must be between 1 and 64 bits")]
    InvalidRegisterWidth(u32),

    /// The command has no opcode for the selected protocol
    #[error("no {command} opcode is defined for the {protocol} protocol")]
    NoOpcode { command: &'static str, protocol: &'static str },

    /// A reader must run at least one command frame
    #[error("transaction has no command frames")]
    NoFrames,

    /// Reset preamble needs a CS-high gap between commands
    #[error("reset wait must be at least one bus clock period")]
    ZeroResetWait,
}

/// Crate-level error
#[derive(Error, Debug)]
pub enum Error {
    /// Engine construction failed
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A bench ran out of its tick budget before the transaction completed
    #[error("transaction did not complete within {ticks} ticks")]
    Timeout { ticks: u64 },

    /// Save state could not be encoded or decoded
    #[error("save state error: {0}")]
    SaveState(String),

    /// File I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
