//! # stdio-core
//!
//! Cycle-accurate behavioural models of two serial protocol engines, stepped
//! one driving-clock tick at a time.
//!
//! Every engine follows the same two-phase discipline: `tick(inputs)` first
//! captures the outputs as they stand (what a consumer sampling during this
//! tick sees), then commits the new state. Outputs therefore always lag the
//! inputs that caused them by one tick, as registered hardware would.
//!
//! ## Architecture
//!
//! - [`primitives`]: [`ClockDivider`], [`ShiftRegister`], the [`Port`] boundary
//! - [`uart`]: [`UartRx`], [`UartTx`] and the [`Uart`] pair with 5 to 16 data
//!   bits, none/mark/space/even/odd parity, one stop bit
//! - [`spiflash`]: [`SpiFlashReader`] (plain read, fast read, read ID with
//!   reset preamble) over 1, 2 or 4 lanes, and the [`FlashModel`] device
//! - [`bench`]: [`UartLoopback`] and [`SpiBench`], engines wired to peers
//! - [`vcd`]: waveform dumps of bench runs
//! - [`savestate`]: bench snapshots (bincode + deflate)
//! - [`error`]: configuration and runtime errors
//!
//! ## Example
//!
//! ```
//! use stdio_core::{UartConfig, UartLoopback, Parity};
//!
//! let config = UartConfig::new(7).with_parity(Parity::Even);
//! let mut bench = UartLoopback::new(&config).unwrap();
//! let got = bench.transmit(&[0x5A], false, 1_000).unwrap();
//! assert_eq!(got[0].data, 0x5A);
//! ```

pub mod error;
pub mod primitives;
pub mod uart;
pub mod spiflash;
pub mod bench;
pub mod vcd;
pub mod savestate;

pub use error::{ConfigError, Error, Result};
pub use primitives::{BitOrder, ClockDivider, NullPort, Port, PortOutput, ShiftRegister, Wire};
pub use uart::{Parity, RxErrors, TxInput, Uart, UartConfig, UartRx, UartTx};
pub use spiflash::{
    BusClock, FastReadConfig, FlashModel, FlashModelConfig, Protocol, ReadIdConfig, SlowReadConfig,
    SpiFlashReader, SpiInput,
};
pub use bench::{ReadOutcome, SpiBench, UartLoopback};
pub use vcd::VcdWriter;
