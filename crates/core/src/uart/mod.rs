//! Asynchronous serial (UART) transceiver.
//!
//! Two independent state machines share nothing but a configuration:
//!
//! - [`UartRx`]: samples the line at mid-bit, assembles frames LSB-first,
//!   latches data and error flags, pulses `data_ready` for one tick
//! - [`UartTx`]: serializes start, data, parity and stop bits, each held for
//!   exactly one bit-cell, optionally back-to-back in continuous mode
//! - [`Uart`]: an RX/TX pair driven from one divisor register
//!
//! ## Frame layout
//!
//! ```text
//! bit 0      1 .. data_bits      data_bits+1     last
//! +-------+------------------+----------------+------+
//! | start |  data (LSB first)| parity (0 or 1)| stop |
//! |   0   |                  |                |  1   |
//! +-------+------------------+----------------+------+
//! ```
//!
//! Frame words in this module use the same layout: bit 0 is the first bit on
//! the wire.

mod rx;
mod tx;

pub use rx::{RxErrors, RxState, RxStatus, UartRx};
pub use tx::{TxInput, TxState, TxStatus, UartTx};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::primitives::{bits_for, check_divisor, mask};

/// Smallest supported data width
pub const MIN_DATA_BITS: u32 = 5;
/// Largest supported data width
pub const MAX_DATA_BITS: u32 = 16;

/// Parity mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Parity bit always 1
    Mark,
    /// Parity bit always 0
    Space,
    /// Parity bit makes the count of ones even
    Even,
    /// Parity bit makes the count of ones odd
    Odd,
}

impl Parity {
    pub const ALL: [Parity; 5] = [Parity::None, Parity::Mark, Parity::Space, Parity::Even, Parity::Odd];

    /// Width of the parity field (0 or 1)
    pub fn bits(self) -> u32 {
        if self == Parity::None { 0 } else { 1 }
    }

    /// Expected parity bit for `data`, or `None` when the frame has no parity field.
    pub fn compute(self, data: u32) -> Option<bool> {
        let xor = data.count_ones() & 1 == 1;
        match self {
            Parity::None => None,
            Parity::Mark => Some(true),
            Parity::Space => Some(false),
            Parity::Even => Some(xor),
            Parity::Odd => Some(!xor),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Parity::None => "none",
            Parity::Mark => "mark",
            Parity::Space => "space",
            Parity::Even => "even",
            Parity::Odd => "odd",
        }
    }
}

impl FromStr for Parity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parity::ALL
            .iter()
            .copied()
            .find(|p| p.name() == s)
            .ok_or_else(|| ConfigError::InvalidParity(s.to_string()))
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// UART configuration, shared by the receiver and the transmitter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartConfig {
    /// Driving clock ticks per bit-cell, minus one
    pub divisor: u32,
    /// Width of the divisor register; defaults to the width of `divisor`
    pub divisor_bits: Option<u32>,
    pub data_bits: u32,
    pub parity: Parity,
}

impl UartConfig {
    /// 8N1 at the given divisor.
    pub fn new(divisor: u32) -> Self {
        UartConfig { divisor, divisor_bits: None, data_bits: 8, parity: Parity::None }
    }

    pub fn with_data_bits(mut self, data_bits: u32) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_divisor_bits(mut self, bits: u32) -> Self {
        self.divisor_bits = Some(bits);
        self
    }

    /// Validate and return the effective divisor register width.
    pub fn validate(&self) -> Result<u32, ConfigError> {
        if !(MIN_DATA_BITS..=MAX_DATA_BITS).contains(&self.data_bits) {
            return Err(ConfigError::InvalidDataBits(self.data_bits));
        }
        let bits = self.divisor_bits.unwrap_or_else(|| bits_for(self.divisor));
        check_divisor(self.divisor, bits)?;
        Ok(bits)
    }

    /// Bits per frame: start + data + parity + stop
    pub fn frame_len(&self) -> u32 {
        frame_len(self.data_bits, self.parity)
    }
}

/// Bits per frame: start + data + parity + stop
pub fn frame_len(data_bits: u32, parity: Parity) -> u32 {
    1 + data_bits + parity.bits() + 1
}

/// Build a frame word (bit 0 first on the wire).
pub fn encode_frame(data: u32, data_bits: u32, parity: Parity) -> u64 {
    let data = data as u64 & mask(data_bits);
    let mut word = data << 1;
    if let Some(p) = parity.compute(data as u32) {
        word |= (p as u64) << (1 + data_bits);
    }
    word | 1 << (frame_len(data_bits, parity) - 1)
}

/// Wire bit sequence of one frame, first bit first.
pub fn frame_bits(data: u32, data_bits: u32, parity: Parity) -> Vec<bool> {
    let word = encode_frame(data, data_bits, parity);
    (0..frame_len(data_bits, parity)).map(|i| (word >> i) & 1 == 1).collect()
}

/// Fields of a received frame word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFields {
    pub start: bool,
    pub data: u32,
    pub parity: Option<bool>,
    pub stop: bool,
}

impl FrameFields {
    pub fn decode(word: u64, data_bits: u32, parity: Parity) -> Self {
        let len = frame_len(data_bits, parity);
        FrameFields {
            start: word & 1 == 1,
            data: ((word >> 1) & mask(data_bits)) as u32,
            parity: if parity == Parity::None { None } else { Some((word >> (1 + data_bits)) & 1 == 1) },
            stop: (word >> (len - 1)) & 1 == 1,
        }
    }

    /// Start bit not 0 or stop bit not 1
    pub fn frame_error(&self) -> bool {
        self.start || !self.stop
    }

    /// Received parity bit disagrees with the data
    pub fn parity_error(&self, parity: Parity) -> bool {
        self.parity != parity.compute(self.data)
    }
}

/// Receiver and transmitter sharing one divisor register
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Uart {
    pub rx: UartRx,
    pub tx: UartTx,
}

impl Uart {
    pub fn new(config: &UartConfig) -> Result<Self, ConfigError> {
        Ok(Uart { rx: UartRx::new(config)?, tx: UartTx::new(config)? })
    }

    pub fn reset(&mut self) {
        self.rx.reset();
        self.tx.reset();
    }

    pub fn divisor(&self) -> u32 {
        self.rx.divisor()
    }

    /// Update the shared divisor. Changing it mid-frame is not supported.
    pub fn set_divisor(&mut self, divisor: u32) -> Result<(), ConfigError> {
        self.rx.set_divisor(divisor)?;
        self.tx.set_divisor(divisor)
    }

    /// Advance both directions one tick.
    pub fn tick(&mut self, rx_line: bool, rx_ack: bool, tx_input: TxInput) -> (RxStatus, TxStatus) {
        (self.rx.tick(rx_line, rx_ack), self.tx.tick(tx_input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{NullPort, Port};

    #[test]
    fn test_parity_from_str() {
        assert_eq!("even".parse::<Parity>(), Ok(Parity::Even));
        assert_eq!("none".parse::<Parity>(), Ok(Parity::None));
        assert_eq!(
            "bogus".parse::<Parity>(),
            Err(ConfigError::InvalidParity("bogus".into()))
        );
    }

    #[test]
    fn test_parity_compute() {
        assert_eq!(Parity::None.compute(0b0111_0101), None);
        assert_eq!(Parity::Mark.compute(0), Some(true));
        assert_eq!(Parity::Space.compute(0xFF), Some(false));
        assert_eq!(Parity::Even.compute(0b0111_0101), Some(true));
        assert_eq!(Parity::Even.compute(0b0011_0101), Some(false));
        assert_eq!(Parity::Odd.compute(0b0111_0101), Some(false));
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(UartConfig::new(7).frame_len(), 10);
        assert_eq!(UartConfig::new(7).with_parity(Parity::Odd).frame_len(), 11);
        assert_eq!(UartConfig::new(7).with_data_bits(16).frame_len(), 18);
    }

    #[test]
    fn test_encode_frame_8e1() {
        let bits: Vec<u8> = frame_bits(0b0111_0101, 8, Parity::Even).iter().map(|&b| b as u8).collect();
        assert_eq!(bits, vec![0, 1, 0, 1, 0, 1, 1, 1, 0, 1, 1]);
    }

    #[test]
    fn test_decode_frame_errors() {
        let word = encode_frame(0x5A, 8, Parity::Odd);
        let f = FrameFields::decode(word, 8, Parity::Odd);
        assert_eq!(f.data, 0x5A);
        assert!(!f.frame_error());
        assert!(!f.parity_error(Parity::Odd));

        let flipped = FrameFields::decode(word ^ (1 << 9), 8, Parity::Odd);
        assert!(flipped.parity_error(Parity::Odd));
        assert!(!flipped.frame_error());

        let no_stop = FrameFields::decode(word & !(1 << 10), 8, Parity::Odd);
        assert!(no_stop.frame_error());
    }

    #[test]
    fn test_config_validation() {
        assert!(UartConfig::new(0).validate().is_ok());
        assert_eq!(
            UartConfig::new(7).with_data_bits(4).validate(),
            Err(ConfigError::InvalidDataBits(4))
        );
        assert_eq!(UartConfig::new(7).validate(), Ok(3));
        assert_eq!(
            UartConfig::new(300).with_divisor_bits(8).validate(),
            Err(ConfigError::DivisorOverflow { divisor: 300, bits: 8 })
        );
    }

    #[test]
    fn test_pair_on_idle_line() {
        let mut uart = Uart::new(&UartConfig::new(2)).unwrap();
        let mut port = NullPort::uart();
        for _ in 0..50 {
            let (rx, tx) = uart.tick(port.sample() == 1, true, TxInput::default());
            assert!(!rx.busy && !rx.data_ready);
            assert!(tx.line && !tx.busy);
        }
    }

    #[test]
    fn test_pair_sends_to_itself() {
        let mut uart = Uart::new(&UartConfig::new(1).with_data_bits(7)).unwrap();
        let mut line = true;
        let mut got = None;
        for i in 0..60 {
            let input = if i == 0 { TxInput::send(0x41) } else { TxInput::default() };
            let (rx, tx) = uart.tick(line, true, input);
            line = tx.line;
            if rx.data_ready {
                got = Some(rx.data);
            }
        }
        assert_eq!(got, Some(0x41));
    }

    #[test]
    fn test_shared_divisor() {
        let mut uart = Uart::new(&UartConfig::new(7).with_divisor_bits(8)).unwrap();
        uart.set_divisor(200).unwrap();
        assert_eq!(uart.rx.divisor(), 200);
        assert_eq!(uart.tx.divisor(), 200);
        assert!(uart.set_divisor(256).is_err());
        assert_eq!(uart.divisor(), 200);
    }
}
