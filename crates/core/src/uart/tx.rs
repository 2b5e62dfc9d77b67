//! UART transmitter.
//!
//! `IDLE → BUSY → DONE → (BUSY | IDLE)`
//!
//! The start bit goes out on the tick after `ack` is seen, whatever the
//! divisor. The frame word is loaded with the start bit already consumed, so
//! BUSY only shifts the remaining bits. DONE is the final tick of the stop
//! bit: a continuous producer still holding `ack` gets its next start bit on
//! the very next tick.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{encode_frame, frame_len, Parity, UartConfig};
use crate::error::ConfigError;
use crate::primitives::{check_divisor, BitOrder, ClockDivider, Port, PortOutput, ShiftRegister};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxState {
    Idle,
    Busy,
    Done,
}

/// Producer side of the transmitter for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxInput {
    /// Data valid, send it
    pub ack: bool,
    pub data: u32,
    /// Chain frames while `ack` stays high
    pub continuous: bool,
}

impl TxInput {
    pub fn send(data: u32) -> Self {
        TxInput { ack: true, data, continuous: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxStatus {
    pub line: bool,
    pub busy: bool,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UartTx {
    data_bits: u32,
    parity: Parity,
    divisor: u32,
    divisor_bits: u32,
    state: TxState,
    timer: ClockDivider,
    shreg: ShiftRegister,
    bits_left: u32,
    line: bool,
    /// Frames started since reset
    pub frames: u64,
}

impl UartTx {
    pub fn new(config: &UartConfig) -> Result<Self, ConfigError> {
        let divisor_bits = config.validate()?;
        Ok(UartTx {
            data_bits: config.data_bits,
            parity: config.parity,
            divisor: config.divisor,
            divisor_bits,
            state: TxState::Idle,
            timer: ClockDivider::new(),
            shreg: ShiftRegister::new(config.frame_len(), BitOrder::LsbFirst)?,
            bits_left: 0,
            line: true,
            frames: 0,
        })
    }

    pub fn reset(&mut self) {
        self.state = TxState::Idle;
        self.timer.reset();
        self.shreg.clear();
        self.bits_left = 0;
        self.line = true;
        self.frames = 0;
    }

    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    pub fn set_divisor(&mut self, divisor: u32) -> Result<(), ConfigError> {
        check_divisor(divisor, self.divisor_bits)?;
        self.divisor = divisor;
        Ok(())
    }

    pub fn frame_len(&self) -> u32 {
        frame_len(self.data_bits, self.parity)
    }

    pub fn config(&self) -> UartConfig {
        UartConfig {
            divisor: self.divisor,
            divisor_bits: Some(self.divisor_bits),
            data_bits: self.data_bits,
            parity: self.parity,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn line(&self) -> bool {
        self.line
    }

    pub fn busy(&self) -> bool {
        self.state == TxState::Busy
    }

    pub fn done(&self) -> bool {
        self.state == TxState::Done
    }

    pub fn status(&self) -> TxStatus {
        TxStatus { line: self.line, busy: self.busy(), done: self.done() }
    }

    /// Advance one tick. Returns the line and flags as they were during
    /// this tick.
    pub fn tick(&mut self, input: TxInput) -> TxStatus {
        let status = self.status();
        match self.state {
            TxState::Idle => {
                self.line = true;
                if input.ack {
                    self.start_frame(input.data);
                }
            }
            TxState::Busy => {
                if self.timer.tick(self.divisor).elapsed && self.bits_left > 0 {
                    self.line = self.shreg.shift_out(1) != 0;
                    self.bits_left -= 1;
                }
                // Stay until the stop bit's cell runs out
                if self.bits_left == 0 && self.timer.count() == 0 {
                    self.state = TxState::Done;
                }
            }
            TxState::Done => {
                self.timer.tick(self.divisor);
                if input.continuous && input.ack {
                    self.start_frame(input.data);
                } else {
                    self.line = true;
                    self.state = TxState::Idle;
                    debug!(frames = self.frames, "uart tx idle");
                }
            }
        }
        status
    }

    /// Tick, then drive the line this tick carried onto `port`.
    pub fn tick_port<P: Port>(&mut self, port: &mut P, input: TxInput) -> TxStatus {
        let status = self.tick(input);
        port.drive(PortOutput { value: status.line as u32, oe: true });
        status
    }

    fn start_frame(&mut self, data: u32) {
        self.line = false;
        self.shreg.load(encode_frame(data, self.data_bits, self.parity));
        self.shreg.shift_out(1);
        self.bits_left = self.frame_len() - 1;
        self.timer.load(self.divisor);
        self.state = TxState::Busy;
        self.frames += 1;
        trace!(data, "uart tx start");
    }
}
