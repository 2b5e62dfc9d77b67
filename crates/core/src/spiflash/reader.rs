//! SPI flash reader state machine.
//!
//! ```text
//! IDLE ─ack─► CS_SETUP ─► CMD ─► [ADDR] ─► [DUMMY] ─► [DATA] ─┬─► RDY_WAIT ─► IDLE
//!                ▲                                             │
//!                └────────────── GAP (CS high) ◄───────────────┘  (more frames)
//! ```
//!
//! Bus period = `divisor + 1` ticks. Within a period the bus clock rises
//! when the divider passes its midpoint (input lanes are staged then) and
//! falls when it elapses (the staged symbol is shifted in and the next output
//! symbol appears at the top of the register). CS setup lasts half a period.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{
    check_data_width, check_field, opcode_name, BusClock, CommandFrame, FastReadConfig, Protocol,
    ReadIdConfig, SlowReadConfig, CMD_WIDTH,
};
use crate::error::ConfigError;
use crate::primitives::{check_divisor, half_point, mask, period, BitOrder, ClockDivider, ShiftRegister};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReaderState {
    Idle,
    CsSetup,
    Cmd,
    Addr,
    Dummy,
    Data,
    /// CS released between two frames of one transaction
    Gap,
    RdyWait,
}

/// Consumer and bus inputs for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpiInput {
    /// Start a transaction (only seen while `ready`)
    pub ack: bool,
    /// Word address, in units of the data width
    pub address: u64,
    /// Input lanes (MISO on the standard bus)
    pub dq_i: u32,
}

/// Bus outputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpiPins {
    /// Chip select, active high
    pub cs: bool,
    pub sclk: bool,
    /// Output lanes (MOSI on the standard bus)
    pub dq_o: u32,
    pub oe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiStatus {
    pub ready: bool,
    pub read_ready: bool,
    pub read_data: u64,
    pub pins: SpiPins,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiFlashReader {
    protocol: Protocol,
    frames: Vec<CommandFrame>,
    addr_width: u32,
    /// log2 of the data word size in bytes
    addr_shift: u32,
    reset_wait: u32,
    divisor: u32,
    divisor_bits: u32,

    state: ReaderState,
    frame: usize,
    remaining: u32,
    timer: ClockDivider,
    shreg: ShiftRegister,
    staged: u32,
    byte_addr: u64,
    cs: bool,
    sclk: bool,
    oe: bool,
    read_data: u64,
    read_ready: bool,
    /// Completed transactions
    pub transactions: u64,
}

impl SpiFlashReader {
    /// Plain `READ`: command, address, data. Standard protocol only.
    pub fn slow_read(config: &SlowReadConfig) -> Result<Self, ConfigError> {
        let opcode = config.protocol.read_opcode()?;
        check_field("address", config.addr_width)?;
        check_data_width(config.data_width)?;
        let frame = CommandFrame {
            opcode,
            addr_bits: config.addr_width,
            dummy_cycles: 0,
            data_bits: config.data_width,
        };
        Self::build(config.protocol, vec![frame], config.addr_width, config.data_width, 1, config.clock.divisor, config.clock.validate()?)
    }

    /// `FAST READ` at the protocol's lane count, with dummy cycles.
    pub fn fast_read(config: &FastReadConfig) -> Result<Self, ConfigError> {
        check_field("address", config.addr_width)?;
        check_data_width(config.data_width)?;
        let frame = CommandFrame {
            opcode: config.protocol.fast_read_opcode(),
            addr_bits: config.addr_width,
            dummy_cycles: config.dummy_cycles,
            data_bits: config.data_width,
        };
        Self::build(config.protocol, vec![frame], config.addr_width, config.data_width, 1, config.clock.divisor, config.clock.validate()?)
    }

    /// Reset the device, then read its ID. The reset preamble runs on
    /// every transaction.
    pub fn read_id(config: &ReadIdConfig) -> Result<Self, ConfigError> {
        check_field("id", config.id_width)?;
        if config.reset_wait_cycles == 0 {
            return Err(ConfigError::ZeroResetWait);
        }
        let frames = vec![
            CommandFrame::command(super::opcodes::RSTEN),
            CommandFrame::command(super::opcodes::RST),
            CommandFrame { data_bits: config.id_width, ..CommandFrame::command(config.protocol.read_id_opcode()) },
        ];
        Self::build(config.protocol, frames, 0, 8, config.reset_wait_cycles, config.clock.divisor, config.clock.validate()?)
    }

    fn build(
        protocol: Protocol,
        frames: Vec<CommandFrame>,
        addr_width: u32,
        data_width: u32,
        reset_wait: u32,
        divisor: u32,
        divisor_bits: u32,
    ) -> Result<Self, ConfigError> {
        let width = frames
            .iter()
            .map(|f| f.addr_bits.max(f.data_bits))
            .fold(CMD_WIDTH, u32::max);
        Ok(SpiFlashReader {
            protocol,
            frames,
            addr_width,
            addr_shift: (data_width / 8).trailing_zeros(),
            reset_wait,
            divisor,
            divisor_bits,
            state: ReaderState::Idle,
            frame: 0,
            remaining: 0,
            timer: ClockDivider::new(),
            shreg: ShiftRegister::new(width, BitOrder::MsbFirst)?,
            staged: 0,
            byte_addr: 0,
            cs: false,
            sclk: false,
            oe: false,
            read_data: 0,
            read_ready: false,
            transactions: 0,
        })
    }

    /// Re-check the configuration of a reader that did not come from one of
    /// the constructors (a restored save state).
    pub fn validate(&self) -> Result<(), ConfigError> {
        BusClock { divisor: self.divisor, divisor_bits: Some(self.divisor_bits) }.validate()?;
        if self.frames.is_empty() {
            return Err(ConfigError::NoFrames);
        }
        for f in &self.frames {
            if f.addr_bits > 0 {
                check_field("address", f.addr_bits)?;
            }
            if f.data_bits > 0 {
                check_field("data", f.data_bits)?;
            }
        }
        if self.frames.len() > 1 && self.reset_wait == 0 {
            return Err(ConfigError::ZeroResetWait);
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.state = ReaderState::Idle;
        self.frame = 0;
        self.remaining = 0;
        self.timer.reset();
        self.shreg.clear();
        self.staged = 0;
        self.byte_addr = 0;
        self.cs = false;
        self.sclk = false;
        self.oe = false;
        self.read_data = 0;
        self.read_ready = false;
        self.transactions = 0;
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn frames(&self) -> &[CommandFrame] {
        &self.frames
    }

    pub fn addr_width(&self) -> u32 {
        self.addr_width
    }

    /// Dummy cycles of the final (reading) frame
    pub fn dummy_cycles(&self) -> u32 {
        self.frames.last().map_or(0, |f| f.dummy_cycles)
    }

    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    /// Change the divisor register. Must not change during a transaction.
    pub fn set_divisor(&mut self, divisor: u32) -> Result<(), ConfigError> {
        if divisor < 1 {
            return Err(ConfigError::DivisorTooSmall { divisor, min: 1 });
        }
        check_divisor(divisor, self.divisor_bits)?;
        self.divisor = divisor;
        Ok(())
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn ready(&self) -> bool {
        self.state == ReaderState::Idle
    }

    pub fn read_ready(&self) -> bool {
        self.read_ready
    }

    pub fn read_data(&self) -> u64 {
        self.read_data
    }

    pub fn pins(&self) -> SpiPins {
        SpiPins {
            cs: self.cs,
            sclk: self.sclk,
            dq_o: self.shreg.peek_out(self.protocol.bus_width()) as u32,
            oe: self.oe,
        }
    }

    pub fn status(&self) -> SpiStatus {
        SpiStatus {
            ready: self.ready(),
            read_ready: self.read_ready,
            read_data: self.read_data,
            pins: self.pins(),
        }
    }

    /// Ticks from the `ack` tick to the tick that shows `read_ready`.
    pub fn transaction_ticks(&self) -> u64 {
        let w = self.protocol.bus_width();
        let frames = self.frames.len() as u64;
        let periods: u64 = self.frames.iter().map(|f| f.periods(w)).sum::<u64>()
            + (frames - 1) * self.reset_wait as u64;
        frames * half_point(self.divisor) as u64 + periods * period(self.divisor) + 1
    }

    /// Advance one tick. Returns the outputs as they were during this tick.
    pub fn tick(&mut self, input: SpiInput) -> SpiStatus {
        let status = self.status();
        match self.state {
            ReaderState::Idle => {
                if input.ack {
                    self.byte_addr = (input.address << self.addr_shift) & mask(self.addr_width);
                    self.frame = 0;
                    self.assert_cs();
                }
            }
            ReaderState::CsSetup => {
                if self.timer.tick(self.divisor).elapsed {
                    self.load_command();
                }
            }
            ReaderState::Cmd | ReaderState::Addr | ReaderState::Dummy | ReaderState::Data => {
                let events = self.timer.tick(self.divisor);
                if events.half_elapsed {
                    self.sclk = true;
                    self.staged = input.dq_i & mask(self.protocol.bus_width()) as u32;
                }
                if events.elapsed {
                    self.sclk = false;
                    self.shreg.shift_in(self.staged as u64, self.protocol.bus_width());
                    self.remaining -= 1;
                    if self.remaining == 0 {
                        self.next_phase();
                    }
                }
            }
            ReaderState::Gap => {
                if self.timer.tick(self.divisor).elapsed {
                    self.remaining -= 1;
                    if self.remaining == 0 {
                        self.assert_cs();
                    }
                }
            }
            ReaderState::RdyWait => {
                self.read_ready = false;
                if self.timer.tick(self.divisor).elapsed {
                    self.state = ReaderState::Idle;
                }
            }
        }
        status
    }

    fn assert_cs(&mut self) {
        self.cs = true;
        self.sclk = false;
        self.timer.load(half_point(self.divisor) - 1);
        self.state = ReaderState::CsSetup;
    }

    fn load_command(&mut self) {
        let frame = self.frames[self.frame];
        self.shreg.load_field(frame.opcode as u64, CMD_WIDTH);
        self.oe = true;
        self.enter(ReaderState::Cmd, CMD_WIDTH / self.protocol.bus_width());
        trace!(opcode = frame.opcode, name = opcode_name(frame.opcode), "spi command");
    }

    fn enter(&mut self, state: ReaderState, periods: u32) {
        trace!(from = ?self.state, to = ?state, periods, "spi phase");
        self.state = state;
        self.remaining = periods;
    }

    fn next_phase(&mut self) {
        let frame = self.frames[self.frame];
        let w = self.protocol.bus_width();
        let phases = [
            (ReaderState::Addr, frame.addr_bits / w),
            (ReaderState::Dummy, frame.dummy_cycles),
            (ReaderState::Data, frame.data_bits / w),
        ];
        let done = match self.state {
            ReaderState::Cmd => 0,
            ReaderState::Addr => 1,
            ReaderState::Dummy => 2,
            _ => 3,
        };
        // Zero-length phases are skipped
        match phases[done..].iter().find(|(_, periods)| *periods > 0) {
            Some(&(phase, periods)) => self.begin_phase(phase, periods, frame),
            None => self.end_frame(frame),
        }
    }

    fn begin_phase(&mut self, phase: ReaderState, periods: u32, frame: CommandFrame) {
        if phase == ReaderState::Addr {
            self.shreg.load_field(self.byte_addr, frame.addr_bits);
        } else {
            // Turnaround: the device drives the shared lanes from here on
            self.shreg.clear();
            if self.protocol.bidirectional() {
                self.oe = false;
            }
        }
        self.enter(phase, periods);
    }

    fn end_frame(&mut self, frame: CommandFrame) {
        if frame.data_bits > 0 {
            self.read_data = self.shreg.value() & mask(frame.data_bits);
        }
        self.cs = false;
        self.sclk = false;
        self.oe = false;
        if self.frame + 1 < self.frames.len() {
            self.frame += 1;
            self.enter(ReaderState::Gap, self.reset_wait);
        } else {
            self.read_ready = true;
            self.transactions += 1;
            self.enter(ReaderState::RdyWait, 1);
            debug!(data = self.read_data, address = self.byte_addr, "spi read complete");
        }
    }
}
