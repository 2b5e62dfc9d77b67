//! Bit-level SPI NOR flash device, modelled on a W25Q128 (16 MB).
//!
//! Watches the master's pins once per tick. Symbols are sampled on the
//! rising bus clock edge and driven after the falling edge, `bus_width`
//! bits at a time, MSB first.
//!
//! Supported commands:
//! - 0x03: Read Data (address, then continuous read)
//! - 0x0B / 0x3B / 0x6B: Fast Read (address + dummy cycles, then continuous read)
//! - 0x9F / 0xAF: Read ID → EF 40 18
//! - 0x66: Reset Enable
//! - 0x99: Reset Memory (counted when enabled)
//!
//! Anything else is logged and ignored until CS drops.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{opcode_name, opcodes, Protocol, SpiPins, CMD_WIDTH};
use crate::primitives::{mask, PortOutput};

pub const FLASH_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// JEDEC ID for W25Q128JV: Winbond, SPI, 128 Mbit
pub const JEDEC_ID: [u8; 3] = [0xEF, 0x40, 0x18];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashModelConfig {
    pub protocol: Protocol,
    pub addr_width: u32,
    /// Dummy cycles the fast read commands expect
    pub dummy_cycles: u32,
}

impl Default for FlashModelConfig {
    fn default() -> Self {
        FlashModelConfig { protocol: Protocol::Standard, addr_width: 24, dummy_cycles: 8 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum FlashState {
    Command { bits: u32, value: u32 },
    Address { bits: u32, value: u64, dummy: u32 },
    Dummy { left: u32 },
    /// Command decoded, output starts at the next falling edge
    Output,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Source {
    Memory { addr: u32 },
    Id { index: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashModel {
    config: FlashModelConfig,
    pub data: Vec<u8>,
    state: FlashState,
    source: Source,
    selected: bool,
    prev_sclk: bool,
    out_byte: u8,
    out_bits: u32,
    out: u32,
    driving: bool,
    reset_enabled: bool,
    /// RESET MEMORY commands accepted
    pub reset_count: u64,
    /// Opcodes seen since construction, oldest first
    pub commands: Vec<u8>,
    pub last_address: Option<u32>,
}

impl FlashModel {
    pub fn new(config: FlashModelConfig) -> Self {
        FlashModel {
            config,
            data: Vec::new(), // Lazy: only allocate when data is loaded
            state: FlashState::Command { bits: 0, value: 0 },
            source: Source::Memory { addr: 0 },
            selected: false,
            prev_sclk: false,
            out_byte: 0xFF,
            out_bits: 0,
            out: 0,
            driving: false,
            reset_enabled: false,
            reset_count: 0,
            commands: Vec::new(),
            last_address: None,
        }
    }

    pub fn config(&self) -> &FlashModelConfig {
        &self.config
    }

    fn ensure_data(&mut self) {
        if self.data.is_empty() {
            self.data = vec![0xFF; FLASH_SIZE];
        }
    }

    /// Load data at the start of flash.
    pub fn load_data(&mut self, bin: &[u8]) {
        self.load_data_at(bin, 0);
    }

    /// Load data at a byte offset. Anything past the end of flash is dropped.
    pub fn load_data_at(&mut self, bin: &[u8], offset: usize) {
        self.ensure_data();
        let offset = offset.min(FLASH_SIZE);
        let end = (offset + bin.len()).min(FLASH_SIZE);
        self.data[offset..end].copy_from_slice(&bin[..end - offset]);
    }

    /// Drive outputs for one tick from the master's current pins.
    pub fn tick(&mut self, pins: SpiPins) -> PortOutput {
        if !pins.cs {
            if self.selected {
                self.deselect();
            }
            self.prev_sclk = pins.sclk;
            return PortOutput::default();
        }
        self.selected = true;
        let rising = pins.sclk && !self.prev_sclk;
        let falling = !pins.sclk && self.prev_sclk;
        self.prev_sclk = pins.sclk;

        if rising {
            let lanes = mask(self.config.protocol.bus_width()) as u32;
            self.sample(pins.dq_o & lanes);
        }
        if falling && self.state == FlashState::Output {
            self.shift_out();
        }
        PortOutput { value: self.out, oe: self.driving }
    }

    /// Called when CS goes low - deselect, reset state machine
    fn deselect(&mut self) {
        self.selected = false;
        self.state = FlashState::Command { bits: 0, value: 0 };
        self.out_bits = 0;
        self.out = 0;
        self.driving = false;
    }

    fn sample(&mut self, symbol: u32) {
        let w = self.config.protocol.bus_width();
        match self.state {
            FlashState::Command { bits, value } => {
                let value = (value << w) | symbol;
                if bits + w >= CMD_WIDTH {
                    self.decode(value as u8);
                } else {
                    self.state = FlashState::Command { bits: bits + w, value };
                }
            }
            FlashState::Address { bits, value, dummy } => {
                let value = (value << w) | symbol as u64;
                if bits + w >= self.config.addr_width {
                    let addr = (value as usize % FLASH_SIZE) as u32;
                    self.last_address = Some(addr);
                    self.source = Source::Memory { addr };
                    self.state = if dummy > 0 { FlashState::Dummy { left: dummy } } else { FlashState::Output };
                } else {
                    self.state = FlashState::Address { bits: bits + w, value, dummy };
                }
            }
            FlashState::Dummy { left } => {
                self.state = if left > 1 { FlashState::Dummy { left: left - 1 } } else { FlashState::Output };
            }
            FlashState::Output | FlashState::Ignore => {}
        }
    }

    fn decode(&mut self, opcode: u8) {
        self.commands.push(opcode);
        trace!(opcode, name = opcode_name(opcode), "flash command");
        if opcode != opcodes::RST {
            self.reset_enabled = opcode == opcodes::RSTEN;
        }
        self.state = match opcode {
            opcodes::READ => FlashState::Address { bits: 0, value: 0, dummy: 0 },
            opcodes::FAST_READ | opcodes::DOR | opcodes::QOR => {
                FlashState::Address { bits: 0, value: 0, dummy: self.config.dummy_cycles }
            }
            opcodes::RDID | opcodes::MIORDID => {
                self.source = Source::Id { index: 0 };
                FlashState::Output
            }
            opcodes::RST => {
                if self.reset_enabled {
                    self.reset_count += 1;
                    self.reset_enabled = false;
                    debug!(count = self.reset_count, "flash reset");
                }
                FlashState::Ignore
            }
            _ => FlashState::Ignore,
        };
    }

    fn next_byte(&mut self) -> u8 {
        match self.source {
            Source::Memory { addr } => {
                let val = if self.data.is_empty() { 0xFF } else { self.data[addr as usize % self.data.len()] };
                self.source = Source::Memory { addr: (addr + 1) & (FLASH_SIZE as u32 - 1) };
                val
            }
            Source::Id { index } => {
                self.source = Source::Id { index: index + 1 };
                JEDEC_ID.get(index).copied().unwrap_or(0x00)
            }
        }
    }

    fn shift_out(&mut self) {
        let w = self.config.protocol.bus_width();
        if self.out_bits == 0 {
            self.out_byte = self.next_byte();
            self.out_bits = 8;
        }
        self.out = (self.out_byte >> (8 - w)) as u32;
        self.out_byte <<= w;
        self.out_bits -= w;
        self.driving = true;
    }
}
