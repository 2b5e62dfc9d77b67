//! Test benches: engines wired to their peers and driven by a global tick.
//!
//! - [`UartLoopback`]: TX output looped into RX input through a single wire
//! - [`SpiBench`]: an SPI reader talking to a [`FlashModel`]
//!
//! Every tick the peer sees the engine's pins as they were before the tick,
//! the same two-phase order the hardware would follow.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::primitives::{Port, PortOutput, Wire};
use crate::spiflash::{FlashModel, FlashModelConfig, SpiFlashReader, SpiInput, SpiStatus};
use crate::uart::{RxErrors, RxStatus, TxInput, TxState, TxStatus, Uart, UartConfig};
use crate::vcd::VcdWriter;

/// Bench kind byte used in save state headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchKind {
    Uart = 1,
    Spi = 2,
}

impl BenchKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(BenchKind::Uart),
            2 => Some(BenchKind::Spi),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BenchKind::Uart => "uart",
            BenchKind::Spi => "spi",
        }
    }
}

/// One word seen by the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub data: u32,
    pub err: RxErrors,
    /// Tick on which `data_ready` was high
    pub tick: u64,
}

// ─── UART loopback ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UartLoopback {
    pub uart: Uart,
    line: Wire,
    pub tick: u64,
    #[serde(skip)]
    vcd: Option<VcdWriter>,
}

impl UartLoopback {
    pub fn new(config: &UartConfig) -> Result<Self> {
        Ok(UartLoopback { uart: Uart::new(config)?, line: Wire::new(1, 1), tick: 0, vcd: None })
    }

    /// Start recording a waveform.
    pub fn record(&mut self) {
        let mut vcd = VcdWriter::new("uart", "1 ns");
        vcd.add_signal("line", 1);
        vcd.add_signal("tx_busy", 1);
        vcd.add_signal("tx_done", 1);
        vcd.add_signal("rx_busy", 1);
        vcd.add_signal("rx_data_ready", 1);
        vcd.add_signal("rx_data", self.uart.rx.data_bits());
        self.vcd = Some(vcd);
    }

    pub fn vcd(&self) -> Option<&VcdWriter> {
        self.vcd.as_ref()
    }

    /// Advance one tick: RX reads the line TX drove during this tick.
    pub fn step(&mut self, input: TxInput, rx_ack: bool) -> (RxStatus, TxStatus) {
        let tx = self.uart.tx.tick_port(&mut self.line, input);
        let rx = self.uart.rx.tick_port(&mut self.line, rx_ack);
        if let Some(vcd) = self.vcd.as_mut() {
            vcd.sample(
                self.tick,
                &[tx.line as u64, tx.busy as u64, tx.done as u64, rx.busy as u64, rx.data_ready as u64, rx.data as u64],
            );
        }
        self.tick += 1;
        (rx, tx)
    }

    /// Would TX take new data on the next tick?
    fn tx_accepts(&self, continuous: bool) -> bool {
        match self.uart.tx.state() {
            TxState::Idle => true,
            TxState::Done => continuous,
            TxState::Busy => false,
        }
    }

    /// Send `words` and collect what the receiver reports, within `budget`
    /// ticks.
    pub fn transmit(&mut self, words: &[u32], continuous: bool, budget: u64) -> Result<Vec<Received>> {
        let mut received = Vec::with_capacity(words.len());
        let mut next = 0;
        let mut spent = 0;
        while received.len() < words.len() {
            if spent == budget {
                return Err(Error::Timeout { ticks: budget });
            }
            let input = if next < words.len() && self.tx_accepts(continuous) {
                next += 1;
                TxInput { ack: true, data: words[next - 1], continuous }
            } else {
                TxInput { continuous, ..Default::default() }
            };
            let tick = self.tick;
            let (rx, _) = self.step(input, true);
            if rx.data_ready {
                received.push(Received { data: rx.data, err: rx.err, tick });
            }
            spent += 1;
        }
        debug!(words = received.len(), ticks = spent, "uart transmit complete");
        Ok(received)
    }

    /// Run with the line idle for `ticks` ticks.
    pub fn idle(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.step(TxInput::default(), true);
        }
    }
}

// ─── SPI flash bench ────────────────────────────────────────────────────────

/// Result of one read transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    pub data: u64,
    /// Ticks from the `ack` tick to the `read_ready` tick
    pub ticks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiBench {
    pub reader: SpiFlashReader,
    pub flash: FlashModel,
    bus: Wire,
    pub tick: u64,
    #[serde(skip)]
    vcd: Option<VcdWriter>,
}

impl SpiBench {
    /// Wire `reader` to a flash device configured to match it.
    pub fn new(reader: SpiFlashReader) -> Self {
        let flash = FlashModel::new(FlashModelConfig {
            protocol: reader.protocol(),
            addr_width: reader.addr_width().max(8),
            dummy_cycles: reader.dummy_cycles(),
        });
        Self::with_flash(reader, flash)
    }

    pub fn with_flash(reader: SpiFlashReader, flash: FlashModel) -> Self {
        let bus = Wire::new(reader.protocol().bus_width(), 0);
        SpiBench { reader, flash, bus, tick: 0, vcd: None }
    }

    pub fn record(&mut self) {
        let w = self.reader.protocol().bus_width();
        let mut vcd = VcdWriter::new("spiflash", "1 ns");
        vcd.add_signal("cs", 1);
        vcd.add_signal("sclk", 1);
        vcd.add_signal("dq_o", w);
        vcd.add_signal("oe", 1);
        vcd.add_signal("dq_i", w);
        vcd.add_signal("ready", 1);
        vcd.add_signal("read_ready", 1);
        vcd.add_signal("read_data", 64);
        self.vcd = Some(vcd);
    }

    pub fn vcd(&self) -> Option<&VcdWriter> {
        self.vcd.as_ref()
    }

    /// Advance one tick: the flash reacts to the pins the reader presents
    /// during this tick and its output reaches the reader combinationally.
    pub fn step(&mut self, ack: bool, address: u64) -> SpiStatus {
        let out: PortOutput = self.flash.tick(self.reader.pins());
        self.bus.drive(out);
        let dq_i = self.bus.sample();
        let status = self.reader.tick(SpiInput { ack, address, dq_i });
        if let Some(vcd) = self.vcd.as_mut() {
            let p = status.pins;
            vcd.sample(
                self.tick,
                &[
                    p.cs as u64,
                    p.sclk as u64,
                    p.dq_o as u64,
                    p.oe as u64,
                    dq_i as u64,
                    status.ready as u64,
                    status.read_ready as u64,
                    status.read_data,
                ],
            );
        }
        self.tick += 1;
        status
    }

    /// Run one read transaction at word `address`.
    pub fn read(&mut self, address: u64, budget: u64) -> Result<ReadOutcome> {
        let mut spent = 0;
        while !self.reader.ready() {
            if spent == budget {
                return Err(Error::Timeout { ticks: budget });
            }
            self.step(false, address);
            spent += 1;
        }
        let start = self.tick;
        self.step(true, address);
        spent += 1;
        loop {
            if spent == budget {
                return Err(Error::Timeout { ticks: budget });
            }
            let status = self.step(false, address);
            spent += 1;
            if status.read_ready {
                let outcome = ReadOutcome { data: status.read_data, ticks: self.tick - 1 - start };
                info!(address, data = outcome.data, ticks = outcome.ticks, "spi read");
                return Ok(outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spiflash::{BusClock, FastReadConfig, Protocol, ReadIdConfig, SlowReadConfig};
    use crate::uart::Parity;

    #[test]
    fn test_uart_round_trip_all_formats() {
        for data_bits in 5..=16 {
            for parity in Parity::ALL {
                for divisor in [0, 1, 2, 7] {
                    let config = UartConfig::new(divisor).with_data_bits(data_bits).with_parity(parity);
                    let mut bench = UartLoopback::new(&config).unwrap();
                    let words = [0, (1 << data_bits) - 1, 0x5A5A & ((1 << data_bits) - 1)];
                    let got = bench.transmit(&words, false, 10_000).unwrap();
                    let data: Vec<u32> = got.iter().map(|r| r.data).collect();
                    assert_eq!(data, words, "{}{} divisor {}", data_bits, parity, divisor);
                    assert!(got.iter().all(|r| !r.err.any()));
                }
            }
        }
    }

    #[test]
    fn test_uart_loopback_latency() {
        for divisor in [0u32, 1, 2, 3, 7, 8, 10] {
            for parity in [Parity::None, Parity::Even] {
                let config = UartConfig::new(divisor).with_parity(parity);
                let mut bench = UartLoopback::new(&config).unwrap();
                bench.idle(3);
                let ack_tick = bench.tick;
                let got = bench.transmit(&[0xC3], false, 1000).unwrap();
                let p = divisor as u64 + 1;
                let l = config.frame_len() as u64;
                // RX samples (divisor >> 1) + 1 ticks into each cell, on the edge for divisor 0
                let offset = if divisor == 0 { 0 } else { (divisor as u64 >> 1) + 1 };
                let expected = 2 + offset + (l - 1) * p;
                assert_eq!(got[0].tick - ack_tick, expected, "divisor {}", divisor);
            }
        }
    }

    #[test]
    fn test_uart_continuous_stream() {
        let mut bench = UartLoopback::new(&UartConfig::new(3).with_parity(Parity::Odd)).unwrap();
        let words: Vec<u32> = (0..6).map(|i| i * 37).collect();
        let got = bench.transmit(&words, true, 10_000).unwrap();
        assert_eq!(got.iter().map(|r| r.data).collect::<Vec<_>>(), words);
        // Back to back: one frame length apart
        for pair in got.windows(2) {
            assert_eq!(pair[1].tick - pair[0].tick, 11 * 4);
        }
        assert_eq!(bench.uart.tx.frames, 6);
        assert_eq!(bench.uart.rx.frames, 6);
    }

    #[test]
    fn test_uart_timeout() {
        let mut bench = UartLoopback::new(&UartConfig::new(7)).unwrap();
        match bench.transmit(&[1], false, 20) {
            Err(Error::Timeout { ticks }) => assert_eq!(ticks, 20),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_uart_vcd() {
        let mut bench = UartLoopback::new(&UartConfig::new(1)).unwrap();
        bench.record();
        bench.transmit(&[0x55], false, 100).unwrap();
        let text = bench.vcd().unwrap().finish();
        assert!(text.contains("$var wire 1 ! line $end"));
        assert!(text.contains("$var wire 8 & rx_data $end"));
        assert!(text.contains("b1010101 &"));
    }

    fn quad_bench() -> SpiBench {
        let reader = SpiFlashReader::fast_read(&FastReadConfig {
            protocol: Protocol::Quad,
            addr_width: 24,
            data_width: 32,
            dummy_cycles: 15,
            clock: BusClock::new(1),
        })
        .unwrap();
        let mut bench = SpiBench::new(reader);
        bench.flash.load_data_at(&[0xAA, 0xBB, 0xCC, 0xDD], 0x4000);
        bench
    }

    #[test]
    fn test_quad_fast_read() {
        let mut bench = quad_bench();
        let outcome = bench.read(0x001000, 1000).unwrap();
        assert_eq!(outcome, ReadOutcome { data: 0xAABB_CCDD, ticks: 64 });
        assert_eq!(outcome.ticks, 2 * (8 + 24 + 15 + 32) / 4 + 25);
        assert_eq!(bench.flash.commands, vec![0x6B]);
        assert_eq!(bench.flash.last_address, Some(0x4000));
    }

    #[test]
    fn test_read_ready_pulses_once() {
        let mut bench = quad_bench();
        bench.step(true, 0x1000);
        let pulses = (0..200).filter(|_| bench.step(false, 0).read_ready).count();
        assert_eq!(pulses, 1);
        assert!(bench.reader.ready());
    }

    #[test]
    fn test_back_to_back_reads() {
        let mut bench = quad_bench();
        bench.flash.load_data_at(&[0x01, 0x02, 0x03, 0x04], 0x4004);
        assert_eq!(bench.read(0x1000, 1000).unwrap().data, 0xAABB_CCDD);
        assert_eq!(bench.read(0x1001, 1000).unwrap().data, 0x0102_0304);
        assert_eq!(bench.reader.transactions, 2);
    }

    #[test]
    fn test_fast_read_each_protocol_and_divisor() {
        for protocol in Protocol::ALL {
            for divisor in [1, 2, 3, 6] {
                let reader = SpiFlashReader::fast_read(&FastReadConfig {
                    protocol,
                    addr_width: 24,
                    data_width: 16,
                    dummy_cycles: 8,
                    clock: BusClock::new(divisor),
                })
                .unwrap();
                let expected_ticks = reader.transaction_ticks();
                let mut bench = SpiBench::new(reader);
                bench.flash.load_data_at(&[0x12, 0x34], 0x200);
                let outcome = bench.read(0x100, 10_000).unwrap();
                assert_eq!(outcome.data, 0x1234, "{} divisor {}", protocol, divisor);
                assert_eq!(outcome.ticks, expected_ticks);
            }
        }
    }

    #[test]
    fn test_slow_read() {
        let reader = SpiFlashReader::slow_read(&SlowReadConfig {
            data_width: 8,
            clock: BusClock::new(2),
            ..Default::default()
        })
        .unwrap();
        let mut bench = SpiBench::new(reader);
        bench.flash.load_data(&[0x00, 0x7E]);
        let outcome = bench.read(1, 1000).unwrap();
        assert_eq!(outcome.data, 0x7E);
        assert_eq!(outcome.ticks, 1 + (8 + 24 + 8) * 3 + 1);
        assert_eq!(bench.flash.commands, vec![0x03]);
    }

    #[test]
    fn test_read_id_resets_every_time() {
        for protocol in Protocol::ALL {
            let reader = SpiFlashReader::read_id(&ReadIdConfig { protocol, ..Default::default() }).unwrap();
            let expected_ticks = reader.transaction_ticks();
            let mut bench = SpiBench::new(reader);
            for n in 1..=3 {
                let outcome = bench.read(0, 10_000).unwrap();
                assert_eq!(outcome.data, 0xEF4018);
                assert_eq!(outcome.ticks, expected_ticks);
                assert_eq!(bench.flash.reset_count, n);
            }
            let id = protocol.read_id_opcode();
            assert_eq!(bench.flash.commands[..3], [0x66, 0x99, id]);
        }
    }

    #[test]
    fn test_spi_timeout() {
        let mut bench = quad_bench();
        assert!(matches!(bench.read(0, 10), Err(Error::Timeout { ticks: 10 })));
    }

    #[test]
    fn test_spi_vcd() {
        let mut bench = quad_bench();
        bench.record();
        bench.read(0x1000, 1000).unwrap();
        let text = bench.vcd().unwrap().finish();
        assert!(text.contains("$var wire 4 # dq_o $end"));
        assert!(text.contains("b10101010101110111100110011011101 ("));
    }
}
