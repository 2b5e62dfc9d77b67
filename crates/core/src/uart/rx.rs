//! UART receiver.
//!
//! `IDLE → BUSY → DONE → (BUSY | IDLE)`
//!
//! A falling line in IDLE starts a frame. The bit timer is loaded with
//! `divisor >> 1`, so each bit is sampled `(divisor >> 1) + 1` ticks after
//! its leading edge; with divisor 0 the start bit is sampled on the
//! detection tick itself. The tick
//! that samples the stop bit latches the frame: error flags always, data only
//! if the consumer asserts `ack` on that tick. The first DONE tick is the one
//! and only `data_ready` tick. DONE keeps the bit timer running and looks at
//! the line in the middle of the following cell; a 0 there is the next start
//! bit.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{frame_len, FrameFields, Parity, UartConfig};
use crate::error::ConfigError;
use crate::primitives::{check_divisor, BitOrder, ClockDivider, Port, ShiftRegister};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RxState {
    Idle,
    Busy,
    Done,
}

/// Receive error flags, latched at frame completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxErrors {
    /// Frame completed while the consumer could not accept it; data dropped
    pub overflow: bool,
    /// Start bit was not 0 or stop bit was not 1
    pub frame: bool,
    /// Parity bit disagrees with the data
    pub parity: bool,
}

impl RxErrors {
    pub fn any(&self) -> bool {
        self.overflow || self.frame || self.parity
    }
}

/// Receiver outputs as seen by a consumer during one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxStatus {
    pub data_ready: bool,
    pub busy: bool,
    pub data: u32,
    pub err: RxErrors,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UartRx {
    data_bits: u32,
    parity: Parity,
    divisor: u32,
    divisor_bits: u32,
    state: RxState,
    timer: ClockDivider,
    shreg: ShiftRegister,
    bits_left: u32,
    data: u32,
    err: RxErrors,
    ready: bool,
    /// Completed frames, including dropped ones
    pub frames: u64,
}

impl UartRx {
    pub fn new(config: &UartConfig) -> Result<Self, ConfigError> {
        let divisor_bits = config.validate()?;
        Ok(UartRx {
            data_bits: config.data_bits,
            parity: config.parity,
            divisor: config.divisor,
            divisor_bits,
            state: RxState::Idle,
            timer: ClockDivider::new(),
            shreg: ShiftRegister::new(config.frame_len(), BitOrder::LsbFirst)?,
            bits_left: 0,
            data: 0,
            err: RxErrors::default(),
            ready: false,
            frames: 0,
        })
    }

    /// Return to IDLE with cleared data and flags. The divisor is kept.
    pub fn reset(&mut self) {
        self.state = RxState::Idle;
        self.timer.reset();
        self.shreg.clear();
        self.bits_left = 0;
        self.data = 0;
        self.err = RxErrors::default();
        self.ready = false;
        self.frames = 0;
    }

    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    /// Change the divisor register. Must not change during a frame.
    pub fn set_divisor(&mut self, divisor: u32) -> Result<(), ConfigError> {
        check_divisor(divisor, self.divisor_bits)?;
        self.divisor = divisor;
        Ok(())
    }

    pub fn data_bits(&self) -> u32 {
        self.data_bits
    }

    pub fn parity(&self) -> Parity {
        self.parity
    }

    pub fn frame_len(&self) -> u32 {
        frame_len(self.data_bits, self.parity)
    }

    /// Configuration this receiver runs with.
    pub fn config(&self) -> UartConfig {
        UartConfig {
            divisor: self.divisor,
            divisor_bits: Some(self.divisor_bits),
            data_bits: self.data_bits,
            parity: self.parity,
        }
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    pub fn data(&self) -> u32 {
        self.data
    }

    pub fn errors(&self) -> RxErrors {
        self.err
    }

    pub fn data_ready(&self) -> bool {
        self.state == RxState::Done && self.ready
    }

    pub fn busy(&self) -> bool {
        self.state == RxState::Busy
    }

    pub fn status(&self) -> RxStatus {
        RxStatus { data_ready: self.data_ready(), busy: self.busy(), data: self.data, err: self.err }
    }

    /// Advance one tick with the current line level and consumer `ack`.
    ///
    /// Returns the outputs as they were during this tick, before the update.
    pub fn tick(&mut self, line: bool, ack: bool) -> RxStatus {
        let status = self.status();
        match self.state {
            RxState::Idle => {
                if !line {
                    self.begin_frame();
                }
            }
            RxState::Busy => {
                if self.timer.tick(self.divisor).elapsed {
                    self.sample(line, ack);
                }
            }
            RxState::Done => {
                self.ready = false;
                if self.timer.tick(self.divisor).elapsed {
                    if line {
                        self.state = RxState::Idle;
                    } else {
                        // Start bit of a back-to-back frame, sampled mid-cell
                        self.shreg.shift_in(0, 1);
                        self.bits_left = self.frame_len() - 1;
                        self.state = RxState::Busy;
                    }
                }
            }
        }
        status
    }

    /// Tick with the line level read from lane 0 of `port`.
    pub fn tick_port<P: Port>(&mut self, port: &mut P, ack: bool) -> RxStatus {
        let line = port.sample() & 1 == 1;
        self.tick(line, ack)
    }

    fn begin_frame(&mut self) {
        self.bits_left = self.frame_len();
        if self.divisor == 0 {
            self.shreg.shift_in(0, 1);
            self.bits_left -= 1;
            self.timer.load(0);
        } else {
            self.timer.load(self.divisor >> 1);
        }
        self.state = RxState::Busy;
    }

    fn sample(&mut self, line: bool, ack: bool) {
        self.shreg.shift_in(line as u64, 1);
        self.bits_left -= 1;
        if self.bits_left == 0 {
            self.latch(ack);
            self.ready = true;
            self.state = RxState::Done;
        }
    }

    fn latch(&mut self, ack: bool) {
        let fields = FrameFields::decode(self.shreg.value(), self.data_bits, self.parity);
        self.err = RxErrors {
            overflow: !ack,
            frame: fields.frame_error(),
            parity: fields.parity_error(self.parity),
        };
        if ack {
            self.data = fields.data;
        }
        self.frames += 1;
        debug!(data = fields.data, errors = ?self.err, "uart rx frame complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive `bits` onto the line, one bit-cell each, after two idle ticks and
    /// followed by `idle_cells` idle cells. Returns every tick that showed
    /// `data_ready`, with the status seen on it.
    fn feed(rx: &mut UartRx, bits: &[u8], ack: bool, idle_cells: usize) -> Vec<(usize, RxStatus)> {
        let period = rx.divisor() as usize + 1;
        let mut line = vec![true; 2];
        for &b in bits {
            line.extend(std::iter::repeat(b != 0).take(period));
        }
        line.extend(std::iter::repeat(true).take(idle_cells * period));
        let mut ready = Vec::new();
        for (t, &level) in line.iter().enumerate() {
            let s = rx.tick(level, ack);
            if s.data_ready {
                ready.push((t, s));
            }
        }
        ready
    }

    fn rx(divisor: u32, data_bits: u32, parity: Parity) -> UartRx {
        UartRx::new(&UartConfig::new(divisor).with_data_bits(data_bits).with_parity(parity)).unwrap()
    }

    fn expect_data(rx: &mut UartRx, bits: &[u8], data: u32) {
        let ready = feed(rx, bits, true, 3);
        assert_eq!(ready.len(), 1);
        let s = ready[0].1;
        assert!(!s.err.any(), "unexpected errors {:?}", s.err);
        assert_eq!(s.data, data);
    }

    fn expect_errors(rx: &mut UartRx, bits: &[u8], expected: RxErrors) {
        let ready = feed(rx, bits, true, 3);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].1.err, expected);
    }

    #[test]
    fn test_8n1() {
        let mut r = rx(7, 8, Parity::None);
        expect_data(&mut r, &[0, 1, 0, 1, 0, 1, 1, 1, 0, 1], 0b0111_0101);
        assert_eq!(r.state(), RxState::Idle);
        assert_eq!(r.frames, 1);
    }

    #[test]
    fn test_ready_tick_timing() {
        // Start seen on tick 2, sampled at +4, stop sampled 9 cells later
        let mut r = rx(7, 8, Parity::None);
        let ready = feed(&mut r, &[0, 1, 0, 1, 0, 1, 1, 1, 0, 1], true, 3);
        assert_eq!(ready[0].0, 2 + 4 + 9 * 8 + 1);
    }

    #[test]
    fn test_ready_tick_timing_even_divisor() {
        // divisor 8: start seen on tick 2, first sample at +5
        let mut r = rx(8, 8, Parity::None);
        let ready = feed(&mut r, &[0, 1, 0, 1, 0, 1, 1, 1, 0, 1], true, 3);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].0, 2 + 5 + 9 * 9 + 1);
        assert_eq!(ready[0].1.data, 0b0111_0101);
    }

    #[test]
    fn test_16n1() {
        let mut r = rx(7, 16, Parity::None);
        expect_data(
            &mut r,
            &[0, 1, 0, 1, 0, 1, 1, 1, 0, 1, 1, 1, 1, 0, 0, 0, 0, 1],
            0b0000_1111_0111_0101,
        );
    }

    #[test]
    fn test_8m1() {
        let mut r = rx(7, 8, Parity::Mark);
        expect_data(&mut r, &[0, 1, 0, 1, 0, 1, 1, 1, 0, 1, 1], 0b0111_0101);
        expect_data(&mut r, &[0, 1, 0, 1, 0, 1, 1, 0, 0, 1, 1], 0b0011_0101);
        expect_errors(&mut r, &[0, 1, 0, 1, 0, 1, 1, 1, 0, 0, 1], RxErrors { parity: true, ..Default::default() });
    }

    #[test]
    fn test_8s1() {
        let mut r = rx(7, 8, Parity::Space);
        expect_data(&mut r, &[0, 1, 0, 1, 0, 1, 1, 1, 0, 0, 1], 0b0111_0101);
        expect_data(&mut r, &[0, 1, 0, 1, 0, 1, 1, 0, 0, 0, 1], 0b0011_0101);
        expect_errors(&mut r, &[0, 1, 0, 1, 0, 1, 1, 1, 0, 1, 1], RxErrors { parity: true, ..Default::default() });
    }

    #[test]
    fn test_8e1() {
        let mut r = rx(7, 8, Parity::Even);
        expect_data(&mut r, &[0, 1, 0, 1, 0, 1, 1, 1, 0, 1, 1], 0b0111_0101);
        expect_data(&mut r, &[0, 1, 0, 1, 0, 1, 1, 0, 0, 0, 1], 0b0011_0101);
        expect_errors(&mut r, &[0, 1, 0, 1, 0, 1, 1, 1, 0, 0, 1], RxErrors { parity: true, ..Default::default() });
    }

    #[test]
    fn test_8o1() {
        let mut r = rx(7, 8, Parity::Odd);
        expect_data(&mut r, &[0, 1, 0, 1, 0, 1, 1, 1, 0, 0, 1], 0b0111_0101);
        expect_data(&mut r, &[0, 1, 0, 1, 0, 1, 1, 0, 0, 1, 1], 0b0011_0101);
        expect_errors(&mut r, &[0, 1, 0, 1, 0, 1, 1, 1, 0, 1, 1], RxErrors { parity: true, ..Default::default() });
    }

    #[test]
    fn test_parity_error_only_bit_flipped() {
        for parity in [Parity::Mark, Parity::Space, Parity::Even, Parity::Odd] {
            let mut r = rx(3, 8, parity);
            let mut bits: Vec<u8> = super::super::frame_bits(0xC3, 8, parity).iter().map(|&b| b as u8).collect();
            bits[9] ^= 1;
            expect_errors(&mut r, &bits, RxErrors { parity: true, ..Default::default() });
        }
    }

    #[test]
    fn test_err_frame() {
        let mut r = rx(7, 8, Parity::None);
        expect_errors(&mut r, &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0], RxErrors { frame: true, ..Default::default() });
    }

    #[test]
    fn test_err_overflow_keeps_data() {
        let mut r = rx(7, 8, Parity::None);
        expect_data(&mut r, &[0, 1, 1, 1, 1, 0, 0, 0, 0, 1], 0x0F);
        let ready = feed(&mut r, &[0, 0, 0, 0, 0, 0, 0, 0, 0, 1], false, 3);
        assert_eq!(ready.len(), 1);
        let s = ready[0].1;
        assert_eq!(s.err, RxErrors { overflow: true, ..Default::default() });
        assert_eq!(s.data, 0x0F);
        assert_eq!(r.data(), 0x0F);
        assert!(r.errors().overflow);
    }

    #[test]
    fn test_frame_and_overflow_combine() {
        let mut r = rx(5, 8, Parity::None);
        let ready = feed(&mut r, &[0, 1, 0, 1, 0, 1, 0, 1, 0, 0], false, 3);
        assert_eq!(ready[0].1.err, RxErrors { overflow: true, frame: true, parity: false });
    }

    #[test]
    fn test_errors_persist_until_next_frame() {
        let mut r = rx(7, 8, Parity::None);
        feed(&mut r, &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0], true, 3);
        for _ in 0..100 {
            r.tick(true, true);
        }
        assert!(r.errors().frame);
        expect_data(&mut r, &[0, 1, 0, 0, 0, 0, 0, 0, 0, 1], 0x01);
        assert!(!r.errors().any());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut r = rx(7, 8, Parity::None);
        let bits = [0, 0, 1, 0, 1, 0, 1, 0, 1, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1];
        let ready = feed(&mut r, &bits, true, 3);
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].1.data, 0b1010_1010);
        assert_eq!(ready[1].1.data, 0b0101_0101);
        // The second frame completes exactly one frame length later
        assert_eq!(ready[1].0 - ready[0].0, 10 * 8);
    }

    #[test]
    fn test_divisor_zero() {
        let mut r = rx(0, 8, Parity::None);
        expect_data(&mut r, &[0, 1, 0, 1, 0, 1, 1, 1, 0, 1], 0b0111_0101);
        let bits = [0, 1, 1, 0, 0, 1, 1, 0, 0, 1, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1];
        let ready = feed(&mut r, &bits, true, 3);
        assert_eq!(ready.iter().map(|(_, s)| s.data).collect::<Vec<_>>(), vec![0x33, 0xF0]);
    }

    #[test]
    fn test_ready_pulses_once() {
        let mut r = rx(4, 8, Parity::Even);
        let bits: Vec<u8> = super::super::frame_bits(0x81, 8, Parity::Even).iter().map(|&b| b as u8).collect();
        let mut pulses = 0;
        let mut busy_ticks = 0;
        for level in std::iter::repeat(1u8).take(3)
            .chain(bits.iter().flat_map(|&b| std::iter::repeat(b).take(5)))
            .chain(std::iter::repeat(1u8).take(40))
        {
            let s = r.tick(level != 0, true);
            pulses += s.data_ready as u32;
            busy_ticks += s.busy as u32;
        }
        assert_eq!(pulses, 1);
        assert!(busy_ticks > 0);
        assert_eq!(r.data(), 0x81);
        assert!(!r.busy());
    }

    #[test]
    fn test_idle_port_never_starts() {
        let mut r = rx(0, 8, Parity::None);
        let mut port = crate::primitives::NullPort::uart();
        for _ in 0..50 {
            let s = r.tick_port(&mut port, true);
            assert!(!s.busy && !s.data_ready);
        }
        assert_eq!(r.state(), RxState::Idle);
    }

    #[test]
    fn test_set_divisor_checks_width() {
        let mut r = UartRx::new(&UartConfig::new(7)).unwrap();
        assert!(r.set_divisor(5).is_ok());
        assert_eq!(
            r.set_divisor(8),
            Err(ConfigError::DivisorOverflow { divisor: 8, bits: 3 })
        );
        assert_eq!(r.divisor(), 5);
    }
}
