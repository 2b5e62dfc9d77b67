//! Value change dump (IEEE 1364 VCD) writer.
//!
//! Records per-tick signal values from a bench and renders a VCD file that
//! GTKWave and similar viewers open directly. Only changes are stored.
//!
//! ```text
//! $timescale 1 ns $end
//! $scope module uart $end
//! $var wire 1 ! tx $end
//! $var wire 8 " rx_data $end
//! $upscope $end
//! $enddefinitions $end
//! #0
//! 1!
//! b0 "
//! #2
//! 0!
//! ```

use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::primitives::mask;

/// Handle to a declared signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalId(usize);

#[derive(Debug, Clone)]
struct Signal {
    name: String,
    width: u32,
    code: String,
}

#[derive(Debug, Clone)]
pub struct VcdWriter {
    scope: String,
    timescale: String,
    signals: Vec<Signal>,
    last: Vec<Option<u64>>,
    /// (tick, signal index, value), in tick order
    changes: Vec<(u64, usize, u64)>,
}

/// Identifier code for the n-th signal: base-94 over printable ASCII.
fn id_code(mut n: usize) -> String {
    let mut code = String::new();
    loop {
        code.push((b'!' + (n % 94) as u8) as char);
        n /= 94;
        if n == 0 {
            break;
        }
        n -= 1;
    }
    code
}

impl VcdWriter {
    pub fn new(scope: &str, timescale: &str) -> Self {
        VcdWriter {
            scope: scope.to_string(),
            timescale: timescale.to_string(),
            signals: Vec::new(),
            last: Vec::new(),
            changes: Vec::new(),
        }
    }

    /// Declare a signal. Must happen before the first sample.
    pub fn add_signal(&mut self, name: &str, width: u32) -> SignalId {
        let index = self.signals.len();
        self.signals.push(Signal { name: name.to_string(), width: width.clamp(1, 64), code: id_code(index) });
        self.last.push(None);
        SignalId(index)
    }

    /// Record one tick. `values` follows declaration order; missing trailing
    /// values keep their previous state.
    pub fn sample(&mut self, tick: u64, values: &[u64]) {
        for (index, &value) in values.iter().enumerate().take(self.signals.len()) {
            let value = value & mask(self.signals[index].width);
            if self.last[index] != Some(value) {
                self.last[index] = Some(value);
                self.changes.push((tick, index, value));
            }
        }
    }

    /// Record a single signal change.
    pub fn set(&mut self, tick: u64, signal: SignalId, value: u64) {
        let index = signal.0;
        let value = value & mask(self.signals[index].width);
        if self.last[index] != Some(value) {
            self.last[index] = Some(value);
            self.changes.push((tick, index, value));
        }
    }

    /// Number of recorded value changes
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    /// Render the complete VCD text.
    pub fn finish(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "$version {} {} $end", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let _ = writeln!(out, "$timescale {} $end", self.timescale);
        let _ = writeln!(out, "$scope module {} $end", self.scope);
        for s in &self.signals {
            let _ = writeln!(out, "$var wire {} {} {} $end", s.width, s.code, s.name);
        }
        out.push_str("$upscope $end\n$enddefinitions $end\n");

        let mut current = None;
        for &(tick, index, value) in &self.changes {
            if current != Some(tick) {
                let _ = writeln!(out, "#{}", tick);
                current = Some(tick);
            }
            let s = &self.signals[index];
            if s.width == 1 {
                let _ = writeln!(out, "{}{}", value, s.code);
            } else {
                let _ = writeln!(out, "b{:b} {}", value, s.code);
            }
        }
        out
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(self.finish().as_bytes())?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.finish())?;
        Ok(())
    }
}
