//! stdio-sim: headless driver for the stdio-core benches.
//!
//! - `uart`: send words through the TX→RX loopback and print what RX saw
//! - `spi-read`: read words from a simulated flash chip
//! - `read-id`: run the reset preamble and read the JEDEC ID
//!
//! Every run can dump a waveform (`--vcd`) and the final bench state
//! (`--save-state`).

use std::env;
use std::path::Path;
use std::process;

use stdio_core::savestate::{self, Snapshot};
use stdio_core::{
    BusClock, FastReadConfig, Parity, Protocol, ReadIdConfig, SlowReadConfig, SpiBench,
    SpiFlashReader, UartConfig, UartLoopback, VcdWriter,
};
use tracing::{info, warn, Level};

/// Tick budget per word or read when `--budget` is not given.
const DEFAULT_BUDGET: u64 = 1_000_000;

fn usage(prog: &str) {
    eprintln!("stdio-sim v{} - serial protocol bench", env!("CARGO_PKG_VERSION"));
    eprintln!("Usage: {} <uart|spi-read|read-id> [options]", prog);
    eprintln!();
    eprintln!("Common options:");
    eprintln!("  --divisor N          Clock divisor (ticks per bit/bus period minus one)");
    eprintln!("  --budget N           Tick budget per word/read (default {})", DEFAULT_BUDGET);
    eprintln!("  --vcd FILE           Write a waveform dump");
    eprintln!("  --save-state FILE    Save the bench state after the run");
    eprintln!("  --debug              Verbose logging");
    eprintln!();
    eprintln!("uart:");
    eprintln!("  --data-bits N        Data bits per frame, 5-16 (default 8)");
    eprintln!("  --parity P           none|mark|space|even|odd (default none)");
    eprintln!("  --words A,B,...      Words to send (hex with 0x prefix)");
    eprintln!("  --continuous         Send back-to-back frames");
    eprintln!();
    eprintln!("spi-read / read-id:");
    eprintln!("  --protocol P         standard|dual|quad (default standard)");
    eprintln!("  --addr-width N       Address bits (default 24)");
    eprintln!("  --data-width N       Data bits per read (default 32)");
    eprintln!("  --dummy-cycles N     Fast read dummy cycles (default 8)");
    eprintln!("  --slow               Use plain READ (0x03) instead of fast read");
    eprintln!("  --address A          First word address (default 0)");
    eprintln!("  --count N            Number of consecutive reads (default 1)");
    eprintln!("  --flash FILE         Load flash contents from a binary file");
}

/// Value following `name`, if present.
fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

/// Decimal or `0x`-prefixed hex.
fn parse_num(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    parsed.map_err(|e| format!("bad number '{}': {}", s, e))
}

fn num_flag(args: &[String], name: &str, default: u64) -> Result<u64, String> {
    match flag(args, name) {
        Some(s) => parse_num(s),
        None => Ok(default),
    }
}

fn u32_flag(args: &[String], name: &str, default: u32) -> Result<u32, String> {
    let n = num_flag(args, name, default as u64)?;
    u32::try_from(n).map_err(|_| format!("{} {} out of range", name, n))
}

/// Comma-separated word list for `--words`.
fn parse_words(list: &str) -> Result<Vec<u32>, String> {
    list.split(',')
        .map(|w| {
            let n = parse_num(w.trim())?;
            u32::try_from(n).map_err(|_| format!("word {} out of range", w.trim()))
        })
        .collect()
}

fn format_address(address: Option<u32>) -> String {
    address.map_or_else(|| "none".to_string(), |a| format!("0x{:06X}", a))
}

fn write_vcd(vcd: Option<&VcdWriter>, path: Option<&str>) -> Result<(), String> {
    if let (Some(vcd), Some(path)) = (vcd, path) {
        vcd.save(Path::new(path)).map_err(|e| format!("VCD {}: {}", path, e))?;
        info!(path, changes = vcd.change_count(), "waveform written");
    }
    Ok(())
}

fn write_state<T: Snapshot>(bench: &T, path: Option<&str>) -> Result<(), String> {
    if let Some(path) = path {
        savestate::save_to_file(bench, Path::new(path)).map_err(|e| format!("save state {}: {}", path, e))?;
        info!(path, "bench state saved");
    }
    Ok(())
}

fn run_uart(args: &[String]) -> Result<(), String> {
    let parity: Parity = flag(args, "--parity").unwrap_or("none").parse().map_err(|e| format!("{}", e))?;
    let config = UartConfig::new(u32_flag(args, "--divisor", 7)?)
        .with_data_bits(u32_flag(args, "--data-bits", 8)?)
        .with_parity(parity);
    let words: Vec<u32> = match flag(args, "--words") {
        Some(list) => parse_words(list)?,
        None => b"Hello".iter().map(|&b| b as u32).collect(),
    };
    let continuous = has_flag(args, "--continuous");
    let budget = num_flag(args, "--budget", DEFAULT_BUDGET)?;
    let vcd_path = flag(args, "--vcd");

    let mut bench = UartLoopback::new(&config).map_err(|e| e.to_string())?;
    if vcd_path.is_some() {
        bench.record();
    }
    info!(
        divisor = config.divisor,
        data_bits = config.data_bits,
        parity = %config.parity,
        words = words.len(),
        "uart loopback"
    );

    let received = bench
        .transmit(&words, continuous, budget.saturating_mul(words.len() as u64))
        .map_err(|e| e.to_string())?;
    for (sent, got) in words.iter().zip(&received) {
        let flags = if got.err.any() {
            format!(
                "{}{}{}",
                if got.err.frame { " FRAME" } else { "" },
                if got.err.parity { " PARITY" } else { "" },
                if got.err.overflow { " OVERFLOW" } else { "" }
            )
        } else {
            String::new()
        };
        println!("tick {:>8}  sent 0x{:04X}  got 0x{:04X}{}", got.tick, sent, got.data, flags);
        if got.data != *sent & ((1 << config.data_bits) - 1) {
            warn!(sent, got = got.data, "mismatch");
        }
    }
    // Let the last stop bit finish before the waveform ends
    bench.idle(2 * (config.divisor as u64 + 1));
    println!("{} frames in {} ticks", bench.uart.rx.frames, bench.tick);

    write_vcd(bench.vcd(), vcd_path)?;
    write_state(&bench, flag(args, "--save-state"))
}

fn spi_bench(args: &[String], reader: SpiFlashReader) -> Result<SpiBench, String> {
    let mut bench = SpiBench::new(reader);
    if let Some(path) = flag(args, "--flash") {
        let data = std::fs::read(path).map_err(|e| format!("flash {}: {}", path, e))?;
        info!(path, bytes = data.len(), "flash contents loaded");
        bench.flash.load_data(&data);
    }
    if flag(args, "--vcd").is_some() {
        bench.record();
    }
    Ok(bench)
}

fn run_spi_read(args: &[String]) -> Result<(), String> {
    let protocol: Protocol = flag(args, "--protocol").unwrap_or("standard").parse().map_err(|e| format!("{}", e))?;
    let clock = BusClock::new(u32_flag(args, "--divisor", 1)?);
    let addr_width = u32_flag(args, "--addr-width", 24)?;
    let data_width = u32_flag(args, "--data-width", 32)?;
    let reader = if has_flag(args, "--slow") {
        SpiFlashReader::slow_read(&SlowReadConfig { protocol, addr_width, data_width, clock })
    } else {
        SpiFlashReader::fast_read(&FastReadConfig {
            protocol,
            addr_width,
            data_width,
            dummy_cycles: u32_flag(args, "--dummy-cycles", 8)?,
            clock,
        })
    }
    .map_err(|e| e.to_string())?;
    let address = num_flag(args, "--address", 0)?;
    let count = num_flag(args, "--count", 1)?;
    let budget = num_flag(args, "--budget", DEFAULT_BUDGET)?;

    info!(
        protocol = %protocol,
        opcode = reader.frames()[0].opcode,
        ticks = reader.transaction_ticks(),
        "spi flash read"
    );
    let mut bench = spi_bench(args, reader)?;
    let digits = (data_width as usize).div_ceil(4);
    for a in address..address.saturating_add(count) {
        let outcome = bench.read(a, budget).map_err(|e| e.to_string())?;
        println!("[0x{:06X}] 0x{:0width$X}  ({} ticks)", a, outcome.data, outcome.ticks, width = digits);
    }
    println!(
        "flash saw {} command(s), last address {}",
        bench.flash.commands.len(),
        format_address(bench.flash.last_address)
    );

    write_vcd(bench.vcd(), flag(args, "--vcd"))?;
    write_state(&bench, flag(args, "--save-state"))
}

fn run_read_id(args: &[String]) -> Result<(), String> {
    let protocol: Protocol = flag(args, "--protocol").unwrap_or("standard").parse().map_err(|e| format!("{}", e))?;
    let reader = SpiFlashReader::read_id(&ReadIdConfig {
        protocol,
        clock: BusClock::new(u32_flag(args, "--divisor", 1)?),
        ..Default::default()
    })
    .map_err(|e| e.to_string())?;
    let budget = num_flag(args, "--budget", DEFAULT_BUDGET)?;

    let mut bench = spi_bench(args, reader)?;
    let outcome = bench.read(0, budget).map_err(|e| e.to_string())?;
    println!("JEDEC ID 0x{:06X}  ({} ticks, {} reset(s))", outcome.data, outcome.ticks, bench.flash.reset_count);

    write_vcd(bench.vcd(), flag(args, "--vcd"))?;
    write_state(&bench, flag(args, "--save-state"))
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || has_flag(&args, "--help") {
        usage(args.first().map_or("stdio-sim", |s| s.as_str()));
        process::exit(1);
    }

    let level = if has_flag(&args, "--debug") { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    let result = match args[1].as_str() {
        "uart" => run_uart(&args),
        "spi-read" => run_spi_read(&args),
        "read-id" => run_read_id(&args),
        other => Err(format!("unknown command '{}'", other)),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
