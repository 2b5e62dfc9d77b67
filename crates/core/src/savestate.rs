//! Save states for the test benches.
//!
//! Captures a whole bench (engines, flash contents, tick counter) with
//! bincode serialization and deflate compression, so a long run can be
//! stopped and resumed tick-exactly. Waveform recording is not saved.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "STIO"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Bench kind       |  u8 (1 = UART loopback, 2 = SPI flash)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::bench::{BenchKind, SpiBench, UartLoopback};
use crate::error::{Error, Result};
use crate::spiflash::FLASH_SIZE;

/// Magic bytes identifying a save state file.
const MAGIC: &[u8; 4] = b"STIO";
/// Current save state format version.
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 9;

/// A bench that can be saved
pub trait Snapshot: Serialize + DeserializeOwned {
    const KIND: BenchKind;

    /// Reject decoded state the engines could not run with.
    fn validate(&self) -> Result<()>;
}

impl Snapshot for UartLoopback {
    const KIND: BenchKind = BenchKind::Uart;

    fn validate(&self) -> Result<()> {
        self.uart.rx.config().validate()?;
        self.uart.tx.config().validate()?;
        Ok(())
    }
}

impl Snapshot for SpiBench {
    const KIND: BenchKind = BenchKind::Spi;

    fn validate(&self) -> Result<()> {
        self.reader.validate()?;
        let len = self.flash.data.len();
        if len != 0 && len != FLASH_SIZE {
            return Err(Error::SaveState(format!("flash image is {} bytes, expected {}", len, FLASH_SIZE)));
        }
        Ok(())
    }
}

/// Encode a bench with header and deflate compression.
pub fn encode<T: Snapshot>(bench: &T) -> Result<Vec<u8>> {
    let payload = bincode::serialize(bench)
        .map_err(|e| Error::SaveState(format!("serialize error: {}", e)))?;

    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(T::KIND as u8);
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decode a bench, verifying magic, version, and bench kind.
pub fn decode<T: Snapshot>(data: &[u8]) -> Result<T> {
    if data.len() < HEADER_LEN {
        return Err(Error::SaveState("file too small".into()));
    }
    if &data[0..4] != MAGIC {
        return Err(Error::SaveState("invalid save state file (bad magic)".into()));
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(Error::SaveState(format!(
            "unsupported save state version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }
    if data[8] != T::KIND as u8 {
        let saved = BenchKind::from_byte(data[8]).map_or("?", |k| k.name());
        return Err(Error::SaveState(format!(
            "bench kind mismatch: save={} current={}",
            saved,
            T::KIND.name()
        )));
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[HEADER_LEN..])
        .map_err(|e| Error::SaveState(format!("decompress error: {:?}", e)))?;

    let bench: T = bincode::deserialize(&decompressed)
        .map_err(|e| Error::SaveState(format!("deserialize error: {}", e)))?;
    bench
        .validate()
        .map_err(|e| Error::SaveState(format!("invalid bench state: {}", e)))?;
    Ok(bench)
}

/// Save a bench to a file.
pub fn save_to_file<T: Snapshot>(bench: &T, path: &Path) -> Result<()> {
    std::fs::write(path, encode(bench)?)?;
    Ok(())
}

/// Load a bench from a file.
pub fn load_from_file<T: Snapshot>(path: &Path) -> Result<T> {
    let data = std::fs::read(path)?;
    decode(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spiflash::{BusClock, FastReadConfig, Protocol, SpiFlashReader};
    use crate::uart::{TxInput, UartConfig};

    #[test]
    fn test_uart_resume_mid_frame() {
        let mut bench = UartLoopback::new(&UartConfig::new(3)).unwrap();
        bench.step(TxInput::send(0x42), true);
        for _ in 0..17 {
            bench.step(TxInput::default(), true);
        }
        let bytes = encode(&bench).unwrap();
        assert_eq!(&bytes[0..4], b"STIO");
        assert_eq!(bytes[8], 1);

        let mut restored: UartLoopback = decode(&bytes).unwrap();
        assert_eq!(restored.tick, 18);
        assert!(restored.uart.tx.busy());
        let ready = (0..100)
            .map(|_| restored.step(TxInput::default(), true).0)
            .find(|s| s.data_ready)
            .unwrap();
        assert_eq!(ready.data, 0x42);
    }

    #[test]
    fn test_spi_round_trip() {
        let reader = SpiFlashReader::fast_read(&FastReadConfig {
            protocol: Protocol::Dual,
            clock: BusClock::new(2),
            ..Default::default()
        })
        .unwrap();
        let mut bench = SpiBench::new(reader);
        bench.flash.load_data_at(&[0xDE, 0xAD, 0xBE, 0xEF], 0x40);
        let bytes = encode(&bench).unwrap();
        let mut restored: SpiBench = decode(&bytes).unwrap();
        assert_eq!(restored.read(0x10, 1000).unwrap().data, 0xDEAD_BEEF);
    }

    #[test]
    fn test_rejects_truncated_flash_image() {
        let reader = SpiFlashReader::fast_read(&FastReadConfig::default()).unwrap();
        let mut bench = SpiBench::new(reader);
        bench.flash.data = vec![0x00; 16];
        let bytes = encode(&bench).unwrap();
        match decode::<SpiBench>(&bytes) {
            Err(Error::SaveState(msg)) => assert!(msg.contains("flash image is 16 bytes")),
            other => panic!("expected invalid state, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_rejects_wrong_kind() {
        let bench = UartLoopback::new(&UartConfig::new(1)).unwrap();
        let bytes = encode(&bench).unwrap();
        match decode::<SpiBench>(&bytes) {
            Err(Error::SaveState(msg)) => assert!(msg.contains("save=uart current=spi")),
            other => panic!("expected kind mismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_rejects_bad_header() {
        assert!(matches!(decode::<UartLoopback>(b"STIO"), Err(Error::SaveState(_))));
        let bench = UartLoopback::new(&UartConfig::new(1)).unwrap();
        let mut bytes = encode(&bench).unwrap();
        bytes[0] = b'X';
        assert!(decode::<UartLoopback>(&bytes).is_err());
        bytes[0] = b'S';
        bytes[4] = 2;
        match decode::<UartLoopback>(&bytes) {
            Err(e) => assert!(e.to_string().contains("version 2")),
            Ok(_) => panic!("expected version error"),
        }
    }
}
