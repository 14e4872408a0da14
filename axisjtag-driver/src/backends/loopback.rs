//! # File-Driven Loopback Emulator
//!
//! Emulates a firmware target from an expectation script, one directive per
//! line:
//!
//! ```text
//! # 12-bit shift: check the vectors, then answer with TDO = 3
//! TMS    : 5
//! TDI    : 10
//! LENBITS: 12
//! TDO    : 3
//! ```
//!
//! Each SHIFT consumes directives up to and including the next `TDO` line;
//! `TMS`, `TDI` and `LENBITS` lines set expectations that are checked
//! against the incoming vectors (values are decimal or `0x` hex, up to 64
//! bits). A mismatch fails with [`DriverError::Script`], deliberately
//! distinct from transport errors. A QUERY rewinds the script, which lets a
//! test re-run its fixture by re-invoking `query()`.
//!
//! In TDO-only mode the expectation checks are skipped and only the `TDO`
//! values are replayed; fixtures that intentionally restructure the packet
//! stream use this, since TMS/TDI positions are then unreliable to compare.
//!
//! The emulated target reports word size 4 and memory depth 0: it has no
//! backing memory, so it must only ever be used over a reliable channel.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

use axisjtag_protocol::{Command, HEADER_SIZE, Header};

use crate::Transport;
use crate::engine::split_streams;
use crate::error::DriverError;

/// Word size the emulated target reports.
pub const LOOPBACK_WORD_SIZE: usize = 4;

enum Directive {
    Tms(u64),
    Tdi(u64),
    LenBits(u32),
    Tdo(u64),
}

/// Expectations accumulated for one SHIFT, terminated by a `TDO` directive.
struct ShiftRecord {
    tms: Option<u64>,
    tdi: Option<u64>,
    len_bits: Option<u32>,
    tdo: u64,
}

/// Transport backed by an expectation script instead of a network.
pub struct LoopbackTransport {
    reader: BufReader<File>,
    tdo_only: bool,
    line_no: usize,
}

impl LoopbackTransport {
    pub fn open(path: impl AsRef<Path>, tdo_only: bool) -> Result<LoopbackTransport, DriverError> {
        let path = path.as_ref();
        log::debug!("opening loopback script {}", path.display());
        let file = File::open(path).map_err(|e| DriverError::sys("open", e))?;
        Ok(LoopbackTransport {
            reader: BufReader::new(file),
            tdo_only,
            line_no: 0,
        })
    }

    fn rewind(&mut self) -> Result<(), DriverError> {
        self.reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| DriverError::sys("seek", e))?;
        self.line_no = 0;
        Ok(())
    }

    fn next_record(&mut self) -> Result<ShiftRecord, DriverError> {
        let mut record = ShiftRecord {
            tms: None,
            tdi: None,
            len_bits: None,
            tdo: 0,
        };
        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|e| DriverError::sys("read", e))?;
            if read == 0 {
                return Err(DriverError::Script(format!(
                    "script exhausted before a TDO directive (after line {})",
                    self.line_no
                )));
            }
            self.line_no += 1;
            let Some(directive) = parse_directive(&line, self.line_no)? else {
                continue;
            };
            match directive {
                Directive::Tms(value) => record.tms = Some(value),
                Directive::Tdi(value) => record.tdi = Some(value),
                Directive::LenBits(value) => record.len_bits = Some(value),
                Directive::Tdo(value) => {
                    record.tdo = value;
                    return Ok(record);
                }
            }
        }
    }
}

fn parse_directive(line: &str, line_no: usize) -> Result<Option<Directive>, DriverError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (key, value) = line.split_once(':').ok_or_else(|| {
        DriverError::Script(format!("line {}: missing ':' separator", line_no))
    })?;
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse::<u64>(),
    }
    .map_err(|e| DriverError::Script(format!("line {}: bad value {:?}: {}", line_no, value, e)))?;

    let key = key.trim();
    if key.eq_ignore_ascii_case("TMS") {
        Ok(Some(Directive::Tms(parsed)))
    } else if key.eq_ignore_ascii_case("TDI") {
        Ok(Some(Directive::Tdi(parsed)))
    } else if key.eq_ignore_ascii_case("LENBITS") {
        Ok(Some(Directive::LenBits(parsed as u32)))
    } else if key.eq_ignore_ascii_case("TDO") {
        Ok(Some(Directive::Tdo(parsed)))
    } else {
        Err(DriverError::Script(format!(
            "line {}: unknown directive {:?}",
            line_no, key
        )))
    }
}

/// Packs the first `num_bits` (at most 64) of a byte stream into a value
/// for comparison against a script expectation.
fn stream_value(stream: &[u8], num_bits: u32) -> u64 {
    let mut word = [0u8; 8];
    let take = stream.len().min(8);
    word[..take].copy_from_slice(&stream[..take]);
    let value = u64::from_le_bytes(word);
    if num_bits >= 64 {
        value
    } else {
        value & ((1u64 << num_bits) - 1)
    }
}

fn check(name: &str, expected: Option<u64>, stream: &[u8], num_bits: u32) -> Result<(), DriverError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = stream_value(stream, num_bits);
    if actual != expected {
        return Err(DriverError::Script(format!(
            "{} mismatch: script expects 0x{:x}, shift carried 0x{:x}",
            name, expected, actual
        )));
    }
    Ok(())
}

impl Transport for LoopbackTransport {
    fn xfer(
        &mut self,
        tx: &[u8],
        rx_hdr: &mut [u8],
        rx_payload: &mut [u8],
    ) -> Result<usize, DriverError> {
        let header = Header::from_bytes(tx);
        match header.command() {
            Some(Command::Query) => {
                self.rewind()?;
                // word size 4, depth 0, period unknown
                let raw = LOOPBACK_WORD_SIZE as u32 - 1;
                rx_hdr.fill(0);
                rx_hdr[..HEADER_SIZE].copy_from_slice(&raw.to_le_bytes());
                Ok(0)
            }
            Some(Command::Shift) => {
                let num_bits = header.len_bits();
                let num_bytes = (num_bits as usize).div_ceil(8);
                let (tms, tdi) =
                    split_streams(&tx[LOOPBACK_WORD_SIZE..], num_bytes, LOOPBACK_WORD_SIZE);

                let record = self.next_record()?;
                if !self.tdo_only {
                    if let Some(expected) = record.len_bits {
                        if expected != num_bits {
                            return Err(DriverError::Script(format!(
                                "length mismatch: script expects {} bits, shift carried {}",
                                expected, num_bits
                            )));
                        }
                    }
                    check("TMS", record.tms, &tms, num_bits)?;
                    check("TDI", record.tdi, &tdi, num_bits)?;
                }

                let tdo = record.tdo.to_le_bytes();
                rx_payload[..num_bytes].fill(0);
                let take = num_bytes.min(8);
                rx_payload[..take].copy_from_slice(&tdo[..take]);

                rx_hdr.fill(0);
                rx_hdr[..HEADER_SIZE].copy_from_slice(&tx[..HEADER_SIZE]);
                Ok(num_bytes)
            }
            _ => Err(DriverError::Script(format!(
                "unexpected command in header 0x{:08x}",
                header.raw()
            ))),
        }
    }
}
