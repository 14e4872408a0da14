//! XVC 1.0 connection handler.
//!
//! Parses the client-visible Xilinx Virtual Cable commands and turns them
//! into capability calls on the transport driver:
//!
//! - **GetInfo**: `getinfo:` → `xvcServer_v1.0:<max_vector_len>\n`
//! - **SetTck**: `settck:<period ns: u32 LE>` → `<actual period: u32 LE>`
//! - **Shift**: `shift:<num_bits: u32 LE><TMS vector><TDI vector>` →
//!   `<TDO vector>`, all vectors ⌈num_bits / 8⌉ bytes.

use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;

use axisjtag_driver::JtagDriver;
use axisjtag_server::{ConnectionHandler, ServeError};

const XVC_VERSION: &str = "1.0";

#[derive(Debug)]
enum XvcCommand {
    GetInfo,
    SetTck(u32),
    Shift {
        num_bits: u32,
        tms: Vec<u8>,
        tdi: Vec<u8>,
    },
}

/// Serves XVC 1.0 clients on top of a [`JtagDriver`].
pub struct XvcHandler {
    /// Largest vector advertised to (and accepted from) a client, already
    /// clamped to the driver's negotiated limit.
    max_vector_size: usize,
}

impl XvcHandler {
    pub fn new(max_vector_size: usize) -> XvcHandler {
        XvcHandler { max_vector_size }
    }

    fn read_command(&self, reader: &mut impl Read) -> io::Result<XvcCommand> {
        let mut buf = [0u8; 16];
        reader.read_exact(&mut buf[..2])?;
        match &buf[..2] {
            b"ge" => {
                reader.read_exact(&mut buf[2..8])?;
                if &buf[..8] != b"getinfo:" {
                    return Err(invalid_command(&buf[..8]));
                }
                Ok(XvcCommand::GetInfo)
            }
            b"se" => {
                reader.read_exact(&mut buf[2..11])?;
                if &buf[..7] != b"settck:" {
                    return Err(invalid_command(&buf[..7]));
                }
                let period_ns = u32::from_le_bytes(buf[7..11].try_into().unwrap());
                Ok(XvcCommand::SetTck(period_ns))
            }
            b"sh" => {
                reader.read_exact(&mut buf[2..10])?;
                if &buf[..6] != b"shift:" {
                    return Err(invalid_command(&buf[..6]));
                }
                let num_bits = u32::from_le_bytes(buf[6..10].try_into().unwrap());
                let num_bytes = num_bits.div_ceil(8) as usize;
                if num_bytes > self.max_vector_size {
                    return Err(io::Error::new(
                        ErrorKind::InvalidData,
                        format!(
                            "shift of {} bytes exceeds the advertised maximum of {}",
                            num_bytes, self.max_vector_size
                        ),
                    ));
                }
                let mut tms = vec![0u8; num_bytes];
                reader.read_exact(&mut tms)?;
                let mut tdi = vec![0u8; num_bytes];
                reader.read_exact(&mut tdi)?;
                Ok(XvcCommand::Shift { num_bits, tms, tdi })
            }
            prefix => Err(invalid_command(prefix)),
        }
    }

    /// Forwards a shift to the driver, splitting on whole-byte boundaries
    /// when the client vector exceeds the driver's per-call limit.
    fn shift_chunked(
        &self,
        driver: &mut dyn JtagDriver,
        num_bits: usize,
        tms: &[u8],
        tdi: &[u8],
        tdo: &mut [u8],
    ) -> Result<(), ServeError> {
        let chunk_limit_bits = self.max_vector_size * 8;
        let mut remaining = num_bits;
        let mut offset = 0; // bytes
        while remaining > 0 {
            let chunk_bits = remaining.min(chunk_limit_bits);
            let chunk_bytes = chunk_bits.div_ceil(8);
            driver.send_vectors(
                chunk_bits,
                &tms[offset..offset + chunk_bytes],
                &tdi[offset..offset + chunk_bytes],
                &mut tdo[offset..offset + chunk_bytes],
            )?;
            remaining -= chunk_bits;
            offset += chunk_bytes;
        }
        Ok(())
    }
}

fn invalid_command(bytes: &[u8]) -> io::Error {
    io::Error::new(
        ErrorKind::InvalidData,
        format!("invalid command {:?}", String::from_utf8_lossy(bytes)),
    )
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset
    )
}

impl ConnectionHandler for XvcHandler {
    fn serve(
        &mut self,
        mut tcp: TcpStream,
        driver: &mut dyn JtagDriver,
    ) -> Result<(), ServeError> {
        loop {
            let command = match self.read_command(&mut tcp) {
                Ok(command) => command,
                Err(e) if is_disconnect(e.kind()) => {
                    log::debug!("client disconnected");
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                    log::error!("client read timeout, closing connection");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            match command {
                XvcCommand::GetInfo => {
                    log::debug!("getinfo: advertising {} bytes", self.max_vector_size);
                    writeln!(tcp, "xvcServer_v{}:{}", XVC_VERSION, self.max_vector_size)?;
                }
                XvcCommand::SetTck(period_ns) => {
                    let actual = driver.set_period_ns(period_ns);
                    log::debug!("settck: requested {} ns, answering {} ns", period_ns, actual);
                    tcp.write_all(&actual.to_le_bytes())?;
                }
                XvcCommand::Shift { num_bits, tms, tdi } => {
                    log::debug!("shift: num_bits={}", num_bits);
                    let num_bytes = num_bits.div_ceil(8) as usize;
                    let mut tdo = vec![0u8; num_bytes];
                    self.shift_chunked(driver, num_bits as usize, &tms, &tdi, &mut tdo)?;
                    tcp.write_all(&tdo)?;
                }
            }
        }
    }
}
