//! # UDP-Wrapped Loopback Emulator
//!
//! Serves the file-driven emulator behind a real UDP socket so that the
//! engine under test and the emulator under test talk over an actual
//! datagram pair within one process. Run it on a worker thread:
//!
//! ```ignore
//! use axisjtag_driver::backends::udp_loopback::UdpLoopbackServer;
//!
//! let server = UdpLoopbackServer::bind("fixtures/shift.script", false)?;
//! let addr = server.local_addr()?;
//! std::thread::spawn(move || server.run());
//! // connect a UdpTransport to `addr`
//! ```
//!
//! Unlike the raw file emulator, the wrapped one advertises backing memory,
//! keeping the engine's retries enabled, which is the point of the self
//! test. To
//! stop a retried SHIFT from desynchronizing the script reader, a datagram
//! whose transaction id equals the last served one is answered from the
//! cached reply bytes without re-running the emulator. The comparison looks
//! at the id alone, so after the 255-entry id wraparound a genuinely new
//! request can alias with a stale cache entry; callers are expected to stay
//! well below that per script run.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::path::Path;

use axisjtag_protocol::{Command, HEADER_SIZE, Header};

use crate::Transport;
use crate::backends::loopback::LoopbackTransport;
use crate::error::DriverError;

/// Backing memory (in words) the wrapped emulator advertises. Any nonzero
/// depth keeps the engine's retry budget alive.
pub const EMULATED_MEM_DEPTH: u32 = 512;

/// UDP front end around [`LoopbackTransport`].
pub struct UdpLoopbackServer {
    sock: UdpSocket,
    emulator: LoopbackTransport,
    last_xid: u8,
    cached_reply: Vec<u8>,
    /// Test mode: drop every 256th outbound datagram to exercise the
    /// engine's retry path.
    drop_outbound: bool,
    sent: u32,
}

impl UdpLoopbackServer {
    pub fn bind(
        script: impl AsRef<Path>,
        drop_outbound: bool,
    ) -> Result<UdpLoopbackServer, DriverError> {
        let sock = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
            .map_err(|e| DriverError::sys("bind", e))?;
        let emulator = LoopbackTransport::open(script, false)?;
        Ok(UdpLoopbackServer {
            sock,
            emulator,
            last_xid: 0,
            cached_reply: Vec::new(),
            drop_outbound,
            sent: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DriverError> {
        self.sock.local_addr().map_err(|e| DriverError::sys("getsockname", e))
    }

    /// Serves datagrams until the socket fails or the script disagrees with
    /// the traffic. Never returns on success.
    pub fn run(mut self) -> Result<(), DriverError> {
        let mut rx = vec![0u8; 65536];
        let mut hdr = [0u8; 4];
        let mut payload = vec![0u8; 65536];

        loop {
            let (received, peer) = self
                .sock
                .recv_from(&mut rx)
                .map_err(|e| DriverError::sys("recv", e))?;
            if received < HEADER_SIZE {
                log::warn!("runt datagram ({} bytes), ignoring", received);
                continue;
            }
            let header = Header::from_bytes(&rx[..HEADER_SIZE]);

            let is_retry = header.command() == Some(Command::Shift)
                && header.xid() == self.last_xid
                && !self.cached_reply.is_empty();
            if is_retry {
                log::debug!("replaying cached reply for xid {}", header.xid());
            } else {
                let payload_len = self.emulator.xfer(&rx[..received], &mut hdr, &mut payload)?;
                if header.command() == Some(Command::Query) {
                    // the file emulator reports depth 0; patch in backing
                    // memory so the client keeps retrying
                    let mut raw = u32::from_le_bytes(hdr);
                    raw |= EMULATED_MEM_DEPTH << 4;
                    hdr = raw.to_le_bytes();
                }
                self.cached_reply.clear();
                self.cached_reply.extend_from_slice(&hdr);
                self.cached_reply.extend_from_slice(&payload[..payload_len]);
                self.last_xid = header.xid();
            }

            if self.drop_outbound {
                self.sent = self.sent.wrapping_add(1);
                if self.sent & 0xFF == 0 {
                    log::debug!("test mode: dropping reply for xid {}", header.xid());
                    continue;
                }
            }
            self.sock
                .send_to(&self.cached_reply, peer)
                .map_err(|e| DriverError::sys("send", e))?;
        }
    }
}
