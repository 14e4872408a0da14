//! # UDP Transport
//!
//! One request datagram per exchange against the firmware's UDP endpoint.
//! The receive blocks with a timeout; an expired timer surfaces as
//! [`DriverError::Timeout`] so the engine resends the identical request.
//!
//! ## Example Usage
//!
//! ```ignore
//! use axisjtag_driver::{AxisJtagDriver, JtagDriver, backends::udp::UdpTransport};
//!
//! let transport = UdpTransport::connect("192.168.2.10:2543")?;
//! let mut driver = AxisJtagDriver::new(transport, 32768);
//! driver.query()?;
//! ```

use std::io::ErrorKind;
use std::net::{ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::Transport;
use crate::error::DriverError;

/// How long one receive blocks before the engine gets to resend.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_millis(500);

/// Connected UDP client transport.
pub struct UdpTransport {
    sock: UdpSocket,
    scratch: Vec<u8>,
}

impl UdpTransport {
    pub fn connect(target: impl ToSocketAddrs) -> Result<UdpTransport, DriverError> {
        let sock = UdpSocket::bind(("0.0.0.0", 0)).map_err(|e| DriverError::sys("bind", e))?;
        sock.connect(target)
            .map_err(|e| DriverError::sys("connect", e))?;
        sock.set_read_timeout(Some(RECEIVE_TIMEOUT))
            .map_err(|e| DriverError::sys("setsockopt", e))?;
        let peer = sock
            .peer_addr()
            .map_err(|e| DriverError::sys("getpeername", e))?;
        log::debug!("UDP transport connected to {}", peer);
        Ok(UdpTransport {
            sock,
            scratch: Vec::new(),
        })
    }
}

impl Transport for UdpTransport {
    fn xfer(
        &mut self,
        tx: &[u8],
        rx_hdr: &mut [u8],
        rx_payload: &mut [u8],
    ) -> Result<usize, DriverError> {
        self.sock.send(tx).map_err(|e| DriverError::sys("send", e))?;

        let want = rx_hdr.len() + rx_payload.len();
        if self.scratch.len() < want {
            self.scratch.resize(want, 0);
        }
        let received = match self.sock.recv(&mut self.scratch) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(DriverError::Timeout { attempts: 1 });
            }
            Err(e) => return Err(DriverError::sys("recv", e)),
        };

        if received < rx_hdr.len() {
            log::error!("runt datagram: {} bytes", received);
            return Err(DriverError::Protocol {
                code: axisjtag_protocol::ERR_TRUNCATED,
            });
        }
        rx_hdr.copy_from_slice(&self.scratch[..rx_hdr.len()]);
        let payload_len = (received - rx_hdr.len()).min(rx_payload.len());
        rx_payload[..payload_len]
            .copy_from_slice(&self.scratch[rx_hdr.len()..rx_hdr.len() + payload_len]);
        Ok(payload_len)
    }
}
