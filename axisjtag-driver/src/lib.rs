//! # AXIS-to-JTAG Transport Drivers
//!
//! This crate talks the AXIS-to-JTAG transaction protocol to FPGA firmware
//! on behalf of an XVC-facing front end.
//!
//! ## Architecture
//!
//! The crate is built around three layers:
//!
//! - **[`JtagDriver`] Trait**: the capability interface consumed by the
//!   connection front end: capability query, clock-period negotiation and
//!   bit-vector shifting, independent of how bytes reach the target.
//! - **[`engine::AxisJtagDriver`]**: the protocol engine implementing
//!   [`JtagDriver`] on top of any [`engine::Transport`]. It encodes headers,
//!   chunks TMS/TDI vectors into target words, and runs the idempotent
//!   retry-with-transaction-id exchange.
//! - **[`backends`]**: concrete transports: a UDP client for real hardware,
//!   a file-driven loopback emulator for deterministic regression tests, and
//!   a UDP-wrapped loopback used for in-process self test.
//!
//! Additional transports can be compiled as loadable modules and announced
//! through the [`registry::DriverRegistry`] without this crate knowing about
//! them at compile time.
//!
//! ## How It Works
//!
//! 1. A transport implementing [`engine::Transport`] is wrapped in an
//!    [`engine::AxisJtagDriver`].
//! 2. [`JtagDriver::query`] discovers the target word size, memory depth and
//!    clock period, and sizes the exchange buffers accordingly.
//! 3. [`JtagDriver::send_vectors`] transfers TMS/TDI bit vectors and returns
//!    the captured TDO bits; lost or duplicated datagrams are absorbed by
//!    the transaction-id retry scheme.
//!
//! ## Logging
//!
//! This crate uses the `log` crate for diagnostics: connection-level events
//! at info, per-exchange headers at debug, payload hex dumps at trace.

pub mod backends;
pub mod engine;
pub mod error;
pub mod registry;

pub use engine::{AxisJtagDriver, DEFAULT_RETRY_LIMIT, Transport};
pub use error::DriverError;
pub use registry::{DriverConfig, DriverFactory, DriverRegistry, UsageFn};

/// Capability snapshot of the remote target, populated by
/// [`JtagDriver::query`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Capabilities {
    /// Bytes per protocol word. Starts at the header size (4) and is
    /// replaced by the value the target reports.
    pub word_size: usize,
    /// Words of buffering behind the target's shift engine. 0 means the
    /// target has no backing memory and the transport must be reliable,
    /// so the engine never resends.
    pub mem_depth: u32,
    /// Fixed target clock period in nanoseconds, if the target reports one.
    pub period_ns: Option<u32>,
}

impl Default for Capabilities {
    fn default() -> Capabilities {
        Capabilities {
            word_size: axisjtag_protocol::HEADER_SIZE,
            mem_depth: 0,
            period_ns: None,
        }
    }
}

/// Trait that transport drivers must implement to provide JTAG vector
/// transfer towards the target.
///
/// This is the contract between the XVC-facing front end and whatever
/// carries the bits: the front end never sees headers, transaction ids or
/// datagrams, only bit vectors and capability numbers.
pub trait JtagDriver {
    /// Performs one capability QUERY exchange and refreshes the capability
    /// snapshot.
    ///
    /// # Returns
    ///
    /// The effective per-call vector limit in bytes: the minimum of the
    /// driver-declared maximum and the target's buffering
    /// (`mem_depth * word_size`) when the target has backing memory.
    fn query(&mut self) -> Result<usize, DriverError>;

    /// The driver-declared per-call maximum vector size in bytes,
    /// independent of what the target reports.
    fn max_vector_size(&self) -> usize;

    /// Negotiates the JTAG clock period.
    ///
    /// If the target runs at a fixed, known period that period wins;
    /// otherwise the requested period is recorded for reporting and
    /// returned unchanged. Nothing is enforced at this layer.
    fn set_period_ns(&mut self, requested_ns: u32) -> u32;

    /// Shifts `num_bits` of TMS and TDI towards the target and writes the
    /// captured TDO bits into `tdo`.
    ///
    /// Bit order is little-endian: bit 0 of byte 0 is the first bit on the
    /// wire. All three buffers must hold at least `num_bits.div_ceil(8)`
    /// bytes; violating that, or exceeding the negotiated vector limit, is
    /// a programming error and panics.
    fn send_vectors(
        &mut self,
        num_bits: usize,
        tms: &[u8],
        tdi: &[u8],
        tdo: &mut [u8],
    ) -> Result<(), DriverError>;

    /// Logs the current capability snapshot. Side effects only.
    fn dump_info(&self);
}
