//! # AXIS-to-JTAG Wire Codec
//!
//! This crate implements the compact binary header format spoken between the
//! JTAG network bridge and the FPGA firmware's JTAG shift engine.
//!
//! ## Overview
//!
//! Every exchange with the target consists of a single request followed by a
//! single response. Both start with a fixed 32-bit header that is zero-padded
//! to the target's native word size (discovered at run time, minimum 4 bytes).
//!
//! ## Header Format
//!
//! ```text
//!  31 30 29 28 27       20 19                    0
//! +-----+-----+-----------+-----------------------+
//! | ver | cmd |    xid    |  length-1 / err code  |
//! +-----+-----+-----------+-----------------------+
//! ```
//!
//! - **ver**: protocol version, always 0.
//! - **cmd**: `00` = QUERY (capability discovery), `01` = SHIFT (bit-vector
//!   transfer), `10` = ERROR (target-reported fault).
//! - **xid**: one-byte transaction id tagging a request so that stale or
//!   duplicated responses can be filtered out. The id 0 is reserved as
//!   "don't care" and is only ever used by QUERY.
//! - **length-1 / err code**: for SHIFT, the number of bits transferred minus
//!   one (so the full 20-bit range encodes lengths ≥ 1); for ERROR, a code
//!   from a fixed table (see [`error_message`]).
//!
//! A QUERY response reuses the header fields to report capabilities: bits
//! [3:0] hold the word size minus one, bits [19:4] the target memory depth in
//! words, and bits [27:20] a logarithmically quantized clock-period code
//! (see [`QueryReply`]).
//!
//! ## Basic Usage
//!
//! ```
//! use axisjtag_protocol::{Header, Command, XidGen};
//!
//! let mut xids = XidGen::new();
//! let header = Header::shift(12, xids.next_id());
//! assert_eq!(header.command(), Some(Command::Shift));
//! assert_eq!(header.len_bits(), 12);
//!
//! let mut wire = [0u8; 4];
//! header.write_to(&mut wire);
//! assert_eq!(Header::from_bytes(&wire), header);
//! ```
//!
//! ## Error Handling
//!
//! Decoding never fails: every 32-bit value is a structurally valid header
//! and semantic validation (version, command) is the caller's business.
//! Extracting a field that the command does not carry (the length of a
//! non-SHIFT header, the error code of a non-ERROR header) is a programming
//! error and panics.

pub mod header;
pub use header::*;
