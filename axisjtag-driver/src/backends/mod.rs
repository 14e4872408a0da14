//! Concrete transport backends for the protocol engine.
//!
//! - [`udp`]: datagram client for real firmware targets.
//! - [`loopback`]: file-driven emulator for deterministic regression tests.
//! - [`udp_loopback`]: the same emulator behind a real UDP socket pair, used
//!   for in-process self test of the retry machinery.

pub mod loopback;
pub mod udp;
pub mod udp_loopback;
