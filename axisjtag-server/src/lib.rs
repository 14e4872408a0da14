//! # Connection Server
//!
//! TCP front end for the JTAG bridge: a blocking accept loop that serves at
//! most one client connection at a time.
//!
//! ## Architecture
//!
//! The server itself knows nothing about the client-visible wire protocol.
//! It owns the [`JtagDriver`] and hands each accepted connection, together
//! with the driver, to a [`ConnectionHandler`]: the component that parses
//! client commands (in this repository, the XVC 1.0 handler in the bridge
//! binary) and turns them into capability calls.
//!
//! ## Behavior
//!
//! - Connections are served strictly sequentially; a second client has to
//!   wait until the first one's socket closes.
//! - An error surfacing from a connection ends that connection, is logged,
//!   and the server goes back to accepting; it never ends the process.
//!   Bind and listen failures at startup are the exception and propagate.
//! - In run-once mode ([`server::Builder::run_once`]) the server returns
//!   after the first connection closes, successful or not.

pub mod server;

use std::net::TcpStream;

use axisjtag_driver::{DriverError, JtagDriver};
use thiserror::Error;

/// Errors a connection handler may surface for one connection.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Trait implemented by the client-protocol component.
///
/// The handler owns the connection for its entire lifetime: it returns only
/// when the client disconnects or the connection is beyond saving.
pub trait ConnectionHandler {
    fn serve(&mut self, stream: TcpStream, driver: &mut dyn JtagDriver)
    -> Result<(), ServeError>;
}
