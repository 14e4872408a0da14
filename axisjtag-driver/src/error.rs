use std::io;

use axisjtag_protocol::error_message;
use thiserror::Error;

/// Errors surfaced by transport drivers and the protocol engine.
///
/// The three wire-facing kinds are deliberately distinct: a [`Sys`] or
/// [`Protocol`] error indicates a permanent problem (broken socket, firmware
/// mismatch) that retrying cannot fix, while [`Timeout`] means the retry
/// budget ran out without a matching response and a reconnect may help.
///
/// [`Sys`]: DriverError::Sys
/// [`Protocol`]: DriverError::Protocol
/// [`Timeout`]: DriverError::Timeout
#[derive(Debug, Error)]
pub enum DriverError {
    /// An OS call failed; `call` names the failing primitive.
    #[error("{call}: {source}")]
    Sys {
        call: &'static str,
        #[source]
        source: io::Error,
    },

    /// The target reported a fault, or the exchange was semantically
    /// invalid. The code comes from the fixed wire table.
    #[error("protocol error: {}", error_message(*code))]
    Protocol { code: u32 },

    /// No matching response arrived within the retry budget.
    #[error("no matching response after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    /// The loopback emulator's expectation script disagreed with the
    /// traffic it saw. Only produced by the test transports.
    #[error("loopback script mismatch: {0}")]
    Script(String),

    /// Driver creation was delegated to the registry but no loadable
    /// driver has registered itself.
    #[error("no transport driver registered")]
    NotRegistered,
}

impl DriverError {
    pub fn sys(call: &'static str, source: io::Error) -> DriverError {
        DriverError::Sys { call, source }
    }

    /// Whether the engine may retry the exchange that produced this error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout { .. })
    }
}
