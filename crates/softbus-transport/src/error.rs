//! Transport errors.

use std::{io, net::SocketAddr};

use softbus_proto::ProtocolError;
use thiserror::Error;

use crate::session::{SocketId, SocketState};

/// Errors returned by [`crate::SoftbusTransport`].
///
/// Configuration errors (bad parameters, ceilings, wrong state) are never
/// transient. I/O failures are: the caller may retry the whole operation.
#[derive(Error, Debug)]
pub enum TransportError {
    /// A required parameter is empty or out of range
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// Socket ceiling reached
    #[error("maximum socket limit reached: {max}")]
    SocketLimit {
        /// Configured ceiling
        max: usize,
    },

    /// No live session has this id
    #[error("invalid socket id: {0}")]
    UnknownSocket(SocketId),

    /// Operation not valid in the session's current state
    #[error("socket {socket} is {state:?}, expected {expected}")]
    InvalidState {
        /// Session
        socket: SocketId,
        /// State it is in
        state: SocketState,
        /// States the operation accepts
        expected: &'static str,
    },

    /// A session with this name is already listening
    #[error("session {0} is already listening")]
    AlreadyListening(String),

    /// Every port in the scan window is reserved or taken
    #[error("no available port in {base}..{base}+{window}")]
    NoFreePort {
        /// First port of the window
        base: u16,
        /// Window length
        window: u16,
    },

    /// Nobody listens under the peer name
    #[error("no server listening as {0}")]
    NoServer(String),

    /// TCP connect failed
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Server address
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Payload exceeds the send ceiling
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Payload size
        size: usize,
        /// Ceiling
        max: usize,
    },

    /// Frame could not be written completely
    #[error("send failed: {0}")]
    SendFailed(#[source] io::Error),

    /// Frame could not be encoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Socket setup failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Returns true for I/O failures a caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::SendFailed(_) | Self::Io(_) | Self::NoFreePort { .. })
    }
}
