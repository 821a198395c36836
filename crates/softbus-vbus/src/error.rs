//! Virtual bus errors.

use std::io;

use thiserror::Error;

/// Errors returned by [`crate::VirtualBus`].
#[derive(Error, Debug)]
pub enum BusError {
    /// Operation on a handle that is not initialized (or was destroyed)
    #[error("virtual bus not initialized")]
    NotInitialized,

    /// Configuration cannot describe a usable ring
    #[error("invalid bus config: {0}")]
    InvalidConfig(&'static str),

    /// Channel already open in this context with a different geometry
    #[error("bus {name} already open with a different configuration")]
    ConfigMismatch {
        /// Channel name
        name: String,
    },

    /// Zero-length payload
    #[error("empty payload")]
    EmptyPayload,

    /// Payload plus header can never fit the ring
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Payload size
        size: usize,
        /// Largest payload the ring can hold
        max: usize,
    },

    /// No write slot became available in time
    #[error("timed out waiting for a write slot")]
    Timeout,

    /// Not enough free bytes right now
    #[error("insufficient space: needed {needed} bytes, {available} free")]
    InsufficientSpace {
        /// Header plus payload
        needed: usize,
        /// Free bytes in the ring
        available: usize,
    },

    /// Channel was torn down while waiting
    #[error("virtual bus closed")]
    Closed,

    /// Region could not be created or mapped
    #[error("shared region: {0}")]
    Region(#[from] io::Error),
}

impl BusError {
    /// Returns true if retrying the same send may succeed once the consumer
    /// catches up.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::InsufficientSpace { .. })
    }
}
