//! Decoding errors for the wire formats.

use thiserror::Error;

/// Result alias for wire-format operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Structural problems found while decoding a header or packet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer is shorter than the fixed header
    #[error("header too short: expected {expected} bytes, got {actual}")]
    HeaderTooShort {
        /// Required header size
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Magic number did not match [`crate::DataPacketHeader::MAGIC`]
    #[error("invalid magic: {0:#010x}")]
    InvalidMagic(u32),

    /// Declared payload length exceeds the allowed maximum
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Declared size
        size: usize,
        /// Maximum accepted size
        max: usize,
    },

    /// Fewer payload bytes available than the header declares
    #[error("packet truncated: expected {expected} payload bytes, got {actual}")]
    PacketTruncated {
        /// Declared payload size
        expected: usize,
        /// Payload bytes available
        actual: usize,
    },
}
