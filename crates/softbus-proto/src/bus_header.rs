//! Record header for the shared-memory virtual bus.
//!
//! Every record in the ring is `[BusMessageHeader: 20 bytes][payload]`.
//! Records may wrap around the end of the region, so the bus copies the
//! header out into a scratch array before decoding it.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Fixed 20-byte record header (little-endian).
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct BusMessageHeader {
    message_id: [u8; 4],
    data_size: [u8; 4],
    timestamp: [u8; 8],
    priority: u8,
    reserved: [u8; 3],
}

impl BusMessageHeader {
    /// Size of the serialized header
    pub const SIZE: usize = 20;

    /// Build a header. Reserved bytes are zeroed.
    pub fn new(message_id: u32, data_size: u32, timestamp: u64, priority: u8) -> Self {
        Self {
            message_id: message_id.to_le_bytes(),
            data_size: data_size.to_le_bytes(),
            timestamp: timestamp.to_le_bytes(),
            priority,
            reserved: [0; 3],
        }
    }

    /// Parse a header from the front of `bytes`.
    ///
    /// Any 20 bytes decode; the declared size is validated by the bus against
    /// its own capacity and unread byte count.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::read_from_prefix(bytes)
            .map(|(header, _)| header)
            .map_err(|_| ProtocolError::HeaderTooShort { expected: Self::SIZE, actual: bytes.len() })
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(self.as_bytes());
        arr
    }

    /// Producer's logical write position when the record was enqueued
    /// (truncated to 32 bits).
    pub fn message_id(&self) -> u32 {
        u32::from_le_bytes(self.message_id)
    }

    /// Payload size in bytes.
    pub fn data_size(&self) -> u32 {
        u32::from_le_bytes(self.data_size)
    }

    /// Enqueue time in milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        u64::from_le_bytes(self.timestamp)
    }

    /// Sender-assigned priority (informational; the ring is FIFO).
    pub fn priority(&self) -> u8 {
        self.priority
    }
}

impl std::fmt::Debug for BusMessageHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusMessageHeader")
            .field("message_id", &self.message_id())
            .field("data_size", &self.data_size())
            .field("timestamp", &self.timestamp())
            .field("priority", &self.priority())
            .finish_non_exhaustive()
    }
}

impl PartialEq for BusMessageHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BusMessageHeader {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size() {
        assert_eq!(std::mem::size_of::<BusMessageHeader>(), BusMessageHeader::SIZE);
    }

    #[test]
    fn layout() {
        let header = BusMessageHeader::new(0x0A0B_0C0D, 26, 99, 2);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &[0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 26);
        assert_eq!(u64::from_le_bytes(bytes[8..16].try_into().unwrap()), 99);
        assert_eq!(bytes[16], 2);
        assert_eq!(&bytes[17..20], &[0, 0, 0]);
    }

    #[test]
    fn decode_from_unaligned_slice() {
        let header = BusMessageHeader::new(1, 2, 3, 4);
        let mut buf = vec![0xEE];
        buf.extend_from_slice(&header.to_bytes());
        assert_eq!(BusMessageHeader::from_bytes(&buf[1..]).unwrap(), header);
    }

    #[test]
    fn reject_short_buffer() {
        let result = BusMessageHeader::from_bytes(&[0u8; 19]);
        assert_eq!(result, Err(ProtocolError::HeaderTooShort { expected: 20, actual: 19 }));
    }
}
