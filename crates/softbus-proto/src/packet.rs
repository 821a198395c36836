//! Socket framing for the channel transport.
//!
//! Layout on the wire:
//!
//! ```text
//! DataPacketHeader (28 bytes)
//!   magic:u32 | data_length:u32 | data_type:u32 | sequence:u32 | timestamp:u64 | checksum:u32
//! StreamExtension (28 bytes, only when data_type == Stream)
//!   frame_type:i32 | time_stamp:i64 | seq_num:i32 | seq_sub_num:i32 | level:i32 | bit_map:i32
//! payload (data_length bytes)
//! ```
//!
//! All fields are little-endian. A checksum of zero means the sender did not
//! compute one.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Payload category carried in the `data_type` header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataKind {
    /// Control-plane message (`OnMessage`)
    Message = 0,
    /// Opaque byte payload (`OnBytes`)
    Bytes = 1,
    /// Media frame with a stream extension (`OnStream`)
    Stream = 2,
}

impl DataKind {
    /// Map a raw header value to a kind. `None` if unrecognized.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Message),
            1 => Some(Self::Bytes),
            2 => Some(Self::Stream),
            _ => None,
        }
    }

    /// Raw header value.
    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

/// Sum of all payload bytes, wrapping at 32 bits.
pub fn checksum(payload: &[u8]) -> u32 {
    payload.iter().fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)))
}

/// Wall-clock milliseconds since the Unix epoch (0 if the clock is before it).
pub fn unix_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as u64)
}

/// Fixed 28-byte packet header (little-endian).
///
/// Fields are stored as raw byte arrays so the struct has alignment 1 and
/// every 28-byte pattern is a valid value.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DataPacketHeader {
    magic: [u8; 4],
    data_length: [u8; 4],
    data_type: [u8; 4],
    sequence: [u8; 4],
    timestamp: [u8; 8],
    checksum: [u8; 4],
}

impl DataPacketHeader {
    /// Size of the serialized header
    pub const SIZE: usize = 28;

    /// Magic number: "STBS" read as a little-endian u32
    pub const MAGIC: u32 = 0x5342_5453;

    /// Hard ceiling on declared payload length (16 MB)
    ///
    /// Transports apply their own, usually smaller, limit on top of this.
    pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

    /// Header for a payload of `data_length` bytes, stamped with the current
    /// time. Sequence and checksum start at zero.
    pub fn new(kind: DataKind, data_length: u32) -> Self {
        Self {
            magic: Self::MAGIC.to_le_bytes(),
            data_length: data_length.to_le_bytes(),
            data_type: kind.to_u32().to_le_bytes(),
            sequence: [0; 4],
            timestamp: unix_millis().to_le_bytes(),
            checksum: [0; 4],
        }
    }

    /// Parse a header from the front of `bytes`.
    ///
    /// Validation order is size, magic, then declared length. The data kind
    /// is NOT validated here: an unknown kind is a per-packet problem the
    /// receiver handles after reading the payload, not a framing error.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::HeaderTooShort` if fewer than 28 bytes are available
    /// - `ProtocolError::InvalidMagic` if the magic number does not match
    /// - `ProtocolError::PayloadTooLarge` if the declared length exceeds
    ///   [`Self::MAX_PAYLOAD_SIZE`]
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::HeaderTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if header.magic() != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic(header.magic()));
        }

        let data_length = header.data_length();
        if data_length > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: data_length as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(self.as_bytes());
        arr
    }

    /// Magic number as stored.
    pub fn magic(&self) -> u32 {
        u32::from_le_bytes(self.magic)
    }

    /// Declared payload length in bytes.
    pub fn data_length(&self) -> u32 {
        u32::from_le_bytes(self.data_length)
    }

    /// Raw `data_type` field.
    pub fn data_type(&self) -> u32 {
        u32::from_le_bytes(self.data_type)
    }

    /// Data kind. `None` if the sender used an unknown value.
    pub fn kind(&self) -> Option<DataKind> {
        DataKind::from_u32(self.data_type())
    }

    /// Per-session sequence number.
    pub fn sequence(&self) -> u32 {
        u32::from_le_bytes(self.sequence)
    }

    /// Send time in milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        u64::from_le_bytes(self.timestamp)
    }

    /// Payload checksum, or zero if not computed.
    pub fn checksum(&self) -> u32 {
        u32::from_le_bytes(self.checksum)
    }

    /// True if no checksum was sent or it matches `payload`.
    pub fn verify_checksum(&self, payload: &[u8]) -> bool {
        let expected = self.checksum();
        expected == 0 || checksum(payload) == expected
    }

    /// Set the declared payload length.
    pub fn set_data_length(&mut self, len: u32) {
        self.data_length = len.to_le_bytes();
    }

    /// Set the raw `data_type` field.
    pub fn set_data_type(&mut self, data_type: u32) {
        self.data_type = data_type.to_le_bytes();
    }

    /// Set the sequence number.
    pub fn set_sequence(&mut self, sequence: u32) {
        self.sequence = sequence.to_le_bytes();
    }

    /// Set the timestamp.
    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.timestamp = timestamp.to_le_bytes();
    }

    /// Set the checksum.
    pub fn set_checksum(&mut self, checksum: u32) {
        self.checksum = checksum.to_le_bytes();
    }
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for DataPacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPacketHeader")
            .field("magic", &format!("{:#010x}", self.magic()))
            .field("data_length", &self.data_length())
            .field("data_type", &self.data_type())
            .field("sequence", &self.sequence())
            .field("timestamp", &self.timestamp())
            .field("checksum", &format!("{:#010x}", self.checksum()))
            .finish()
    }
}

impl PartialEq for DataPacketHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for DataPacketHeader {}

/// Per-frame media metadata that follows the header of a stream packet.
#[repr(C, packed)]
#[derive(Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct StreamExtension {
    frame_type: [u8; 4],
    time_stamp: [u8; 8],
    seq_num: [u8; 4],
    seq_sub_num: [u8; 4],
    level: [u8; 4],
    bit_map: [u8; 4],
}

impl StreamExtension {
    /// Size of the serialized extension
    pub const SIZE: usize = 28;

    /// Build an extension from frame metadata.
    pub fn new(
        frame_type: i32,
        time_stamp: i64,
        seq_num: i32,
        seq_sub_num: i32,
        level: i32,
        bit_map: i32,
    ) -> Self {
        Self {
            frame_type: frame_type.to_le_bytes(),
            time_stamp: time_stamp.to_le_bytes(),
            seq_num: seq_num.to_le_bytes(),
            seq_sub_num: seq_sub_num.to_le_bytes(),
            level: level.to_le_bytes(),
            bit_map: bit_map.to_le_bytes(),
        }
    }

    /// Parse an extension from the front of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(bytes)
            .map(|(ext, _)| ext)
            .map_err(|_| ProtocolError::HeaderTooShort { expected: Self::SIZE, actual: bytes.len() })
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(self.as_bytes());
        arr
    }

    /// Frame type (I-frame, P-frame, ...), codec defined.
    pub fn frame_type(&self) -> i32 {
        i32::from_le_bytes(self.frame_type)
    }

    /// Per-frame presentation timestamp.
    pub fn time_stamp(&self) -> i64 {
        i64::from_le_bytes(self.time_stamp)
    }

    /// Frame sequence number.
    pub fn seq_num(&self) -> i32 {
        i32::from_le_bytes(self.seq_num)
    }

    /// Slice index within the frame.
    pub fn seq_sub_num(&self) -> i32 {
        i32::from_le_bytes(self.seq_sub_num)
    }

    /// SVC layer.
    pub fn level(&self) -> i32 {
        i32::from_le_bytes(self.level)
    }

    /// Codec-specific flag bits.
    pub fn bit_map(&self) -> i32 {
        i32::from_le_bytes(self.bit_map)
    }
}

impl std::fmt::Debug for StreamExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamExtension")
            .field("frame_type", &self.frame_type())
            .field("time_stamp", &self.time_stamp())
            .field("seq_num", &self.seq_num())
            .field("seq_sub_num", &self.seq_sub_num())
            .field("level", &self.level())
            .field("bit_map", &self.bit_map())
            .finish()
    }
}

impl PartialEq for StreamExtension {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for StreamExtension {}

/// A complete framed packet: header, optional stream extension, payload.
///
/// # Invariants
///
/// - `payload.len()` matches `header.data_length()`. [`Packet::new`] and
///   [`Packet::stream`] set the length from the payload, and
///   [`Packet::decode`] only ever reads exactly that many bytes.
/// - `extension` is `Some` exactly when the header kind is
///   [`DataKind::Stream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Fixed header
    pub header: DataPacketHeader,
    /// Stream metadata (stream packets only)
    pub extension: Option<StreamExtension>,
    /// Payload bytes
    pub payload: Bytes,
}

impl Packet {
    /// Frame a message or byte payload.
    ///
    /// The checksum is filled in only when `with_checksum` is set.
    pub fn new(kind: DataKind, sequence: u32, payload: impl Into<Bytes>, with_checksum: bool) -> Self {
        let payload = payload.into();
        // Saturate rather than truncate: an over-long payload then fails the
        // size check in `encode` instead of producing a short header.
        let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);

        let mut header = DataPacketHeader::new(kind, len);
        header.set_sequence(sequence);
        if with_checksum {
            header.set_checksum(checksum(&payload));
        }

        let extension = (kind == DataKind::Stream).then(StreamExtension::default);
        Self { header, extension, payload }
    }

    /// Frame a stream payload with its extension.
    pub fn stream(
        sequence: u32,
        payload: impl Into<Bytes>,
        extension: StreamExtension,
        with_checksum: bool,
    ) -> Self {
        let mut packet = Self::new(DataKind::Stream, sequence, payload, with_checksum);
        packet.extension = Some(extension);
        packet
    }

    /// Bytes this packet occupies on the wire.
    pub fn wire_len(&self) -> usize {
        let ext = if self.extension.is_some() { StreamExtension::SIZE } else { 0 };
        DataPacketHeader::SIZE + ext + self.payload.len()
    }

    /// Encode into `dst` as `[header][extension?][payload]`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if the payload exceeds
    ///   [`DataPacketHeader::MAX_PAYLOAD_SIZE`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > DataPacketHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: DataPacketHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        debug_assert_eq!(self.payload.len(), self.header.data_length() as usize);

        dst.put_slice(&self.header.to_bytes());
        if let Some(ext) = &self.extension {
            dst.put_slice(&ext.to_bytes());
        }
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Decode one packet from the front of `bytes`.
    ///
    /// Does not verify the checksum; callers decide whether checking is
    /// enabled via [`DataPacketHeader::verify_checksum`].
    ///
    /// # Errors
    ///
    /// - Any header error from [`DataPacketHeader::from_bytes`]
    /// - `ProtocolError::HeaderTooShort` if a stream packet lacks its extension
    /// - `ProtocolError::PacketTruncated` if fewer payload bytes are available
    ///   than declared
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = *DataPacketHeader::from_bytes(bytes)?;
        let mut offset = DataPacketHeader::SIZE;

        let extension = if header.kind() == Some(DataKind::Stream) {
            let rest = bytes.get(offset..).unwrap_or_default();
            let ext = *StreamExtension::from_bytes(rest).map_err(|_| {
                ProtocolError::HeaderTooShort {
                    expected: DataPacketHeader::SIZE + StreamExtension::SIZE,
                    actual: bytes.len(),
                }
            })?;
            offset += StreamExtension::SIZE;
            Some(ext)
        } else {
            None
        };

        let payload_len = header.data_length() as usize;
        let available = bytes.len().saturating_sub(offset);
        let payload = bytes.get(offset..offset + payload_len).ok_or(
            ProtocolError::PacketTruncated { expected: payload_len, actual: available },
        )?;

        Ok(Self { header, extension, payload: Bytes::copy_from_slice(payload) })
    }
}
