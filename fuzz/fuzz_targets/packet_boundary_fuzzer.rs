//! Fuzz target for packet header boundary conditions
//!
//! # Strategy
//!
//! - Magic: valid, off-by-one, all-zeros, all-ones, random
//! - Declared length: zero, small, at-max, just-over-max, `u32::MAX`
//! - Kind: each known kind or an arbitrary raw value
//! - Body: shorter than, equal to, or longer than declared
//!
//! # Invariants
//!
//! - Invalid magic MUST return `ProtocolError::InvalidMagic`
//! - Declared length above 16 MiB MUST return `ProtocolError::PayloadTooLarge`
//! - A short body MUST return `PacketTruncated` (or `HeaderTooShort` for a
//!   missing stream extension), never panic
//! - Trailing bytes after the declared payload are left unread

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use softbus_proto::{DataKind, DataPacketHeader, Packet, ProtocolError, StreamExtension};

#[derive(Debug, Clone, Arbitrary)]
enum Magic {
    Valid,
    OffByOne(bool),
    AllZeros,
    AllOnes,
    Random(u32),
}

#[derive(Debug, Clone, Arbitrary)]
enum Length {
    Zero,
    Small(u8),
    AtMax,
    JustOverMax,
    Max,
}

#[derive(Debug, Clone, Arbitrary)]
enum Kind {
    Message,
    Bytes,
    Stream,
    Raw(u32),
}

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryPacket {
    magic: Magic,
    length: Length,
    kind: Kind,
    sequence: u32,
    timestamp: u64,
    checksum: u32,
    body: Vec<u8>,
}

impl BoundaryPacket {
    fn magic(&self) -> u32 {
        match self.magic {
            Magic::Valid => DataPacketHeader::MAGIC,
            Magic::OffByOne(up) if up => DataPacketHeader::MAGIC.wrapping_add(1),
            Magic::OffByOne(_) => DataPacketHeader::MAGIC.wrapping_sub(1),
            Magic::AllZeros => 0,
            Magic::AllOnes => u32::MAX,
            Magic::Random(v) => v,
        }
    }

    fn length(&self) -> u32 {
        match self.length {
            Length::Zero => 0,
            Length::Small(n) => u32::from(n),
            Length::AtMax => DataPacketHeader::MAX_PAYLOAD_SIZE,
            Length::JustOverMax => DataPacketHeader::MAX_PAYLOAD_SIZE + 1,
            Length::Max => u32::MAX,
        }
    }

    fn kind(&self) -> u32 {
        match self.kind {
            Kind::Message => DataKind::Message.to_u32(),
            Kind::Bytes => DataKind::Bytes.to_u32(),
            Kind::Stream => DataKind::Stream.to_u32(),
            Kind::Raw(v) => v,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DataPacketHeader::SIZE + self.body.len());
        out.extend_from_slice(&self.magic().to_le_bytes());
        out.extend_from_slice(&self.length().to_le_bytes());
        out.extend_from_slice(&self.kind().to_le_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.checksum.to_le_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}

fuzz_target!(|input: BoundaryPacket| {
    let bytes = input.to_bytes();
    let result = Packet::decode(&bytes);

    if input.magic() != DataPacketHeader::MAGIC {
        assert_eq!(result, Err(ProtocolError::InvalidMagic(input.magic())));
        return;
    }
    if input.length() > DataPacketHeader::MAX_PAYLOAD_SIZE {
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
        return;
    }

    let is_stream = input.kind() == DataKind::Stream.to_u32();
    let ext = if is_stream { StreamExtension::SIZE } else { 0 };
    if is_stream && input.body.len() < ext {
        assert!(matches!(result, Err(ProtocolError::HeaderTooShort { .. })));
        return;
    }

    let declared = input.length() as usize;
    if input.body.len() - ext < declared {
        assert!(matches!(result, Err(ProtocolError::PacketTruncated { .. })));
        return;
    }

    let packet = result.expect("well-formed packet must decode");
    assert_eq!(packet.payload.len(), declared);
    assert_eq!(packet.header.sequence(), input.sequence);
    assert_eq!(packet.header.checksum(), input.checksum);
    assert_eq!(packet.wire_len(), DataPacketHeader::SIZE + ext + declared);
});
