//! Fuzz target for Packet::decode
//!
//! Feeds arbitrary bytes to the packet decoder looking for:
//! - Parser panics
//! - Over-reads past a declared payload length
//! - Stream packets accepted without their extension
//!
//! Every accepted packet must re-encode to exactly the bytes it was decoded
//! from.

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use softbus_proto::{DataKind, DataPacketHeader, Packet};

fuzz_target!(|data: &[u8]| {
    let Ok(packet) = Packet::decode(data) else {
        return;
    };

    assert!(packet.header.data_length() <= DataPacketHeader::MAX_PAYLOAD_SIZE);
    assert_eq!(packet.payload.len(), packet.header.data_length() as usize);
    assert_eq!(packet.extension.is_some(), packet.header.kind() == Some(DataKind::Stream));
    assert!(packet.wire_len() <= data.len());

    let mut encoded = BytesMut::new();
    packet.encode(&mut encoded).expect("decoded packet must re-encode");
    assert_eq!(&encoded[..], &data[..packet.wire_len()]);
});
