//! Fuzz target for BusMessageHeader::from_bytes
//!
//! Any 20 bytes are a structurally valid header; size validation belongs to
//! the bus. The decoder must never panic and must round-trip.

#![no_main]

use libfuzzer_sys::fuzz_target;
use softbus_proto::BusMessageHeader;

fuzz_target!(|data: &[u8]| {
    match BusMessageHeader::from_bytes(data) {
        Ok(header) => {
            assert!(data.len() >= BusMessageHeader::SIZE);
            assert_eq!(&header.to_bytes()[..], &data[..BusMessageHeader::SIZE]);
        },
        Err(_) => assert!(data.len() < BusMessageHeader::SIZE),
    }
});
