//! Wire formats for the simulated SoftBus transport.
//!
//! Two independent formats live here:
//!
//! - The socket framing used by the channel transport: a fixed 28-byte
//!   [`DataPacketHeader`] followed by the payload. Stream frames insert a
//!   28-byte [`StreamExtension`] between the header and the payload.
//! - The record header used inside the shared-memory virtual bus:
//!   [`BusMessageHeader`], 20 bytes, followed by the payload.
//!
//! All integers are little-endian and fixed width. Headers are parsed with
//! `zerocopy` from unaligned byte arrays, so arbitrary bytes can be decoded
//! without alignment or layout hazards.
#![forbid(unsafe_code)]

pub mod buffer;
pub mod bus_header;
pub mod channel;
pub mod errors;
pub mod packet;

pub use buffer::DataBuffer;
pub use bus_header::BusMessageHeader;
pub use channel::ChannelType;
pub use errors::{ProtocolError, Result};
pub use packet::{DataKind, DataPacketHeader, Packet, StreamExtension, checksum, unix_millis};
