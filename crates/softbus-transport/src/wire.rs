//! Blocking frame reader.
//!
//! Reads exactly one `[header][extension?][payload]` frame from a stream.
//! The declared length is checked against the configured ceiling before any
//! payload buffer is allocated. End of stream on a frame boundary is a
//! clean close; end of stream inside a frame is a truncated frame.

use std::io::{self, Read};

use bytes::{Bytes, BytesMut};
use softbus_proto::{DataKind, DataPacketHeader, Packet, ProtocolError, StreamExtension};
use thiserror::Error;

/// Why a frame could not be read. Every variant ends the session.
#[derive(Error, Debug)]
pub(crate) enum FrameError {
    /// Stream closed between frames, or the read itself failed
    #[error("read failed: {0}")]
    Io(#[from] io::Error),

    /// Stream ended inside a frame
    #[error("frame truncated after {read} of {expected} bytes")]
    Truncated { read: usize, expected: usize },

    /// Header could not be parsed (bad magic, absurd length)
    #[error("bad header: {0}")]
    Header(#[from] ProtocolError),

    /// Declared payload exceeds the receive ceiling
    #[error("declared payload of {declared} bytes exceeds {max}")]
    Oversized { declared: usize, max: usize },
}

impl FrameError {
    /// True if the peer sent bytes that are not a valid frame, as opposed
    /// to the connection going away.
    pub(crate) fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Header(_) | Self::Oversized { .. } | Self::Truncated { .. })
    }
}

/// Fill `buf`. `consumed` is how much of the frame was read before; an
/// early end of stream is a clean close only if nothing of the frame was.
fn fill(reader: &mut impl Read, buf: &mut [u8], consumed: usize, expected: usize) -> Result<(), FrameError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if consumed + filled == 0 => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            Ok(0) => return Err(FrameError::Truncated { read: consumed + filled, expected }),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Read one frame. The checksum is not verified here.
pub(crate) fn read_packet(reader: &mut impl Read, max_payload: usize) -> Result<Packet, FrameError> {
    let mut raw = [0u8; DataPacketHeader::SIZE];
    fill(reader, &mut raw, 0, DataPacketHeader::SIZE)?;
    let header = *DataPacketHeader::from_bytes(&raw)?;

    let declared = header.data_length() as usize;
    if declared > max_payload {
        return Err(FrameError::Oversized { declared, max: max_payload });
    }

    let ext_len = if header.kind() == Some(DataKind::Stream) { StreamExtension::SIZE } else { 0 };
    let expected = DataPacketHeader::SIZE + ext_len + declared;

    let extension = if ext_len > 0 {
        let mut raw = [0u8; StreamExtension::SIZE];
        fill(reader, &mut raw, DataPacketHeader::SIZE, expected)?;
        Some(*StreamExtension::from_bytes(&raw)?)
    } else {
        None
    };

    let mut payload = BytesMut::zeroed(declared);
    fill(reader, &mut payload, DataPacketHeader::SIZE + ext_len, expected)?;

    Ok(Packet { header, extension, payload: Bytes::from(payload) })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn encoded(packet: &Packet) -> Vec<u8> {
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn reads_back_to_back_frames() {
        let first = Packet::new(DataKind::Bytes, 0, &b"first"[..], true);
        let ext = StreamExtension::new(1, 99, 3, 0, 0, 0);
        let second = Packet::stream(1, &b"frame"[..], ext, true);

        let mut wire = encoded(&first);
        wire.extend(encoded(&second));
        let mut cursor = Cursor::new(wire);

        assert_eq!(read_packet(&mut cursor, 1024).unwrap(), first);
        assert_eq!(read_packet(&mut cursor, 1024).unwrap(), second);
        let eof = read_packet(&mut cursor, 1024).unwrap_err();
        assert!(matches!(&eof, FrameError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof));
        assert!(!eof.is_protocol_violation());
    }

    #[test]
    fn oversized_declaration_is_rejected_before_payload() {
        let packet = Packet::new(DataKind::Message, 0, vec![0u8; 64], false);
        let mut cursor = Cursor::new(encoded(&packet));
        assert!(matches!(
            read_packet(&mut cursor, 32),
            Err(FrameError::Oversized { declared: 64, max: 32 })
        ));
        assert_eq!(cursor.position(), DataPacketHeader::SIZE as u64);
    }

    #[test]
    fn bad_magic_is_a_header_error() {
        let mut wire = encoded(&Packet::new(DataKind::Bytes, 0, &b"x"[..], false));
        wire[0] ^= 0xFF;
        let err = read_packet(&mut Cursor::new(wire), 1024).unwrap_err();
        assert!(matches!(err, FrameError::Header(ProtocolError::InvalidMagic(_))));
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn truncated_payload_is_a_protocol_violation() {
        let mut wire = encoded(&Packet::new(DataKind::Bytes, 0, &b"hello"[..], false));
        wire.truncate(wire.len() - 2);
        let err = read_packet(&mut Cursor::new(wire), 1024).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { read: 31, expected: 33 }));
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn partial_header_is_truncated() {
        let wire = encoded(&Packet::new(DataKind::Bytes, 0, &b"hello"[..], false));
        let err = read_packet(&mut Cursor::new(&wire[..10]), 1024).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { read: 10, expected: DataPacketHeader::SIZE }));
    }
}
