//! Listener capability set and the value types it receives.

use softbus_proto::StreamExtension;

use crate::session::SocketId;

/// Declared data type of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransDataType {
    /// Small control messages
    Message,
    /// Raw byte payloads
    #[default]
    Bytes,
    /// File transfer
    File,
    /// Unframed stream
    RawStream,
    /// Encoded video frames
    VideoStream,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownReason {
    /// Cause not known
    Unknown,
    /// Closed by the peer, or the connection failed
    Peer,
    /// Closed locally
    Local,
}

/// QoS requirement kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QosType {
    /// Minimum bandwidth, bytes per second
    MinBw,
    /// Maximum latency, milliseconds
    MaxLatency,
    /// Minimum latency, milliseconds
    MinLatency,
}

/// One QoS requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosTv {
    /// Requirement kind
    pub qos: QosType,
    /// Requested value
    pub value: i32,
}

impl QosTv {
    /// Requirement of `qos` at `value`.
    pub fn new(qos: QosType, value: i32) -> Self {
        Self { qos, value }
    }
}

/// QoS notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QosEvent {
    /// Requirements are met
    Satisfied,
    /// Requirements are not met
    NotSatisfied,
}

/// Peer identity reported by `on_bind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSocketInfo {
    /// Peer session name
    pub name: String,
    /// Peer network id
    pub network_id: String,
    /// Package name
    pub pkg_name: String,
    /// Declared data type
    pub data_type: TransDataType,
}

/// Per-frame stream metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamFrameInfo {
    /// Frame type, e.g. 1 for an I-frame
    pub frame_type: i32,
    /// Capture timestamp
    pub time_stamp: i64,
    /// Frame sequence number
    pub seq_num: i32,
    /// Sub-sequence within the frame
    pub seq_sub_num: i32,
    /// SVC level
    pub level: i32,
    /// Layer bitmap
    pub bit_map: i32,
}

impl From<&StreamFrameInfo> for StreamExtension {
    fn from(info: &StreamFrameInfo) -> Self {
        Self::new(
            info.frame_type,
            info.time_stamp,
            info.seq_num,
            info.seq_sub_num,
            info.level,
            info.bit_map,
        )
    }
}

impl From<&StreamExtension> for StreamFrameInfo {
    fn from(ext: &StreamExtension) -> Self {
        Self {
            frame_type: ext.frame_type(),
            time_stamp: ext.time_stamp(),
            seq_num: ext.seq_num(),
            seq_sub_num: ext.seq_sub_num(),
            level: ext.level(),
            bit_map: ext.bit_map(),
        }
    }
}

/// Callbacks for one session.
///
/// Every method defaults to a no-op. Calls arrive on the session's receive
/// or accept thread (or, for `on_bind` after `bind`, the caller's thread)
/// with no transport lock held.
pub trait SocketListener: Send + Sync {
    /// Connection established; `info` describes the peer.
    fn on_bind(&self, socket: SocketId, info: &PeerSocketInfo) {
        let _ = (socket, info);
    }

    /// Session ended.
    fn on_shutdown(&self, socket: SocketId, reason: ShutdownReason) {
        let _ = (socket, reason);
    }

    /// Byte payload received.
    fn on_bytes(&self, socket: SocketId, data: &[u8]) {
        let _ = (socket, data);
    }

    /// Message payload received.
    fn on_message(&self, socket: SocketId, data: &[u8]) {
        let _ = (socket, data);
    }

    /// Stream frame received. `ext` is never carried on the wire and is
    /// always `None`.
    fn on_stream(&self, socket: SocketId, data: &[u8], ext: Option<&[u8]>, frame: &StreamFrameInfo) {
        let _ = (socket, data, ext, frame);
    }

    /// QoS change. Present for interface parity; the simulated transport
    /// never raises it.
    fn on_qos(&self, socket: SocketId, event: QosEvent, qos: &[QosTv]) {
        let _ = (socket, event, qos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_info_survives_extension_conversion() {
        let info = StreamFrameInfo {
            frame_type: 1,
            time_stamp: -5,
            seq_num: 7,
            seq_sub_num: 2,
            level: 3,
            bit_map: 0x0F,
        };
        let ext = StreamExtension::from(&info);
        assert_eq!(StreamFrameInfo::from(&ext), info);
    }
}
