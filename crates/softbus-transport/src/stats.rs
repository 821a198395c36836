//! Transport counters.

use serde::Serialize;

/// Resettable transport counters.
///
/// Byte counts include frame headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportStatistics {
    /// Frame bytes written
    pub bytes_sent: u64,
    /// Frame bytes read and accepted
    pub bytes_received: u64,
    /// Frames written
    pub packets_sent: u64,
    /// Frames read and accepted
    pub packets_received: u64,
    /// Sessions currently Bound or Connected
    pub active_connections: u32,
    /// Sockets created through `socket()`
    pub sockets_created: u32,
    /// Failed writes
    pub send_errors: u64,
    /// Frames dropped on receive (checksum, unknown kind, bad header)
    pub receive_errors: u64,
}

impl TransportStatistics {
    pub(crate) fn record_sent(&mut self, frame_len: usize) {
        self.bytes_sent += frame_len as u64;
        self.packets_sent += 1;
    }

    pub(crate) fn record_received(&mut self, frame_len: usize) {
        self.bytes_received += frame_len as u64;
        self.packets_received += 1;
    }

    /// Zero the counters. `active_connections` is a gauge and survives.
    pub(crate) fn reset(&mut self) {
        *self = Self { active_connections: self.active_connections, ..Self::default() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_keeps_the_connection_gauge() {
        let mut stats = TransportStatistics { active_connections: 2, ..Default::default() };
        stats.record_sent(40);
        stats.record_received(30);
        stats.send_errors = 1;
        stats.reset();
        assert_eq!(stats, TransportStatistics { active_connections: 2, ..Default::default() });
    }
}
