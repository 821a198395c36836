//! Transport configuration.

use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

/// Transport parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Address listening sessions bind to and bound sessions connect to
    pub local_ip: IpAddr,
    /// First port tried when a session starts listening
    pub base_port: u16,
    /// How many consecutive ports one `listen` call may try
    pub port_window: u16,
    /// Live sessions allowed at once, accepted connections included
    pub max_sockets: usize,
    /// Largest declared payload a receive loop will allocate for
    pub max_payload_size: usize,
    /// Largest payload a single send may carry
    pub send_buffer_size: usize,
    /// Stamp outgoing frames with a checksum and verify incoming ones
    pub enable_data_check: bool,
    /// Bound on `connect` and on each blocking write
    pub socket_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            local_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port: 50000,
            port_window: 100,
            max_sockets: 64,
            max_payload_size: 2 * 1024 * 1024,
            send_buffer_size: 2 * 1024 * 1024,
            enable_data_check: true,
            socket_timeout: Duration::from_millis(30_000),
        }
    }
}

impl TransportConfig {
    /// Default config scanning ports from `base_port`.
    pub fn with_base_port(base_port: u16) -> Self {
        Self { base_port, ..Self::default() }
    }

    /// Set the socket ceiling.
    #[must_use]
    pub fn max_sockets(mut self, max_sockets: usize) -> Self {
        self.max_sockets = max_sockets;
        self
    }

    /// Enable or disable checksums.
    #[must_use]
    pub fn data_check(mut self, enabled: bool) -> Self {
        self.enable_data_check = enabled;
        self
    }

    /// Set both the send and receive payload ceilings.
    #[must_use]
    pub fn max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self.send_buffer_size = max_payload_size;
        self
    }
}
