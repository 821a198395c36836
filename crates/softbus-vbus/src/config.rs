//! Bus configuration.

use std::time::Duration;

use crate::{region::RegionBackend, semaphore::WaitTimeout};

/// Parameters for one bus channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Channel name; handles with the same name in one context share a ring
    pub name: String,
    /// Ring capacity in bytes, headers included
    pub buffer_size: usize,
    /// Write slots, i.e. the most messages that may be outstanding
    pub max_messages: usize,
    /// Where the ring lives
    pub backend: RegionBackend,
    /// How long [`crate::VirtualBus::send_data`] waits for a write slot
    pub send_timeout: WaitTimeout,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: "dcamera_bus".to_owned(),
            buffer_size: 1024 * 1024,
            max_messages: 64,
            backend: RegionBackend::Heap,
            send_timeout: WaitTimeout::Bounded(Duration::from_millis(1000)),
        }
    }
}

impl BusConfig {
    /// Heap-backed config named `name`, other fields defaulted.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Set the ring capacity.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the write slot count.
    #[must_use]
    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }

    /// Set the region backend.
    #[must_use]
    pub fn with_backend(mut self, backend: RegionBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the default send timeout.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: WaitTimeout) -> Self {
        self.send_timeout = timeout;
        self
    }
}
