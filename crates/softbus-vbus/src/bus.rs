//! Named bounded ring channel.
//!
//! A [`BusContext`] owns the set of open channels. Every [`VirtualBus`]
//! handle initialized with the same name in the same context attaches to one
//! shared channel: the same ring, offsets and semaphores. The channel is
//! released when its last handle is destroyed.
//!
//! Offsets and semaphore counts live in the region's control block. With
//! the mapped backend, contexts in other processes that open the same name
//! in the same directory attach to the same block, so flow control holds
//! across processes exactly as it does within one.
//!
//! # Flow control
//!
//! ```text
//!  producer                                       consumer
//!  acquire(write_slots) ──► push record ──► release(read_ready)
//!                                          try_acquire(read_ready) ──► pop record
//!                                          release(write_slots) ◄──────┘
//! ```
//!
//! `write_slots` starts at `max_messages` and never exceeds it; a receive near
//! the physical end of the region may return one extra slot early.
//! `read_ready` starts at zero and counts unread records. The ring lock
//! guards only offset bookkeeping and copies; semaphore waits happen
//! outside it.
//!
//! # Corrupt records
//!
//! A record header whose declared size cannot be right is skipped by
//! advancing past the header alone. Its read permit is spent, but the
//! payload bytes behind it stay unread, so `has_data` remains true and
//! `buffer_usage` stays above zero. Later receives start from that
//! misaligned offset and may skip or misframe further records. Recovering a
//! damaged channel means destroying it.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use softbus_proto::{BusMessageHeader, DataBuffer, unix_millis};

use crate::{
    config::BusConfig,
    error::BusError,
    region::{Control, RegionBackend, open_region},
    ring::Ring,
    semaphore::{Wait, WaitTimeout},
};

/// Distance from the end of the region within which a receive releases an
/// extra write slot.
pub const LOW_WATER_MARGIN: usize = 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Channel {
    config: BusConfig,
    ring: Mutex<Ring>,
    control: Arc<Control>,
}

impl Channel {
    fn open(config: &BusConfig) -> Result<Self, BusError> {
        let region = open_region(&config.backend, &config.name, config.buffer_size, config.max_messages)?;
        let control = region.control();
        Ok(Self { config: config.clone(), ring: Mutex::new(Ring::new(region)), control })
    }

    /// Run `f` with the ring locked against every other opener.
    fn with_ring<R>(&self, f: impl FnOnce(&mut Ring) -> R) -> R {
        let mut ring = lock(&self.ring);
        let _held = self.control.lock_ring();
        f(&mut ring)
    }

    fn same_geometry(&self, config: &BusConfig) -> bool {
        self.config.buffer_size == config.buffer_size
            && self.config.max_messages == config.max_messages
            && self.config.backend == config.backend
    }

    /// A heap channel dies with its context entry. A mapped one may still
    /// have openers elsewhere; its region detaches on drop instead.
    fn close(&self) {
        if self.config.backend == RegionBackend::Heap {
            self.control.close();
        }
    }
}

struct ChannelEntry {
    channel: Arc<Channel>,
    handles: usize,
}

/// Registry of open bus channels.
///
/// Stands in for the process-wide namespace of shared-memory objects.
/// Cloning yields another reference to the same registry.
#[derive(Clone, Default)]
pub struct BusContext {
    channels: Arc<Mutex<HashMap<String, ChannelEntry>>>,
}

impl std::fmt::Debug for BusContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = lock(&self.channels);
        f.debug_struct("BusContext").field("channels", &channels.keys().collect::<Vec<_>>()).finish()
    }
}

impl BusContext {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a channel named `name` is open.
    pub fn is_open(&self, name: &str) -> bool {
        lock(&self.channels).contains_key(name)
    }

    /// Number of open channels.
    pub fn open_channels(&self) -> usize {
        lock(&self.channels).len()
    }

    fn attach(&self, config: &BusConfig) -> Result<Arc<Channel>, BusError> {
        let mut channels = lock(&self.channels);

        if let Some(entry) = channels.get_mut(&config.name) {
            if !entry.channel.same_geometry(config) {
                return Err(BusError::ConfigMismatch { name: config.name.clone() });
            }
            entry.handles += 1;
            return Ok(entry.channel.clone());
        }

        let channel = Arc::new(Channel::open(config)?);
        channels.insert(config.name.clone(), ChannelEntry { channel: channel.clone(), handles: 1 });
        Ok(channel)
    }

    fn detach(&self, name: &str) {
        let mut channels = lock(&self.channels);
        let Some(entry) = channels.get_mut(name) else {
            return;
        };

        entry.handles -= 1;
        if entry.handles == 0
            && let Some(entry) = channels.remove(name)
        {
            entry.channel.close();
            tracing::debug!(name, "released bus channel");
        }
    }
}

/// Handle on a named bus channel.
pub struct VirtualBus {
    config: BusConfig,
    context: BusContext,
    channel: Option<Arc<Channel>>,
}

impl std::fmt::Debug for VirtualBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualBus")
            .field("name", &self.config.name)
            .field("initialized", &self.is_initialized())
            .field("usage", &self.buffer_usage())
            .finish_non_exhaustive()
    }
}

impl VirtualBus {
    /// Uninitialized handle. Call [`VirtualBus::initialize`] before use.
    pub fn new(context: &BusContext, config: BusConfig) -> Self {
        Self { config, context: context.clone(), channel: None }
    }

    /// Create or attach to the named channel. No-op if already initialized.
    ///
    /// # Errors
    ///
    /// - `BusError::InvalidConfig` for an empty name, zero write slots, or a
    ///   buffer too small to hold one header plus one byte
    /// - `BusError::ConfigMismatch` if the channel is already open in this
    ///   context with different geometry
    /// - `BusError::Region` if the backing region cannot be created
    pub fn initialize(&mut self) -> Result<(), BusError> {
        if self.channel.is_some() {
            tracing::info!(name = %self.config.name, "Virtual bus already initialized");
            return Ok(());
        }

        if self.config.name.is_empty() {
            return Err(BusError::InvalidConfig("name must not be empty"));
        }
        if self.config.max_messages == 0 {
            return Err(BusError::InvalidConfig("max_messages must be positive"));
        }
        if self.config.buffer_size <= BusMessageHeader::SIZE {
            return Err(BusError::InvalidConfig("buffer_size must exceed the record header"));
        }

        let channel = self.context.attach(&self.config).inspect_err(|e| {
            tracing::error!(name = %self.config.name, "Failed to initialize virtual bus: {}", e);
        })?;
        self.channel = Some(channel);

        tracing::info!(
            name = %self.config.name,
            buffer_size = self.config.buffer_size,
            max_messages = self.config.max_messages,
            "Virtual bus initialized"
        );
        Ok(())
    }

    /// Detach from the channel. The last handle out releases it. Idempotent.
    pub fn destroy(&mut self) {
        if self.channel.take().is_some() {
            self.context.detach(&self.config.name);
            tracing::info!(name = %self.config.name, "Virtual bus destroyed");
        }
    }

    /// Whether this handle is attached.
    pub fn is_initialized(&self) -> bool {
        self.channel.is_some()
    }

    /// Configuration this handle was created with.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Largest payload a single record can carry.
    pub fn max_payload_size(&self) -> usize {
        self.config.buffer_size.saturating_sub(BusMessageHeader::SIZE)
    }

    /// Enqueue `buffer`, waiting up to the configured send timeout for a
    /// write slot.
    pub fn send_data(&self, buffer: &DataBuffer, priority: u8) -> Result<(), BusError> {
        self.send_data_timeout(buffer, priority, self.config.send_timeout)
    }

    /// Enqueue `buffer`, waiting up to `timeout` for a write slot.
    ///
    /// Size is checked before any semaphore is touched. If the record does
    /// not fit the free space once a slot is held, the slot is returned and
    /// nothing is written.
    ///
    /// # Errors
    ///
    /// - `BusError::NotInitialized`, `BusError::EmptyPayload`,
    ///   `BusError::PayloadTooLarge` without blocking
    /// - `BusError::Timeout` if no slot became available
    /// - `BusError::InsufficientSpace` if the ring is too full right now
    /// - `BusError::Closed` if the channel was released while waiting
    pub fn send_data_timeout(
        &self,
        buffer: &DataBuffer,
        priority: u8,
        timeout: WaitTimeout,
    ) -> Result<(), BusError> {
        let channel = self.channel.as_ref().ok_or(BusError::NotInitialized)?;

        let size = buffer.size();
        if size == 0 {
            return Err(BusError::EmptyPayload);
        }
        let max = self.max_payload_size();
        if size > max {
            tracing::error!(size, max, "Invalid buffer size");
            return Err(BusError::PayloadTooLarge { size, max });
        }

        match channel.control.write_slots().acquire(timeout) {
            Wait::Ready => {},
            Wait::TimedOut => {
                tracing::warn!(name = %self.config.name, "Timeout waiting for write slot");
                return Err(BusError::Timeout);
            },
            Wait::Closed => return Err(BusError::Closed),
        }

        let pushed = channel.with_ring(|ring| {
            let needed = BusMessageHeader::SIZE + size;
            let available = ring.free();
            if needed > available {
                return Err(BusError::InsufficientSpace { needed, available });
            }

            // INVARIANT: size <= buffer_size - header, and buffer sizes are
            // far below 4 GiB in practice. The id is the record's physical
            // offset in the region.
            let header = BusMessageHeader::new(ring.write_offset() as u32, size as u32, unix_millis(), priority);
            ring.push(&header, buffer.data());
            Ok(())
        });
        if let Err(e) = pushed {
            channel.control.write_slots().release();
            tracing::warn!(error = %e, "Insufficient space in ring");
            return Err(e);
        }

        channel.control.read_ready().release();
        tracing::debug!(size, priority, "Data sent");
        Ok(())
    }

    /// Dequeue the oldest record, if one is ready. Never blocks.
    ///
    /// A record whose declared size is zero, larger than the ring, or larger
    /// than the bytes actually unread is treated as corrupt: its header is
    /// skipped and `None` is returned.
    pub fn receive_data(&self) -> Option<DataBuffer> {
        let channel = self.channel.as_ref()?;
        if !channel.control.read_ready().try_acquire() {
            return None;
        }

        let popped = channel.with_ring(|ring| {
            if ring.unread() < BusMessageHeader::SIZE {
                tracing::error!(unread = ring.unread(), "read-ready signalled without a full header");
                return None;
            }

            let header = BusMessageHeader::from_bytes(&ring.peek_header()).ok()?;
            let size = header.data_size() as usize;
            let unread_payload = ring.unread() - BusMessageHeader::SIZE;
            if size == 0 || size > ring.capacity() || size > unread_payload {
                ring.advance(BusMessageHeader::SIZE);
                tracing::error!(size, unread_payload, "Invalid message size, skipping record");
                return Some((None, false));
            }

            let payload = ring.pop(size);
            let near_end = ring.read_offset() + BusMessageHeader::SIZE + LOW_WATER_MARGIN >= ring.capacity();
            tracing::debug!(size, priority = header.priority(), "Data received");
            Some((Some(payload), near_end))
        });

        let (payload, near_end) = popped?;
        let write_slots = channel.control.write_slots();
        write_slots.release();
        if near_end {
            // Capped at max_messages by the semaphore itself.
            write_slots.release();
        }
        payload.map(DataBuffer::from)
    }

    /// Wait for a record to become readable.
    ///
    /// [`WaitTimeout::Immediate`] just polls. Waiting does not consume the
    /// record; follow with [`VirtualBus::receive_data`].
    pub fn wait_for_data(&self, timeout: WaitTimeout) -> bool {
        let Some(channel) = self.channel.as_ref() else {
            return false;
        };
        if timeout == WaitTimeout::Immediate || self.has_data() {
            return self.has_data();
        }
        channel.control.read_ready().wait_available(timeout) == Wait::Ready || self.has_data()
    }

    /// Whether unread bytes exist.
    pub fn has_data(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.with_ring(|ring| ring.unread() > 0))
    }

    /// Fraction of the ring holding unread bytes, in `[0, 1]`.
    pub fn buffer_usage(&self) -> f64 {
        self.channel
            .as_ref()
            .map_or(0.0, |c| c.with_ring(|ring| ring.unread() as f64 / ring.capacity() as f64))
    }

    /// Write slots currently free.
    pub fn free_write_slots(&self) -> usize {
        self.channel.as_ref().map_or(0, |c| c.control.write_slots().available())
    }

    #[cfg(test)]
    fn with_ring<R>(&self, f: impl FnOnce(&mut Ring) -> R) -> Option<R> {
        self.channel.as_ref().map(|c| c.with_ring(f))
    }
}

impl Drop for VirtualBus {
    fn drop(&mut self) {
        self.destroy();
    }
}
