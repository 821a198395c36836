//! Shared-memory virtual bus.
//!
//! A named, bounded, FIFO ring of `[BusMessageHeader][payload]` records with
//! two counting semaphores for flow control: producers block on free write
//! slots, consumers poll or wait on ready records. The bus owns no thread;
//! callers invoke [`VirtualBus::send_data`] and [`VirtualBus::receive_data`]
//! from their own threads.
//!
//! Ring offsets and semaphore counts live in a control block at the head of
//! the region. With the heap backend it is private to one [`BusContext`];
//! with the memory-mapped backend every process that opens the same name in
//! the same directory shares it. See [`RegionBackend`].
//!
//! [`BusMessageHeader`]: softbus_proto::BusMessageHeader

pub mod bus;
pub mod config;
pub mod error;
pub mod region;
mod ring;
pub mod semaphore;

pub use bus::{BusContext, LOW_WATER_MARGIN, VirtualBus};
pub use config::BusConfig;
pub use error::BusError;
pub use region::{CONTROL_SIZE, Control, ControlBlock, HeapRegion, MappedRegion, RegionBackend, SharedRegion};
pub use semaphore::WaitTimeout;
