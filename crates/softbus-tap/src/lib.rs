//! Taps that sit on the transport's data path.
//!
//! - [`ProtocolSniffer`] passively validates JSON command envelopes flowing
//!   over control channels and reports violations through a callback.
//! - [`FaultInjector`] transforms outgoing buffers: dropping, delaying or
//!   corrupting them with configured probabilities.
//!
//! Neither tap owns a thread. Both are called synchronously by whoever holds
//! the buffer and are safe to share behind an `Arc`.
#![forbid(unsafe_code)]

pub mod fault;
pub mod sniffer;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use fault::{FaultInjectionConfig, FaultInjector, FaultKind, FaultStatistics};
pub use sniffer::{CommandEnvelope, ProtocolSniffer, SnifferCallback, SnifferStatistics};

/// Lock, recovering the guard if a previous holder panicked.
///
/// Taps guard only counters and configuration, which stay consistent even if
/// a callback panicked mid-update.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
