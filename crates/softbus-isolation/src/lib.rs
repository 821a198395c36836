//! Thread isolation for the Source and Sink roles.
//!
//! A [`ThreadIsolation`] owns one worker thread and a FIFO task queue. Every
//! task posted to it runs on that worker and nowhere else, so role-specific
//! state never needs its own locking discipline.
//!
//! [`SourceSinkManager`] composes one executor per [`Role`] and routes data
//! between the roles through an optional [`softbus_vbus::VirtualBus`].

#![forbid(unsafe_code)]

pub mod error;
pub mod isolation;
pub mod manager;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use error::IsolationError;
pub use isolation::{Role, ThreadIsolation};
pub use manager::{ChannelListener, SessionState, SourceSinkManager};

/// Lock `mutex`, recovering the guard if a task panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
