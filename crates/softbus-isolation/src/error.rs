//! Isolation and manager errors.

use std::io;

use softbus_vbus::BusError;
use thiserror::Error;

use crate::Role;

/// Errors returned by [`crate::ThreadIsolation`] and [`crate::SourceSinkManager`].
#[derive(Error, Debug)]
pub enum IsolationError {
    /// `start` called on an executor whose worker is alive
    #[error("{0} thread already running")]
    AlreadyRunning(Role),

    /// Worker thread could not be spawned
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),

    /// Zero-length payload handed to `send_data`
    #[error("empty payload")]
    EmptyPayload,

    /// Attached bus refused the payload
    #[error("bus send failed: {0}")]
    Bus(#[from] BusError),
}

impl IsolationError {
    /// Returns true if the same call may succeed later without intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Bus(e) => e.is_transient(),
            Self::AlreadyRunning(_) | Self::Spawn(_) | Self::EmptyPayload => false,
        }
    }
}
