//! Harness errors.

use std::io;

use softbus_transport::TransportError;
use softbus_vbus::BusError;
use thiserror::Error;

/// Errors raised while setting up or running a scenario.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Transport call failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Virtual bus call failed
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// An expected callback did not arrive in time
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Scenario parameters are unusable
    #[error("invalid scenario: {0}")]
    InvalidScenario(&'static str),

    /// A scenario thread could not be spawned
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] io::Error),

    /// A scenario thread panicked
    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),
}
