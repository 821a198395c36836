//! Simulated SoftBus socket transport.
//!
//! Emulates the three-channel distributed bus (Control, Snapshot,
//! Continuous) with plain TCP on one host. Every socket is a session in a
//! single registry; listening sessions own an accept thread and every
//! connected session owns a receive thread that decodes frames and calls
//! the session's [`SocketListener`].
//!
//! # Lifecycle
//!
//! ```text
//! socket() -> Idle --listen()--> Listening --(accept)--> Connected (new id)
//!                  \--bind()---> Bound
//! any state --shutdown()--> removed
//! peer EOF on Bound/Connected --> Closed + on_shutdown(Peer)
//! ```
//!
//! # Lock discipline
//!
//! The session registry, the reserved-port pool and the statistics each sit
//! behind their own mutex. The registry lock may be held while a single
//! session's state is locked (snapshots, adopting an accepted connection),
//! never the other way round. The port pool and the statistics are never
//! held together with another lock. Listener callbacks run with no
//! transport lock held, so they may call back into the transport.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod listener;
mod ports;
mod registry;
pub mod session;
pub mod stats;
pub mod transport;
mod wire;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::TransportConfig;
pub use error::TransportError;
pub use listener::{
    PeerSocketInfo, QosEvent, QosTv, QosType, ShutdownReason, SocketListener, StreamFrameInfo,
    TransDataType,
};
pub use session::{FIRST_SOCKET_ID, SessionInfo, SocketId, SocketInfo, SocketState};
pub use stats::TransportStatistics;
pub use transport::SoftbusTransport;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
