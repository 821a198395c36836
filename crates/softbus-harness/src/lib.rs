//! Test harness for the simulated SoftBus.
//!
//! Fixtures that stand up a Sink server and a Source client over loopback
//! TCP, a listener that records every callback for bounded waits, and the
//! scenario runners behind the `softbus-sim` binary.
//!
//! # Port allocation
//!
//! Each fixture takes its own block of [`PORT_BLOCK`] ports from
//! [`next_base_port`], so fixtures in one test binary never compete for a
//! port. Test binaries run as separate processes and may hand out the same
//! block; the transport skips ports it cannot bind, so that only costs a
//! few extra bind attempts.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod fixture;
pub mod recorder;
pub mod scenario;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use error::HarnessError;
pub use fixture::{
    BIND_TIMEOUT, LoopbackPair, PORT_BLOCK, SINK_PREFIX, SOURCE_PREFIX, TEST_PEER_NETWORK_ID,
    TEST_PKG_NAME, default_qos, next_base_port, session_name, test_config,
};
pub use recorder::{RecordingListener, SocketEvent};
pub use scenario::{LoopbackReport, LoopbackScenario, PayloadKind, VbusReport, VbusScenario};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
