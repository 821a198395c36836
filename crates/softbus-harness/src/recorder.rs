//! Listener that records every callback.
//!
//! Callbacks arrive on transport threads; tests wait for them on their own
//! thread with a deadline instead of sleeping.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::{Duration, Instant},
};

use softbus_transport::{
    PeerSocketInfo, QosEvent, QosTv, ShutdownReason, SocketId, SocketListener, StreamFrameInfo,
};

use crate::lock;

/// One recorded callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// `on_bind`
    Bind {
        /// Socket that was bound or accepted
        socket: SocketId,
        /// Reported peer identity
        peer: PeerSocketInfo,
    },
    /// `on_shutdown`
    Shutdown {
        /// Socket that ended
        socket: SocketId,
        /// Why it ended
        reason: ShutdownReason,
    },
    /// `on_bytes`
    Bytes {
        /// Receiving socket
        socket: SocketId,
        /// Payload
        data: Vec<u8>,
    },
    /// `on_message`
    Message {
        /// Receiving socket
        socket: SocketId,
        /// Payload
        data: Vec<u8>,
    },
    /// `on_stream`
    Stream {
        /// Receiving socket
        socket: SocketId,
        /// Frame payload
        data: Vec<u8>,
        /// Frame metadata
        frame: StreamFrameInfo,
    },
    /// `on_qos`
    Qos {
        /// Socket the event concerns
        socket: SocketId,
        /// Satisfied or not
        event: QosEvent,
        /// Reported values
        qos: Vec<QosTv>,
    },
}

impl SocketEvent {
    /// Returns true for the three data callbacks.
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Bytes { .. } | Self::Message { .. } | Self::Stream { .. })
    }
}

/// [`SocketListener`] that queues every callback for later inspection.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<VecDeque<SocketEvent>>,
    arrived: Condvar,
}

impl RecordingListener {
    /// Empty recorder, ready to hand to the transport.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, event: SocketEvent) {
        lock(&self.events).push_back(event);
        self.arrived.notify_all();
    }

    /// Wait until an event accepted by `select` is queued, remove it and
    /// return what `select` extracted. Events that do not match stay queued
    /// in order.
    pub fn wait_for<T>(
        &self,
        timeout: Duration,
        mut select: impl FnMut(&SocketEvent) -> Option<T>,
    ) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut events = lock(&self.events);
        loop {
            let found = events.iter().enumerate().find_map(|(i, e)| select(e).map(|v| (i, v)));
            if let Some((index, value)) = found {
                events.remove(index);
                return Some(value);
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            events = self
                .arrived
                .wait_timeout(events, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Next `on_bind`.
    pub fn wait_bind(&self, timeout: Duration) -> Option<(SocketId, PeerSocketInfo)> {
        self.wait_for(timeout, |e| match e {
            SocketEvent::Bind { socket, peer } => Some((*socket, peer.clone())),
            _ => None,
        })
    }

    /// Next `on_shutdown`.
    pub fn wait_shutdown(&self, timeout: Duration) -> Option<(SocketId, ShutdownReason)> {
        self.wait_for(timeout, |e| match e {
            SocketEvent::Shutdown { socket, reason } => Some((*socket, *reason)),
            _ => None,
        })
    }

    /// Next `on_bytes`.
    pub fn wait_bytes(&self, timeout: Duration) -> Option<(SocketId, Vec<u8>)> {
        self.wait_for(timeout, |e| match e {
            SocketEvent::Bytes { socket, data } => Some((*socket, data.clone())),
            _ => None,
        })
    }

    /// Next `on_message`.
    pub fn wait_message(&self, timeout: Duration) -> Option<(SocketId, Vec<u8>)> {
        self.wait_for(timeout, |e| match e {
            SocketEvent::Message { socket, data } => Some((*socket, data.clone())),
            _ => None,
        })
    }

    /// Next `on_stream`.
    pub fn wait_stream(&self, timeout: Duration) -> Option<(SocketId, Vec<u8>, StreamFrameInfo)> {
        self.wait_for(timeout, |e| match e {
            SocketEvent::Stream { socket, data, frame } => Some((*socket, data.clone(), *frame)),
            _ => None,
        })
    }

    /// Next data callback of any kind.
    pub fn wait_data(&self, timeout: Duration) -> Option<SocketEvent> {
        self.wait_for(timeout, |e| e.is_data().then(|| e.clone()))
    }

    /// Events queued and not yet taken.
    pub fn pending(&self) -> usize {
        lock(&self.events).len()
    }

    /// Take every queued event.
    pub fn drain(&self) -> Vec<SocketEvent> {
        lock(&self.events).drain(..).collect()
    }
}

impl SocketListener for RecordingListener {
    fn on_bind(&self, socket: SocketId, info: &PeerSocketInfo) {
        self.record(SocketEvent::Bind { socket, peer: info.clone() });
    }

    fn on_shutdown(&self, socket: SocketId, reason: ShutdownReason) {
        self.record(SocketEvent::Shutdown { socket, reason });
    }

    fn on_bytes(&self, socket: SocketId, data: &[u8]) {
        self.record(SocketEvent::Bytes { socket, data: data.to_vec() });
    }

    fn on_message(&self, socket: SocketId, data: &[u8]) {
        self.record(SocketEvent::Message { socket, data: data.to_vec() });
    }

    fn on_stream(&self, socket: SocketId, data: &[u8], _ext: Option<&[u8]>, frame: &StreamFrameInfo) {
        self.record(SocketEvent::Stream { socket, data: data.to_vec(), frame: *frame });
    }

    fn on_qos(&self, socket: SocketId, event: QosEvent, qos: &[QosTv]) {
        self.record(SocketEvent::Qos { socket, event, qos: qos.to_vec() });
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn non_matching_events_stay_queued() {
        let recorder = RecordingListener::new();
        recorder.on_bytes(SocketId::new(100), b"first");
        recorder.on_shutdown(SocketId::new(100), ShutdownReason::Peer);

        let shutdown = recorder.wait_shutdown(Duration::ZERO);
        assert_eq!(shutdown, Some((SocketId::new(100), ShutdownReason::Peer)));
        assert_eq!(recorder.pending(), 1);
        assert_eq!(recorder.wait_bytes(Duration::ZERO), Some((SocketId::new(100), b"first".to_vec())));
    }

    #[test]
    fn wait_times_out_when_nothing_arrives() {
        let recorder = RecordingListener::new();
        assert_eq!(recorder.wait_bind(Duration::from_millis(20)), None);
    }

    #[test]
    fn wait_wakes_on_event_from_another_thread() {
        let recorder = RecordingListener::new();
        let writer = Arc::clone(&recorder);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.on_message(SocketId::new(101), b"late");
        });

        let got = recorder.wait_message(Duration::from_secs(5));
        handle.join().unwrap();
        assert_eq!(got, Some((SocketId::new(101), b"late".to_vec())));
    }
}
