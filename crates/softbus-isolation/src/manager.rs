//! Source/Sink manager.
//!
//! Owns one [`ThreadIsolation`] per role. `init_*`/`release_*` start and stop
//! the executors and are idempotent. Data handed to [`SourceSinkManager::send_data`]
//! goes through an attached [`VirtualBus`]; [`SourceSinkManager::deliver_pending`]
//! drains it on the Sink worker into the registered [`ChannelListener`].

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use softbus_proto::{ChannelType, DataBuffer};
use softbus_vbus::VirtualBus;

use crate::{IsolationError, Role, ThreadIsolation, lock};

/// Bus connectivity reported to the channel listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// A bus was attached
    Connected,
    /// The bus was detached
    Disconnected,
}

/// Receives channel events from the manager.
///
/// All methods default to no-ops. `on_data_received` is always invoked on
/// the Sink worker thread.
pub trait ChannelListener: Send + Sync {
    /// Bus attached or detached.
    fn on_session_state(&self, state: SessionState) {
        let _ = state;
    }

    /// A send on `channel` failed.
    fn on_session_error(&self, channel: ChannelType, reason: &str) {
        let _ = (channel, reason);
    }

    /// Buffers drained from the bus, in arrival order.
    fn on_data_received(&self, buffers: &[DataBuffer]) {
        let _ = buffers;
    }
}

/// Two role executors plus the shared listener and bus.
#[derive(Default)]
pub struct SourceSinkManager {
    source: Mutex<Option<Arc<ThreadIsolation>>>,
    sink: Mutex<Option<Arc<ThreadIsolation>>>,
    listener: Arc<RwLock<Option<Arc<dyn ChannelListener>>>>,
    bus: Mutex<Option<Arc<VirtualBus>>>,
}

impl fmt::Debug for SourceSinkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSinkManager")
            .field("source", &self.is_source_initialized())
            .field("sink", &self.is_sink_initialized())
            .field("bus", &lock(&self.bus).is_some())
            .finish_non_exhaustive()
    }
}

impl SourceSinkManager {
    /// Manager with neither role started.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the Source executor. No-op if already started.
    pub fn init_source(&self, params: &str) -> Result<(), IsolationError> {
        Self::init(&self.source, Role::Source, params)
    }

    /// Start the Sink executor. No-op if already started.
    pub fn init_sink(&self, params: &str) -> Result<(), IsolationError> {
        Self::init(&self.sink, Role::Sink, params)
    }

    /// Stop the Source executor, discarding queued tasks. Idempotent.
    pub fn release_source(&self) {
        Self::release(&self.source, Role::Source);
    }

    /// Stop the Sink executor, discarding queued tasks. Idempotent.
    pub fn release_sink(&self) {
        Self::release(&self.sink, Role::Sink);
    }

    /// Returns true between `init_source` and `release_source`.
    pub fn is_source_initialized(&self) -> bool {
        lock(&self.source).is_some()
    }

    /// Returns true between `init_sink` and `release_sink`.
    pub fn is_sink_initialized(&self) -> bool {
        lock(&self.sink).is_some()
    }

    /// Run `task` on the Source worker. Returns false (and logs) if the
    /// Source is not initialized.
    pub fn post_source_task<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        Self::post(&self.source, Role::Source, task)
    }

    /// Run `task` on the Sink worker. Returns false (and logs) if the Sink
    /// is not initialized.
    pub fn post_sink_task<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        Self::post(&self.sink, Role::Sink, task)
    }

    /// Executor for `role`, if initialized.
    pub fn executor(&self, role: Role) -> Option<Arc<ThreadIsolation>> {
        match role {
            Role::Source => lock(&self.source).clone(),
            Role::Sink => lock(&self.sink).clone(),
        }
    }

    /// Block until the `role` executor has no pending tasks. Returns
    /// immediately if it is not initialized.
    pub fn wait_for_tasks(&self, role: Role) {
        if let Some(exec) = self.executor(role) {
            exec.wait_for_tasks_completion();
        }
    }

    /// Replace the channel listener.
    pub fn set_channel_listener(&self, listener: Arc<dyn ChannelListener>) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    /// Attach the bus that `send_data` writes to, replacing any previous one.
    pub fn attach_bus(&self, bus: VirtualBus) {
        tracing::info!(bus = %bus.config().name, "Attaching virtual bus");
        *lock(&self.bus) = Some(Arc::new(bus));
        if let Some(listener) = self.listener() {
            listener.on_session_state(SessionState::Connected);
        }
    }

    /// Detach and return the bus, if one is attached and no delivery task
    /// still holds it.
    pub fn detach_bus(&self) -> Option<VirtualBus> {
        let bus = lock(&self.bus).take()?;
        if let Some(listener) = self.listener() {
            listener.on_session_state(SessionState::Disconnected);
        }
        Arc::into_inner(bus)
    }

    /// Send `buffer` on the logical channel `mode`.
    ///
    /// With a bus attached the buffer is enqueued with the channel's
    /// priority; failures are reported to the listener and returned. Without
    /// a bus the call only logs.
    pub fn send_data(&self, mode: ChannelType, buffer: &DataBuffer) -> Result<(), IsolationError> {
        if buffer.is_empty() {
            tracing::error!(%mode, "Invalid buffer");
            return Err(IsolationError::EmptyPayload);
        }

        let bus = lock(&self.bus).clone();
        let Some(bus) = bus else {
            tracing::info!(%mode, size = buffer.size(), "Sending data (no bus attached)");
            return Ok(());
        };

        match bus.send_data(buffer, mode.priority()) {
            Ok(()) => {
                tracing::debug!(%mode, size = buffer.size(), "Data enqueued on bus");
                Ok(())
            },
            Err(e) => {
                tracing::warn!(%mode, error = %e, "Bus send failed");
                if let Some(listener) = self.listener() {
                    listener.on_session_error(mode, &e.to_string());
                }
                Err(e.into())
            },
        }
    }

    /// Post a Sink task that drains the attached bus into the listener's
    /// `on_data_received`.
    ///
    /// Returns false if the Sink is not initialized or no bus is attached.
    pub fn deliver_pending(&self) -> bool {
        let Some(bus) = lock(&self.bus).clone() else {
            tracing::debug!("No bus attached, nothing to deliver");
            return false;
        };
        let listener = Arc::clone(&self.listener);

        self.post_sink_task(move || {
            let mut buffers = Vec::new();
            while let Some(buffer) = bus.receive_data() {
                buffers.push(buffer);
            }
            if buffers.is_empty() {
                return;
            }

            let listener = listener.read().unwrap_or_else(PoisonError::into_inner).clone();
            match listener {
                Some(listener) => listener.on_data_received(&buffers),
                None => tracing::warn!(count = buffers.len(), "No channel listener, dropping buffers"),
            }
        })
    }

    fn listener(&self) -> Option<Arc<dyn ChannelListener>> {
        self.listener.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn init(
        slot: &Mutex<Option<Arc<ThreadIsolation>>>,
        role: Role,
        params: &str,
    ) -> Result<(), IsolationError> {
        let mut slot = lock(slot);
        if slot.is_some() {
            tracing::info!(%role, "Already initialized");
            return Ok(());
        }

        let exec = ThreadIsolation::new(role);
        exec.start()?;
        *slot = Some(Arc::new(exec));
        tracing::info!(%role, params, "Initialized");
        Ok(())
    }

    fn release(slot: &Mutex<Option<Arc<ThreadIsolation>>>, role: Role) {
        let Some(exec) = lock(slot).take() else {
            tracing::debug!(%role, "Not initialized");
            return;
        };
        exec.stop();
        tracing::info!(%role, "Released");
    }

    fn post<F>(slot: &Mutex<Option<Arc<ThreadIsolation>>>, role: Role, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let exec = lock(slot).clone();
        match exec {
            Some(exec) => exec.post_task(task),
            None => {
                tracing::error!(%role, "Cannot post task, not initialized");
                false
            },
        }
    }
}

impl Drop for SourceSinkManager {
    fn drop(&mut self) {
        self.release_source();
        self.release_sink();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, time::Duration};

    use softbus_vbus::{BusConfig, BusContext};

    use super::*;

    #[derive(Default)]
    struct Collect {
        states: Mutex<Vec<SessionState>>,
        errors: Mutex<Vec<ChannelType>>,
        data: Mutex<Vec<(Vec<u8>, Option<String>)>>,
    }

    impl ChannelListener for Collect {
        fn on_session_state(&self, state: SessionState) {
            self.states.lock().unwrap().push(state);
        }

        fn on_session_error(&self, channel: ChannelType, _reason: &str) {
            self.errors.lock().unwrap().push(channel);
        }

        fn on_data_received(&self, buffers: &[DataBuffer]) {
            let name = std::thread::current().name().map(str::to_owned);
            let mut data = self.data.lock().unwrap();
            for b in buffers {
                data.push((b.data().to_vec(), name.clone()));
            }
        }
    }

    fn bus(context: &BusContext, name: &str, slots: usize) -> VirtualBus {
        let mut bus = VirtualBus::new(
            context,
            BusConfig::named(name).with_buffer_size(4096).with_max_messages(slots),
        );
        bus.initialize().unwrap();
        bus
    }

    #[test]
    fn init_and_release_are_idempotent() {
        let manager = SourceSinkManager::new();
        assert!(!manager.is_source_initialized());

        manager.init_source("").unwrap();
        let first = manager.executor(Role::Source).unwrap();
        manager.init_source("again").unwrap();
        assert!(Arc::ptr_eq(&first, &manager.executor(Role::Source).unwrap()));

        manager.release_source();
        manager.release_source();
        assert!(!manager.is_source_initialized());
        assert!(!first.is_running());
    }

    #[test]
    fn post_without_init_is_rejected() {
        let manager = SourceSinkManager::new();
        assert!(!manager.post_source_task(|| {}));
        assert!(!manager.post_sink_task(|| {}));
        manager.wait_for_tasks(Role::Sink);
    }

    #[test]
    fn roles_run_on_their_own_threads() {
        let manager = SourceSinkManager::new();
        manager.init_source("").unwrap();
        manager.init_sink("").unwrap();

        let (tx, rx) = mpsc::channel();
        let source_tx = tx.clone();
        manager.post_source_task(move || {
            source_tx.send(std::thread::current().name().map(str::to_owned)).unwrap();
        });
        manager.post_sink_task(move || {
            tx.send(std::thread::current().name().map(str::to_owned)).unwrap();
        });

        let mut names: Vec<_> = (0..2)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, ["softbus-sink", "softbus-source"]);
    }

    #[test]
    fn send_without_bus_only_logs() {
        let manager = SourceSinkManager::new();
        manager.send_data(ChannelType::Control, &DataBuffer::from_slice(b"cmd")).unwrap();
        assert!(matches!(
            manager.send_data(ChannelType::Control, &DataBuffer::new(0)),
            Err(IsolationError::EmptyPayload)
        ));
    }

    #[test]
    fn bus_data_is_delivered_on_sink_thread() {
        let context = BusContext::new();
        let manager = SourceSinkManager::new();
        let listener = Arc::new(Collect::default());
        manager.set_channel_listener(Arc::clone(&listener) as Arc<dyn ChannelListener>);
        manager.init_sink("").unwrap();
        manager.attach_bus(bus(&context, "deliver", 8));

        for payload in [&b"one"[..], b"two", b"three"] {
            manager.send_data(ChannelType::Continuous, &DataBuffer::from_slice(payload)).unwrap();
        }
        assert!(manager.deliver_pending());
        manager.wait_for_tasks(Role::Sink);

        let data = listener.data.lock().unwrap();
        let payloads: Vec<_> = data.iter().map(|(p, _)| p.as_slice()).collect();
        assert_eq!(payloads, [&b"one"[..], b"two", b"three"]);
        assert!(data.iter().all(|(_, name)| name.as_deref() == Some("softbus-sink")));
        assert_eq!(*listener.states.lock().unwrap(), [SessionState::Connected]);
    }

    #[test]
    fn bus_failure_reaches_listener() {
        let context = BusContext::new();
        let manager = SourceSinkManager::new();
        let listener = Arc::new(Collect::default());
        manager.set_channel_listener(Arc::clone(&listener) as Arc<dyn ChannelListener>);

        let mut config = BusConfig::named("tiny").with_buffer_size(256).with_max_messages(1);
        config.send_timeout = softbus_vbus::WaitTimeout::Immediate;
        let mut tiny = VirtualBus::new(&context, config);
        tiny.initialize().unwrap();
        manager.attach_bus(tiny);

        manager.send_data(ChannelType::Snapshot, &DataBuffer::from_slice(b"a")).unwrap();
        let err = manager.send_data(ChannelType::Snapshot, &DataBuffer::from_slice(b"b")).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(*listener.errors.lock().unwrap(), [ChannelType::Snapshot]);

        assert!(manager.detach_bus().is_some());
        assert_eq!(
            *listener.states.lock().unwrap(),
            [SessionState::Connected, SessionState::Disconnected]
        );
    }

    #[test]
    fn deliver_requires_bus_and_sink() {
        let context = BusContext::new();
        let manager = SourceSinkManager::new();
        assert!(!manager.deliver_pending());

        manager.attach_bus(bus(&context, "nosink", 4));
        assert!(!manager.deliver_pending());
    }
}
