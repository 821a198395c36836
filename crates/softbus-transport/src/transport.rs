//! Transport context: socket lifecycle, send path, accept and receive loops.

use std::{
    fmt,
    io::{self, ErrorKind},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicU32, Ordering},
    },
    thread,
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use softbus_proto::{ChannelType, DataBuffer, DataKind, Packet, StreamExtension};
use softbus_tap::{FaultInjector, ProtocolSniffer};

use crate::{
    config::TransportConfig,
    error::TransportError,
    listener::{QosTv, ShutdownReason, SocketListener, StreamFrameInfo, TransDataType},
    lock,
    ports::PortPool,
    registry::{Registry, ServerEntry},
    session::{FIRST_SOCKET_ID, Session, SessionInfo, SocketId, SocketInfo, SocketState},
    stats::TransportStatistics,
    wire,
};

/// How long an idle accept thread sleeps between checks of its stop flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// The simulated bus. One per process or per test fixture.
///
/// Dropping the transport runs [`SoftbusTransport::deinitialize`].
pub struct SoftbusTransport {
    inner: Arc<Inner>,
}

struct Inner {
    config: TransportConfig,
    registry: Mutex<Registry>,
    ports: Mutex<PortPool>,
    stats: Mutex<TransportStatistics>,
    next_id: AtomicU32,
    sniffer: RwLock<Option<Arc<ProtocolSniffer>>>,
    faults: RwLock<Option<Arc<FaultInjector>>>,
}

impl fmt::Debug for SoftbusTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftbusTransport")
            .field("config", &self.inner.config)
            .field("sessions", &lock(&self.inner.registry).len())
            .finish_non_exhaustive()
    }
}

impl Default for SoftbusTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl SoftbusTransport {
    /// Transport with no sessions.
    pub fn new(config: TransportConfig) -> Self {
        let ports = PortPool::new(config.base_port, config.port_window);
        tracing::info!(
            local_ip = %config.local_ip,
            base_port = config.base_port,
            max_sockets = config.max_sockets,
            "SoftBus transport initialized"
        );
        Self {
            inner: Arc::new(Inner {
                config,
                registry: Mutex::new(Registry::default()),
                ports: Mutex::new(ports),
                stats: Mutex::new(TransportStatistics::default()),
                next_id: AtomicU32::new(FIRST_SOCKET_ID),
                sniffer: RwLock::new(None),
                faults: RwLock::new(None),
            }),
        }
    }

    /// Configuration in effect.
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Create an Idle socket.
    ///
    /// The channel type comes from `info.name`. The session key
    /// `<name>_<peer_network_id>` maps to the new id.
    ///
    /// # Errors
    ///
    /// - `TransportError::InvalidParameter` if any name field is empty
    /// - `TransportError::SocketLimit` at the socket ceiling
    pub fn socket(&self, info: SocketInfo) -> Result<SocketId, TransportError> {
        if let Some(field) = info.first_empty_field() {
            tracing::error!(field, "Invalid SocketInfo parameters");
            return Err(TransportError::InvalidParameter(field));
        }

        let session = {
            let mut registry = lock(&self.inner.registry);
            let max = self.inner.config.max_sockets;
            if registry.len() >= max {
                tracing::error!("Maximum socket limit reached: {}", max);
                return Err(TransportError::SocketLimit { max });
            }
            let session = Arc::new(Session::new(self.inner.allocate_id(), info));
            registry.insert(Arc::clone(&session));
            session
        };
        lock(&self.inner.stats).sockets_created += 1;

        tracing::info!(
            socket = %session.id,
            session = %session.info.name,
            channel = %session.channel,
            "Created socket"
        );
        Ok(session.id)
    }

    /// Start accepting connections for an Idle socket.
    ///
    /// Reserves the first usable port in the scan window and spawns the
    /// accept thread. Each accepted connection becomes a new Connected
    /// session that shares `listener`. QoS requirements are logged only.
    ///
    /// # Errors
    ///
    /// - `TransportError::UnknownSocket`, `TransportError::InvalidState`
    /// - `TransportError::NoFreePort` if the window is exhausted
    /// - `TransportError::AlreadyListening` if another socket with the same
    ///   name is listening
    /// - `TransportError::Io` if the listener or thread cannot be set up
    pub fn listen(
        &self,
        socket: SocketId,
        qos: &[QosTv],
        listener: Arc<dyn SocketListener>,
    ) -> Result<(), TransportError> {
        let session = self.inner.session(socket)?;
        session.begin(SocketState::Listening).map_err(|state| {
            tracing::error!(%socket, ?state, "Socket not in IDLE state");
            TransportError::InvalidState { socket, state, expected: "Idle" }
        })?;
        tracing::debug!(%socket, ?qos, "Listen QoS requirements");

        let config = &self.inner.config;
        let reserved = lock(&self.inner.ports).reserve(config.local_ip);
        let Some((port, tcp)) = reserved else {
            session.abort();
            tracing::error!(%socket, "No available ports");
            return Err(TransportError::NoFreePort { base: config.base_port, window: config.port_window });
        };

        let addr = match tcp.set_nonblocking(true).and_then(|()| tcp.local_addr()) {
            Ok(addr) => addr,
            Err(e) => {
                self.inner.release_port(port);
                session.abort();
                return Err(e.into());
            },
        };

        let name = session.info.name.clone();
        if !lock(&self.inner.registry).add_server(&name, ServerEntry { socket, addr }) {
            self.inner.release_port(port);
            session.abort();
            tracing::error!(%socket, session = %name, "Session name already listening");
            return Err(TransportError::AlreadyListening(name));
        }

        session.set_listening(listener, addr, port);
        session.set_running();

        let inner = Arc::clone(&self.inner);
        let worker = Arc::clone(&session);
        let spawned = thread::Builder::new()
            .name(format!("softbus-accept-{socket}"))
            .spawn(move || inner.accept_loop(&worker, &tcp));

        match spawned {
            Ok(handle) => session.start_worker(handle),
            Err(e) => {
                // Leave the session registered but Closed; shutdown() cleans up.
                self.inner.close_locally(&session);
                tracing::error!(%socket, error = %e, "Failed to spawn accept thread");
                return Err(e.into());
            },
        }

        tracing::info!("Socket {} listening on port {}", socket, port);
        Ok(())
    }

    /// Connect an Idle socket to the server listening as `info.peer_name`.
    ///
    /// On success the session is Bound, its receive thread is running, and
    /// `listener.on_bind` has been called on this thread. Returns the
    /// socket id.
    ///
    /// # Errors
    ///
    /// - `TransportError::UnknownSocket`, `TransportError::InvalidState`
    /// - `TransportError::NoServer` if nobody listens under the peer name
    /// - `TransportError::Connect` if the TCP connect fails
    /// - `TransportError::Io` if the stream or thread cannot be set up
    pub fn bind(
        &self,
        socket: SocketId,
        qos: &[QosTv],
        listener: Arc<dyn SocketListener>,
    ) -> Result<SocketId, TransportError> {
        let session = self.inner.session(socket)?;
        session.begin(SocketState::Bound).map_err(|state| {
            tracing::error!(%socket, ?state, "Socket not in IDLE state");
            TransportError::InvalidState { socket, state, expected: "Idle" }
        })?;
        tracing::debug!(%socket, ?qos, "Bind QoS requirements");

        let peer_name = &session.info.peer_name;
        let server = lock(&self.inner.registry).server(peer_name);
        let Some(server) = server else {
            session.abort();
            tracing::error!(%socket, peer = %peer_name, "No server listening for peer");
            return Err(TransportError::NoServer(peer_name.clone()));
        };

        let stream = match self.inner.connect(server.addr) {
            Ok(stream) => stream,
            Err(source) => {
                session.abort();
                tracing::error!("Failed to connect to TCP server {}: {}", server.addr, source);
                return Err(TransportError::Connect { addr: server.addr, source });
            },
        };
        let reader = match self.inner.prepare_stream(&stream).and_then(|()| stream.try_clone()) {
            Ok(reader) => reader,
            Err(e) => {
                session.abort();
                return Err(e.into());
            },
        };

        session.set_bound(Arc::clone(&listener), stream);
        lock(&self.inner.stats).active_connections += 1;

        if let Err(e) = self.inner.spawn_receiver(&session, reader) {
            self.inner.close_locally(&session);
            tracing::error!(%socket, error = %e, "Failed to spawn receive thread");
            return Err(e.into());
        }

        listener.on_bind(socket, &session.info.peer_info());
        tracing::info!("Socket {} bound to {}", socket, server.addr);
        Ok(socket)
    }

    /// Send a byte payload. Returns the payload length.
    ///
    /// # Errors
    ///
    /// - `TransportError::InvalidParameter` for an empty payload
    /// - `TransportError::PayloadTooLarge` above the send ceiling
    /// - `TransportError::UnknownSocket`, `TransportError::InvalidState`
    /// - `TransportError::SendFailed` if the frame was not written in full
    pub fn send_bytes(&self, socket: SocketId, data: &[u8]) -> Result<usize, TransportError> {
        self.inner.send(socket, DataKind::Bytes, data, None)
    }

    /// Send a message payload. Returns the payload length.
    ///
    /// # Errors
    ///
    /// Same as [`SoftbusTransport::send_bytes`].
    pub fn send_message(&self, socket: SocketId, data: &[u8]) -> Result<usize, TransportError> {
        self.inner.send(socket, DataKind::Message, data, None)
    }

    /// Send one stream frame with its metadata.
    ///
    /// `ext` is accepted for interface parity and not transmitted.
    ///
    /// # Errors
    ///
    /// Same as [`SoftbusTransport::send_bytes`].
    pub fn send_stream(
        &self,
        socket: SocketId,
        data: &[u8],
        ext: Option<&[u8]>,
        frame: &StreamFrameInfo,
    ) -> Result<(), TransportError> {
        if let Some(ext) = ext {
            tracing::trace!(%socket, ext_len = ext.len(), "Stream extension not transmitted");
        }
        self.inner.send(socket, DataKind::Stream, data, Some(frame)).map(|_| ())
    }

    /// Close a socket and forget it. Idempotent.
    ///
    /// Stops the session's thread, closes the OS socket, releases its port
    /// and drops its name and key mappings. Shutting down a listening
    /// socket also shuts down every connection it accepted. The session's
    /// listener is not called back.
    pub fn shutdown(&self, socket: SocketId) {
        let (session, accepted) = {
            let mut registry = lock(&self.inner.registry);
            let Some(session) = registry.remove(socket) else {
                tracing::debug!(%socket, "Shutdown of unknown socket");
                return;
            };
            (session, registry.accepted_by(socket))
        };

        for child in accepted {
            self.shutdown(child);
        }
        self.inner.close_locally(&session);
        tracing::info!("Socket {} shutdown", socket);
    }

    /// QoS evaluation. Always succeeds; requirements are only logged.
    pub fn evaluate_qos(&self, peer_network_id: &str, data_type: TransDataType, qos: &[QosTv]) {
        tracing::info!(peer = peer_network_id, ?data_type, ?qos, "EvaluateQos");
    }

    /// Snapshot of a live session.
    pub fn socket_info(&self, socket: SocketId) -> Option<SessionInfo> {
        lock(&self.inner.registry).get(socket).map(|s| s.snapshot())
    }

    /// Returns true if `socket` names a live session.
    pub fn is_socket_valid(&self, socket: SocketId) -> bool {
        lock(&self.inner.registry).get(socket).is_some()
    }

    /// Socket most recently created with this name and peer network id.
    pub fn socket_for_session(&self, name: &str, peer_network_id: &str) -> Option<SocketId> {
        lock(&self.inner.registry).by_key(name, peer_network_id)
    }

    /// Channel a session name maps to.
    pub fn channel_type_of(name: &str) -> ChannelType {
        ChannelType::from_session_name(name)
    }

    /// Counter snapshot.
    pub fn statistics(&self) -> TransportStatistics {
        *lock(&self.inner.stats)
    }

    /// Zero the counters.
    pub fn reset_statistics(&self) {
        lock(&self.inner.stats).reset();
    }

    /// Observe Control-channel message and byte payloads in both directions.
    pub fn attach_sniffer(&self, sniffer: Arc<ProtocolSniffer>) {
        *self.inner.sniffer.write().unwrap_or_else(PoisonError::into_inner) = Some(sniffer);
    }

    /// Pass every outgoing encoded frame through `injector` before writing.
    pub fn attach_fault_injector(&self, injector: Arc<FaultInjector>) {
        *self.inner.faults.write().unwrap_or_else(PoisonError::into_inner) = Some(injector);
    }

    /// Stop every thread, close every socket, clear all maps and reserved
    /// ports. The transport stays usable afterwards. Idempotent.
    pub fn deinitialize(&self) {
        let sessions = lock(&self.inner.registry).drain();
        if sessions.is_empty() {
            return;
        }

        let count = sessions.len();
        for session in sessions {
            self.inner.close_locally(&session);
        }
        lock(&self.inner.ports).clear();
        tracing::info!(sessions = count, "SoftBus transport deinitialized");
    }
}

impl Drop for SoftbusTransport {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

impl Inner {
    fn allocate_id(&self) -> SocketId {
        SocketId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn session(&self, socket: SocketId) -> Result<Arc<Session>, TransportError> {
        lock(&self.registry).get(socket).ok_or_else(|| {
            tracing::error!("Invalid socket ID: {}", socket);
            TransportError::UnknownSocket(socket)
        })
    }

    fn sniffer(&self) -> Option<Arc<ProtocolSniffer>> {
        self.sniffer.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn fault_injector(&self) -> Option<Arc<FaultInjector>> {
        self.faults.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn release_port(&self, port: u16) {
        lock(&self.ports).release(port);
    }

    fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let timeout = self.config.socket_timeout;
        if timeout.is_zero() {
            TcpStream::connect(addr)
        } else {
            TcpStream::connect_timeout(&addr, timeout)
        }
    }

    /// Blocking mode, no Nagle delay, bounded writes.
    fn prepare_stream(&self, stream: &TcpStream) -> io::Result<()> {
        let timeout = self.config.socket_timeout;
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout((!timeout.is_zero()).then_some(timeout))
    }

    /// Stop the session's thread, close its socket, return its port and
    /// account for the dropped connection.
    fn close_locally(&self, session: &Session) {
        session.stop();
        if let Some(port) = session.take_reserved_port() {
            self.release_port(port);
        }
        if session.mark_closed() {
            let mut stats = lock(&self.stats);
            stats.active_connections = stats.active_connections.saturating_sub(1);
        }
    }

    /// Peer went away or sent garbage: close and tell the listener.
    fn close_from_peer(&self, session: &Session) {
        session.close_socket();
        if session.mark_closed() {
            let mut stats = lock(&self.stats);
            stats.active_connections = stats.active_connections.saturating_sub(1);
        }
        if let Some(listener) = session.listener() {
            listener.on_shutdown(session.id, ShutdownReason::Peer);
        }
    }

    fn spawn_receiver(self: &Arc<Self>, session: &Arc<Session>, reader: TcpStream) -> io::Result<()> {
        session.set_running();
        self.start_receiver(session, reader)
    }

    /// Start the receive thread without touching the running flag. A session
    /// stopped before this point gets a thread that exits at once.
    fn start_receiver(self: &Arc<Self>, session: &Arc<Session>, reader: TcpStream) -> io::Result<()> {
        let inner = Arc::clone(self);
        let worker = Arc::clone(session);
        let handle = thread::Builder::new()
            .name(format!("softbus-recv-{}", session.id))
            .spawn(move || inner.receive_loop(&worker, reader))?;
        session.start_worker(handle);
        Ok(())
    }

    fn accept_loop(self: &Arc<Self>, parent: &Arc<Session>, listener: &TcpListener) {
        tracing::info!("Accept thread started for socket {}", parent.id);

        while parent.is_running() {
            match listener.accept() {
                Ok((stream, peer)) => self.adopt(parent, stream, peer),
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => {
                    if parent.is_running() {
                        tracing::error!("Accept failed for socket {}: {}", parent.id, e);
                    }
                    break;
                },
            }
        }

        tracing::info!("Accept thread ended for socket {}", parent.id);
    }

    /// Register an accepted connection as a Connected session and start its
    /// receive loop. `on_bind` fires before any data callback.
    ///
    /// The parent is checked under the registry lock: `shutdown` removes it
    /// and collects its children in one critical section, so a connection
    /// is either adopted in time to be cascaded or dropped here.
    fn adopt(self: &Arc<Self>, parent: &Session, stream: TcpStream, peer: SocketAddr) {
        let reader = match self.prepare_stream(&stream).and_then(|()| stream.try_clone()) {
            Ok(reader) => reader,
            Err(e) => {
                tracing::warn!(socket = %parent.id, %peer, error = %e, "Dropping accepted connection");
                return;
            },
        };

        let child = {
            let mut registry = lock(&self.registry);
            if !parent.is_running() || registry.get(parent.id).is_none() {
                tracing::debug!(socket = %parent.id, %peer, "Listener shutting down, dropping connection");
                return;
            }
            if registry.len() >= self.config.max_sockets {
                tracing::warn!(socket = %parent.id, %peer, "Maximum socket limit reached, rejecting connection");
                return;
            }
            let child = Arc::new(Session::accepted(self.allocate_id(), parent, stream));
            registry.insert_accepted(Arc::clone(&child));
            child
        };
        lock(&self.stats).active_connections += 1;
        tracing::info!("Accepted connection from {} as socket {}", peer, child.id);

        if let Some(listener) = child.listener().filter(|_| child.is_running()) {
            listener.on_bind(child.id, &child.info.peer_info());
        }

        if let Err(e) = self.start_receiver(&child, reader) {
            tracing::error!(socket = %child.id, error = %e, "Failed to spawn receive thread");
            lock(&self.registry).remove(child.id);
            self.close_locally(&child);
        }
    }

    fn receive_loop(&self, session: &Session, mut reader: TcpStream) {
        tracing::debug!(socket = %session.id, "Receive thread started");
        let max_payload = self.config.max_payload_size;

        while session.is_running() {
            match wire::read_packet(&mut reader, max_payload) {
                Ok(packet) => self.dispatch(session, &packet),
                Err(e) => {
                    if session.is_running() {
                        if e.is_protocol_violation() {
                            lock(&self.stats).receive_errors += 1;
                            tracing::warn!(socket = %session.id, error = %e, "Invalid frame, closing session");
                        } else {
                            tracing::info!(socket = %session.id, "Connection closed by peer: {}", e);
                        }
                        self.close_from_peer(session);
                    }
                    break;
                },
            }
        }

        tracing::debug!(socket = %session.id, "Receive thread ended");
    }

    fn dispatch(&self, session: &Session, packet: &Packet) {
        let socket = session.id;
        let payload = &packet.payload[..];

        if self.config.enable_data_check && !packet.header.verify_checksum(payload) {
            lock(&self.stats).receive_errors += 1;
            tracing::warn!(%socket, sequence = packet.header.sequence(), "Checksum mismatch, dropping packet");
            return;
        }

        let Some(kind) = packet.header.kind() else {
            lock(&self.stats).receive_errors += 1;
            tracing::warn!(%socket, "Unknown data type: {}", packet.header.data_type());
            return;
        };

        lock(&self.stats).record_received(packet.wire_len());
        tracing::trace!(%socket, ?kind, len = payload.len(), "Packet received");

        let Some(listener) = session.listener() else {
            return;
        };
        match kind {
            DataKind::Message => {
                self.sniff(session, |s| s.monitor_incoming_packet(payload));
                listener.on_message(socket, payload);
            },
            DataKind::Bytes => {
                self.sniff(session, |s| s.monitor_incoming_packet(payload));
                listener.on_bytes(socket, payload);
            },
            DataKind::Stream => {
                let frame = packet.extension.as_ref().map(StreamFrameInfo::from).unwrap_or_default();
                listener.on_stream(socket, payload, None, &frame);
            },
        }
    }

    /// Run the sniffer on Control-channel traffic only.
    fn sniff(&self, session: &Session, observe: impl FnOnce(&ProtocolSniffer) -> bool) {
        if session.channel != ChannelType::Control {
            return;
        }
        if let Some(sniffer) = self.sniffer()
            && !observe(&sniffer)
        {
            tracing::debug!(socket = %session.id, "Sniffer flagged control payload");
        }
    }

    fn send(
        &self,
        socket: SocketId,
        kind: DataKind,
        data: &[u8],
        frame: Option<&StreamFrameInfo>,
    ) -> Result<usize, TransportError> {
        if data.is_empty() {
            tracing::error!(%socket, "Invalid data parameters");
            return Err(TransportError::InvalidParameter("data"));
        }
        let max = self.config.send_buffer_size;
        if data.len() > max {
            return Err(TransportError::PayloadTooLarge { size: data.len(), max });
        }

        let session = self.session(socket)?;
        let state = session.state();
        if !state.can_send() {
            tracing::error!(%socket, ?state, "Socket not bound");
            return Err(TransportError::InvalidState { socket, state, expected: "Bound or Connected" });
        }

        let sequence = session.next_sequence();
        let check = self.config.enable_data_check;
        let payload = Bytes::copy_from_slice(data);
        let packet = match frame {
            Some(frame) => Packet::stream(sequence, payload, StreamExtension::from(frame), check),
            None => Packet::new(kind, sequence, payload, check),
        };

        if kind != DataKind::Stream {
            self.sniff(&session, |s| s.monitor_outgoing_packet(data));
        }

        let mut encoded = BytesMut::with_capacity(packet.wire_len());
        packet.encode(&mut encoded)?;
        let mut frame_buf = DataBuffer::from(encoded);

        if let Some(injector) = self.fault_injector() {
            match injector.inject_fault(frame_buf) {
                Some(buf) => frame_buf = buf,
                None => {
                    tracing::debug!(%socket, sequence, "Frame dropped by fault injector");
                    return Ok(data.len());
                },
            }
        }

        if let Err(e) = session.write_frame(frame_buf.data()) {
            lock(&self.stats).send_errors += 1;
            tracing::error!(%socket, error = %e, "Failed to send packet");
            return Err(TransportError::SendFailed(e));
        }

        lock(&self.stats).record_sent(frame_buf.size());
        tracing::trace!(%socket, ?kind, sequence, len = data.len(), "Packet sent");
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base_port: u16) -> SoftbusTransport {
        SoftbusTransport::new(TransportConfig::with_base_port(base_port).max_sockets(3))
    }

    fn info(name: &str) -> SocketInfo {
        SocketInfo::new(name, "DCameraSourceControl", "TEST_PEER_001", "ohos.dhardware.dcamera")
    }

    struct Quiet;
    impl SocketListener for Quiet {}

    #[test]
    fn ids_start_at_first_socket_id_and_stop_at_ceiling() {
        let transport = transport(53_000);
        let ids: Vec<_> = (0..3).map(|i| transport.socket(info(&format!("s{i}"))).unwrap()).collect();
        assert_eq!(ids.iter().map(|id| id.get()).collect::<Vec<_>>(), vec![100, 101, 102]);

        let err = transport.socket(info("s3")).unwrap_err();
        assert!(matches!(err, TransportError::SocketLimit { max: 3 }));
        assert_eq!(transport.statistics().sockets_created, 3);
    }

    #[test]
    fn empty_fields_are_rejected() {
        let transport = transport(53_010);
        let err = transport.socket(SocketInfo::new("a", "b", "", "d")).unwrap_err();
        assert!(matches!(err, TransportError::InvalidParameter("peer_network_id")));
        assert_eq!(transport.statistics().sockets_created, 0);
    }

    #[test]
    fn session_key_and_channel_lookup() {
        let transport = transport(53_020);
        let id = transport.socket(info("DCameraSinkSnapshot")).unwrap();

        assert_eq!(transport.socket_for_session("DCameraSinkSnapshot", "TEST_PEER_001"), Some(id));
        let snapshot = transport.socket_info(id).unwrap();
        assert_eq!(snapshot.channel_type, ChannelType::Snapshot);
        assert_eq!(snapshot.state, SocketState::Idle);
        assert_eq!(SoftbusTransport::channel_type_of("whatever"), ChannelType::Control);
    }

    #[test]
    fn send_requires_connected_socket() {
        let transport = transport(53_030);
        let id = transport.socket(info("DCameraSinkControl")).unwrap();

        assert!(matches!(transport.send_bytes(id, b"x"), Err(TransportError::InvalidState { .. })));
        assert!(matches!(transport.send_bytes(id, b""), Err(TransportError::InvalidParameter(_))));
        assert!(matches!(
            transport.send_message(SocketId::new(999), b"x"),
            Err(TransportError::UnknownSocket(_))
        ));
    }

    #[test]
    fn oversized_payload_is_rejected_before_lookup() {
        let transport =
            SoftbusTransport::new(TransportConfig::with_base_port(53_040).max_payload_size(8));
        let err = transport.send_bytes(SocketId::new(100), &[0; 9]).unwrap_err();
        assert!(matches!(err, TransportError::PayloadTooLarge { size: 9, max: 8 }));
    }

    #[test]
    fn listen_is_only_valid_from_idle() {
        let transport = transport(53_050);
        let id = transport.socket(info("DCameraSinkControl")).unwrap();
        transport.listen(id, &[], Arc::new(Quiet)).unwrap();

        let err = transport.listen(id, &[], Arc::new(Quiet)).unwrap_err();
        assert!(matches!(err, TransportError::InvalidState { state: SocketState::Listening, .. }));
        let err = transport.bind(id, &[], Arc::new(Quiet)).unwrap_err();
        assert!(matches!(err, TransportError::InvalidState { .. }));
    }

    #[test]
    fn shutdown_removes_session_and_frees_ceiling() {
        let transport = transport(53_060);
        let ids: Vec<_> = (0..3).map(|i| transport.socket(info(&format!("s{i}"))).unwrap()).collect();

        transport.shutdown(ids[0]);
        transport.shutdown(ids[0]);
        assert!(!transport.is_socket_valid(ids[0]));
        assert_eq!(transport.socket_for_session("s0", "TEST_PEER_001"), None);

        let next = transport.socket(info("s3")).unwrap();
        assert_eq!(next.get(), 103);
    }

    #[test]
    fn deinitialize_clears_everything_and_stays_usable() {
        let transport = transport(53_070);
        let id = transport.socket(info("DCameraSinkControl")).unwrap();
        transport.listen(id, &[], Arc::new(Quiet)).unwrap();

        transport.deinitialize();
        assert!(!transport.is_socket_valid(id));

        let again = transport.socket(info("DCameraSinkControl")).unwrap();
        transport.listen(again, &[], Arc::new(Quiet)).unwrap();
        assert_eq!(transport.socket_info(again).unwrap().state, SocketState::Listening);
    }
}
