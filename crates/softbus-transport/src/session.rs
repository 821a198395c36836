//! Sessions: public identity types and the per-socket runtime state.

use std::{
    fmt,
    io::{self, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    thread::{self, JoinHandle},
};

use softbus_proto::ChannelType;

use crate::{
    listener::{PeerSocketInfo, SocketListener, TransDataType},
    lock,
};

/// First id handed out by a transport.
pub const FIRST_SOCKET_ID: u32 = 100;

/// Socket handle. Ids increase monotonically and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u32);

impl SocketId {
    /// Wrap a raw id.
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw id.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters for creating a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketInfo {
    /// Local session name; its channel suffix selects the channel type
    pub name: String,
    /// Session name of the peer to bind to
    pub peer_name: String,
    /// Peer network id
    pub peer_network_id: String,
    /// Package name
    pub pkg_name: String,
    /// Declared data type
    pub data_type: TransDataType,
}

impl SocketInfo {
    /// Socket parameters with the default data type.
    pub fn new(
        name: impl Into<String>,
        peer_name: impl Into<String>,
        peer_network_id: impl Into<String>,
        pkg_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            peer_name: peer_name.into(),
            peer_network_id: peer_network_id.into(),
            pkg_name: pkg_name.into(),
            data_type: TransDataType::default(),
        }
    }

    /// Set the declared data type.
    #[must_use]
    pub fn with_data_type(mut self, data_type: TransDataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub(crate) fn first_empty_field(&self) -> Option<&'static str> {
        [
            ("name", &self.name),
            ("peer_name", &self.peer_name),
            ("peer_network_id", &self.peer_network_id),
            ("pkg_name", &self.pkg_name),
        ]
        .into_iter()
        .find_map(|(field, value)| value.is_empty().then_some(field))
    }

    pub(crate) fn peer_info(&self) -> PeerSocketInfo {
        PeerSocketInfo {
            name: self.peer_name.clone(),
            network_id: self.peer_network_id.clone(),
            pkg_name: self.pkg_name.clone(),
            data_type: self.data_type,
        }
    }
}

/// Session state machine.
///
/// `Idle -> Listening` or `Idle -> Bound`; accepted connections start in
/// `Connected`. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketState {
    /// Created, not yet listening or bound
    Idle,
    /// Accepting connections
    Listening,
    /// Connected as a client
    Bound,
    /// Connected as the server side of an accepted connection
    Connected,
    /// Ended
    Closed,
}

impl SocketState {
    /// Returns true if frames may be sent.
    pub fn can_send(self) -> bool {
        matches!(self, Self::Bound | Self::Connected)
    }
}

/// Snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Socket id
    pub id: SocketId,
    /// Creation parameters
    pub info: SocketInfo,
    /// Channel derived from the name
    pub channel_type: ChannelType,
    /// Current state
    pub state: SocketState,
    /// Local address once listening or connected
    pub local_addr: Option<SocketAddr>,
    /// Remote address once connected
    pub peer_addr: Option<SocketAddr>,
    /// Listening session that accepted this connection
    pub accepted_by: Option<SocketId>,
}

struct Link {
    state: SocketState,
    listener: Option<Arc<dyn SocketListener>>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    reserved_port: Option<u16>,
}

/// Runtime state of one socket.
///
/// `link` guards state and addressing, `writer` is the per-socket send path,
/// and `worker` is the accept or receive thread.
pub(crate) struct Session {
    pub(crate) id: SocketId,
    pub(crate) info: SocketInfo,
    pub(crate) channel: ChannelType,
    pub(crate) accepted_by: Option<SocketId>,
    link: Mutex<Link>,
    writer: Mutex<Option<TcpStream>>,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    sequence: AtomicU32,
}

impl Session {
    pub(crate) fn new(id: SocketId, info: SocketInfo) -> Self {
        let channel = ChannelType::from_session_name(&info.name);
        Self::with_state(id, info, channel, SocketState::Idle, None)
    }

    /// Server side of a connection accepted by `parent`. Starts out running
    /// so that a stop issued before its receive thread exists sticks.
    pub(crate) fn accepted(id: SocketId, parent: &Session, stream: TcpStream) -> Self {
        let session = Self::with_state(
            id,
            parent.info.clone(),
            parent.channel,
            SocketState::Connected,
            Some(parent.id),
        );
        {
            let mut link = lock(&session.link);
            link.listener = parent.listener();
            link.local_addr = stream.local_addr().ok();
            link.peer_addr = stream.peer_addr().ok();
        }
        *lock(&session.writer) = Some(stream);
        session.set_running();
        session
    }

    fn with_state(
        id: SocketId,
        info: SocketInfo,
        channel: ChannelType,
        state: SocketState,
        accepted_by: Option<SocketId>,
    ) -> Self {
        Self {
            id,
            info,
            channel,
            accepted_by,
            link: Mutex::new(Link {
                state,
                listener: None,
                local_addr: None,
                peer_addr: None,
                reserved_port: None,
            }),
            writer: Mutex::new(None),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
            sequence: AtomicU32::new(0),
        }
    }

    pub(crate) fn state(&self) -> SocketState {
        lock(&self.link).state
    }

    pub(crate) fn listener(&self) -> Option<Arc<dyn SocketListener>> {
        lock(&self.link).listener.clone()
    }

    pub(crate) fn snapshot(&self) -> SessionInfo {
        let link = lock(&self.link);
        SessionInfo {
            id: self.id,
            info: self.info.clone(),
            channel_type: self.channel,
            state: link.state,
            local_addr: link.local_addr,
            peer_addr: link.peer_addr,
            accepted_by: self.accepted_by,
        }
    }

    /// Claim the Idle -> `next` transition. Fails with the current state if
    /// the session is not Idle.
    pub(crate) fn begin(&self, next: SocketState) -> Result<(), SocketState> {
        let mut link = lock(&self.link);
        if link.state != SocketState::Idle {
            return Err(link.state);
        }
        link.state = next;
        Ok(())
    }

    /// Undo a claimed transition whose setup failed.
    pub(crate) fn abort(&self) {
        let mut link = lock(&self.link);
        link.state = SocketState::Idle;
        link.listener = None;
        link.reserved_port = None;
        link.local_addr = None;
        link.peer_addr = None;
    }

    pub(crate) fn set_listening(
        &self,
        listener: Arc<dyn SocketListener>,
        local_addr: SocketAddr,
        port: u16,
    ) {
        let mut link = lock(&self.link);
        link.listener = Some(listener);
        link.local_addr = Some(local_addr);
        link.reserved_port = Some(port);
    }

    pub(crate) fn set_bound(&self, listener: Arc<dyn SocketListener>, stream: TcpStream) {
        {
            let mut link = lock(&self.link);
            link.listener = Some(listener);
            link.local_addr = stream.local_addr().ok();
            link.peer_addr = stream.peer_addr().ok();
        }
        *lock(&self.writer) = Some(stream);
    }

    /// Move to Closed. Returns true if the session was connected, so the
    /// caller can account for the dropped connection exactly once.
    pub(crate) fn mark_closed(&self) -> bool {
        let mut link = lock(&self.link);
        let was_connected = link.state.can_send();
        link.state = SocketState::Closed;
        was_connected
    }

    pub(crate) fn take_reserved_port(&self) -> Option<u16> {
        lock(&self.link).reserved_port.take()
    }

    pub(crate) fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Write a whole frame on the send path.
    pub(crate) fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut writer = lock(&self.writer);
        let stream = writer.as_mut().ok_or(io::ErrorKind::NotConnected)?;
        stream.write_all(frame)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn start_worker(&self, handle: JoinHandle<()>) {
        *lock(&self.worker) = Some(handle);
    }

    pub(crate) fn set_running(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// Close the OS socket without touching the worker.
    pub(crate) fn close_socket(&self) {
        if let Some(stream) = lock(&self.writer).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Stop the worker thread and close the OS socket.
    ///
    /// Shutting the stream down wakes a receive thread blocked in `read`;
    /// accept threads poll the running flag. The worker is joined unless
    /// this is called from the worker itself.
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.close_socket();

        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                tracing::debug!(socket = %self.id, "Shutdown from own worker; not joining");
            } else if handle.join().is_err() {
                tracing::error!(socket = %self.id, "Worker thread panicked");
            }
        }
    }
}
