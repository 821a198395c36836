//! Loopback fixtures: a Sink server and a Source client on one channel.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU16, Ordering},
    },
    time::Duration,
};

use softbus_proto::ChannelType;
use softbus_transport::{QosTv, QosType, SocketId, SocketInfo, SoftbusTransport, TransportConfig};

use crate::{error::HarnessError, recorder::RecordingListener};

/// Session name prefix of the listening side.
pub const SINK_PREFIX: &str = "DCameraSink";

/// Session name prefix of the binding side.
pub const SOURCE_PREFIX: &str = "DCameraSource";

/// Peer network id used by every fixture.
pub const TEST_PEER_NETWORK_ID: &str = "TEST_PEER_001";

/// Package name used by every fixture.
pub const TEST_PKG_NAME: &str = "ohos.dhardware.dcamera";

/// How long a fixture waits for the accepted side's `on_bind`.
pub const BIND_TIMEOUT: Duration = Duration::from_secs(5);

/// Ports per fixture. Matches the transport's default scan window.
pub const PORT_BLOCK: u16 = 100;

const FIRST_FIXTURE_PORT: u16 = 41_000;
const FIXTURE_BLOCKS: u16 = 200;

static NEXT_BLOCK: AtomicU16 = AtomicU16::new(0);

/// Base port of the next unused block, wrapping after
/// `FIXTURE_BLOCKS` blocks.
pub fn next_base_port() -> u16 {
    let block = NEXT_BLOCK.fetch_add(1, Ordering::Relaxed) % FIXTURE_BLOCKS;
    FIRST_FIXTURE_PORT + block * PORT_BLOCK
}

/// Transport config on a fresh port block.
pub fn test_config() -> TransportConfig {
    let mut config = TransportConfig::with_base_port(next_base_port());
    config.port_window = PORT_BLOCK;
    config
}

/// `prefix` + channel suffix, e.g. `DCameraSinkControl`.
pub fn session_name(prefix: &str, channel: ChannelType) -> String {
    format!("{prefix}{}", channel.suffix())
}

/// QoS the camera service asks for: 1 Mbit/s minimum, 100 ms latency.
pub fn default_qos() -> [QosTv; 2] {
    [QosTv::new(QosType::MinBw, 1_000_000), QosTv::new(QosType::MaxLatency, 100)]
}

/// A connected Sink/Source pair on one channel.
///
/// The Sink listens as `DCameraSink<Channel>`; the Source binds as
/// `DCameraSource<Channel>` with the Sink as its peer. Both bind
/// notifications are consumed while opening, so the recorders start out
/// empty. Dropping the pair shuts down its sockets but leaves a shared
/// transport running.
#[derive(Debug)]
pub struct LoopbackPair {
    /// Transport both ends live on
    pub transport: Arc<SoftbusTransport>,
    /// Channel the pair runs on
    pub channel: ChannelType,
    /// Listening Sink socket
    pub server: SocketId,
    /// Bound Source socket
    pub client: SocketId,
    /// Sink-side socket of the accepted connection
    pub accepted: SocketId,
    /// Sink callbacks
    pub sink: Arc<RecordingListener>,
    /// Source callbacks
    pub source: Arc<RecordingListener>,
}

impl LoopbackPair {
    /// Pair on a transport of its own.
    pub fn open(channel: ChannelType) -> Result<Self, HarnessError> {
        Self::open_on(Arc::new(SoftbusTransport::new(test_config())), channel)
    }

    /// Pair on an existing transport. One pair per channel per transport.
    pub fn open_on(transport: Arc<SoftbusTransport>, channel: ChannelType) -> Result<Self, HarnessError> {
        let sink_name = session_name(SINK_PREFIX, channel);
        let source_name = session_name(SOURCE_PREFIX, channel);
        let qos = default_qos();

        let sink = RecordingListener::new();
        let server = transport.socket(SocketInfo::new(
            sink_name.clone(),
            source_name.clone(),
            TEST_PEER_NETWORK_ID,
            TEST_PKG_NAME,
        ))?;
        if let Err(e) = transport.listen(server, &qos, sink.clone()) {
            transport.shutdown(server);
            return Err(e.into());
        }

        let source = RecordingListener::new();
        let client = match transport.socket(SocketInfo::new(
            source_name,
            sink_name,
            TEST_PEER_NETWORK_ID,
            TEST_PKG_NAME,
        )) {
            Ok(client) => client,
            Err(e) => {
                transport.shutdown(server);
                return Err(e.into());
            },
        };
        if let Err(e) = transport.bind(client, &qos, source.clone()) {
            transport.shutdown(client);
            transport.shutdown(server);
            return Err(e.into());
        }

        let Some((accepted, _)) = sink.wait_bind(BIND_TIMEOUT) else {
            transport.shutdown(client);
            transport.shutdown(server);
            return Err(HarnessError::Timeout("sink on_bind"));
        };
        source.wait_bind(Duration::ZERO);

        tracing::debug!(%channel, %server, %client, %accepted, "Loopback pair open");
        Ok(Self { transport, channel, server, client, accepted, sink, source })
    }
}

impl Drop for LoopbackPair {
    fn drop(&mut self) {
        self.transport.shutdown(self.client);
        self.transport.shutdown(self.server);
    }
}
