//! Scenario runners behind `softbus-sim`.
//!
//! Each runner builds its own transport or bus, drives it, tears it down and
//! returns a serializable report.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use serde::Serialize;
use softbus_proto::{ChannelType, DataBuffer};
use softbus_tap::{
    FaultInjectionConfig, FaultInjector, FaultKind, FaultStatistics, ProtocolSniffer,
    SnifferStatistics,
};
use softbus_transport::{SoftbusTransport, StreamFrameInfo, TransportConfig, TransportStatistics};
use softbus_vbus::{BusConfig, BusContext, BusError, RegionBackend, VirtualBus, WaitTimeout};

use crate::{error::HarnessError, fixture::LoopbackPair, recorder::SocketEvent};

/// How long the receiving side may go without a delivery before a run is
/// cut short.
const STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between retries of a send refused by back-pressure.
const RETRY_BACKOFF: Duration = Duration::from_millis(1);

/// Every thirtieth stream frame is an I-frame.
const I_FRAME_INTERVAL: usize = 30;

/// Which send call a loopback run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PayloadKind {
    /// `send_bytes`
    #[default]
    Bytes,
    /// `send_message`
    Message,
    /// `send_stream`
    Stream,
}

/// Source-to-Sink traffic over loopback TCP.
#[derive(Debug, Clone)]
pub struct LoopbackScenario {
    /// Channel to run on
    pub channel: ChannelType,
    /// Send call to use
    pub kind: PayloadKind,
    /// Frames to send
    pub messages: usize,
    /// Payload bytes per frame; ignored when `sniff` is set
    pub payload_size: usize,
    /// First port of the scan window
    pub base_port: u16,
    /// Probability of dropping each outgoing frame
    pub drop_probability: f64,
    /// Fault injector seed
    pub seed: u64,
    /// Attach a sniffer and send command envelopes instead of filler bytes
    pub sniff: bool,
}

impl Default for LoopbackScenario {
    fn default() -> Self {
        Self {
            channel: ChannelType::Control,
            kind: PayloadKind::Bytes,
            messages: 100,
            payload_size: 1024,
            base_port: TransportConfig::default().base_port,
            drop_probability: 0.0,
            seed: 0,
            sniff: false,
        }
    }
}

/// Outcome of a [`LoopbackScenario`].
#[derive(Debug, Clone, Serialize)]
pub struct LoopbackReport {
    /// Channel suffix
    pub channel: String,
    /// Send call used
    pub kind: PayloadKind,
    /// Frames handed to the transport
    pub sent: usize,
    /// Frames the Sink listener saw
    pub delivered: usize,
    /// Frames delivered with the wrong kind or length
    pub mismatched: usize,
    /// Wall time from first send to last delivery
    pub elapsed_ms: u64,
    /// Transport counters at the end of the run
    pub transport: TransportStatistics,
    /// Fault injector counters
    pub faults: FaultStatistics,
    /// Sniffer counters, when sniffing
    pub sniffer: Option<SnifferStatistics>,
}

impl LoopbackReport {
    /// Frames the fault injector discarded.
    pub fn dropped(&self) -> u64 {
        self.faults.packets_dropped
    }
}

impl LoopbackScenario {
    /// Run the scenario to completion.
    ///
    /// Stops early, with a short `delivered` count, if the Sink sees
    /// nothing for [`STALL_TIMEOUT`].
    pub fn run(&self) -> Result<LoopbackReport, HarnessError> {
        if self.messages == 0 || (self.payload_size == 0 && !self.sniff) {
            return Err(HarnessError::InvalidScenario("messages and payload size must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.drop_probability) {
            return Err(HarnessError::InvalidScenario("drop probability must be within [0, 1]"));
        }

        let transport = Arc::new(SoftbusTransport::new(TransportConfig::with_base_port(self.base_port)));

        let injector = Arc::new(FaultInjector::with_seed(self.seed));
        if self.drop_probability > 0.0 {
            injector.set_config(FaultInjectionConfig::new(FaultKind::PacketDrop, self.drop_probability));
            injector.enable(true);
        }
        transport.attach_fault_injector(Arc::clone(&injector));

        let sniffer = self.sniff.then(|| {
            let sniffer = Arc::new(ProtocolSniffer::new());
            transport.attach_sniffer(Arc::clone(&sniffer));
            sniffer
        });

        let pair = LoopbackPair::open_on(Arc::clone(&transport), self.channel)?;
        tracing::info!(
            channel = %self.channel,
            kind = ?self.kind,
            messages = self.messages,
            "Loopback scenario started"
        );

        let start = Instant::now();
        for seq in 0..self.messages {
            let payload = self.payload(seq);
            match self.kind {
                PayloadKind::Bytes => {
                    transport.send_bytes(pair.client, &payload)?;
                },
                PayloadKind::Message => {
                    transport.send_message(pair.client, &payload)?;
                },
                PayloadKind::Stream => {
                    transport.send_stream(pair.client, &payload, None, &frame_info(seq))?;
                },
            }
        }

        let expected = self.messages - injector.statistics().packets_dropped as usize;
        let mut delivered = 0;
        let mut mismatched = 0;
        while delivered < expected {
            let Some(event) = pair.sink.wait_data(STALL_TIMEOUT) else {
                tracing::warn!(delivered, expected, "Sink stalled, ending run");
                break;
            };
            if !self.matches_sent(&event) {
                mismatched += 1;
            }
            delivered += 1;
        }
        let elapsed = start.elapsed();

        drop(pair);
        let report = LoopbackReport {
            channel: self.channel.suffix().to_owned(),
            kind: self.kind,
            sent: self.messages,
            delivered,
            mismatched,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            transport: transport.statistics(),
            faults: injector.statistics(),
            sniffer: sniffer.map(|s| s.statistics()),
        };
        transport.deinitialize();

        tracing::info!(delivered, dropped = report.dropped(), "Loopback scenario finished");
        Ok(report)
    }

    /// Payload of frame `seq`: a command envelope when sniffing, otherwise
    /// filler bytes offset by the sequence.
    fn payload(&self, seq: usize) -> Vec<u8> {
        if self.sniff {
            return format!(r#"{{"Type":"OPERATION","dhId":"camera_{seq}","Command":"CAPTURE"}}"#)
                .into_bytes();
        }
        (0..self.payload_size).map(|i| (seq + i) as u8).collect()
    }

    /// Whether a delivered event has the kind and shape this run sends.
    fn matches_sent(&self, event: &SocketEvent) -> bool {
        let expected_len = if self.sniff { None } else { Some(self.payload_size) };
        let (data, kind_ok) = match event {
            SocketEvent::Bytes { data, .. } => (data, self.kind == PayloadKind::Bytes),
            SocketEvent::Message { data, .. } => (data, self.kind == PayloadKind::Message),
            SocketEvent::Stream { data, .. } => (data, self.kind == PayloadKind::Stream),
            _ => return false,
        };
        kind_ok && expected_len.is_none_or(|len| data.len() == len)
    }
}

fn frame_info(seq: usize) -> StreamFrameInfo {
    StreamFrameInfo {
        frame_type: i32::from(seq % I_FRAME_INTERVAL == 0),
        time_stamp: seq as i64,
        seq_num: seq as i32,
        ..StreamFrameInfo::default()
    }
}

/// One producer thread pushing through a virtual bus to one consumer.
#[derive(Debug, Clone)]
pub struct VbusScenario {
    /// Channel name
    pub name: String,
    /// Messages to push
    pub messages: usize,
    /// Payload bytes per message
    pub payload_size: usize,
    /// Ring capacity in bytes
    pub buffer_size: usize,
    /// Write slots
    pub max_messages: usize,
    /// Where the ring lives
    pub backend: RegionBackend,
}

impl Default for VbusScenario {
    fn default() -> Self {
        let config = BusConfig::default();
        Self {
            name: config.name,
            messages: 1000,
            payload_size: 1024,
            buffer_size: config.buffer_size,
            max_messages: config.max_messages,
            backend: config.backend,
        }
    }
}

/// Outcome of a [`VbusScenario`].
#[derive(Debug, Clone, Serialize)]
pub struct VbusReport {
    /// Channel name
    pub name: String,
    /// Messages pushed
    pub sent: usize,
    /// Messages the consumer received
    pub received: usize,
    /// Received messages whose payload differed from what was sent
    pub mismatched: usize,
    /// Payload bytes received
    pub bytes: u64,
    /// Wall time of the run
    pub elapsed_ms: u64,
    /// Payload throughput
    pub throughput_mib_s: f64,
    /// Highest usage the consumer observed
    pub peak_usage: f64,
    /// Usage once the consumer finished
    pub final_usage: f64,
}

impl VbusScenario {
    /// Run the scenario to completion.
    pub fn run(&self) -> Result<VbusReport, HarnessError> {
        if self.messages == 0 || self.payload_size == 0 {
            return Err(HarnessError::InvalidScenario("messages and payload size must be non-zero"));
        }

        let context = BusContext::new();
        let config = BusConfig::named(self.name.clone())
            .with_buffer_size(self.buffer_size)
            .with_max_messages(self.max_messages)
            .with_backend(self.backend.clone())
            .with_send_timeout(WaitTimeout::Bounded(Duration::from_secs(1)));

        let mut producer = VirtualBus::new(&context, config.clone());
        producer.initialize()?;
        let mut consumer = VirtualBus::new(&context, config);
        consumer.initialize()?;
        if self.payload_size > consumer.max_payload_size() {
            return Err(HarnessError::InvalidScenario("payload does not fit in the ring"));
        }

        tracing::info!(name = %self.name, messages = self.messages, "Virtual bus scenario started");
        let start = Instant::now();

        let (messages, size) = (self.messages, self.payload_size);
        let handle = thread::Builder::new()
            .name("vbus-producer".to_owned())
            .spawn(move || produce(producer, messages, size))?;

        let mut received = 0;
        let mut mismatched = 0;
        let mut bytes = 0u64;
        let mut peak_usage = 0.0f64;
        while received < messages {
            peak_usage = peak_usage.max(consumer.buffer_usage());
            if !consumer.wait_for_data(WaitTimeout::Bounded(STALL_TIMEOUT)) {
                tracing::warn!(received, "Consumer stalled, ending run");
                break;
            }
            if let Some(buffer) = consumer.receive_data() {
                if buffer.data() != pattern(received, size).as_slice() {
                    mismatched += 1;
                }
                bytes += buffer.size() as u64;
                received += 1;
            }
        }
        let elapsed = start.elapsed();
        let final_usage = consumer.buffer_usage();

        let mut producer = handle.join().map_err(|_| HarnessError::WorkerPanicked("vbus-producer"))??;
        producer.destroy();
        consumer.destroy();

        let secs = elapsed.as_secs_f64();
        let throughput_mib_s = if secs > 0.0 { bytes as f64 / secs / (1024.0 * 1024.0) } else { 0.0 };
        tracing::info!(received, throughput_mib_s, "Virtual bus scenario finished");

        Ok(VbusReport {
            name: self.name.clone(),
            sent: self.messages,
            received,
            mismatched,
            bytes,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            throughput_mib_s,
            peak_usage,
            final_usage,
        })
    }
}

fn pattern(seq: usize, size: usize) -> Vec<u8> {
    (0..size).map(|i| (seq.wrapping_mul(31) + i) as u8).collect()
}

/// Push `messages` patterned payloads. Back-pressure is retried until the
/// consumer has made no room for [`STALL_TIMEOUT`]. Returns the handle so
/// the caller can destroy it.
fn produce(producer: VirtualBus, messages: usize, size: usize) -> Result<VirtualBus, BusError> {
    for seq in 0..messages {
        let buffer = DataBuffer::from_slice(&pattern(seq, size));
        let mut blocked_since = None;
        loop {
            match producer.send_data(&buffer, 0) {
                Ok(()) => break,
                Err(e)
                    if e.is_transient()
                        && blocked_since.get_or_insert_with(Instant::now).elapsed() < STALL_TIMEOUT =>
                {
                    thread::sleep(RETRY_BACKOFF);
                },
                Err(e) => return Err(e),
            }
        }
    }
    Ok(producer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_runs() {
        let scenario = LoopbackScenario { messages: 0, ..LoopbackScenario::default() };
        assert!(matches!(scenario.run(), Err(HarnessError::InvalidScenario(_))));

        let scenario = VbusScenario { payload_size: 0, ..VbusScenario::default() };
        assert!(matches!(scenario.run(), Err(HarnessError::InvalidScenario(_))));
    }

    #[test]
    fn rejects_out_of_range_probability() {
        let scenario = LoopbackScenario { drop_probability: 1.5, ..LoopbackScenario::default() };
        assert!(matches!(scenario.run(), Err(HarnessError::InvalidScenario(_))));
    }

    #[test]
    fn every_thirtieth_frame_is_an_i_frame() {
        assert_eq!(frame_info(0).frame_type, 1);
        assert_eq!(frame_info(1).frame_type, 0);
        assert_eq!(frame_info(30).frame_type, 1);
        assert_eq!(frame_info(31).seq_num, 31);
    }

    #[test]
    fn sniffed_payloads_are_envelopes() {
        let scenario = LoopbackScenario { sniff: true, ..LoopbackScenario::default() };
        let payload = scenario.payload(3);
        assert_eq!(payload, br#"{"Type":"OPERATION","dhId":"camera_3","Command":"CAPTURE"}"#);
    }
}
