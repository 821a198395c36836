//! Protocol consistency sniffer.
//!
//! Control-channel payloads carry a JSON command envelope:
//!
//! ```json
//! { "Type": "OPERATION", "dhId": "camera_0", "Command": "CAPTURE", ... }
//! ```
//!
//! The sniffer parses each observed payload and checks the envelope against
//! fixed allow-lists. It never modifies or blocks traffic; violations only
//! bump counters and reach the registered [`SnifferCallback`].

use std::sync::{
    Arc, Mutex, RwLock,
    atomic::{AtomicBool, Ordering},
};

use serde::Serialize;
use serde_json::Value;

use crate::lock;

/// Envelope types the sniffer accepts.
pub const SUPPORTED_TYPES: &[&str] = &["MESSAGE", "OPERATION"];

/// Protocol versions the sniffer accepts.
pub const SUPPORTED_VERSIONS: &[&str] = &["1.0", "1.1", "2.0"];

/// Known command names.
pub const SUPPORTED_COMMANDS: &[&str] = &[
    "GET_INFO",
    "CHAN_NEG",
    "UPDATE_METADATA",
    "METADATA_RESULT",
    "STATE_NOTIFY",
    "CAPTURE",
    "STOP_CAPTURE",
    "OPEN_CHANNEL",
    "CLOSE_CHANNEL",
];

/// Version assumed for this endpoint and for envelopes that carry none.
pub const LOCAL_VERSION: &str = "1.0";

/// Longest accepted `dhId`, in characters.
pub const MAX_DH_ID_LEN: usize = 256;

/// Receives protocol violations.
///
/// All methods default to no-ops so observers implement only what they need.
/// Calls arrive on whichever thread is sending or receiving.
pub trait SnifferCallback: Send + Sync {
    /// Envelope type or `dhId` is invalid.
    fn on_protocol_inconsistency(&self, message: &str, expected: &str, actual: &str) {
        let _ = (message, expected, actual);
    }

    /// Payload is not a JSON object.
    fn on_invalid_protocol_format(&self, message: &str, error: &str) {
        let _ = (message, error);
    }

    /// Envelope version is not supported.
    fn on_protocol_version_mismatch(&self, remote_version: &str, local_version: &str) {
        let _ = (remote_version, local_version);
    }

    /// Command is not in the allow-list.
    fn on_unknown_protocol_command(&self, command: &str) {
        let _ = command;
    }
}

/// Parsed command envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEnvelope {
    /// `Type` field, "OPERATION" when absent
    pub kind: String,
    /// Hardware identifier, empty when absent
    pub dh_id: String,
    /// Command name, empty when absent
    pub command: String,
    /// Protocol version (not carried on the wire; always [`LOCAL_VERSION`])
    pub version: String,
}

impl CommandEnvelope {
    /// Parse an envelope from raw payload bytes.
    ///
    /// Missing or non-string fields take their defaults. The payload itself
    /// must be UTF-8 JSON whose top level is an object.
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        if bytes.is_empty() {
            return Err("empty payload".to_owned());
        }

        let root: Value = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        let obj = root.as_object().ok_or_else(|| "envelope is not a JSON object".to_owned())?;

        let field = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_owned);

        Ok(Self {
            kind: field("Type").unwrap_or_else(|| "OPERATION".to_owned()),
            dh_id: field("dhId").unwrap_or_default(),
            command: field("Command").unwrap_or_default(),
            version: LOCAL_VERSION.to_owned(),
        })
    }
}

/// Aggregate sniffer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnifferStatistics {
    /// Packets inspected
    pub total_packets: u64,
    /// Packets that passed every check
    pub valid_packets: u64,
    /// Packets that failed to parse
    pub invalid_packets: u64,
    /// Parsed packets that failed at least one check
    pub consistency_errors: u64,
    /// Parse failures
    pub format_errors: u64,
    /// Unsupported versions
    pub version_mismatches: u64,
    /// Commands outside the allow-list
    pub unknown_commands: u64,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

/// Passive validator for command envelopes.
pub struct ProtocolSniffer {
    enabled: AtomicBool,
    callback: RwLock<Option<Arc<dyn SnifferCallback>>>,
    stats: Mutex<SnifferStatistics>,
}

impl Default for ProtocolSniffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProtocolSniffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSniffer")
            .field("enabled", &self.is_enabled())
            .field("stats", &self.statistics())
            .finish_non_exhaustive()
    }
}

impl ProtocolSniffer {
    /// Enabled sniffer with no callback.
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            callback: RwLock::new(None),
            stats: Mutex::new(SnifferStatistics::default()),
        }
    }

    /// Register (or replace) the violation callback.
    pub fn set_callback(&self, callback: Arc<dyn SnifferCallback>) {
        *self.callback.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(callback);
    }

    /// Turn inspection on or off. While disabled, monitor calls return
    /// `false` and count nothing.
    pub fn enable(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        tracing::info!("Protocol sniffer {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Whether inspection is on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Inspect a payload received from the peer. Returns `true` if valid.
    pub fn monitor_incoming_packet(&self, payload: &[u8]) -> bool {
        self.monitor(payload, Direction::Incoming)
    }

    /// Inspect a payload about to be sent. Returns `true` if valid.
    pub fn monitor_outgoing_packet(&self, payload: &[u8]) -> bool {
        self.monitor(payload, Direction::Outgoing)
    }

    /// Check a parsed envelope against every rule.
    ///
    /// Every failing rule is reported, not just the first.
    pub fn validate_protocol_consistency(&self, envelope: &CommandEnvelope) -> bool {
        let mut valid = true;

        if !SUPPORTED_TYPES.contains(&envelope.kind.as_str()) {
            tracing::warn!(kind = %envelope.kind, "unknown protocol type");
            self.with_callback(|cb| {
                cb.on_protocol_inconsistency(
                    "Protocol inconsistency detected",
                    "UNKNOWN_PROTOCOL_TYPE",
                    &envelope.kind,
                );
            });
            valid = false;
        }

        if !SUPPORTED_COMMANDS.contains(&envelope.command.as_str()) {
            tracing::warn!(command = %envelope.command, "unknown protocol command");
            lock(&self.stats).unknown_commands += 1;
            self.with_callback(|cb| cb.on_unknown_protocol_command(&envelope.command));
            valid = false;
        }

        if !SUPPORTED_VERSIONS.contains(&envelope.version.as_str()) {
            tracing::warn!(version = %envelope.version, "protocol version mismatch");
            lock(&self.stats).version_mismatches += 1;
            self.with_callback(|cb| cb.on_protocol_version_mismatch(&envelope.version, LOCAL_VERSION));
            valid = false;
        }

        if envelope.dh_id.is_empty() || envelope.dh_id.chars().count() > MAX_DH_ID_LEN {
            tracing::warn!(len = envelope.dh_id.len(), "invalid dhId");
            self.with_callback(|cb| {
                cb.on_protocol_inconsistency(
                    "Protocol inconsistency detected",
                    "INVALID_DHID",
                    &envelope.dh_id,
                );
            });
            valid = false;
        }

        valid
    }

    /// Snapshot of the counters.
    pub fn statistics(&self) -> SnifferStatistics {
        *lock(&self.stats)
    }

    /// Zero all counters.
    pub fn reset_statistics(&self) {
        *lock(&self.stats) = SnifferStatistics::default();
    }

    fn monitor(&self, payload: &[u8], direction: Direction) -> bool {
        if !self.is_enabled() {
            return false;
        }

        lock(&self.stats).total_packets += 1;

        let envelope = match CommandEnvelope::parse(payload) {
            Ok(envelope) => envelope,
            Err(error) => {
                {
                    let mut stats = lock(&self.stats);
                    stats.invalid_packets += 1;
                    stats.format_errors += 1;
                }
                tracing::error!(direction = direction.as_str(), %error, "failed to parse packet");
                self.with_callback(|cb| {
                    cb.on_invalid_protocol_format("Protocol format error", &error);
                });
                return false;
            },
        };

        if !self.validate_protocol_consistency(&envelope) {
            lock(&self.stats).consistency_errors += 1;
            return false;
        }

        lock(&self.stats).valid_packets += 1;
        tracing::debug!(
            direction = direction.as_str(),
            command = %envelope.command,
            "packet validated"
        );
        true
    }

    fn with_callback(&self, f: impl FnOnce(&dyn SnifferCallback)) {
        let callback =
            self.callback.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        if let Some(cb) = callback {
            f(cb.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl SnifferCallback for Recorder {
        fn on_protocol_inconsistency(&self, _message: &str, expected: &str, actual: &str) {
            self.events.lock().unwrap().push(format!("inconsistency:{expected}:{actual}"));
        }

        fn on_invalid_protocol_format(&self, _message: &str, _error: &str) {
            self.events.lock().unwrap().push("format".to_owned());
        }

        fn on_protocol_version_mismatch(&self, remote: &str, local: &str) {
            self.events.lock().unwrap().push(format!("version:{remote}:{local}"));
        }

        fn on_unknown_protocol_command(&self, command: &str) {
            self.events.lock().unwrap().push(format!("command:{command}"));
        }
    }

    fn sniffer_with_recorder() -> (ProtocolSniffer, Arc<Recorder>) {
        let sniffer = ProtocolSniffer::new();
        let recorder = Arc::new(Recorder::default());
        sniffer.set_callback(recorder.clone());
        (sniffer, recorder)
    }

    #[test]
    fn valid_envelope_passes() {
        let (sniffer, recorder) = sniffer_with_recorder();
        let payload = br#"{"Type":"OPERATION","dhId":"camera_0","Command":"CAPTURE"}"#;

        assert!(sniffer.monitor_outgoing_packet(payload));
        let stats = sniffer.statistics();
        assert_eq!(stats.total_packets, 1);
        assert_eq!(stats.valid_packets, 1);
        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_type_defaults_to_operation() {
        let env = CommandEnvelope::parse(br#"{"dhId":"d","Command":"GET_INFO"}"#).unwrap();
        assert_eq!(env.kind, "OPERATION");
        assert_eq!(env.version, LOCAL_VERSION);
    }

    #[test]
    fn malformed_json_is_a_format_error() {
        let (sniffer, recorder) = sniffer_with_recorder();

        assert!(!sniffer.monitor_incoming_packet(b"{not json"));
        let stats = sniffer.statistics();
        assert_eq!(stats.invalid_packets, 1);
        assert_eq!(stats.format_errors, 1);
        assert_eq!(stats.consistency_errors, 0);
        assert_eq!(*recorder.events.lock().unwrap(), vec!["format".to_owned()]);
    }

    #[test]
    fn non_object_json_is_a_format_error() {
        let (sniffer, _) = sniffer_with_recorder();
        assert!(!sniffer.monitor_incoming_packet(b"[1, 2, 3]"));
        assert_eq!(sniffer.statistics().format_errors, 1);
    }

    #[test]
    fn every_violation_is_reported() {
        let (sniffer, recorder) = sniffer_with_recorder();
        let payload = br#"{"Type":"BOGUS","Command":"SELF_DESTRUCT"}"#;

        assert!(!sniffer.monitor_incoming_packet(payload));
        let stats = sniffer.statistics();
        assert_eq!(stats.consistency_errors, 1);
        assert_eq!(stats.unknown_commands, 1);
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![
                "inconsistency:UNKNOWN_PROTOCOL_TYPE:BOGUS".to_owned(),
                "command:SELF_DESTRUCT".to_owned(),
                "inconsistency:INVALID_DHID:".to_owned(),
            ]
        );
    }

    #[test]
    fn unsupported_version_reports_remote_then_local() {
        let (sniffer, recorder) = sniffer_with_recorder();
        let envelope = CommandEnvelope {
            kind: "MESSAGE".to_owned(),
            dh_id: "d".to_owned(),
            command: "CHAN_NEG".to_owned(),
            version: "9.9".to_owned(),
        };

        assert!(!sniffer.validate_protocol_consistency(&envelope));
        assert_eq!(sniffer.statistics().version_mismatches, 1);
        assert_eq!(*recorder.events.lock().unwrap(), vec!["version:9.9:1.0".to_owned()]);
    }

    #[test]
    fn overlong_dh_id_rejected() {
        let (sniffer, _) = sniffer_with_recorder();
        let long = "x".repeat(MAX_DH_ID_LEN + 1);
        let payload = format!(r#"{{"dhId":"{long}","Command":"CAPTURE"}}"#);
        assert!(!sniffer.monitor_incoming_packet(payload.as_bytes()));

        let exact = "x".repeat(MAX_DH_ID_LEN);
        let payload = format!(r#"{{"dhId":"{exact}","Command":"CAPTURE"}}"#);
        assert!(sniffer.monitor_incoming_packet(payload.as_bytes()));
    }

    #[test]
    fn disabled_sniffer_counts_nothing() {
        let (sniffer, recorder) = sniffer_with_recorder();
        sniffer.enable(false);

        assert!(!sniffer.monitor_incoming_packet(b"garbage"));
        assert_eq!(sniffer.statistics(), SnifferStatistics::default());
        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[test]
    fn reset_clears_counters() {
        let sniffer = ProtocolSniffer::new();
        sniffer.monitor_incoming_packet(b"garbage");
        sniffer.reset_statistics();
        assert_eq!(sniffer.statistics(), SnifferStatistics::default());
    }
}
