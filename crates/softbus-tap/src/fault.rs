//! Probabilistic fault injection on the send path.
//!
//! The injector holds an ordered list of [`FaultInjectionConfig`]s. For each
//! buffer, every enabled config gets one Bernoulli trial at its probability;
//! the configs that fire are applied in list order. A drop ends the chain.
//!
//! Randomness comes from a `ChaCha8Rng` so chaos runs are reproducible from a
//! seed (see [`FaultInjector::with_seed`]).

use std::{
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use softbus_proto::DataBuffer;

use crate::lock;

/// Number of bytes corrupted at the front of a buffer (the wire header magic).
const CORRUPT_PREFIX_LEN: usize = 4;

/// Allocations made by [`FaultInjector::simulate_resource_exhaustion`].
const EXHAUSTION_ALLOCATIONS: usize = 1000;

/// Size of each exhaustion allocation.
const EXHAUSTION_ALLOCATION_SIZE: usize = 1024;

/// Fill byte for simulated leaks.
const LEAK_FILL: u8 = 0xAB;

/// Kind of fault to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum FaultKind {
    /// Discard the buffer
    PacketDrop = 0,
    /// Sleep the calling thread before passing the buffer on
    PacketDelay = 1,
    /// Flip the leading bytes of a copy of the buffer
    FormatCorruption = 2,
    /// Stress primitive; no effect on the buffer path
    MemoryLeak = 3,
    /// Stress primitive; no effect on the buffer path
    ThreadBlock = 4,
    /// Stress primitive; no effect on the buffer path
    ResourceExhaustion = 5,
}

/// One fault rule.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultInjectionConfig {
    /// What to do when the rule fires
    pub kind: FaultKind,
    /// Trigger probability. Values `<= 0` (and NaN) never fire, `>= 1`
    /// always fire.
    pub probability: f64,
    /// Sleep length for [`FaultKind::PacketDelay`]
    pub delay: Duration,
    /// XOR mask applied to the leading bytes for
    /// [`FaultKind::FormatCorruption`]. `0xFF` inverts them.
    pub corruption_pattern: u8,
    /// Disabled rules are skipped without a trial
    pub enabled: bool,
}

impl FaultInjectionConfig {
    /// Enabled rule of `kind` firing with `probability`.
    pub fn new(kind: FaultKind, probability: f64) -> Self {
        Self { kind, probability, delay: Duration::ZERO, corruption_pattern: 0xFF, enabled: true }
    }

    /// Set the delay for [`FaultKind::PacketDelay`].
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Per-kind fault counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FaultStatistics {
    /// Buffers passed through [`FaultInjector::inject_fault`] while enabled
    pub total_packets_processed: u64,
    /// Buffers dropped
    pub packets_dropped: u64,
    /// Buffers delayed
    pub packets_delayed: u64,
    /// Buffers corrupted
    pub packets_corrupted: u64,
    /// Calls to [`FaultInjector::simulate_memory_leak`] that allocated
    pub memory_leak_simulations: u64,
    /// Calls to [`FaultInjector::simulate_thread_block`] that slept
    pub thread_block_simulations: u64,
    /// Calls to [`FaultInjector::simulate_resource_exhaustion`]
    pub resource_exhaustion_simulations: u64,
}

/// Seeded fault injector.
///
/// Disabled on construction; call [`FaultInjector::enable`] to arm it.
pub struct FaultInjector {
    enabled: AtomicBool,
    configs: Mutex<Vec<FaultInjectionConfig>>,
    rng: Mutex<ChaCha8Rng>,
    stats: Mutex<FaultStatistics>,
    /// Allocations from simulated leaks, held until the injector drops
    leaked: Mutex<Vec<Vec<u8>>>,
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FaultInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultInjector")
            .field("enabled", &self.is_enabled())
            .field("configs", &*lock(&self.configs))
            .field("stats", &self.statistics())
            .finish_non_exhaustive()
    }
}

impl FaultInjector {
    /// Injector seeded from OS randomness.
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// Injector with an explicit seed for reproducible chaos.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            configs: Mutex::new(Vec::new()),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            stats: Mutex::new(FaultStatistics::default()),
            leaked: Mutex::new(Vec::new()),
        }
    }

    /// Replace all rules with `config`.
    pub fn set_config(&self, config: FaultInjectionConfig) {
        tracing::info!(
            kind = ?config.kind,
            probability = config.probability,
            enabled = config.enabled,
            "set fault injection config"
        );
        *lock(&self.configs) = vec![config];
    }

    /// Replace all rules with `configs`, applied in order.
    pub fn set_configs(&self, configs: Vec<FaultInjectionConfig>) {
        tracing::info!("Set {} fault injection configs", configs.len());
        *lock(&self.configs) = configs;
    }

    /// Arm or disarm the injector.
    pub fn enable(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        tracing::info!("Fault injection {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Whether the injector is armed.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Run `buffer` through the rule chain.
    ///
    /// Returns `None` if the buffer was dropped. Disabled injectors and empty
    /// buffers pass through untouched and uncounted. Delay rules sleep the
    /// calling thread.
    pub fn inject_fault(&self, buffer: DataBuffer) -> Option<DataBuffer> {
        if !self.is_enabled() || buffer.is_empty() {
            return Some(buffer);
        }

        lock(&self.stats).total_packets_processed += 1;

        let configs = lock(&self.configs).clone();
        let mut current = buffer;

        for config in configs.iter().filter(|c| c.enabled) {
            if !self.should_inject(config.probability) {
                continue;
            }

            match config.kind {
                FaultKind::PacketDrop => {
                    lock(&self.stats).packets_dropped += 1;
                    tracing::warn!("Injected packet drop");
                    return None;
                },
                FaultKind::PacketDelay => {
                    lock(&self.stats).packets_delayed += 1;
                    tracing::warn!(delay_ms = config.delay.as_millis(), "Injected packet delay");
                    if !config.delay.is_zero() {
                        thread::sleep(config.delay);
                    }
                },
                FaultKind::FormatCorruption => {
                    current = Self::corrupt(current, config.corruption_pattern);
                    lock(&self.stats).packets_corrupted += 1;
                },
                FaultKind::MemoryLeak | FaultKind::ThreadBlock | FaultKind::ResourceExhaustion => {
                    tracing::trace!(kind = ?config.kind, "stress fault has no buffer effect");
                },
            }
        }

        Some(current)
    }

    /// Allocate `size` bytes filled with `0xAB` and hold them until the
    /// injector is dropped. No-op while disabled.
    pub fn simulate_memory_leak(&self, size: usize) {
        if !self.is_enabled() {
            return;
        }

        lock(&self.leaked).push(vec![LEAK_FILL; size]);
        lock(&self.stats).memory_leak_simulations += 1;
        tracing::warn!("Simulated memory leak of {} bytes", size);
    }

    /// Sleep the calling thread for `duration`. No-op while disabled or for
    /// a zero duration.
    pub fn simulate_thread_block(&self, duration: Duration) {
        if !self.is_enabled() || duration.is_zero() {
            return;
        }

        lock(&self.stats).thread_block_simulations += 1;
        tracing::warn!("Simulating thread block for {:?}", duration);
        thread::sleep(duration);
    }

    /// Allocate and release many small buffers at once. No-op while disabled.
    pub fn simulate_resource_exhaustion(&self) {
        if !self.is_enabled() {
            return;
        }

        lock(&self.stats).resource_exhaustion_simulations += 1;
        tracing::warn!("Simulating resource exhaustion");

        let resources: Vec<Vec<u8>> = (0..EXHAUSTION_ALLOCATIONS)
            .map(|_| vec![0u8; EXHAUSTION_ALLOCATION_SIZE])
            .collect();
        tracing::debug!("Released {} exhaustion allocations", resources.len());
    }

    /// Bytes currently held by simulated leaks.
    pub fn leaked_bytes(&self) -> usize {
        lock(&self.leaked).iter().map(Vec::len).sum()
    }

    /// Snapshot of the counters.
    pub fn statistics(&self) -> FaultStatistics {
        *lock(&self.stats)
    }

    /// Zero all counters.
    pub fn reset_statistics(&self) {
        *lock(&self.stats) = FaultStatistics::default();
        tracing::info!("Fault injection statistics reset");
    }

    fn should_inject(&self, probability: f64) -> bool {
        if probability.is_nan() || probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        lock(&self.rng).gen_bool(probability)
    }

    fn corrupt(mut buffer: DataBuffer, pattern: u8) -> DataBuffer {
        let count = CORRUPT_PREFIX_LEN.min(buffer.size());
        for byte in &mut buffer.data_mut()[..count] {
            *byte ^= pattern;
        }
        tracing::warn!("Injected format corruption, corrupted {} bytes", count);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed(seed: u64) -> FaultInjector {
        let injector = FaultInjector::with_seed(seed);
        injector.enable(true);
        injector
    }

    #[test]
    fn disabled_by_default() {
        let injector = FaultInjector::with_seed(1);
        injector.set_config(FaultInjectionConfig::new(FaultKind::PacketDrop, 1.0));

        let out = injector.inject_fault(DataBuffer::from_slice(b"abc"));
        assert_eq!(out.unwrap().data(), b"abc");
        assert_eq!(injector.statistics(), FaultStatistics::default());
    }

    #[test]
    fn certain_drop_always_drops() {
        let injector = armed(7);
        injector.set_config(FaultInjectionConfig::new(FaultKind::PacketDrop, 1.0));

        for i in 1..=10 {
            assert!(injector.inject_fault(DataBuffer::from_slice(b"payload")).is_none());
            assert_eq!(injector.statistics().packets_dropped, i);
        }
    }

    #[test]
    fn nan_probability_never_fires() {
        let injector = armed(7);
        injector.set_config(FaultInjectionConfig::new(FaultKind::PacketDrop, f64::NAN));

        assert!(injector.inject_fault(DataBuffer::from_slice(b"payload")).is_some());
        assert_eq!(injector.statistics().packets_dropped, 0);
    }

    #[test]
    fn empty_buffer_passes_through() {
        let injector = armed(7);
        injector.set_config(FaultInjectionConfig::new(FaultKind::PacketDrop, 1.0));

        assert!(injector.inject_fault(DataBuffer::default()).is_some());
        assert_eq!(injector.statistics().total_packets_processed, 0);
    }

    #[test]
    fn zero_probability_never_fires() {
        let injector = armed(7);
        injector.set_config(FaultInjectionConfig::new(FaultKind::PacketDrop, 0.0));

        for _ in 0..100 {
            assert!(injector.inject_fault(DataBuffer::from_slice(b"x")).is_some());
        }
        assert_eq!(injector.statistics().total_packets_processed, 100);
        assert_eq!(injector.statistics().packets_dropped, 0);
    }

    #[test]
    fn corruption_flips_leading_bytes() {
        let injector = armed(7);
        injector.set_config(FaultInjectionConfig::new(FaultKind::FormatCorruption, 1.0));

        let out = injector.inject_fault(DataBuffer::from_slice(&[0x00, 0x0F, 0xF0, 0xFF, 0x42])).unwrap();
        assert_eq!(out.data(), &[0xFF, 0xF0, 0x0F, 0x00, 0x42]);

        let short = injector.inject_fault(DataBuffer::from_slice(&[0x01, 0x02])).unwrap();
        assert_eq!(short.data(), &[0xFE, 0xFD]);
        assert_eq!(injector.statistics().packets_corrupted, 2);
    }

    #[test]
    fn drop_short_circuits_later_rules() {
        let injector = armed(7);
        injector.set_configs(vec![
            FaultInjectionConfig::new(FaultKind::PacketDrop, 1.0),
            FaultInjectionConfig::new(FaultKind::FormatCorruption, 1.0),
        ]);

        assert!(injector.inject_fault(DataBuffer::from_slice(b"abcd")).is_none());
        assert_eq!(injector.statistics().packets_corrupted, 0);
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let injector = armed(7);
        let mut rule = FaultInjectionConfig::new(FaultKind::PacketDrop, 1.0);
        rule.enabled = false;
        injector.set_config(rule);

        assert!(injector.inject_fault(DataBuffer::from_slice(b"abcd")).is_some());
    }

    #[test]
    fn delay_blocks_caller() {
        let injector = armed(7);
        injector.set_config(
            FaultInjectionConfig::new(FaultKind::PacketDelay, 1.0).with_delay(Duration::from_millis(20)),
        );

        let start = std::time::Instant::now();
        let out = injector.inject_fault(DataBuffer::from_slice(b"abcd")).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(out.data(), b"abcd");
        assert_eq!(injector.statistics().packets_delayed, 1);
    }

    #[test]
    fn same_seed_same_outcomes() {
        let run = |seed| {
            let injector = armed(seed);
            injector.set_config(FaultInjectionConfig::new(FaultKind::PacketDrop, 0.5));
            (0..64)
                .map(|_| injector.inject_fault(DataBuffer::from_slice(b"x")).is_none())
                .collect::<Vec<_>>()
        };

        assert_eq!(run(42), run(42));
    }

    #[test]
    fn stress_primitives_count_only_when_enabled() {
        let injector = FaultInjector::with_seed(3);
        injector.simulate_memory_leak(16);
        injector.simulate_thread_block(Duration::from_millis(1));
        injector.simulate_resource_exhaustion();
        assert_eq!(injector.statistics(), FaultStatistics::default());

        injector.enable(true);
        injector.simulate_memory_leak(16);
        injector.simulate_thread_block(Duration::from_millis(1));
        injector.simulate_resource_exhaustion();

        let stats = injector.statistics();
        assert_eq!(stats.memory_leak_simulations, 1);
        assert_eq!(stats.thread_block_simulations, 1);
        assert_eq!(stats.resource_exhaustion_simulations, 1);
        assert_eq!(injector.leaked_bytes(), 16);
    }

    #[test]
    fn reset_clears_counters() {
        let injector = armed(3);
        injector.set_config(FaultInjectionConfig::new(FaultKind::PacketDrop, 1.0));
        injector.inject_fault(DataBuffer::from_slice(b"x"));
        injector.reset_statistics();
        assert_eq!(injector.statistics(), FaultStatistics::default());
    }
}
