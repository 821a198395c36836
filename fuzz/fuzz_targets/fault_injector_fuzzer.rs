//! Fuzz target for FaultInjector::inject_fault
//!
//! Drives arbitrary rule lists over arbitrary buffers. Delays are clamped to
//! zero so the fuzzer stays fast.
//!
//! # Invariants
//!
//! - Never panics, whatever the probabilities (including NaN and infinities)
//! - A surviving buffer keeps its length
//! - Only the first four bytes may differ from the input
//! - Dropped, corrupted and processed counters stay consistent

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use softbus_proto::DataBuffer;
use softbus_tap::{FaultInjectionConfig, FaultInjector, FaultKind};

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Kind {
    Drop,
    Delay,
    Corrupt,
    Leak,
    Block,
    Exhaust,
}

impl From<Kind> for FaultKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Drop => Self::PacketDrop,
            Kind::Delay => Self::PacketDelay,
            Kind::Corrupt => Self::FormatCorruption,
            Kind::Leak => Self::MemoryLeak,
            Kind::Block => Self::ThreadBlock,
            Kind::Exhaust => Self::ResourceExhaustion,
        }
    }
}

#[derive(Debug, Clone, Arbitrary)]
struct Rule {
    kind: Kind,
    probability: f64,
    pattern: u8,
    enabled: bool,
}

#[derive(Debug, Clone, Arbitrary)]
struct Input {
    seed: u64,
    rules: Vec<Rule>,
    buffers: Vec<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let injector = FaultInjector::with_seed(input.seed);
    let configs = input
        .rules
        .iter()
        .take(8)
        .map(|rule| {
            let mut config = FaultInjectionConfig::new(rule.kind.into(), rule.probability);
            config.corruption_pattern = rule.pattern;
            config.enabled = rule.enabled;
            config
        })
        .collect();
    injector.set_configs(configs);
    injector.enable(true);

    let mut non_empty = 0u64;
    for data in input.buffers.iter().take(32) {
        if !data.is_empty() {
            non_empty += 1;
        }
        let Some(out) = injector.inject_fault(DataBuffer::from_slice(data)) else {
            assert!(!data.is_empty());
            continue;
        };
        assert_eq!(out.size(), data.len());
        let prefix = data.len().min(4);
        assert_eq!(&out.data()[prefix..], &data[prefix..]);
    }

    let stats = injector.statistics();
    assert_eq!(stats.total_packets_processed, non_empty);
    assert!(stats.packets_dropped <= stats.total_packets_processed);
});
