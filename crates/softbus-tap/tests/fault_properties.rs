//! Property-based tests for the fault injector.

use proptest::prelude::*;
use softbus_proto::DataBuffer;
use softbus_tap::{FaultInjectionConfig, FaultInjector, FaultKind};

proptest! {
    #[test]
    fn certain_drop_counts_exactly_once_per_call(
        seed in any::<u64>(),
        buffers in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..32),
    ) {
        let injector = FaultInjector::with_seed(seed);
        injector.enable(true);
        injector.set_config(FaultInjectionConfig::new(FaultKind::PacketDrop, 1.0));

        for (i, bytes) in buffers.iter().enumerate() {
            prop_assert!(injector.inject_fault(DataBuffer::from_slice(bytes)).is_none());
            prop_assert_eq!(injector.statistics().packets_dropped, i as u64 + 1);
        }
    }

    #[test]
    fn corruption_touches_at_most_four_bytes(
        seed in any::<u64>(),
        bytes in prop::collection::vec(any::<u8>(), 1..64),
    ) {
        let injector = FaultInjector::with_seed(seed);
        injector.enable(true);
        injector.set_config(FaultInjectionConfig::new(FaultKind::FormatCorruption, 1.0));

        let out = injector.inject_fault(DataBuffer::from_slice(&bytes)).unwrap();
        prop_assert_eq!(out.size(), bytes.len());

        let changed = out.data().iter().zip(&bytes).filter(|(a, b)| a != b).count();
        prop_assert_eq!(changed, bytes.len().min(4));
    }

    #[test]
    fn stress_kinds_leave_buffers_alone(
        seed in any::<u64>(),
        bytes in prop::collection::vec(any::<u8>(), 1..64),
    ) {
        let injector = FaultInjector::with_seed(seed);
        injector.enable(true);
        injector.set_configs(vec![
            FaultInjectionConfig::new(FaultKind::MemoryLeak, 1.0),
            FaultInjectionConfig::new(FaultKind::ThreadBlock, 1.0),
            FaultInjectionConfig::new(FaultKind::ResourceExhaustion, 1.0),
        ]);

        let out = injector.inject_fault(DataBuffer::from_slice(&bytes)).unwrap();
        prop_assert_eq!(out.data(), &bytes[..]);
    }
}
