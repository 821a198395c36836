//! Fuzz target for virtual bus send/receive sequences
//!
//! Replays arbitrary operation sequences against a small ring and a queue
//! model. Sends never block.
//!
//! # Invariants
//!
//! - Received payloads come out in send order, byte for byte
//! - A refused well-sized send is back-pressure, never a hard error
//! - Usage stays within [0, 1] and returns to 0 once drained
//! - Free write slots never exceed the configured count

#![no_main]

use std::collections::VecDeque;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use softbus_proto::DataBuffer;
use softbus_vbus::{BusConfig, BusContext, BusError, VirtualBus, WaitTimeout};

const CAPACITY: usize = 256;
const SLOTS: usize = 6;

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Send { len: u16, fill: u8, priority: u8 },
    Receive,
    Poll,
}

fuzz_target!(|ops: Vec<Op>| {
    let context = BusContext::new();
    let config = BusConfig::named("fuzz")
        .with_buffer_size(CAPACITY)
        .with_max_messages(SLOTS)
        .with_send_timeout(WaitTimeout::Immediate);
    let mut bus = VirtualBus::new(&context, config);
    bus.initialize().expect("heap bus must initialize");

    let mut model: VecDeque<Vec<u8>> = VecDeque::new();
    for op in ops.into_iter().take(512) {
        match op {
            Op::Send { len, fill, priority } => {
                let payload = vec![fill; usize::from(len) % (CAPACITY * 2)];
                match bus.send_data(&DataBuffer::from_slice(&payload), priority) {
                    Ok(()) => model.push_back(payload),
                    Err(BusError::EmptyPayload) => assert!(payload.is_empty()),
                    Err(BusError::PayloadTooLarge { .. }) => {
                        assert!(payload.len() > bus.max_payload_size());
                    },
                    Err(e) => assert!(e.is_transient(), "unexpected error: {e}"),
                }
            },
            Op::Receive => {
                let got = bus.receive_data().map(|b| b.data().to_vec());
                assert_eq!(got, model.pop_front());
            },
            Op::Poll => {
                assert_eq!(bus.wait_for_data(WaitTimeout::Immediate), !model.is_empty());
            },
        }

        let usage = bus.buffer_usage();
        assert!((0.0..=1.0).contains(&usage));
        assert!(bus.free_write_slots() <= SLOTS);
    }

    while let Some(expected) = model.pop_front() {
        assert_eq!(bus.receive_data().expect("queued record").data(), &expected[..]);
    }
    assert!(bus.buffer_usage().abs() < f64::EPSILON);
    bus.destroy();
});
