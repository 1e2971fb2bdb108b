// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Scenario tests read top to bottom

//! Reliability end-to-end scenarios over the intra-process transport.
//!
//! - RELIABLE recovery: a dropped DATA is recovered through one
//!   heartbeat/acknack cycle and delivered in order.
//! - TRANSIENT_LOCAL replay: a late-joining reader receives the writer's
//!   full history in order.

mod common;

use std::time::Duration;

use common::{participant, user_unicast, wait_until, E2E_BUDGET};
use ferrodds::qos::{DurabilityKind, HistoryKind, ReliabilityKind};
use ferrodds::transport::MemHub;
use ferrodds::{ParticipantConfig, ReaderConfig, WriterConfig};

fn reliable_writer_config(topic: &str, durability: DurabilityKind) -> WriterConfig {
    let mut config = WriterConfig::reliable(topic, "Blob");
    config.qos.durability = durability;
    config.qos.history = HistoryKind::KeepAll;
    config.heartbeat_period = Duration::from_millis(50);
    config
}

fn reliable_reader_config(topic: &str, durability: DurabilityKind) -> ReaderConfig {
    let mut config = ReaderConfig::reliable(topic, "Blob");
    config.qos.durability = durability;
    config.qos.history = HistoryKind::KeepAll;
    config.heartbeat_response_delay = Duration::from_millis(2);
    config
}

#[test]
fn test_reliable_recovery_after_drop() {
    let hub = MemHub::new();
    let p1 = participant(&hub, 1, ParticipantConfig::default());
    let p2 = participant(&hub, 2, ParticipantConfig::default());

    let writer = p1
        .create_writer(reliable_writer_config("telemetry", DurabilityKind::Volatile))
        .unwrap();

    // Writer is alone: s=1..3 go out unmatched.
    for payload in [b"s1".to_vec(), b"s2".to_vec(), b"s3".to_vec()] {
        writer.write(payload).unwrap();
    }

    let reader = p2
        .create_reader(reliable_reader_config("telemetry", DurabilityKind::Volatile))
        .unwrap();

    assert!(
        wait_until(|| writer.matched_reader_count() == 1, E2E_BUDGET),
        "writer never matched the late reader"
    );
    assert!(
        wait_until(|| reader.matched_writer_count() == 1, E2E_BUDGET),
        "reader never matched the writer"
    );

    // The volatile late joiner must not see the past; the writer GAPs it.
    assert!(
        writer
            .wait_for_acknowledgments(Duration::from_secs(5))
            .is_ok(),
        "late joiner did not acknowledge the GAP window"
    );
    assert!(reader.take().is_none(), "volatile reader saw replayed data");

    // Drop the first DATA towards the reader, then write s=4 and s=5.
    hub.drop_next(user_unicast(2));
    writer.write(b"s4".to_vec()).unwrap();
    writer.write(b"s5".to_vec()).unwrap();

    // One heartbeat/acknack cycle recovers s=4; delivery is in order.
    let first = reader.take_timeout(E2E_BUDGET).expect("s4 delivered");
    assert_eq!(first.serialized_payload, b"s4");
    let second = reader.take_timeout(E2E_BUDGET).expect("s5 delivered");
    assert_eq!(second.serialized_payload, b"s5");

    // Final state: everything acknowledged (low mark at 5).
    assert!(writer.wait_for_acknowledgments(Duration::from_secs(5)).is_ok());
    hub.shutdown();
}

#[test]
fn test_transient_local_replay_to_late_joiner() {
    let hub = MemHub::new();
    let p1 = participant(&hub, 3, ParticipantConfig::default());
    let p2 = participant(&hub, 4, ParticipantConfig::default());

    let writer = p1
        .create_writer(reliable_writer_config(
            "state",
            DurabilityKind::TransientLocal,
        ))
        .unwrap();

    for payload in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()] {
        writer.write(payload).unwrap();
    }

    // Reader joins after the fact and must get {a, b, c} in order.
    let reader = p2
        .create_reader(reliable_reader_config(
            "state",
            DurabilityKind::TransientLocal,
        ))
        .unwrap();

    let mut received = Vec::new();
    assert!(
        wait_until(
            || {
                while let Some(change) = reader.take() {
                    received.push(change.serialized_payload.clone());
                }
                received.len() == 3
            },
            E2E_BUDGET
        ),
        "replay incomplete: got {:?}",
        received
    );
    assert_eq!(received, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    hub.shutdown();
}

#[test]
fn test_in_order_delivery_per_writer() {
    let hub = MemHub::new();
    let p1 = participant(&hub, 5, ParticipantConfig::default());
    let p2 = participant(&hub, 6, ParticipantConfig::default());

    let writer = p1
        .create_writer(reliable_writer_config("stream", DurabilityKind::Volatile))
        .unwrap();
    let reader = p2
        .create_reader(reliable_reader_config("stream", DurabilityKind::Volatile))
        .unwrap();

    assert!(wait_until(|| writer.matched_reader_count() == 1, E2E_BUDGET));
    assert!(wait_until(|| reader.matched_writer_count() == 1, E2E_BUDGET));

    let count = 50u32;
    for i in 0..count {
        writer.write(i.to_le_bytes().to_vec()).unwrap();
    }

    let mut expected = 0u32;
    while expected < count {
        let change = reader
            .take_timeout(E2E_BUDGET)
            .unwrap_or_else(|| panic!("sample {} never arrived", expected));
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&change.serialized_payload[..4]);
        assert_eq!(u32::from_le_bytes(bytes), expected, "out-of-order delivery");
        expected += 1;
    }
    hub.shutdown();
}
