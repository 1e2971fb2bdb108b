// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Scenario tests read top to bottom

//! Keyed-topic end-to-end scenarios.
//!
//! - KEEP_LAST eviction stays within the instance: depth 2 with keys A and
//!   B leaves A = {s3, s4} and B = {s2}.
//! - Exclusive ownership fails over to the next-strongest writer after the
//!   owner's liveliness lease expires.

mod common;

use std::time::Duration;

use common::{participant, wait_until, E2E_BUDGET};
use ferrodds::core::cache_change::InstanceHandle;
use ferrodds::qos::{HistoryKind, LivelinessKind, OwnershipKind};
use ferrodds::transport::MemHub;
use ferrodds::{ParticipantConfig, ReaderConfig, StatusEvent, WriterConfig};

fn key(b: u8) -> InstanceHandle {
    InstanceHandle([b; 16])
}

#[test]
fn test_keep_last_eviction_is_per_instance() {
    let hub = MemHub::new();
    let p1 = participant(&hub, 10, ParticipantConfig::default());
    let p2 = participant(&hub, 11, ParticipantConfig::default());

    let mut writer_config = WriterConfig::reliable("vehicle/pose", "Pose");
    writer_config.qos.history = HistoryKind::KeepAll;
    writer_config.keyed = true;
    writer_config.heartbeat_period = Duration::from_millis(50);
    let writer = p1.create_writer(writer_config).unwrap();

    let mut reader_config = ReaderConfig::reliable("vehicle/pose", "Pose");
    reader_config.qos.history = HistoryKind::KeepLast(2);
    reader_config.keyed = true;
    let reader = p2.create_reader(reader_config).unwrap();

    assert!(wait_until(|| writer.matched_reader_count() == 1, E2E_BUDGET));
    assert!(wait_until(|| reader.matched_writer_count() == 1, E2E_BUDGET));

    // (A, s1) (B, s2) (A, s3) (A, s4)
    writer.write_keyed(key(b'A'), b"a1".to_vec()).unwrap();
    writer.write_keyed(key(b'B'), b"b1".to_vec()).unwrap();
    writer.write_keyed(key(b'A'), b"a2".to_vec()).unwrap();
    writer.write_keyed(key(b'A'), b"a3".to_vec()).unwrap();
    assert!(writer.wait_for_acknowledgments(E2E_BUDGET).is_ok());

    // Depth 2 on A evicted s1; B untouched.
    let mut samples = Vec::new();
    assert!(
        wait_until(
            || {
                while let Some(change) = reader.take() {
                    samples.push((change.instance_handle, change.sequence_number.as_i64()));
                }
                samples.len() == 3
            },
            E2E_BUDGET
        ),
        "expected 3 retained samples, got {:?}",
        samples
    );

    let a_seqs: Vec<i64> = samples
        .iter()
        .filter(|(h, _)| *h == key(b'A'))
        .map(|(_, s)| *s)
        .collect();
    let b_seqs: Vec<i64> = samples
        .iter()
        .filter(|(h, _)| *h == key(b'B'))
        .map(|(_, s)| *s)
        .collect();
    assert_eq!(a_seqs, vec![3, 4], "A keeps only its newest two");
    assert_eq!(b_seqs, vec![2], "eviction never crosses instances");
    hub.shutdown();
}

#[test]
fn test_exclusive_ownership_failover() {
    let hub = MemHub::new();
    let p_strong = participant(&hub, 12, ParticipantConfig::default());
    let p_weak = participant(&hub, 13, ParticipantConfig::default());
    let p_reader = participant(&hub, 14, ParticipantConfig::default());

    let ownership_writer = |strength: u32| {
        let mut config = WriterConfig::reliable("plant/setpoint", "Setpoint");
        config.keyed = true;
        config.qos.ownership = OwnershipKind::Exclusive;
        config.qos.ownership_strength = strength;
        config.qos.liveliness.kind = LivelinessKind::ManualByTopic;
        config.qos.liveliness.lease_duration = Duration::from_millis(400);
        config.heartbeat_period = Duration::from_millis(50);
        config
    };

    let strong = p_strong.create_writer(ownership_writer(10)).unwrap();
    let weak = p_weak.create_writer(ownership_writer(5)).unwrap();

    let mut reader_config = ReaderConfig::reliable("plant/setpoint", "Setpoint");
    reader_config.keyed = true;
    reader_config.qos.ownership = OwnershipKind::Exclusive;
    let reader = p_reader.create_reader(reader_config).unwrap();

    assert!(wait_until(|| reader.matched_writer_count() == 2, E2E_BUDGET));
    assert!(wait_until(|| strong.matched_reader_count() == 1, E2E_BUDGET));
    assert!(wait_until(|| weak.matched_reader_count() == 1, E2E_BUDGET));

    // The strong writer owns the instance.
    strong.write_keyed(key(b'X'), b"strong-1".to_vec()).unwrap();
    let sample = reader.take_timeout(E2E_BUDGET).expect("owner sample");
    assert_eq!(sample.serialized_payload, b"strong-1");

    // The weak writer's sample is suppressed while the owner is alive.
    weak.write_keyed(key(b'X'), b"weak-1".to_vec()).unwrap();
    weak.assert_liveliness();
    std::thread::sleep(Duration::from_millis(200));
    assert!(
        reader.take().is_none(),
        "weaker writer must not preempt a live owner"
    );

    // The strong writer goes silent past its lease: liveliness flips and
    // ownership fails over.
    let events = p_reader.events();
    let saw_liveliness_lost = wait_until(
        || {
            events.drain().iter().any(|e| {
                matches!(
                    e,
                    StatusEvent::LivelinessChanged { alive: false, writer, .. }
                        if writer.prefix == strong.guid().prefix
                )
            })
        },
        E2E_BUDGET,
    );
    assert!(saw_liveliness_lost, "owner lease never expired");

    // The weaker writer now gets through and takes ownership.
    weak.write_keyed(key(b'X'), b"weak-2".to_vec()).unwrap();
    let mut ownership_changed = false;
    let delivered = wait_until(
        || {
            ownership_changed |= events.drain().iter().any(|e| {
                matches!(
                    e,
                    StatusEvent::OwnershipChanged { current_owner, .. }
                        if current_owner.prefix == weak.guid().prefix
                )
            });
            reader
                .take()
                .is_some_and(|c| c.serialized_payload == b"weak-2")
        },
        E2E_BUDGET,
    );
    assert!(delivered, "failover sample never delivered");
    // The event is posted right after delivery; pick up any straggler.
    if !ownership_changed {
        std::thread::sleep(Duration::from_millis(50));
        ownership_changed = events.drain().iter().any(|e| {
            matches!(
                e,
                StatusEvent::OwnershipChanged { current_owner, .. }
                    if current_owner.prefix == weak.guid().prefix
            )
        });
    }
    assert!(ownership_changed, "ownership change was not reported");
    hub.shutdown();
}
