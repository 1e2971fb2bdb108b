// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::too_many_lines)] // Scenario tests read top to bottom

//! Discovery end-to-end scenarios.
//!
//! - Incompatible QoS: discovery completes, no proxies form, both sides
//!   report the offending policy.
//! - Silent participant death: lease expiry unmatches every endpoint proxy
//!   of the dead participant.

mod common;

use std::time::Duration;

use common::{multicast, participant, wait_until, E2E_BUDGET};
use ferrodds::qos::{PolicyId, ReliabilityKind};
use ferrodds::transport::MemHub;
use ferrodds::{ParticipantConfig, ReaderConfig, StatusEvent, WriterConfig};

#[test]
fn test_incompatible_qos_reported_both_sides() {
    let hub = MemHub::new();
    let p1 = participant(&hub, 20, ParticipantConfig::default());
    let p2 = participant(&hub, 21, ParticipantConfig::default());

    // BEST_EFFORT offer cannot satisfy a RELIABLE request.
    let writer = p1
        .create_writer(WriterConfig::new(
            "alarms",
            "Alarm",
            ferrodds::qos::Qos::default(),
        ))
        .unwrap();
    let reader = p2.create_reader(ReaderConfig::reliable("alarms", "Alarm")).unwrap();

    let offered_incompatible = wait_until(
        || {
            p1.events().drain().iter().any(|e| {
                matches!(
                    e,
                    StatusEvent::OfferedIncompatibleQos {
                        last_policy_id: PolicyId::Reliability,
                        ..
                    }
                )
            })
        },
        E2E_BUDGET,
    );
    assert!(offered_incompatible, "writer side never reported the mismatch");

    let requested_incompatible = wait_until(
        || {
            p2.events().drain().iter().any(|e| {
                matches!(
                    e,
                    StatusEvent::RequestedIncompatibleQos {
                        last_policy_id: PolicyId::Reliability,
                        ..
                    }
                )
            })
        },
        E2E_BUDGET,
    );
    assert!(requested_incompatible, "reader side never reported the mismatch");

    // Discovery completed, matching did not.
    assert_eq!(writer.matched_reader_count(), 0);
    assert_eq!(reader.matched_writer_count(), 0);
    hub.shutdown();
}

#[test]
fn test_participant_lease_expiry_unmatches_endpoints() {
    let hub = MemHub::new();

    let mut short_lease = ParticipantConfig::default();
    short_lease.discovery.lease_duration = Duration::from_millis(800);

    let p1 = participant(&hub, 22, short_lease.clone());
    let p2 = participant(&hub, 23, short_lease);

    let mut writer_config = WriterConfig::reliable("link", "Heartbeat");
    writer_config.qos.reliability = ReliabilityKind::Reliable;
    let _writer = p2.create_writer(writer_config).unwrap();
    let reader = p1.create_reader(ReaderConfig::reliable("link", "Heartbeat")).unwrap();

    assert!(
        wait_until(|| reader.matched_writer_count() == 1, E2E_BUDGET),
        "endpoints never matched"
    );
    let p2_prefix = p2.guid_prefix();

    // Kill P2 without a dispose: every multicast announcement from now on
    // is lost, then the participant is torn down.
    hub.set_loss(multicast(), 1000);
    drop(p2);

    let removed = wait_until(
        || {
            p1.events().drain().iter().any(|e| {
                matches!(
                    e,
                    StatusEvent::ParticipantRemoved { prefix, .. } if *prefix == p2_prefix
                )
            })
        },
        E2E_BUDGET,
    );
    assert!(removed, "lease expiry never fired");
    assert!(
        wait_until(|| reader.matched_writer_count() == 0, E2E_BUDGET),
        "dead participant's writer proxy survived"
    );
    assert_eq!(p1.remote_participant_count(), 0);
    hub.shutdown();
}

#[test]
fn test_graceful_dispose_removes_immediately() {
    let hub = MemHub::new();
    let p1 = participant(&hub, 24, ParticipantConfig::default());
    let p2 = participant(&hub, 25, ParticipantConfig::default());

    assert!(
        wait_until(|| p1.remote_participant_count() == 1, E2E_BUDGET),
        "participants never discovered each other"
    );
    let p2_prefix = p2.guid_prefix();

    // Graceful drop sends DATA(p) disposed; no lease wait needed.
    drop(p2);
    let removed = wait_until(
        || {
            p1.events().drain().iter().any(|e| {
                matches!(
                    e,
                    StatusEvent::ParticipantRemoved { prefix, .. } if *prefix == p2_prefix
                )
            })
        },
        E2E_BUDGET,
    );
    assert!(removed, "dispose announcement was not processed");
    assert_eq!(p1.remote_participant_count(), 0);
    hub.shutdown();
}
