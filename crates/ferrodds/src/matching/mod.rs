// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Offered-vs-requested QoS compatibility (DDS v1.4 Sec.2.2.3 RxO rules).
//!
//! Discovery runs every new remote descriptor through [`check_match`]
//! against each local counterpart on the same topic. A failure carries both
//! a reason mask and the offending policy ids so the status listener can
//! report `last_policy_id`.

use crate::qos::{PolicyId, Qos, ReliabilityKind, TypeConsistencyKind};

/// Failure reason bits.
pub mod reason {
    pub const DIFFERENT_TOPIC: u32 = 1 << 0;
    pub const INCONSISTENT_TOPIC: u32 = 1 << 1;
    pub const INCOMPATIBLE_QOS: u32 = 1 << 2;
    pub const PARTITIONS: u32 = 1 << 3;
    pub const DIFFERENT_TYPEINFO: u32 = 1 << 4;
}

/// One side of a prospective match.
#[derive(Clone, Copy)]
pub struct MatchCandidate<'a> {
    pub topic_name: &'a str,
    pub type_name: &'a str,
    pub qos: &'a Qos,
    /// Opaque TypeInformation blob; empty when not advertised.
    pub type_information: &'a [u8],
}

/// Detail of a failed match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchingFailure {
    pub reason_mask: u32,
    /// Policies that failed the RxO check, in evaluation order.
    pub incompatible_qos: Vec<PolicyId>,
}

impl MatchingFailure {
    /// The policy reported through `last_policy_id` on the incompatible-QoS
    /// statuses.
    #[must_use]
    pub fn last_policy_id(&self) -> PolicyId {
        self.incompatible_qos
            .last()
            .copied()
            .unwrap_or(PolicyId::Invalid)
    }
}

/// Result of a compatibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchingOutcome {
    Ok,
    Fail(MatchingFailure),
}

impl MatchingOutcome {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, MatchingOutcome::Ok)
    }
}

/// Check whether `offered` (the writer side) satisfies `requested` (the
/// reader side).
#[must_use]
pub fn check_match(offered: &MatchCandidate<'_>, requested: &MatchCandidate<'_>) -> MatchingOutcome {
    let mut reason_mask = 0u32;
    let mut incompatible = Vec::new();

    // 1. Topic and type identity.
    if offered.topic_name != requested.topic_name {
        reason_mask |= reason::DIFFERENT_TOPIC;
    } else if !types_consistent(offered, requested) {
        reason_mask |= reason::INCONSISTENT_TOPIC;
    }

    let w = offered.qos;
    let r = requested.qos;

    // 2. Reliability: RELIABLE offers satisfy both kinds.
    let reliability_ok = !(w.reliability == ReliabilityKind::BestEffort
        && r.reliability == ReliabilityKind::Reliable);
    if !reliability_ok {
        log::debug!("[MATCH-QOS] reliability mismatch (writer BEST_EFFORT, reader RELIABLE)");
        incompatible.push(PolicyId::Reliability);
    }

    // 3. Durability: offered kind must rank at least the requested kind.
    if w.durability < r.durability {
        log::debug!(
            "[MATCH-QOS] durability mismatch (writer={:?}, reader={:?})",
            w.durability,
            r.durability
        );
        incompatible.push(PolicyId::Durability);
    }

    // 4. Deadline: a faster writer satisfies a slower reader.
    if w.deadline_period > r.deadline_period {
        incompatible.push(PolicyId::Deadline);
    }

    // 5. Latency budget.
    if w.latency_budget > r.latency_budget {
        incompatible.push(PolicyId::LatencyBudget);
    }

    // 6. Ownership kind must be identical.
    if w.ownership != r.ownership {
        incompatible.push(PolicyId::Ownership);
    }

    // 7. Liveliness: stricter writer kind, tighter writer lease.
    if w.liveliness.kind < r.liveliness.kind
        || w.liveliness.lease_duration > r.liveliness.lease_duration
    {
        incompatible.push(PolicyId::Liveliness);
    }

    // 8. Destination order: source-ordered writers satisfy both.
    if w.destination_order < r.destination_order {
        incompatible.push(PolicyId::DestinationOrder);
    }

    // 9. Presentation: offered scope must cover the requested scope.
    if w.presentation.access_scope < r.presentation.access_scope
        || (!w.presentation.coherent_access && r.presentation.coherent_access)
        || (!w.presentation.ordered_access && r.presentation.ordered_access)
    {
        incompatible.push(PolicyId::Presentation);
    }

    if !incompatible.is_empty() {
        reason_mask |= reason::INCOMPATIBLE_QOS;
    }

    // 10. Partition intersection (wildcards allowed either side).
    if !w.partition.intersects(&r.partition) {
        log::debug!(
            "[MATCH-QOS] partition mismatch (writer={:?}, reader={:?})",
            w.partition,
            r.partition
        );
        reason_mask |= reason::PARTITIONS;
    }

    // 11. Type information, when both sides advertise it.
    if !offered.type_information.is_empty()
        && !requested.type_information.is_empty()
        && offered.type_information != requested.type_information
        && r.type_consistency != TypeConsistencyKind::Assignable
    {
        reason_mask |= reason::DIFFERENT_TYPEINFO;
    }

    if reason_mask == 0 {
        MatchingOutcome::Ok
    } else {
        MatchingOutcome::Fail(MatchingFailure {
            reason_mask,
            incompatible_qos: incompatible,
        })
    }
}

fn types_consistent(offered: &MatchCandidate<'_>, requested: &MatchCandidate<'_>) -> bool {
    match requested.qos.type_consistency {
        // EXACT and DECLARED require the same registered type name.
        TypeConsistencyKind::Exact | TypeConsistencyKind::Declared => {
            offered.type_name == requested.type_name
        }
        // ASSIGNABLE defers to the type-information comparison (rule 11);
        // names may differ across vendors.
        TypeConsistencyKind::Assignable => {
            offered.type_name == requested.type_name
                || (!offered.type_information.is_empty()
                    && offered.type_information == requested.type_information)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qos::{
        DurabilityKind, LivelinessKind, OwnershipKind, Partition, PresentationAccessScope,
    };
    use std::time::Duration;

    fn candidate<'a>(topic: &'a str, type_name: &'a str, qos: &'a Qos) -> MatchCandidate<'a> {
        MatchCandidate {
            topic_name: topic,
            type_name,
            qos,
            type_information: &[],
        }
    }

    #[test]
    fn test_defaults_match() {
        let qos = Qos::default();
        let outcome = check_match(
            &candidate("t", "T", &qos),
            &candidate("t", "T", &qos),
        );
        assert!(outcome.is_ok());
    }

    #[test]
    fn test_different_topic() {
        let qos = Qos::default();
        let outcome = check_match(&candidate("a", "T", &qos), &candidate("b", "T", &qos));
        let MatchingOutcome::Fail(failure) = outcome else {
            panic!("expected failure");
        };
        assert_ne!(failure.reason_mask & reason::DIFFERENT_TOPIC, 0);
    }

    #[test]
    fn test_type_name_mismatch_is_inconsistent_topic() {
        let qos = Qos::default();
        let outcome = check_match(&candidate("t", "A", &qos), &candidate("t", "B", &qos));
        let MatchingOutcome::Fail(failure) = outcome else {
            panic!("expected failure");
        };
        assert_ne!(failure.reason_mask & reason::INCONSISTENT_TOPIC, 0);
    }

    #[test]
    fn test_best_effort_writer_cannot_serve_reliable_reader() {
        let w = Qos::default();
        let r = Qos {
            reliability: ReliabilityKind::Reliable,
            ..Qos::default()
        };
        let outcome = check_match(&candidate("t", "T", &w), &candidate("t", "T", &r));
        let MatchingOutcome::Fail(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.last_policy_id(), PolicyId::Reliability);
        assert_ne!(failure.reason_mask & reason::INCOMPATIBLE_QOS, 0);
    }

    #[test]
    fn test_reliable_writer_serves_best_effort_reader() {
        let w = Qos {
            reliability: ReliabilityKind::Reliable,
            ..Qos::default()
        };
        let r = Qos::default();
        assert!(check_match(&candidate("t", "T", &w), &candidate("t", "T", &r)).is_ok());
    }

    #[test]
    fn test_durability_ranking() {
        let w = Qos {
            durability: DurabilityKind::TransientLocal,
            ..Qos::default()
        };
        let r = Qos {
            durability: DurabilityKind::Persistent,
            ..Qos::default()
        };
        // TL writer cannot serve PERSISTENT reader ...
        assert!(!check_match(&candidate("t", "T", &w), &candidate("t", "T", &r)).is_ok());
        // ... but serves a VOLATILE one.
        let volatile = Qos::default();
        assert!(check_match(&candidate("t", "T", &w), &candidate("t", "T", &volatile)).is_ok());
    }

    #[test]
    fn test_deadline_direction() {
        let w = Qos {
            deadline_period: Duration::from_millis(200),
            ..Qos::default()
        };
        let r = Qos {
            deadline_period: Duration::from_millis(100),
            ..Qos::default()
        };
        let outcome = check_match(&candidate("t", "T", &w), &candidate("t", "T", &r));
        let MatchingOutcome::Fail(failure) = outcome else {
            panic!("expected failure");
        };
        assert!(failure.incompatible_qos.contains(&PolicyId::Deadline));
    }

    #[test]
    fn test_ownership_must_be_equal() {
        let w = Qos {
            ownership: OwnershipKind::Exclusive,
            ..Qos::default()
        };
        let r = Qos::default();
        assert!(!check_match(&candidate("t", "T", &w), &candidate("t", "T", &r)).is_ok());
    }

    #[test]
    fn test_liveliness_kind_and_lease() {
        // Writer MANUAL_BY_TOPIC satisfies reader AUTOMATIC ...
        let w = Qos {
            liveliness: crate::qos::Liveliness {
                kind: LivelinessKind::ManualByTopic,
                lease_duration: Duration::from_secs(1),
                announcement_period: Duration::from_millis(300),
            },
            ..Qos::default()
        };
        let r = Qos::default();
        assert!(check_match(&candidate("t", "T", &w), &candidate("t", "T", &r)).is_ok());

        // ... but AUTOMATIC writer cannot satisfy MANUAL_BY_TOPIC reader.
        let w2 = Qos::default();
        let r2 = Qos {
            liveliness: crate::qos::Liveliness {
                kind: LivelinessKind::ManualByTopic,
                ..crate::qos::Liveliness::default()
            },
            ..Qos::default()
        };
        assert!(!check_match(&candidate("t", "T", &w2), &candidate("t", "T", &r2)).is_ok());
    }

    #[test]
    fn test_partition_wildcards() {
        let w = Qos {
            partition: Partition::new(["sensors/*"]),
            ..Qos::default()
        };
        let r = Qos {
            partition: Partition::new(["sensors/imu"]),
            ..Qos::default()
        };
        assert!(check_match(&candidate("t", "T", &w), &candidate("t", "T", &r)).is_ok());

        let disjoint = Qos {
            partition: Partition::new(["actuators"]),
            ..Qos::default()
        };
        let outcome = check_match(&candidate("t", "T", &w), &candidate("t", "T", &disjoint));
        let MatchingOutcome::Fail(failure) = outcome else {
            panic!("expected failure");
        };
        assert_ne!(failure.reason_mask & reason::PARTITIONS, 0);
    }

    #[test]
    fn test_presentation_scope_ranking() {
        let w = Qos::default(); // Instance scope
        let r = Qos {
            presentation: crate::qos::Presentation {
                access_scope: PresentationAccessScope::Topic,
                coherent_access: false,
                ordered_access: false,
            },
            ..Qos::default()
        };
        assert!(!check_match(&candidate("t", "T", &w), &candidate("t", "T", &r)).is_ok());
    }

    #[test]
    fn test_typeinfo_mismatch() {
        let qos = Qos::default();
        let w = MatchCandidate {
            topic_name: "t",
            type_name: "T",
            qos: &qos,
            type_information: &[1, 2, 3],
        };
        let r = MatchCandidate {
            topic_name: "t",
            type_name: "T",
            qos: &qos,
            type_information: &[4, 5, 6],
        };
        let outcome = check_match(&w, &r);
        let MatchingOutcome::Fail(failure) = outcome else {
            panic!("expected failure");
        };
        assert_ne!(failure.reason_mask & reason::DIFFERENT_TYPEINFO, 0);
    }

    #[test]
    fn test_multiple_incompatibilities_accumulate() {
        let w = Qos::default();
        let r = Qos {
            reliability: ReliabilityKind::Reliable,
            durability: DurabilityKind::TransientLocal,
            ..Qos::default()
        };
        let outcome = check_match(&candidate("t", "T", &w), &candidate("t", "T", &r));
        let MatchingOutcome::Fail(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(
            failure.incompatible_qos,
            vec![PolicyId::Reliability, PolicyId::Durability]
        );
        assert_eq!(failure.last_policy_id(), PolicyId::Durability);
    }
}
