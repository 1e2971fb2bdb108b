// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Writer-side mirror of one matched remote reader (RTPS Sec.8.4.7.5).
//!
//! Tracks a `ChangeForReader` per known change with the RTPS status machine:
//!
//! ```text
//!   UNSENT ──send──▶ UNDERWAY ──enqueue confirmed──▶ UNACKNOWLEDGED
//!      ▲                                                  │  ▲
//!      │                      ACKNACK bitmap bit          │  │ ACKNACK base
//!      └────────── REQUESTED ◀─────────────────────────────┘  ▼
//!                                                        ACKNOWLEDGED
//! ```

use std::collections::BTreeMap;

use crate::core::guid::Guid;
use crate::core::locator::Locator;
use crate::core::sequence_number::{FragmentNumber, SequenceNumber, SequenceNumberSet};
use crate::qos::{DurabilityKind, ReliabilityKind};

/// Delivery status of one change towards one reader.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChangeForReaderStatus {
    Unsent,
    Requested,
    Underway,
    Unacknowledged,
    Acknowledged,
}

/// Per-change bookkeeping on a proxy.
#[derive(Clone, Debug)]
pub struct ChangeForReader {
    pub status: ChangeForReaderStatus,
    /// False when the change is filtered out for this reader; the reader
    /// learns about it through a GAP instead of DATA.
    pub is_relevant: bool,
    /// Fragments not yet sent to this reader (REQUESTED via NACK_FRAG).
    pub unsent_fragments: Vec<FragmentNumber>,
}

impl ChangeForReader {
    fn new(status: ChangeForReaderStatus) -> Self {
        ChangeForReader {
            status,
            is_relevant: true,
            unsent_fragments: Vec::new(),
        }
    }

    fn irrelevant() -> Self {
        ChangeForReader {
            status: ChangeForReaderStatus::Acknowledged,
            is_relevant: false,
            unsent_fragments: Vec::new(),
        }
    }
}

/// Writer-side state for one matched remote reader.
pub struct ReaderProxy {
    remote_guid: Guid,
    pub expects_inline_qos: bool,
    pub reliability: ReliabilityKind,
    pub durability: DurabilityKind,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
    changes: BTreeMap<SequenceNumber, ChangeForReader>,
    /// Highest contiguous sequence acknowledged via ACKNACK base - 1.
    highest_acked: SequenceNumber,
    /// Last ACKNACK count processed (idempotence).
    last_acknack_count: Option<u32>,
    /// Last NACK_FRAG count processed.
    last_nackfrag_count: Option<u32>,
}

impl ReaderProxy {
    #[must_use]
    pub fn new(
        remote_guid: Guid,
        reliability: ReliabilityKind,
        durability: DurabilityKind,
        expects_inline_qos: bool,
        unicast_locators: Vec<Locator>,
        multicast_locators: Vec<Locator>,
    ) -> Self {
        ReaderProxy {
            remote_guid,
            expects_inline_qos,
            reliability,
            durability,
            unicast_locators,
            multicast_locators,
            changes: BTreeMap::new(),
            highest_acked: SequenceNumber(0),
            last_acknack_count: None,
            last_nackfrag_count: None,
        }
    }

    #[must_use]
    pub fn remote_guid(&self) -> Guid {
        self.remote_guid
    }

    /// Register a new relevant change as UNSENT.
    pub fn change_added(&mut self, seq: SequenceNumber) {
        self.changes
            .insert(seq, ChangeForReader::new(ChangeForReaderStatus::Unsent));
    }

    /// Register a change this reader must skip (filtered out).
    pub fn change_added_irrelevant(&mut self, seq: SequenceNumber) {
        self.changes.insert(seq, ChangeForReader::irrelevant());
    }

    /// History evicted the change; forget the bookkeeping.
    pub fn change_removed(&mut self, seq: SequenceNumber) {
        self.changes.remove(&seq);
    }

    /// Drop bookkeeping for every change below `first_available` (KEEP_LAST
    /// eviction ran in the history).
    pub fn prune_below(&mut self, first_available: SequenceNumber) {
        self.changes = self.changes.split_off(&first_available);
    }

    /// Process an ACKNACK. Sequences below `sn_state.base` become
    /// ACKNOWLEDGED; set bits become REQUESTED. Returns false when the count
    /// was already seen (duplicate delivery).
    pub fn process_acknack(&mut self, sn_state: &SequenceNumberSet, count: u32) -> bool {
        if self.last_acknack_count.is_some_and(|last| count <= last) {
            return false;
        }
        self.last_acknack_count = Some(count);

        let base = sn_state.base();
        // ACKNACK base is monotonically non-decreasing per reader; a stale
        // base would regress highest_acked, so clamp.
        if base.0 - 1 > self.highest_acked.0 {
            self.highest_acked = SequenceNumber(base.0 - 1);
        }
        for (seq, cfr) in &mut self.changes {
            if seq.0 < base.0 && cfr.status != ChangeForReaderStatus::Acknowledged {
                cfr.status = ChangeForReaderStatus::Acknowledged;
            }
        }
        for seq in sn_state.iter() {
            if let Some(cfr) = self.changes.get_mut(&seq) {
                if cfr.is_relevant && cfr.status != ChangeForReaderStatus::Acknowledged {
                    cfr.status = ChangeForReaderStatus::Requested;
                }
            }
        }
        true
    }

    /// Process a NACK_FRAG for `seq`: remember which fragments to resend.
    pub fn process_nackfrag(
        &mut self,
        seq: SequenceNumber,
        fragments: impl Iterator<Item = FragmentNumber>,
        count: u32,
    ) -> bool {
        if self.last_nackfrag_count.is_some_and(|last| count <= last) {
            return false;
        }
        self.last_nackfrag_count = Some(count);

        if let Some(cfr) = self.changes.get_mut(&seq) {
            cfr.unsent_fragments = fragments.collect();
            if cfr.status == ChangeForReaderStatus::Unacknowledged
                || cfr.status == ChangeForReaderStatus::Underway
            {
                cfr.status = ChangeForReaderStatus::Requested;
            }
            true
        } else {
            false
        }
    }

    /// Changes due for transmission (UNSENT or REQUESTED), ascending.
    #[must_use]
    pub fn pending_changes(&self) -> Vec<SequenceNumber> {
        self.changes
            .iter()
            .filter(|(_, cfr)| {
                cfr.is_relevant
                    && matches!(
                        cfr.status,
                        ChangeForReaderStatus::Unsent | ChangeForReaderStatus::Requested
                    )
            })
            .map(|(seq, _)| *seq)
            .collect()
    }

    /// Irrelevant changes the reader has not been told about yet.
    #[must_use]
    pub fn pending_gaps(&self) -> Vec<SequenceNumber> {
        self.changes
            .iter()
            .filter(|(_, cfr)| !cfr.is_relevant && cfr.status != ChangeForReaderStatus::Underway)
            .map(|(seq, _)| *seq)
            .collect()
    }

    /// Mark a transmitted change UNDERWAY (in the send buffer).
    pub fn mark_underway(&mut self, seq: SequenceNumber) {
        if let Some(cfr) = self.changes.get_mut(&seq) {
            cfr.status = ChangeForReaderStatus::Underway;
            cfr.unsent_fragments.clear();
        }
    }

    /// Enqueue confirmed: UNDERWAY becomes UNACKNOWLEDGED for RELIABLE
    /// proxies, ACKNOWLEDGED for BEST_EFFORT ones.
    pub fn confirm_underway(&mut self) {
        let terminal = if self.reliability == ReliabilityKind::Reliable {
            ChangeForReaderStatus::Unacknowledged
        } else {
            ChangeForReaderStatus::Acknowledged
        };
        for cfr in self.changes.values_mut() {
            if cfr.status == ChangeForReaderStatus::Underway {
                cfr.status = terminal;
            }
        }
    }

    /// True when every relevant change up to and including `seq` is
    /// acknowledged.
    #[must_use]
    pub fn is_acked(&self, seq: SequenceNumber) -> bool {
        self.changes
            .range(..=seq)
            .all(|(_, cfr)| !cfr.is_relevant || cfr.status == ChangeForReaderStatus::Acknowledged)
    }

    /// Any change not yet acknowledged (drives periodic HEARTBEAT).
    #[must_use]
    pub fn has_unacked(&self) -> bool {
        self.changes
            .values()
            .any(|cfr| cfr.is_relevant && cfr.status != ChangeForReaderStatus::Acknowledged)
    }

    #[must_use]
    pub fn status_of(&self, seq: SequenceNumber) -> Option<ChangeForReaderStatus> {
        self.changes.get(&seq).map(|c| c.status)
    }

    #[must_use]
    pub fn unsent_fragments_of(&self, seq: SequenceNumber) -> &[FragmentNumber] {
        self.changes
            .get(&seq)
            .map_or(&[], |c| c.unsent_fragments.as_slice())
    }

    /// Highest contiguous acknowledged sequence.
    #[must_use]
    pub fn highest_acked(&self) -> SequenceNumber {
        self.highest_acked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::{EntityId, GuidPrefix};

    fn proxy(reliability: ReliabilityKind) -> ReaderProxy {
        ReaderProxy::new(
            Guid::new(GuidPrefix([2; 12]), EntityId::user(1, 0x04)),
            reliability,
            DurabilityKind::Volatile,
            false,
            Vec::new(),
            Vec::new(),
        )
    }

    #[test]
    fn test_acknack_transitions() {
        let mut p = proxy(ReliabilityKind::Reliable);
        for seq in 1..=5 {
            p.change_added(SequenceNumber(seq));
        }
        // Reader acked 1-3, requests 4.
        let mut state = SequenceNumberSet::new(SequenceNumber(4));
        state.insert(SequenceNumber(4));
        assert!(p.process_acknack(&state, 1));

        assert_eq!(p.status_of(SequenceNumber(3)), Some(ChangeForReaderStatus::Acknowledged));
        assert_eq!(p.status_of(SequenceNumber(4)), Some(ChangeForReaderStatus::Requested));
        assert_eq!(p.status_of(SequenceNumber(5)), Some(ChangeForReaderStatus::Unsent));
        assert_eq!(p.highest_acked(), SequenceNumber(3));
    }

    #[test]
    fn test_acknack_duplicate_count_ignored() {
        let mut p = proxy(ReliabilityKind::Reliable);
        p.change_added(SequenceNumber(1));
        let state = SequenceNumberSet::new(SequenceNumber(2));
        assert!(p.process_acknack(&state, 5));
        assert!(!p.process_acknack(&state, 5));
        assert!(!p.process_acknack(&state, 4));
    }

    #[test]
    fn test_acked_base_never_regresses() {
        let mut p = proxy(ReliabilityKind::Reliable);
        for seq in 1..=4 {
            p.change_added(SequenceNumber(seq));
        }
        p.process_acknack(&SequenceNumberSet::new(SequenceNumber(4)), 1);
        assert_eq!(p.highest_acked(), SequenceNumber(3));
        // A later ACKNACK with a lower base must not regress.
        p.process_acknack(&SequenceNumberSet::new(SequenceNumber(2)), 2);
        assert_eq!(p.highest_acked(), SequenceNumber(3));
    }

    #[test]
    fn test_best_effort_confirm_goes_straight_to_acknowledged() {
        let mut p = proxy(ReliabilityKind::BestEffort);
        p.change_added(SequenceNumber(1));
        p.mark_underway(SequenceNumber(1));
        p.confirm_underway();
        assert_eq!(
            p.status_of(SequenceNumber(1)),
            Some(ChangeForReaderStatus::Acknowledged)
        );
        assert!(!p.has_unacked());
    }

    #[test]
    fn test_irrelevant_changes_counted_as_acked() {
        let mut p = proxy(ReliabilityKind::Reliable);
        p.change_added(SequenceNumber(1));
        p.change_added_irrelevant(SequenceNumber(2));
        p.mark_underway(SequenceNumber(1));
        p.confirm_underway();
        assert!(!p.is_acked(SequenceNumber(2)), "1 still unacknowledged");
        p.process_acknack(&SequenceNumberSet::new(SequenceNumber(2)), 1);
        assert!(p.is_acked(SequenceNumber(2)));
    }

    #[test]
    fn test_nackfrag_marks_requested_fragments() {
        let mut p = proxy(ReliabilityKind::Reliable);
        p.change_added(SequenceNumber(7));
        p.mark_underway(SequenceNumber(7));
        p.confirm_underway();
        assert!(p.process_nackfrag(SequenceNumber(7), [2u32, 4u32].into_iter(), 1));
        assert_eq!(p.unsent_fragments_of(SequenceNumber(7)), &[2, 4]);
        assert_eq!(
            p.status_of(SequenceNumber(7)),
            Some(ChangeForReaderStatus::Requested)
        );
    }
}
