// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Reader-side mirror of one matched remote writer (RTPS Sec.8.4.10.4).
//!
//! Tracks which sequences arrived, the highest contiguous mark
//! (`changes_low_mark`), and the highest sequence the writer announced via
//! HEARTBEAT. Irrelevant sequences (GAP) count as received for protocol
//! purposes without ever reaching the history.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::core::guid::Guid;
use crate::core::locator::Locator;
use crate::core::sequence_number::SequenceNumber;
use crate::qos::LivelinessKind;

/// Reader-side state for one matched remote writer.
pub struct WriterProxy {
    remote_guid: Guid,
    /// Identity used by persistence; equals `remote_guid` unless the writer
    /// announced a persistence GUID.
    persistence_guid: Guid,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
    /// Highest sequence with every sequence at or below it received or
    /// irrelevant.
    low_mark: SequenceNumber,
    /// Received/irrelevant sequences above the low mark.
    above_mark: BTreeSet<i64>,
    /// Highest sequence announced by HEARTBEAT (or seen as DATA).
    max_available: SequenceNumber,
    /// Last HEARTBEAT count processed (idempotence).
    last_heartbeat_count: Option<u32>,
    /// Monotonic ACKNACK count towards this writer.
    acknack_count: u32,
    pub liveliness_kind: LivelinessKind,
    pub lease_duration: Duration,
    last_liveliness_assert: Instant,
    /// Tracked aliveness; flips on lease expiry and back on assertion.
    alive: bool,
    pub ownership_strength: u32,
}

impl WriterProxy {
    #[must_use]
    pub fn new(
        remote_guid: Guid,
        persistence_guid: Option<Guid>,
        unicast_locators: Vec<Locator>,
        multicast_locators: Vec<Locator>,
        liveliness_kind: LivelinessKind,
        lease_duration: Duration,
        ownership_strength: u32,
        initial_low_mark: SequenceNumber,
    ) -> Self {
        WriterProxy {
            remote_guid,
            persistence_guid: persistence_guid.unwrap_or(remote_guid),
            unicast_locators,
            multicast_locators,
            low_mark: initial_low_mark,
            above_mark: BTreeSet::new(),
            max_available: initial_low_mark,
            last_heartbeat_count: None,
            acknack_count: 0,
            liveliness_kind,
            lease_duration,
            last_liveliness_assert: Instant::now(),
            alive: true,
            ownership_strength,
        }
    }

    #[must_use]
    pub fn remote_guid(&self) -> Guid {
        self.remote_guid
    }

    #[must_use]
    pub fn persistence_guid(&self) -> Guid {
        self.persistence_guid
    }

    /// Highest contiguous received sequence.
    #[must_use]
    pub fn changes_low_mark(&self) -> SequenceNumber {
        self.low_mark
    }

    /// Highest heartbeat-announced sequence.
    #[must_use]
    pub fn max_available(&self) -> SequenceNumber {
        self.max_available
    }

    /// True when `seq` was already received or marked irrelevant.
    #[must_use]
    pub fn is_received(&self, seq: SequenceNumber) -> bool {
        seq.0 <= self.low_mark.0 || self.above_mark.contains(&seq.0)
    }

    /// Record `seq` as received. Returns false for duplicates. Advances the
    /// low mark over any contiguous run it completes.
    pub fn received_change_set(&mut self, seq: SequenceNumber) -> bool {
        if self.is_received(seq) {
            return false;
        }
        if seq.0 > self.max_available.0 {
            self.max_available = seq;
        }
        if seq.0 == self.low_mark.0 + 1 {
            self.low_mark = seq;
            // Absorb the contiguous run above.
            while self.above_mark.remove(&(self.low_mark.0 + 1)) {
                self.low_mark = self.low_mark.next();
            }
        } else {
            self.above_mark.insert(seq.0);
        }
        true
    }

    /// Record `seq` as irrelevant (GAP): received for protocol purposes.
    pub fn irrelevant_change_set(&mut self, seq: SequenceNumber) -> bool {
        self.received_change_set(seq)
    }

    /// Roll back a `received_change_set` that the history refused (resource
    /// limits). The writer keeps retrying until the reader has room.
    pub fn unreceive(&mut self, seq: SequenceNumber) {
        if seq.0 <= self.low_mark.0 {
            // Re-open the window: everything at and above seq that was only
            // contiguous through it moves back above the mark.
            for s in (seq.0 + 1)..=self.low_mark.0 {
                self.above_mark.insert(s);
            }
            self.low_mark = SequenceNumber(seq.0 - 1);
        } else {
            self.above_mark.remove(&seq.0);
        }
    }

    /// Best-effort advance: jump the low mark to `seq`, permanently skipping
    /// anything missing below it. Returns false for stale sequences.
    pub fn force_advance(&mut self, seq: SequenceNumber) -> bool {
        if seq.0 <= self.low_mark.0 {
            return false;
        }
        self.low_mark = seq;
        self.above_mark.retain(|s| *s > seq.0);
        while self.above_mark.remove(&(self.low_mark.0 + 1)) {
            self.low_mark = self.low_mark.next();
        }
        if self.low_mark.0 > self.max_available.0 {
            self.max_available = self.low_mark;
        }
        true
    }

    /// Process a HEARTBEAT window. Returns false when the count is stale.
    /// Sequences below `first_sn` can no longer be recovered; the low mark
    /// jumps over them and the number of skipped (lost) sequences returns.
    pub fn process_heartbeat_window(
        &mut self,
        first_sn: SequenceNumber,
        last_sn: SequenceNumber,
        count: u32,
    ) -> Option<u64> {
        if self.last_heartbeat_count.is_some_and(|last| count <= last) {
            return None;
        }
        self.last_heartbeat_count = Some(count);

        if last_sn.0 > self.max_available.0 {
            self.max_available = last_sn;
        }

        let mut lost = 0u64;
        if first_sn.0 > self.low_mark.0 + 1 {
            // Everything in (low_mark, first_sn) that never arrived is lost.
            for seq in (self.low_mark.0 + 1)..first_sn.0 {
                if !self.above_mark.remove(&seq) {
                    lost += 1;
                }
            }
            self.low_mark = SequenceNumber(first_sn.0 - 1);
            while self.above_mark.remove(&(self.low_mark.0 + 1)) {
                self.low_mark = self.low_mark.next();
            }
        }
        Some(lost)
    }

    /// Missing sequences in `(low_mark, max_available]`, lowest first,
    /// capped at `limit`. Also reports whether more are missing beyond the
    /// returned window.
    #[must_use]
    pub fn missing_changes(&self, limit: usize) -> (Vec<SequenceNumber>, bool) {
        let mut missing = Vec::new();
        let mut more = false;
        for seq in (self.low_mark.0 + 1)..=self.max_available.0 {
            if !self.above_mark.contains(&seq) {
                if missing.len() < limit {
                    missing.push(SequenceNumber(seq));
                } else {
                    more = true;
                    break;
                }
            }
        }
        (missing, more)
    }

    /// Next ACKNACK count (strictly monotonic towards this writer).
    pub fn next_acknack_count(&mut self) -> u32 {
        self.acknack_count += 1;
        self.acknack_count
    }

    // ========================================================================
    // LIVELINESS
    // ========================================================================

    pub fn assert_liveliness(&mut self) {
        self.last_liveliness_assert = Instant::now();
        self.alive = true;
    }

    /// Re-evaluate aliveness. Returns `Some(new_state)` on a transition.
    pub fn update_liveliness(&mut self, now: Instant) -> Option<bool> {
        let expired = self.lease_duration != Duration::MAX
            && now.duration_since(self.last_liveliness_assert) > self.lease_duration;
        match (self.alive, expired) {
            (true, true) => {
                self.alive = false;
                Some(false)
            }
            (false, false) => {
                self.alive = true;
                Some(true)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive
    }
}
