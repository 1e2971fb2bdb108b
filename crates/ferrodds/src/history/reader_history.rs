// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Reader-side history: ordered per-writer store with per-instance
//! substructure, duplicate suppression, and resource-limit rejection.

use std::collections::{BTreeMap, HashMap};

use crate::core::cache_change::{CacheChange, InstanceHandle};
use crate::core::guid::Guid;
use crate::core::sequence_number::SequenceNumber;
use crate::core::time::RtpsTime;
use crate::qos::{HistoryKind, ResourceLimits};

use super::{InstanceState, ViewState};

/// Why an arriving change was refused (DDS SampleRejectedStatus reasons).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SampleRejectedReason {
    ByInstancesLimit,
    BySamplesLimit,
    BySamplesPerInstanceLimit,
}

/// Outcome of `received_change`.
#[derive(Debug, PartialEq, Eq)]
pub enum ReceivedOutcome {
    /// Stored; a previously stored change may have been evicted (KEEP_LAST).
    Stored,
    /// Same (writer, sequence) already present.
    Duplicate,
    /// Refused by a resource limit. RELIABLE readers withhold ACKNACK
    /// progress for rejected sequences so the writer retries.
    Rejected(SampleRejectedReason),
}

/// Per-instance bookkeeping for keyed topics.
#[derive(Debug)]
pub struct InstanceEntry {
    pub view_state: ViewState,
    pub instance_state: InstanceState,
    /// (writer, sequence) keys of this instance's changes, insertion order.
    keys: Vec<(Guid, SequenceNumber)>,
    /// Next deadline check point for this instance.
    pub deadline_due: Option<RtpsTime>,
}

impl InstanceEntry {
    fn new() -> Self {
        InstanceEntry {
            view_state: ViewState::New,
            instance_state: InstanceState::Alive,
            keys: Vec::new(),
            deadline_due: None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Ordered store of received changes for one reader.
pub struct ReaderHistory {
    history: HistoryKind,
    limits: ResourceLimits,
    keyed: bool,
    /// Ordered by (writer, sequence): per-writer ascending iteration and
    /// O(log n) duplicate detection.
    changes: BTreeMap<(Guid, SequenceNumber), CacheChange>,
    instances: HashMap<InstanceHandle, InstanceEntry>,
    unread: usize,
}

impl ReaderHistory {
    #[must_use]
    pub fn new(history: HistoryKind, limits: ResourceLimits, keyed: bool) -> Self {
        ReaderHistory {
            history,
            limits,
            keyed,
            changes: BTreeMap::new(),
            instances: HashMap::new(),
            unread: 0,
        }
    }

    /// Place an arriving change. Duplicates by (writer, sequence) are
    /// dropped; keyed topics find or create their instance entry; KEEP_LAST
    /// evicts the oldest change of the same instance when over depth.
    pub fn received_change(&mut self, mut change: CacheChange) -> ReceivedOutcome {
        let key = (change.writer_guid, change.sequence_number);
        if self.changes.contains_key(&key) {
            return ReceivedOutcome::Duplicate;
        }

        let handle = change.instance_handle;
        let new_instance = self.keyed && !self.instances.contains_key(&handle);

        // Admission control before any mutation.
        if new_instance && self.instances.len() >= self.limits.max_instances {
            return ReceivedOutcome::Rejected(SampleRejectedReason::ByInstancesLimit);
        }
        match self.history {
            HistoryKind::KeepAll => {
                if self.changes.len() >= self.limits.max_samples {
                    return ReceivedOutcome::Rejected(SampleRejectedReason::BySamplesLimit);
                }
                let per_instance_full = self.keyed
                    && self
                        .instances
                        .get(&handle)
                        .is_some_and(|e| e.len() >= self.limits.max_samples_per_instance);
                if per_instance_full {
                    return ReceivedOutcome::Rejected(
                        SampleRejectedReason::BySamplesPerInstanceLimit,
                    );
                }
            }
            HistoryKind::KeepLast(depth) => {
                if self.keyed {
                    let over = self
                        .instances
                        .get(&handle)
                        .is_some_and(|e| e.len() >= depth as usize);
                    if over {
                        self.evict_oldest_of_instance(handle);
                    }
                } else {
                    let depth = (depth as usize).min(self.limits.max_samples);
                    if self.changes.len() >= depth {
                        self.evict_oldest();
                    }
                }
                if self.changes.len() >= self.limits.max_samples {
                    self.evict_oldest();
                }
            }
        }

        change.reception_timestamp = Some(RtpsTime::now());
        change.is_read = false;

        if self.keyed {
            let entry = self.instances.entry(handle).or_insert_with(InstanceEntry::new);
            if change.kind.is_not_alive() {
                entry.instance_state = InstanceState::NotAliveDisposed;
            }
            entry.keys.push(key);
        }
        self.changes.insert(key, change);
        self.unread += 1;
        ReceivedOutcome::Stored
    }

    fn evict_oldest_of_instance(&mut self, handle: InstanceHandle) {
        let Some(entry) = self.instances.get_mut(&handle) else {
            return;
        };
        if entry.keys.is_empty() {
            return;
        }
        let key = entry.keys.remove(0);
        if let Some(change) = self.changes.remove(&key) {
            if !change.is_read {
                self.unread -= 1;
            }
        }
    }

    fn evict_oldest(&mut self) {
        // Oldest approximated by lowest (writer, seq); exact within one
        // writer, which is the only ordering RTPS guarantees anyway.
        if let Some(key) = self.changes.keys().next().copied() {
            if let Some(change) = self.changes.remove(&key) {
                if !change.is_read {
                    self.unread -= 1;
                }
            }
        }
    }

    /// User acknowledgement: drop the change from history.
    pub fn remove_change(&mut self, writer: Guid, seq: SequenceNumber) -> Option<CacheChange> {
        let change = self.changes.remove(&(writer, seq))?;
        if !change.is_read {
            self.unread -= 1;
        }
        if self.keyed {
            if let Some(entry) = self.instances.get_mut(&change.instance_handle) {
                entry.keys.retain(|k| *k != (writer, seq));
            }
        }
        Some(change)
    }

    /// Changes of one writer in ascending sequence order.
    pub fn changes_of_writer(&self, writer: Guid) -> impl Iterator<Item = &CacheChange> {
        self.changes
            .range((writer, SequenceNumber(i64::MIN))..=(writer, SequenceNumber(i64::MAX)))
            .map(|(_, c)| c)
    }

    /// All changes, grouped by writer, ascending within each writer.
    pub fn iter(&self) -> impl Iterator<Item = &CacheChange> {
        self.changes.values()
    }

    /// Read without consuming: marks changes as read.
    pub fn read_next_unread(&mut self) -> Option<&CacheChange> {
        let key = self
            .changes
            .iter()
            .find(|(_, c)| !c.is_read)
            .map(|(k, _)| *k)?;
        self.unread -= 1;
        let handle = self.changes.get(&key).map(|c| c.instance_handle);
        if let Some(entry) = handle.and_then(|h| self.instances.get_mut(&h)) {
            entry.view_state = ViewState::NotNew;
        }
        let change = self.changes.get_mut(&key)?;
        change.is_read = true;
        Some(change)
    }

    /// Take (consume) the next unread change.
    pub fn take_next_unread(&mut self) -> Option<CacheChange> {
        let key = self
            .changes
            .iter()
            .find(|(_, c)| !c.is_read)
            .map(|(k, _)| *k)?;
        let change = self.changes.remove(&key)?;
        self.unread -= 1;
        if self.keyed {
            if let Some(entry) = self.instances.get_mut(&change.instance_handle) {
                entry.keys.retain(|k| *k != key);
                entry.view_state = ViewState::NotNew;
            }
        }
        Some(change)
    }

    /// Expire changes older than `cutoff` (lifespan enforcement). Returns
    /// how many were silently dropped.
    pub fn expire_older_than(&mut self, cutoff: RtpsTime) -> usize {
        let expired: Vec<(Guid, SequenceNumber)> = self
            .changes
            .iter()
            .filter(|(_, c)| c.source_timestamp < cutoff)
            .map(|(k, _)| *k)
            .collect();
        for (writer, seq) in &expired {
            self.remove_change(*writer, *seq);
        }
        expired.len()
    }

    /// Mark all instances written by `writer` as having no live writers.
    pub fn writer_not_alive(&mut self, writer: Guid) {
        for entry in self.instances.values_mut() {
            if entry.keys.iter().any(|(w, _)| *w == writer) {
                entry.instance_state = InstanceState::NotAliveNoWriters;
            }
        }
    }

    #[must_use]
    pub fn instance(&self, handle: InstanceHandle) -> Option<&InstanceEntry> {
        self.instances.get(&handle)
    }

    pub fn instance_mut(&mut self, handle: InstanceHandle) -> Option<&mut InstanceEntry> {
        self.instances.get_mut(&handle)
    }

    pub fn instances(&self) -> impl Iterator<Item = (&InstanceHandle, &InstanceEntry)> {
        self.instances.iter()
    }

    pub fn instances_mut(&mut self) -> impl Iterator<Item = (&InstanceHandle, &mut InstanceEntry)> {
        self.instances.iter_mut()
    }

    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.unread
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
