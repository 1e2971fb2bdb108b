// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Writer-side history: ordered store of outgoing changes with sequence
//! assignment, per-instance KEEP_LAST eviction, and KEEP_ALL back-pressure.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::core::cache_change::{CacheChange, ChangeKind, InstanceHandle, WriteParams};
use crate::core::guid::Guid;
use crate::core::sequence_number::SequenceNumber;
use crate::core::time::RtpsTime;
use crate::qos::{HistoryKind, ResourceLimits};
use crate::{Error, Result};

use super::pool::PayloadPool;

/// Hook run after a change is inserted but before the writer publishes it.
/// Used by the persistence plugin to make TRANSIENT/PERSISTENT changes
/// durable before they hit the wire.
pub type PreCommitHook = Box<dyn Fn(&CacheChange) -> Result<()> + Send + Sync>;

/// Hook run when a change leaves the history (acknowledged or evicted);
/// the persistence plugin mirrors the removal.
pub type OnRemoveHook = Box<dyn Fn(SequenceNumber) + Send + Sync>;

/// Ordered store of a writer's outgoing changes.
pub struct WriterHistory {
    writer_guid: Guid,
    history: HistoryKind,
    limits: ResourceLimits,
    keyed: bool,
    pool: Arc<PayloadPool>,
    /// Ascending by sequence number; assignment is gap-free so a deque works.
    changes: VecDeque<CacheChange>,
    /// Sequence numbers per instance, ascending (keyed topics only).
    instances: HashMap<InstanceHandle, VecDeque<SequenceNumber>>,
    last_sequence: SequenceNumber,
    pre_commit: Option<PreCommitHook>,
    on_remove: Option<OnRemoveHook>,
}

impl WriterHistory {
    #[must_use]
    pub fn new(
        writer_guid: Guid,
        history: HistoryKind,
        limits: ResourceLimits,
        keyed: bool,
        pool: Arc<PayloadPool>,
    ) -> Self {
        WriterHistory {
            writer_guid,
            history,
            limits,
            keyed,
            pool,
            changes: VecDeque::new(),
            instances: HashMap::new(),
            last_sequence: SequenceNumber(0),
            pre_commit: None,
            on_remove: None,
        }
    }

    pub fn set_pre_commit(&mut self, hook: PreCommitHook) {
        self.pre_commit = Some(hook);
    }

    pub fn set_on_remove(&mut self, hook: OnRemoveHook) {
        self.on_remove = Some(hook);
    }

    /// Allocate a change from the pool. The sequence number stays UNKNOWN
    /// until `add_change` assigns it.
    pub fn new_change(
        &self,
        kind: ChangeKind,
        handle: InstanceHandle,
        payload_len: usize,
    ) -> Result<CacheChange> {
        let buf = self.pool.take(payload_len)?;
        let mut change = CacheChange::new(kind, self.writer_guid, handle);
        change.serialized_payload = buf;
        Ok(change)
    }

    /// Assign the next sequence number, stamp the source timestamp, insert
    /// in order, and run the pre-commit hook.
    ///
    /// Fails with `ResourceLimit` when KEEP_ALL and a cap is hit; the caller
    /// decides whether to block and retry within `max_blocking_time`.
    pub fn add_change(
        &mut self,
        mut change: CacheChange,
        write_params: WriteParams,
    ) -> Result<SequenceNumber> {
        if self.keyed && change.instance_handle.is_nil() {
            return Err(Error::InvalidConfig("keyed writer change without handle"));
        }

        self.make_room_for(&change)?;

        change.sequence_number = self.last_sequence.next();
        change.source_timestamp = RtpsTime::now();
        change.write_params = write_params;

        // The sequence is committed only after the hook: a failed pre-commit
        // must not leave a gap in the assignment sequence.
        if let Some(hook) = &self.pre_commit {
            hook(&change)?;
        }
        self.last_sequence = change.sequence_number;

        if self.keyed {
            self.instances
                .entry(change.instance_handle)
                .or_default()
                .push_back(change.sequence_number);
        }
        self.changes.push_back(change);
        Ok(self.last_sequence)
    }

    fn make_room_for(&mut self, change: &CacheChange) -> Result<()> {
        // Instance-count cap applies to the first change of a new instance.
        if self.keyed
            && !self.instances.contains_key(&change.instance_handle)
            && self.instances.len() >= self.limits.max_instances
        {
            return Err(Error::ResourceLimit("max_instances reached"));
        }

        match self.history {
            HistoryKind::KeepLast(depth) => {
                if self.keyed {
                    let at_depth = self
                        .instances
                        .get(&change.instance_handle)
                        .is_some_and(|seqs| seqs.len() >= depth as usize);
                    if at_depth {
                        // Oldest change of THIS instance makes room.
                        let oldest = self.instances[&change.instance_handle][0];
                        self.remove_change(oldest);
                    }
                } else if self.changes.len() >= depth as usize {
                    self.remove_min_change();
                }
                if self.changes.len() >= self.limits.max_samples {
                    self.remove_min_change();
                }
                Ok(())
            }
            HistoryKind::KeepAll => {
                if self.changes.len() >= self.limits.max_samples {
                    return Err(Error::ResourceLimit("history full (KEEP_ALL)"));
                }
                let per_instance_full = self.keyed
                    && self
                        .instances
                        .get(&change.instance_handle)
                        .is_some_and(|s| s.len() >= self.limits.max_samples_per_instance);
                if per_instance_full {
                    return Err(Error::ResourceLimit("max_samples_per_instance reached"));
                }
                Ok(())
            }
        }
    }

    /// Remove one change and return its payload to the pool.
    /// Returns the removed change metadata when found.
    pub fn remove_change(&mut self, seq: SequenceNumber) -> Option<CacheChange> {
        let idx = self
            .changes
            .iter()
            .position(|c| c.sequence_number == seq)?;
        let mut change = self.changes.remove(idx)?;
        if self.keyed {
            if let Some(seqs) = self.instances.get_mut(&change.instance_handle) {
                seqs.retain(|s| *s != seq);
                if seqs.is_empty() {
                    self.instances.remove(&change.instance_handle);
                }
            }
        }
        let payload = std::mem::take(&mut change.serialized_payload);
        self.pool.release(payload);
        if let Some(hook) = &self.on_remove {
            hook(seq);
        }
        Some(change)
    }

    /// Drop the oldest change.
    pub fn remove_min_change(&mut self) -> Option<CacheChange> {
        let seq = self.changes.front()?.sequence_number;
        self.remove_change(seq)
    }

    /// Remove and re-allocate in one step, reusing the pooled buffer.
    pub fn remove_change_and_reuse(&mut self, seq: SequenceNumber) -> Option<CacheChange> {
        let idx = self
            .changes
            .iter()
            .position(|c| c.sequence_number == seq)?;
        let mut change = self.changes.remove(idx)?;
        if self.keyed {
            if let Some(seqs) = self.instances.get_mut(&change.instance_handle) {
                seqs.retain(|s| *s != seq);
            }
        }
        change.sequence_number = SequenceNumber::UNKNOWN;
        change.serialized_payload.clear();
        Some(change)
    }

    #[must_use]
    pub fn get_change(&self, seq: SequenceNumber) -> Option<&CacheChange> {
        // Gap-free assignment makes the deque indexable by offset.
        let first = self.changes.front()?.sequence_number;
        let idx = usize::try_from(seq.0.checked_sub(first.0)?).ok()?;
        let change = self.changes.get(idx)?;
        (change.sequence_number == seq).then_some(change)
    }

    /// Lowest sequence number still held, or `last + 1` when empty.
    #[must_use]
    pub fn first_available(&self) -> SequenceNumber {
        self.changes
            .front()
            .map_or(self.last_sequence.next(), |c| c.sequence_number)
    }

    /// Highest assigned sequence number (0 before the first write).
    #[must_use]
    pub fn last_assigned(&self) -> SequenceNumber {
        self.last_sequence
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheChange> {
        self.changes.iter()
    }
}
