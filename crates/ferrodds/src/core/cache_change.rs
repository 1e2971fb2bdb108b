// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! The unit of replication: one sample or disposal record per writer
//! sequence number.
//!
//! Fragmentation bookkeeping lives beside the payload so marking newly
//! received fragments costs O(k) for k new fragments, never
//! O(fragment_count).

use super::guid::Guid;
use super::sequence_number::{FragmentNumber, SequenceNumber};
use super::time::RtpsTime;

/// What the change expresses about its instance.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ChangeKind {
    #[default]
    Alive,
    NotAliveDisposed,
    NotAliveUnregistered,
    NotAliveDisposedUnregistered,
}

impl ChangeKind {
    /// True for the three disposal/unregister kinds.
    #[must_use]
    pub fn is_not_alive(self) -> bool {
        !matches!(self, ChangeKind::Alive)
    }
}

/// 16-byte key hash identifying an instance of a keyed topic.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct InstanceHandle(pub [u8; 16]);

impl InstanceHandle {
    /// Handle for unkeyed topics.
    pub const NIL: InstanceHandle = InstanceHandle([0; 16]);

    #[must_use]
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

/// Identity of one sample: its writer plus the writer-assigned sequence.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SampleIdentity {
    pub writer_guid: Guid,
    pub sequence_number: SequenceNumber,
}

impl SampleIdentity {
    pub const UNKNOWN: SampleIdentity = SampleIdentity {
        writer_guid: Guid::UNKNOWN,
        sequence_number: SequenceNumber::UNKNOWN,
    };
}

impl Default for SampleIdentity {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

/// Per-write metadata supplied by the caller of `add_change`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct WriteParams {
    pub sample_identity: SampleIdentity,
    pub related_sample_identity: SampleIdentity,
}

// ============================================================================
// FRAGMENT TRACKER
// ============================================================================

/// Reassembly progress for a fragmented change.
#[derive(Clone, Debug)]
pub struct FragmentTracker {
    fragment_size: u16,
    fragment_count: u32,
    /// One bit per fragment, 1 = received.
    received: Vec<u64>,
    missing: u32,
    /// Lowest fragment number (1-based) not yet received.
    first_missing: FragmentNumber,
}

impl FragmentTracker {
    #[must_use]
    pub fn new(fragment_size: u16, fragment_count: u32) -> Self {
        FragmentTracker {
            fragment_size,
            fragment_count,
            received: vec![0u64; (fragment_count as usize).div_ceil(64)],
            missing: fragment_count,
            first_missing: 1,
        }
    }

    #[must_use]
    pub fn fragment_size(&self) -> u16 {
        self.fragment_size
    }

    #[must_use]
    pub fn fragment_count(&self) -> u32 {
        self.fragment_count
    }

    /// Mark `count` fragments starting at 1-based `start` as received.
    /// Duplicates are idempotent. Returns the number of newly received
    /// fragments.
    pub fn mark_received(&mut self, start: FragmentNumber, count: u32) -> u32 {
        let mut newly = 0;
        let end = start.saturating_add(count).min(self.fragment_count + 1);
        for frag in start.max(1)..end {
            let idx = (frag - 1) as usize;
            let mask = 1u64 << (idx % 64);
            if self.received[idx / 64] & mask == 0 {
                self.received[idx / 64] |= mask;
                self.missing -= 1;
                newly += 1;
            }
        }
        // Advance the contiguous low-water mark past the newly filled run.
        while self.first_missing <= self.fragment_count && self.has(self.first_missing) {
            self.first_missing += 1;
        }
        newly
    }

    #[must_use]
    pub fn has(&self, frag: FragmentNumber) -> bool {
        if frag == 0 || frag > self.fragment_count {
            return false;
        }
        let idx = (frag - 1) as usize;
        self.received[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.missing == 0
    }

    #[must_use]
    pub fn first_missing(&self) -> FragmentNumber {
        self.first_missing
    }

    /// Missing fragment numbers in ascending order, capped at `limit`.
    #[must_use]
    pub fn missing_fragments(&self, limit: usize) -> Vec<FragmentNumber> {
        let mut out = Vec::new();
        for frag in self.first_missing..=self.fragment_count {
            if out.len() >= limit {
                break;
            }
            if !self.has(frag) {
                out.push(frag);
            }
        }
        out
    }
}

// ============================================================================
// CACHE CHANGE
// ============================================================================

/// An RTPS-level record representing a sample or a disposal.
#[derive(Clone, Debug)]
pub struct CacheChange {
    pub kind: ChangeKind,
    pub writer_guid: Guid,
    pub sequence_number: SequenceNumber,
    pub instance_handle: InstanceHandle,
    pub serialized_payload: Vec<u8>,
    pub source_timestamp: RtpsTime,
    /// Stamped by the reader on arrival; `None` on the writer side.
    pub reception_timestamp: Option<RtpsTime>,
    pub write_params: WriteParams,
    /// Present only while the change travels as DATA_FRAG.
    pub fragments: Option<FragmentTracker>,
    /// Reader-side: the application has read (not taken) this change.
    pub is_read: bool,
}

impl CacheChange {
    /// New writer-side change with an unassigned sequence number.
    #[must_use]
    pub fn new(kind: ChangeKind, writer_guid: Guid, instance_handle: InstanceHandle) -> Self {
        CacheChange {
            kind,
            writer_guid,
            sequence_number: SequenceNumber::UNKNOWN,
            instance_handle,
            serialized_payload: Vec::new(),
            source_timestamp: RtpsTime::ZERO,
            reception_timestamp: None,
            write_params: WriteParams::default(),
            fragments: None,
            is_read: false,
        }
    }

    /// Lay out fragmentation bookkeeping for this payload. Call after the
    /// payload is final; fragment count derives from the payload length.
    pub fn set_fragment_size(&mut self, fragment_size: u16) {
        debug_assert!(fragment_size > 0);
        let count = self
            .serialized_payload
            .len()
            .div_ceil(fragment_size as usize) as u32;
        self.fragments = Some(FragmentTracker::new(fragment_size, count.max(1)));
    }

    /// Copy a fragment run into the payload and update tracking.
    /// Returns true when this write completed reassembly.
    pub fn receive_fragments(
        &mut self,
        start: FragmentNumber,
        data: &[u8],
        total_size: u32,
        fragment_size: u16,
    ) -> bool {
        if self.fragments.is_none() {
            self.serialized_payload = vec![0u8; total_size as usize];
            let count = (total_size as usize).div_ceil(fragment_size as usize) as u32;
            self.fragments = Some(FragmentTracker::new(fragment_size, count.max(1)));
        }
        let Some(tracker) = self.fragments.as_mut() else {
            return false;
        };

        let frag_len = fragment_size as usize;
        let count = data.len().div_ceil(frag_len) as u32;
        let offset = (start.saturating_sub(1) as usize) * frag_len;
        if start == 0 || offset >= self.serialized_payload.len() {
            return false;
        }
        let end = (offset + data.len()).min(self.serialized_payload.len());
        self.serialized_payload[offset..end].copy_from_slice(&data[..end - offset]);
        tracker.mark_received(start, count);

        if tracker.is_complete() {
            self.fragments = None;
            true
        } else {
            false
        }
    }

    /// True while fragments are outstanding.
    #[must_use]
    pub fn is_fragmented(&self) -> bool {
        self.fragments.is_some()
    }

    /// Number of DATA_FRAG submessages needed to carry this payload.
    #[must_use]
    pub fn fragment_count_for(&self, fragment_size: u16) -> u32 {
        self.serialized_payload
            .len()
            .div_ceil(fragment_size as usize)
            .max(1) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::{EntityId, GuidPrefix};

    fn writer_guid() -> Guid {
        Guid::new(GuidPrefix([7; 12]), EntityId::user(1, 0x02))
    }

    #[test]
    fn test_tracker_out_of_order_completion() {
        let mut t = FragmentTracker::new(1024, 4);
        assert_eq!(t.first_missing(), 1);
        t.mark_received(3, 1);
        t.mark_received(1, 1);
        assert_eq!(t.first_missing(), 2);
        t.mark_received(4, 1);
        assert!(!t.is_complete());
        t.mark_received(2, 1);
        assert!(t.is_complete());
        assert_eq!(t.first_missing(), 5);
    }

    #[test]
    fn test_tracker_duplicates_idempotent() {
        let mut t = FragmentTracker::new(1024, 3);
        assert_eq!(t.mark_received(1, 2), 2);
        assert_eq!(t.mark_received(1, 2), 0, "duplicate marks add nothing");
        assert_eq!(t.missing_fragments(8), vec![3]);
    }

    #[test]
    fn test_receive_fragments_any_order() {
        let payload: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        let frag = 1024u16;

        let mut change = CacheChange::new(ChangeKind::Alive, writer_guid(), InstanceHandle::NIL);
        let total = payload.len() as u32;
        assert!(!change.receive_fragments(3, &payload[2048..], total, frag));
        assert!(!change.receive_fragments(1, &payload[..1024], total, frag));
        assert!(change.receive_fragments(2, &payload[1024..2048], total, frag));
        assert_eq!(change.serialized_payload, payload);
        assert!(!change.is_fragmented());
    }

    #[test]
    fn test_fragment_count_rounding() {
        let mut change = CacheChange::new(ChangeKind::Alive, writer_guid(), InstanceHandle::NIL);
        change.serialized_payload = vec![0; 2049];
        assert_eq!(change.fragment_count_for(1024), 3);
        change.serialized_payload = vec![0; 2048];
        assert_eq!(change.fragment_count_for(1024), 2);
    }
}
