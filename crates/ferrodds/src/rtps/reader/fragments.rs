// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! DATA_FRAG reassembly, keyed by (writer GUID, sequence number).
//!
//! Completion is independent of fragment arrival order and duplicate
//! fragments are idempotent; the partial-sample table is bounded so a
//! misbehaving writer cannot pin unbounded memory.

use std::collections::HashMap;

use crate::core::cache_change::{CacheChange, ChangeKind, InstanceHandle};
use crate::core::guid::Guid;
use crate::core::sequence_number::SequenceNumber;
use crate::protocol::submessage::DataFragSubmessage;

/// Upper bound on concurrently reassembling samples per reader.
const MAX_PARTIAL_SAMPLES: usize = 64;

/// Reassembles DATA_FRAG runs into complete cache changes.
#[derive(Default)]
pub struct FragmentAssembler {
    partials: HashMap<(Guid, SequenceNumber), CacheChange>,
}

impl FragmentAssembler {
    #[must_use]
    pub fn new() -> Self {
        FragmentAssembler::default()
    }

    /// Feed one DATA_FRAG. Returns the completed change when this fragment
    /// run finished the sample.
    pub fn absorb(
        &mut self,
        writer_guid: Guid,
        frag: &DataFragSubmessage,
    ) -> Option<CacheChange> {
        let key = (writer_guid, frag.writer_sn);

        if !self.partials.contains_key(&key) {
            if self.partials.len() >= MAX_PARTIAL_SAMPLES {
                // Shed the sample with the lowest sequence for this writer
                // first; it is the most likely to have been abandoned.
                let victim = self
                    .partials
                    .keys()
                    .min_by_key(|(g, seq)| (*g != writer_guid, seq.0))
                    .copied();
                if let Some(victim) = victim {
                    log::debug!("[FRAG] partial table full, dropping {victim:?}");
                    self.partials.remove(&victim);
                }
            }
            let mut change = CacheChange::new(ChangeKind::Alive, writer_guid, InstanceHandle::NIL);
            change.sequence_number = frag.writer_sn;
            self.partials.insert(key, change);
        }

        let change = self.partials.get_mut(&key)?;
        let complete = change.receive_fragments(
            frag.fragment_starting_num,
            &frag.payload,
            frag.data_size,
            frag.fragment_size,
        );
        if complete {
            self.partials.remove(&key)
        } else {
            None
        }
    }

    /// Fragments still missing for one partial sample (NACK_FRAG input).
    #[must_use]
    pub fn missing_fragments(
        &self,
        writer_guid: Guid,
        seq: SequenceNumber,
        limit: usize,
    ) -> Vec<u32> {
        self.partials
            .get(&(writer_guid, seq))
            .and_then(|c| c.fragments.as_ref())
            .map_or_else(Vec::new, |t| t.missing_fragments(limit))
    }

    /// Drop partials from an unmatched writer.
    pub fn forget_writer(&mut self, writer_guid: Guid) {
        self.partials.retain(|(g, _), _| *g != writer_guid);
    }

    #[must_use]
    pub fn partial_count(&self) -> usize {
        self.partials.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::{EntityId, GuidPrefix};

    fn writer() -> Guid {
        Guid::new(GuidPrefix([2; 12]), EntityId::user(1, 0x02))
    }

    fn frag(seq: i64, start: u32, payload: &[u8], total: u32, size: u16) -> DataFragSubmessage {
        DataFragSubmessage {
            key_flag: false,
            reader_id: EntityId::UNKNOWN,
            writer_id: writer().entity_id,
            writer_sn: SequenceNumber(seq),
            fragment_starting_num: start,
            fragments_in_submessage: payload.len().div_ceil(size as usize) as u16,
            fragment_size: size,
            data_size: total,
            inline_qos: None,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_reassembly_out_of_order() {
        let payload: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        let mut asm = FragmentAssembler::new();
        let total = payload.len() as u32;

        assert!(asm.absorb(writer(), &frag(1, 3, &payload[2048..], total, 1024)).is_none());
        assert!(asm.absorb(writer(), &frag(1, 1, &payload[..1024], total, 1024)).is_none());
        let done = asm
            .absorb(writer(), &frag(1, 2, &payload[1024..2048], total, 1024))
            .expect("complete");
        assert_eq!(done.serialized_payload, payload);
        assert_eq!(asm.partial_count(), 0);
    }

    #[test]
    fn test_duplicate_fragments_idempotent() {
        let payload = vec![7u8; 2048];
        let mut asm = FragmentAssembler::new();
        asm.absorb(writer(), &frag(1, 1, &payload[..1024], 2048, 1024));
        asm.absorb(writer(), &frag(1, 1, &payload[..1024], 2048, 1024));
        assert_eq!(asm.missing_fragments(writer(), SequenceNumber(1), 8), vec![2]);
        let done = asm.absorb(writer(), &frag(1, 2, &payload[1024..], 2048, 1024));
        assert!(done.is_some());
    }

    #[test]
    fn test_multi_fragment_submessage() {
        let payload = vec![9u8; 3000];
        let mut asm = FragmentAssembler::new();
        // Fragments 1-2 in one submessage, 3 in another.
        assert!(asm.absorb(writer(), &frag(2, 1, &payload[..2048], 3000, 1024)).is_none());
        let done = asm.absorb(writer(), &frag(2, 3, &payload[2048..], 3000, 1024));
        assert!(done.is_some());
    }

    #[test]
    fn test_forget_writer_clears_partials() {
        let payload = vec![1u8; 2048];
        let mut asm = FragmentAssembler::new();
        asm.absorb(writer(), &frag(1, 1, &payload[..1024], 2048, 1024));
        assert_eq!(asm.partial_count(), 1);
        asm.forget_writer(writer());
        assert_eq!(asm.partial_count(), 0);
    }
}
