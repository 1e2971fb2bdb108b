// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Stateless reader (RTPS Sec.8.4.11): accepts DATA from any writer on its
//! topic, keeps no per-writer protocol state beyond stale-drop ordering,
//! and never sends ACKNACKs. The SPDP detector reader uses this variant.

use std::collections::HashMap;

use crate::core::cache_change::CacheChange;
use crate::core::guid::{Guid, GuidPrefix};
use crate::core::sequence_number::SequenceNumber;
use crate::core::time::RtpsTime;
use crate::history::{ReaderHistory, ReceivedOutcome};
use crate::protocol::submessage::{DataFragSubmessage, DataSubmessage};

use super::{change_from_data, FragmentAssembler, ReaderAttributes, ReaderEvent};

/// Best-effort reader without writer proxies.
pub struct StatelessReader {
    attributes: ReaderAttributes,
    history: ReaderHistory,
    assembler: FragmentAssembler,
    /// Highest sequence seen per writer; anything at or below is stale.
    highest_seen: HashMap<Guid, SequenceNumber>,
}

impl StatelessReader {
    #[must_use]
    pub fn new(attributes: ReaderAttributes, history: ReaderHistory) -> Self {
        StatelessReader {
            attributes,
            history,
            assembler: FragmentAssembler::new(),
            highest_seen: HashMap::new(),
        }
    }

    #[must_use]
    pub fn attributes(&self) -> &ReaderAttributes {
        &self.attributes
    }

    #[must_use]
    pub fn history(&self) -> &ReaderHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut ReaderHistory {
        &mut self.history
    }

    /// Accept DATA from any writer; drop stale and duplicate sequences.
    pub fn process_data_msg(
        &mut self,
        source_prefix: GuidPrefix,
        data: &DataSubmessage,
        timestamp: Option<RtpsTime>,
    ) -> Vec<ReaderEvent> {
        let change = change_from_data(source_prefix, data, timestamp);
        self.process_change(change)
    }

    pub fn process_data_frag_msg(
        &mut self,
        source_prefix: GuidPrefix,
        frag: &DataFragSubmessage,
        timestamp: Option<RtpsTime>,
    ) -> Vec<ReaderEvent> {
        let writer_guid = Guid::new(source_prefix, frag.writer_id);
        match self.assembler.absorb(writer_guid, frag) {
            Some(mut change) => {
                change.source_timestamp = timestamp.unwrap_or_else(RtpsTime::now);
                self.process_change(change)
            }
            None => Vec::new(),
        }
    }

    fn process_change(&mut self, change: CacheChange) -> Vec<ReaderEvent> {
        let writer = change.writer_guid;
        let seq = change.sequence_number;
        let stale = self
            .highest_seen
            .get(&writer)
            .is_some_and(|highest| seq.0 <= highest.0);
        if stale {
            return Vec::new();
        }
        self.highest_seen.insert(writer, seq);

        match self.history.received_change(change) {
            ReceivedOutcome::Stored => vec![ReaderEvent::DataAvailable],
            ReceivedOutcome::Duplicate => Vec::new(),
            ReceivedOutcome::Rejected(reason) => vec![ReaderEvent::SampleRejected(reason)],
        }
    }

    /// Take the next unread sample (no ordering constraint beyond what the
    /// stale-drop already enforces).
    pub fn take_next_sample(&mut self) -> Option<CacheChange> {
        self.history.take_next_unread()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::{entity_kind, EntityId};
    use crate::qos::{HistoryKind, Qos, ResourceLimits};
    use std::time::Duration;

    fn reader() -> StatelessReader {
        let guid = Guid::new(GuidPrefix([9; 12]), EntityId::SPDP_READER);
        let history = ReaderHistory::new(HistoryKind::KeepLast(8), ResourceLimits::default(), false);
        let attributes = ReaderAttributes {
            guid,
            topic_name: "DCPSParticipant".into(),
            type_name: "ParticipantProxyData".into(),
            qos: Qos::default(),
            heartbeat_response_delay: Duration::from_millis(5),
            keyed: false,
            expects_inline_qos: false,
        };
        StatelessReader::new(attributes, history)
    }

    fn data(seq: i64) -> DataSubmessage {
        DataSubmessage::new_data(
            EntityId::UNKNOWN,
            EntityId::user(1, entity_kind::WRITER_NO_KEY),
            SequenceNumber(seq),
            vec![1, 2, 3],
        )
    }

    #[test]
    fn test_accepts_from_any_writer() {
        let mut r = reader();
        assert!(!r
            .process_data_msg(GuidPrefix([1; 12]), &data(1), None)
            .is_empty());
        assert!(!r
            .process_data_msg(GuidPrefix([2; 12]), &data(1), None)
            .is_empty());
        assert_eq!(r.history().len(), 2);
    }

    #[test]
    fn test_stale_sequences_dropped_per_writer() {
        let mut r = reader();
        r.process_data_msg(GuidPrefix([1; 12]), &data(5), None);
        assert!(r
            .process_data_msg(GuidPrefix([1; 12]), &data(4), None)
            .is_empty());
        assert!(r
            .process_data_msg(GuidPrefix([1; 12]), &data(5), None)
            .is_empty());
        assert!(!r
            .process_data_msg(GuidPrefix([1; 12]), &data(6), None)
            .is_empty());
    }

    #[test]
    fn test_take_returns_samples() {
        let mut r = reader();
        r.process_data_msg(GuidPrefix([1; 12]), &data(1), None);
        assert!(r.take_next_sample().is_some());
        assert!(r.take_next_sample().is_none());
    }
}
