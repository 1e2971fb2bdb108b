// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Stateful reader: one [`WriterProxy`] per matched writer, ACKNACK
//! scheduling, GAP handling, reassembly, and exclusive-ownership
//! arbitration (Sec.8.4.12).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::cache_change::CacheChange;
use crate::core::guid::{Guid, GuidPrefix};
use crate::core::locator::Locator;
use crate::core::sequence_number::{FragmentNumberSet, SequenceNumber, SequenceNumberSet};
use crate::core::time::RtpsTime;
use crate::history::{ReaderHistory, ReceivedOutcome};
use crate::protocol::header::MessageHeader;
use crate::protocol::submessage::{
    AckNackSubmessage, DataFragSubmessage, DataSubmessage, GapSubmessage, HeartbeatSubmessage,
    InfoDstSubmessage, NackFragSubmessage, Submessage,
};
use crate::qos::{LivelinessKind, OwnershipKind, ReliabilityKind};
use crate::rtps::SendOperation;

use super::{change_from_data, FragmentAssembler, ReaderAttributes, ReaderEvent, WriterProxy};

/// Matched-writer parameters handed in by discovery.
#[derive(Clone, Debug)]
pub struct MatchedWriter {
    pub guid: Guid,
    pub persistence_guid: Option<Guid>,
    pub reliability: ReliabilityKind,
    pub ownership_strength: u32,
    pub liveliness_kind: LivelinessKind,
    pub liveliness_lease: Duration,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
    /// Low-mark restored from persistence (0 without persistence).
    pub initial_sequence: SequenceNumber,
}

/// What to do after processing a HEARTBEAT.
#[derive(Debug, PartialEq, Eq)]
pub struct HeartbeatDisposition {
    /// Schedule an ACKNACK for this writer after the given (jittered)
    /// delay. `None` when no response is owed.
    pub acknack_after: Option<Duration>,
    pub events: Vec<ReaderEvent>,
}

/// Reader with full per-writer reliability state.
pub struct StatefulReader {
    attributes: ReaderAttributes,
    history: ReaderHistory,
    proxies: Vec<WriterProxy>,
    assembler: FragmentAssembler,
    /// Exclusive-ownership winner per instance.
    owners: HashMap<crate::core::cache_change::InstanceHandle, Guid>,
    /// Jitter state for the ACKNACK delay (xorshift64).
    jitter_state: u64,
}

impl StatefulReader {
    #[must_use]
    pub fn new(attributes: ReaderAttributes, history: ReaderHistory) -> Self {
        let mut seed = 0x9e37_79b9_7f4a_7c15u64;
        for b in attributes.guid.to_bytes() {
            seed = seed.rotate_left(8) ^ u64::from(b);
        }
        StatefulReader {
            attributes,
            history,
            proxies: Vec::new(),
            assembler: FragmentAssembler::new(),
            owners: HashMap::new(),
            jitter_state: seed | 1,
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

    #[must_use]
    pub fn matched_writers(&self) -> usize {
        self.proxies.len()
    }

    // ========================================================================
    // MATCHING
    // ========================================================================

    /// Idempotent proxy creation with the initial low mark taken from
    /// persistence (or zero).
    pub fn matched_writer_add(&mut self, writer: MatchedWriter) -> bool {
        if self.lookup_proxy(writer.guid).is_some() {
            return false;
        }
        log::debug!(
            "[READER] {:?} matched writer {:?} from seq {}",
            self.attributes.guid,
            writer.guid,
            writer.initial_sequence.0
        );
        self.proxies.push(WriterProxy::new(
            writer.guid,
            writer.persistence_guid,
            writer.unicast_locators,
            writer.multicast_locators,
            writer.liveliness_kind,
            writer.liveliness_lease,
            writer.ownership_strength,
            writer.initial_sequence,
        ));
        true
    }

    /// Drop the proxy and its partial reassemblies. Instances owned by the
    /// writer fail over on the next liveliness check or sample.
    pub fn matched_writer_remove(&mut self, guid: Guid) -> bool {
        let before = self.proxies.len();
        self.proxies.retain(|p| p.remote_guid() != guid);
        if before != self.proxies.len() {
            self.assembler.forget_writer(guid);
            self.owners.retain(|_, owner| *owner != guid);
            self.history.writer_not_alive(guid);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn lookup_proxy(&self, guid: Guid) -> Option<&WriterProxy> {
        self.proxies.iter().find(|p| p.remote_guid() == guid)
    }

    /// Drop every proxy belonging to a dead participant. Returns the
    /// removed writer GUIDs.
    pub fn remove_writers_of(&mut self, prefix: GuidPrefix) -> Vec<Guid> {
        let removed: Vec<Guid> = self
            .proxies
            .iter()
            .map(WriterProxy::remote_guid)
            .filter(|g| g.prefix == prefix)
            .collect();
        for guid in &removed {
            self.matched_writer_remove(*guid);
        }
        removed
    }

    fn lookup_proxy_mut(&mut self, guid: Guid) -> Option<&mut WriterProxy> {
        self.proxies.iter_mut().find(|p| p.remote_guid() == guid)
    }

    // ========================================================================
    // DATA PATH
    // ========================================================================

    /// Process a DATA submessage addressed to this reader.
    pub fn process_data_msg(
        &mut self,
        source_prefix: GuidPrefix,
        data: &DataSubmessage,
        timestamp: Option<RtpsTime>,
    ) -> Vec<ReaderEvent> {
        let change = change_from_data(source_prefix, data, timestamp);
        self.process_change(change)
    }

    /// Process a DATA_FRAG; a completed reassembly feeds the DATA path.
    pub fn process_data_frag_msg(
        &mut self,
        source_prefix: GuidPrefix,
        frag: &DataFragSubmessage,
        timestamp: Option<RtpsTime>,
    ) -> Vec<ReaderEvent> {
        let writer_guid = Guid::new(source_prefix, frag.writer_id);
        // Already-complete sequences need no reassembly.
        if self
            .lookup_proxy(writer_guid)
            .is_some_and(|p| p.is_received(frag.writer_sn))
        {
            return Vec::new();
        }
        match self.assembler.absorb(writer_guid, frag) {
            Some(mut change) => {
                change.source_timestamp = timestamp.unwrap_or_else(RtpsTime::now);
                self.process_change(change)
            }
            None => Vec::new(),
        }
    }

    fn process_change(&mut self, change: CacheChange) -> Vec<ReaderEvent> {
        let mut events = Vec::new();
        let writer_guid = change.writer_guid;
        let seq = change.sequence_number;
        let reliable = self.attributes.qos.reliability == ReliabilityKind::Reliable;

        let Some(proxy) = self.lookup_proxy_mut(writer_guid) else {
            // Data from an unmatched writer; stateful readers ignore it.
            log::trace!("[READER] DATA from unmatched writer {writer_guid:?}");
            return events;
        };
        proxy.assert_liveliness();

        let fresh = if reliable {
            proxy.received_change_set(seq)
        } else {
            proxy.force_advance(seq)
        };
        if !fresh {
            return events;
        }

        // Exclusive ownership: only the strongest alive writer's samples
        // reach the history.
        if !self.accept_by_ownership(&change, &mut events) {
            return events;
        }

        let handle = change.instance_handle;
        match self.history.received_change(change) {
            ReceivedOutcome::Stored => {
                self.refresh_deadline(handle);
                events.push(ReaderEvent::DataAvailable);
            }
            ReceivedOutcome::Duplicate => {}
            ReceivedOutcome::Rejected(reason) => {
                // Withhold protocol-level acknowledgement so a RELIABLE
                // writer retries once resources free up.
                if let Some(proxy) = self.lookup_proxy_mut(writer_guid) {
                    proxy.unreceive(seq);
                }
                events.push(ReaderEvent::SampleRejected(reason));
            }
        }
        events
    }

    fn refresh_deadline(&mut self, handle: crate::core::cache_change::InstanceHandle) {
        // The deadline timer restarts per instance on each accepted sample.
        let period = self.attributes.qos.deadline_period;
        if period == Duration::MAX {
            return;
        }
        let due = RtpsTime::from_duration_since_epoch(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                + period,
        );
        if let Some(entry) = self.history.instance_mut(handle) {
            entry.deadline_due = Some(due);
        }
    }

    fn accept_by_ownership(&mut self, change: &CacheChange, events: &mut Vec<ReaderEvent>) -> bool {
        if self.attributes.qos.ownership != OwnershipKind::Exclusive
            || change.instance_handle.is_nil()
        {
            return true;
        }
        let candidate = change.writer_guid;
        let candidate_strength = self
            .lookup_proxy(candidate)
            .map_or(0, |p| p.ownership_strength);

        let current = self.owners.get(&change.instance_handle).copied();
        let accept = match current {
            None => true,
            Some(owner) if owner == candidate => true,
            Some(owner) => {
                let owner_proxy = self.lookup_proxy(owner);
                let owner_alive = owner_proxy.is_some_and(|p| p.is_alive());
                let owner_strength = owner_proxy.map_or(0, |p| p.ownership_strength);
                !owner_alive
                    || candidate_strength > owner_strength
                    || (candidate_strength == owner_strength && candidate < owner)
            }
        };
        if accept && current != Some(candidate) {
            self.owners.insert(change.instance_handle, candidate);
            events.push(ReaderEvent::OwnershipChanged {
                instance: change.instance_handle,
                previous: current,
                current: candidate,
            });
        }
        accept
    }

    // ========================================================================
    // PROTOCOL INPUT
    // ========================================================================

    /// Process a HEARTBEAT (idempotent per count).
    pub fn process_heartbeat_msg(
        &mut self,
        source_prefix: GuidPrefix,
        hb: &HeartbeatSubmessage,
    ) -> HeartbeatDisposition {
        let writer_guid = Guid::new(source_prefix, hb.writer_id);
        let base_delay = self.attributes.heartbeat_response_delay;
        let jitter = self.next_jitter(base_delay);

        let mut events = Vec::new();
        let Some(proxy) = self.lookup_proxy_mut(writer_guid) else {
            return HeartbeatDisposition {
                acknack_after: None,
                events,
            };
        };

        if hb.liveliness_flag {
            proxy.assert_liveliness();
        }
        let Some(lost) = proxy.process_heartbeat_window(hb.first_sn, hb.last_sn, hb.count) else {
            return HeartbeatDisposition {
                acknack_after: None,
                events,
            };
        };
        if lost > 0 {
            events.push(ReaderEvent::SampleLost { count: lost });
        }

        let (missing, _) = proxy.missing_changes(256);
        // A non-final heartbeat always gets a (possibly pure-ack) response;
        // missing data warrants one regardless of the final flag.
        let respond = !hb.final_flag || !missing.is_empty();
        HeartbeatDisposition {
            acknack_after: respond.then_some(jitter),
            events,
        }
    }

    /// Process a GAP: listed sequences become irrelevant on the proxy.
    pub fn process_gap_msg(&mut self, source_prefix: GuidPrefix, gap: &GapSubmessage) {
        let writer_guid = Guid::new(source_prefix, gap.writer_id);
        let Some(proxy) = self.lookup_proxy_mut(writer_guid) else {
            return;
        };
        for seq in gap.irrelevant_sequences() {
            proxy.irrelevant_change_set(seq);
        }
    }

    /// Build the scheduled ACKNACK (plus NACK_FRAGs for partial samples)
    /// for one writer. Base is `low_mark + 1`; the bitmap covers the lowest
    /// 256 missing sequences; more missing solicits another HEARTBEAT via
    /// `final = false`.
    pub fn produce_acknack(&mut self, writer_guid: Guid) -> Vec<SendOperation> {
        let reader_guid = self.attributes.guid;
        let Some(proxy) = self.lookup_proxy_mut(writer_guid) else {
            return Vec::new();
        };

        let (missing, more) = proxy.missing_changes(256);
        let base = SequenceNumber(proxy.changes_low_mark().0 + 1);
        let state = SequenceNumberSet::from_members(base, missing.iter().copied());
        let acknack = AckNackSubmessage {
            final_flag: !more,
            reader_id: reader_guid.entity_id,
            writer_id: writer_guid.entity_id,
            reader_sn_state: state,
            count: proxy.next_acknack_count(),
        };

        let mut submessages = vec![
            Submessage::InfoDst(InfoDstSubmessage {
                guid_prefix: writer_guid.prefix,
            }),
            Submessage::AckNack(acknack),
        ];

        // NACK_FRAG for every partially reassembled missing sample.
        for seq in &missing {
            let frags = self.assembler.missing_fragments(writer_guid, *seq, 256);
            if frags.is_empty() {
                continue;
            }
            let mut set = FragmentNumberSet::new(frags[0]);
            for f in &frags {
                set.insert(*f);
            }
            let Some(proxy) = self.lookup_proxy_mut(writer_guid) else {
                break;
            };
            submessages.push(Submessage::NackFrag(NackFragSubmessage {
                reader_id: reader_guid.entity_id,
                writer_id: writer_guid.entity_id,
                writer_sn: *seq,
                fragment_number_state: set,
                count: proxy.next_acknack_count(),
            }));
        }

        let Some(proxy) = self.lookup_proxy(writer_guid) else {
            return Vec::new();
        };
        let destinations = if proxy.unicast_locators.is_empty() {
            proxy.multicast_locators.clone()
        } else {
            proxy.unicast_locators.clone()
        };

        let mut buf = Vec::with_capacity(128);
        MessageHeader::ours(reader_guid.prefix).encode(&mut buf);
        for sub in submessages {
            sub.encode(&mut buf, true);
        }
        vec![SendOperation::new(buf, destinations)]
    }

    fn next_jitter(&mut self, base: Duration) -> Duration {
        // xorshift64: uniform jitter over [0, base].
        let mut x = self.jitter_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.jitter_state = x;
        if base.is_zero() {
            return base;
        }
        base.mul_f64((x % 1000) as f64 / 1000.0)
    }

    // ========================================================================
    // USER READ PATH
    // ========================================================================

    /// Take the next unread sample that is exposable in order: RELIABLE
    /// readers only surface sequences at or below their writer's low mark,
    /// so the wire may fill gaps out of order but the application never
    /// observes them.
    pub fn take_next_sample(&mut self) -> Option<CacheChange> {
        let exposable: Vec<(Guid, SequenceNumber)> = self
            .history
            .iter()
            .filter(|c| !c.is_read)
            .map(|c| (c.writer_guid, c.sequence_number))
            .collect();
        let reliable = self.attributes.qos.reliability == ReliabilityKind::Reliable;
        for (writer, seq) in exposable {
            let in_order = !reliable
                || self
                    .lookup_proxy(writer)
                    .map_or(true, |p| seq.0 <= p.changes_low_mark().0);
            if in_order {
                return self.history.remove_change(writer, seq);
            }
        }
        None
    }

    // ========================================================================
    // TIMERS
    // ========================================================================

    /// Lease sweep: flips proxy liveliness and fails exclusive ownership
    /// over to the strongest remaining alive writer.
    pub fn check_liveliness(&mut self, now: Instant) -> Vec<ReaderEvent> {
        let mut events = Vec::new();
        let mut flipped_down: Vec<Guid> = Vec::new();
        for proxy in &mut self.proxies {
            if let Some(alive) = proxy.update_liveliness(now) {
                events.push(ReaderEvent::LivelinessChanged {
                    writer: proxy.remote_guid(),
                    alive,
                });
                if !alive {
                    flipped_down.push(proxy.remote_guid());
                }
            }
        }

        for dead in flipped_down {
            self.history.writer_not_alive(dead);
            // Ownership failover: next-strongest alive writer takes over.
            let instances: Vec<_> = self
                .owners
                .iter()
                .filter(|(_, owner)| **owner == dead)
                .map(|(instance, _)| *instance)
                .collect();
            for instance in instances {
                let next = self
                    .proxies
                    .iter()
                    .filter(|p| p.is_alive())
                    .max_by_key(|p| (p.ownership_strength, std::cmp::Reverse(p.remote_guid())))
                    .map(WriterProxy::remote_guid);
                match next {
                    Some(new_owner) => {
                        self.owners.insert(instance, new_owner);
                        events.push(ReaderEvent::OwnershipChanged {
                            instance,
                            previous: Some(dead),
                            current: new_owner,
                        });
                    }
                    None => {
                        self.owners.remove(&instance);
                    }
                }
            }
        }
        events
    }

    /// Deadline sweep over instances.
    pub fn check_deadlines(&mut self, now: RtpsTime) -> Vec<ReaderEvent> {
        let period = self.attributes.qos.deadline_period;
        if period == Duration::MAX {
            return Vec::new();
        }
        let mut events = Vec::new();
        for (handle, entry) in self.history.instances_mut() {
            if let Some(due) = entry.deadline_due {
                if now > due {
                    events.push(ReaderEvent::RequestedDeadlineMissed { instance: *handle });
                    entry.deadline_due = Some(RtpsTime::from_duration_since_epoch(
                        now.to_duration() + period,
                    ));
                }
            }
        }
        events
    }

    /// Lifespan sweep: silently expire overage changes.
    pub fn apply_lifespan(&mut self, now: RtpsTime) -> usize {
        let lifespan = self.attributes.qos.lifespan;
        if lifespan == Duration::MAX {
            return 0;
        }
        let cutoff = now.to_duration().saturating_sub(lifespan);
        self.history
            .expire_older_than(RtpsTime::from_duration_since_epoch(cutoff))
    }

    /// Explicit liveliness assertion relayed from the participant-message
    /// builtin or PDP re-announcement.
    pub fn assert_writer_liveliness(&mut self, writer_prefix: GuidPrefix) {
        for proxy in &mut self.proxies {
            if proxy.remote_guid().prefix == writer_prefix
                && proxy.liveliness_kind != LivelinessKind::ManualByTopic
            {
                proxy.assert_liveliness();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache_change::InstanceHandle;
    use crate::core::guid::{entity_kind, EntityId};
    use crate::history::SampleRejectedReason;
    use crate::protocol::constants::PID_KEY_HASH;
    use crate::protocol::{Parameter, ParameterList};
    use crate::qos::{HistoryKind, Qos, ResourceLimits};

    fn reader(qos: Qos, keyed: bool) -> StatefulReader {
        let guid = Guid::new(GuidPrefix([9; 12]), EntityId::user(1, 0x07));
        let history = ReaderHistory::new(qos.history, qos.resource_limits, keyed);
        let attributes = ReaderAttributes {
            guid,
            topic_name: "t".into(),
            type_name: "T".into(),
            qos,
            heartbeat_response_delay: Duration::from_millis(5),
            keyed,
            expects_inline_qos: false,
        };
        StatefulReader::new(attributes, history)
    }

    fn reliable_qos() -> Qos {
        Qos {
            reliability: ReliabilityKind::Reliable,
            history: HistoryKind::KeepAll,
            resource_limits: ResourceLimits::default(),
            ..Qos::default()
        }
    }

    fn writer_prefix(n: u8) -> GuidPrefix {
        GuidPrefix([n; 12])
    }

    fn matched(n: u8, strength: u32) -> MatchedWriter {
        MatchedWriter {
            guid: Guid::new(
                writer_prefix(n),
                EntityId::user(1, entity_kind::WRITER_NO_KEY),
            ),
            persistence_guid: None,
            reliability: ReliabilityKind::Reliable,
            ownership_strength: strength,
            liveliness_kind: LivelinessKind::Automatic,
            liveliness_lease: Duration::MAX,
            unicast_locators: vec![Locator::udpv4(std::net::Ipv4Addr::new(10, 0, 0, n), 7411)],
            multicast_locators: Vec::new(),
            initial_sequence: SequenceNumber(0),
        }
    }

    fn data(seq: i64, payload: &[u8]) -> DataSubmessage {
        DataSubmessage::new_data(
            EntityId::user(1, 0x07),
            EntityId::user(1, entity_kind::WRITER_NO_KEY),
            SequenceNumber(seq),
            payload.to_vec(),
        )
    }

    fn keyed_data(seq: i64, key: u8) -> DataSubmessage {
        let mut qos = ParameterList::new();
        qos.push(Parameter::new(PID_KEY_HASH, vec![key; 16]));
        DataSubmessage {
            inline_qos: Some(qos),
            ..data(seq, &[key])
        }
    }

    fn heartbeat(first: i64, last: i64, count: u32, final_flag: bool) -> HeartbeatSubmessage {
        HeartbeatSubmessage {
            final_flag,
            liveliness_flag: false,
            reader_id: EntityId::user(1, 0x07),
            writer_id: EntityId::user(1, entity_kind::WRITER_NO_KEY),
            first_sn: SequenceNumber(first),
            last_sn: SequenceNumber(last),
            count,
        }
    }

    #[test]
    fn test_in_order_delivery_despite_wire_reorder() {
        let mut r = reader(reliable_qos(), false);
        r.matched_writer_add(matched(1, 0));

        r.process_data_msg(writer_prefix(1), &data(2, b"two"), None);
        assert!(r.take_next_sample().is_none(), "gap before 2 unresolved");

        r.process_data_msg(writer_prefix(1), &data(1, b"one"), None);
        assert_eq!(r.take_next_sample().unwrap().sequence_number, SequenceNumber(1));
        assert_eq!(r.take_next_sample().unwrap().sequence_number, SequenceNumber(2));
    }

    #[test]
    fn test_duplicate_data_dropped() {
        let mut r = reader(reliable_qos(), false);
        r.matched_writer_add(matched(1, 0));
        let events = r.process_data_msg(writer_prefix(1), &data(1, b"x"), None);
        assert!(events.contains(&ReaderEvent::DataAvailable));
        let events = r.process_data_msg(writer_prefix(1), &data(1, b"x"), None);
        assert!(events.is_empty());
        assert_eq!(r.history().len(), 1);
    }

    #[test]
    fn test_heartbeat_schedules_acknack_for_missing() {
        let mut r = reader(reliable_qos(), false);
        r.matched_writer_add(matched(1, 0));
        r.process_data_msg(writer_prefix(1), &data(1, b"x"), None);

        let disposition = r.process_heartbeat_msg(writer_prefix(1), &heartbeat(1, 3, 1, false));
        let delay = disposition.acknack_after.expect("response owed");
        assert!(delay <= Duration::from_millis(5), "jitter within bound");

        let ops = r.produce_acknack(matched(1, 0).guid);
        assert_eq!(ops.len(), 1);
        // ACKNACK encodes base = low_mark + 1 = 2 with bits for 2 and 3.
    }

    #[test]
    fn test_heartbeat_idempotent_by_count() {
        let mut r = reader(reliable_qos(), false);
        r.matched_writer_add(matched(1, 0));
        let first = r.process_heartbeat_msg(writer_prefix(1), &heartbeat(1, 2, 7, false));
        assert!(first.acknack_after.is_some());
        let replay = r.process_heartbeat_msg(writer_prefix(1), &heartbeat(1, 2, 7, false));
        assert!(replay.acknack_after.is_none(), "same count ignored");
    }

    #[test]
    fn test_final_heartbeat_without_missing_needs_no_response() {
        let mut r = reader(reliable_qos(), false);
        r.matched_writer_add(matched(1, 0));
        r.process_data_msg(writer_prefix(1), &data(1, b"x"), None);
        let disposition = r.process_heartbeat_msg(writer_prefix(1), &heartbeat(1, 1, 1, true));
        assert!(disposition.acknack_after.is_none());
    }

    #[test]
    fn test_gap_marks_irrelevant_and_unblocks_order() {
        let mut r = reader(reliable_qos(), false);
        r.matched_writer_add(matched(1, 0));
        r.process_data_msg(writer_prefix(1), &data(3, b"three"), None);
        assert!(r.take_next_sample().is_none());

        // Writer says 1-2 will never arrive.
        let gap = GapSubmessage::contiguous(
            EntityId::user(1, 0x07),
            EntityId::user(1, entity_kind::WRITER_NO_KEY),
            SequenceNumber(1),
            SequenceNumber(2),
        );
        r.process_gap_msg(writer_prefix(1), &gap);
        assert_eq!(
            r.take_next_sample().unwrap().sequence_number,
            SequenceNumber(3)
        );
    }

    #[test]
    fn test_rejected_sample_withholds_ack_progress() {
        let qos = Qos {
            resource_limits: ResourceLimits {
                max_samples: 1,
                ..ResourceLimits::default()
            },
            ..reliable_qos()
        };
        let mut r = reader(qos, false);
        r.matched_writer_add(matched(1, 0));
        r.process_data_msg(writer_prefix(1), &data(1, b"x"), None);
        let events = r.process_data_msg(writer_prefix(1), &data(2, b"y"), None);
        assert!(events
            .iter()
            .any(|e| matches!(e, ReaderEvent::SampleRejected(SampleRejectedReason::BySamplesLimit))));
        // The proxy must not count 2 as received, so ACKNACK keeps base 2.
        let proxy = r.lookup_proxy(matched(1, 0).guid).unwrap();
        assert_eq!(proxy.changes_low_mark(), SequenceNumber(1));
        assert!(!proxy.is_received(SequenceNumber(2)));
    }

    #[test]
    fn test_exclusive_ownership_strongest_wins() {
        let mut qos = reliable_qos();
        qos.ownership = OwnershipKind::Exclusive;
        let mut r = reader(qos, true);
        r.matched_writer_add(matched(1, 10));
        r.matched_writer_add(matched(2, 5));

        // Strong writer establishes ownership of key 7.
        let events = r.process_data_msg(writer_prefix(1), &keyed_data(1, 7), None);
        assert!(events
            .iter()
            .any(|e| matches!(e, ReaderEvent::OwnershipChanged { .. })));
        assert_eq!(r.history().len(), 1);

        // Weaker writer's sample for the same instance is dropped.
        r.process_data_msg(writer_prefix(2), &keyed_data(1, 7), None);
        assert_eq!(r.history().len(), 1);
    }

    #[test]
    fn test_ownership_failover_on_liveliness_loss() {
        let mut qos = reliable_qos();
        qos.ownership = OwnershipKind::Exclusive;
        let mut r = reader(qos, true);
        let mut strong = matched(1, 10);
        strong.liveliness_lease = Duration::from_millis(1);
        r.matched_writer_add(strong);
        r.matched_writer_add(matched(2, 5));

        r.process_data_msg(writer_prefix(1), &keyed_data(1, 7), None);

        std::thread::sleep(Duration::from_millis(10));
        let events = r.check_liveliness(Instant::now());
        assert!(events
            .iter()
            .any(|e| matches!(e, ReaderEvent::LivelinessChanged { alive: false, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ReaderEvent::OwnershipChanged { .. })));

        // The weaker writer now owns the instance; its samples land.
        r.process_data_msg(writer_prefix(2), &keyed_data(2, 7), None);
        assert_eq!(r.history().len(), 2);
    }

    #[test]
    fn test_unmatched_writer_ignored() {
        let mut r = reader(reliable_qos(), false);
        let events = r.process_data_msg(writer_prefix(1), &data(1, b"x"), None);
        assert!(events.is_empty());
        assert!(r.history().is_empty());
    }

    #[test]
    fn test_heartbeat_reports_lost_samples() {
        let mut r = reader(reliable_qos(), false);
        r.matched_writer_add(matched(1, 0));
        // Writer pruned 1-2 before we saw them.
        let disposition = r.process_heartbeat_msg(writer_prefix(1), &heartbeat(3, 4, 1, false));
        assert!(disposition
            .events
            .iter()
            .any(|e| matches!(e, ReaderEvent::SampleLost { count: 2 })));
    }
}
