// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Stateful writer: the full RTPS reliability protocol with one
//! [`ReaderProxy`] per matched reader (Sec.8.4.9).

use std::sync::Arc;

use crate::core::cache_change::{CacheChange, ChangeKind, InstanceHandle, WriteParams};
use crate::core::guid::{EntityId, Guid};
use crate::core::locator::Locator;
use crate::core::sequence_number::SequenceNumber;
use crate::core::time::RtpsTime;
use crate::history::WriterHistory;
use crate::network::external_locators::ExternalLocatorsProcessor;
use crate::network::locator_selector::LocatorSelector;
use crate::protocol::header::MessageHeader;
use crate::protocol::submessage::{
    AckNackSubmessage, GapSubmessage, HeartbeatSubmessage, NackFragSubmessage, Submessage,
};
use crate::qos::{DurabilityKind, ReliabilityKind};
use crate::rtps::SendOperation;
use crate::{Error, Result};

use super::{
    data_frag_submessages_for, data_submessage_for, preamble, MessagePacker, ReaderProxy,
    WriterAttributes,
};

/// Matched-reader parameters handed in by discovery.
#[derive(Clone, Debug)]
pub struct MatchedReader {
    pub guid: Guid,
    pub reliability: ReliabilityKind,
    pub durability: DurabilityKind,
    pub expects_inline_qos: bool,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
}

/// Writer with per-reader state, retransmission, and history replay.
pub struct StatefulWriter {
    attributes: WriterAttributes,
    history: WriterHistory,
    proxies: Vec<ReaderProxy>,
    selector: LocatorSelector,
    externality: Arc<ExternalLocatorsProcessor>,
    /// Locator kinds reachable through the registered transports.
    supported_kinds: Vec<i32>,
    /// Strictly monotonic per writer.
    heartbeat_count: u32,
    last_liveliness_assert: std::time::Instant,
    /// Edge detector for LIVELINESS_LOST.
    liveliness_lively: bool,
}

impl StatefulWriter {
    #[must_use]
    pub fn new(
        attributes: WriterAttributes,
        history: WriterHistory,
        externality: Arc<ExternalLocatorsProcessor>,
        supported_kinds: Vec<i32>,
    ) -> Self {
        StatefulWriter {
            attributes,
            history,
            proxies: Vec::new(),
            selector: LocatorSelector::new(),
            externality,
            supported_kinds,
            heartbeat_count: 0,
            last_liveliness_assert: std::time::Instant::now(),
            liveliness_lively: true,
        }
    }

    #[must_use]
    pub fn attributes(&self) -> &WriterAttributes {
        &self.attributes
    }

    #[must_use]
    pub fn history(&self) -> &WriterHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut WriterHistory {
        &mut self.history
    }

    #[must_use]
    pub fn matched_readers(&self) -> usize {
        self.proxies.len()
    }

    // ========================================================================
    // MATCHING
    // ========================================================================

    /// Idempotent proxy creation. TRANSIENT_LOCAL readers get the existing
    /// history replayed; VOLATILE readers get a GAP covering it instead.
    pub fn matched_reader_add(&mut self, reader: MatchedReader) -> Vec<SendOperation> {
        if self.lookup_proxy(reader.guid).is_some() {
            log::debug!("[WRITER] matched_reader_add: {:?} already matched", reader.guid);
            return Vec::new();
        }

        let unicast = self.externality.filter_remote(&reader.unicast_locators);
        let mut proxy = ReaderProxy::new(
            reader.guid,
            reader.reliability,
            reader.durability,
            reader.expects_inline_qos,
            unicast.clone(),
            reader.multicast_locators.clone(),
        );
        self.selector
            .add_entry(reader.guid, unicast, reader.multicast_locators);

        let mut ops = Vec::new();
        let first = self.history.first_available();
        let last = self.history.last_assigned();
        if last.0 >= first.0 {
            if reader.durability >= DurabilityKind::TransientLocal
                && self.attributes.qos.durability >= DurabilityKind::TransientLocal
            {
                // Replay: everything still held becomes UNSENT for this proxy.
                for change in self.history.iter() {
                    proxy.change_added(change.sequence_number);
                }
            } else {
                // Late joiner on a volatile stream: the past is irrelevant.
                let gap = GapSubmessage::contiguous(
                    reader.guid.entity_id,
                    self.attributes.guid.entity_id,
                    first,
                    last,
                );
                ops.push(self.message_to_proxy(&proxy, vec![Submessage::Gap(gap)]));
            }
        }

        log::debug!(
            "[WRITER] {:?} matched reader {:?} (replay={})",
            self.attributes.guid,
            reader.guid,
            reader.durability >= DurabilityKind::TransientLocal
        );
        self.proxies.push(proxy);

        // Push replayed history out immediately.
        ops.extend(self.produce_send_ops());
        ops
    }

    /// Tear down the proxy; outstanding fragment requests are dropped.
    pub fn matched_reader_remove(&mut self, guid: Guid) -> bool {
        let before = self.proxies.len();
        self.proxies.retain(|p| p.remote_guid() != guid);
        self.selector.remove_entry(&guid);
        before != self.proxies.len()
    }

    #[must_use]
    pub fn lookup_proxy(&self, guid: Guid) -> Option<&ReaderProxy> {
        self.proxies.iter().find(|p| p.remote_guid() == guid)
    }

    fn lookup_proxy_mut(&mut self, guid: Guid) -> Option<&mut ReaderProxy> {
        self.proxies.iter_mut().find(|p| p.remote_guid() == guid)
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Create, commit, and (in synchronous mode) transmit one change.
    /// Asynchronous writers leave the change UNSENT for the flush thread.
    ///
    /// On a full KEEP_ALL history this fails with `ResourceLimit`; the
    /// caller owns the `max_blocking_time` retry loop.
    pub fn write(
        &mut self,
        payload: &[u8],
        kind: ChangeKind,
        handle: InstanceHandle,
        params: WriteParams,
    ) -> Result<(SequenceNumber, Vec<SendOperation>)> {
        let mut change = self.history.new_change(kind, handle, payload.len())?;
        change.serialized_payload.extend_from_slice(payload);
        let seq = self.history.add_change(change, params)?;
        self.unsent_change_added(seq);
        // Writing asserts liveliness for every kind.
        self.last_liveliness_assert = std::time::Instant::now();
        self.liveliness_lively = true;
        let ops = match self.attributes.publish_mode {
            crate::config::PublishMode::Synchronous => self.produce_send_ops(),
            crate::config::PublishMode::Asynchronous => Vec::new(),
        };
        Ok((seq, ops))
    }

    /// Asynchronous-mode flush: transmit everything pending.
    pub fn flush(&mut self) -> Vec<SendOperation> {
        self.produce_send_ops()
    }

    /// Mark a freshly added change UNSENT on every relevant proxy.
    pub fn unsent_change_added(&mut self, seq: SequenceNumber) {
        for proxy in &mut self.proxies {
            proxy.change_added(seq);
        }
    }

    /// History evicted a change; drop the per-proxy bookkeeping.
    pub fn change_removed_by_history(&mut self, seq: SequenceNumber) {
        for proxy in &mut self.proxies {
            proxy.change_removed(seq);
        }
    }

    /// True when every matched RELIABLE reader acknowledged `seq`.
    #[must_use]
    pub fn is_acked_by_all(&self, seq: SequenceNumber) -> bool {
        self.proxies.iter().all(|p| p.is_acked(seq))
    }

    /// Oldest sequence some reader still needs (history retention bound).
    #[must_use]
    pub fn min_unacked(&self) -> Option<SequenceNumber> {
        self.proxies
            .iter()
            .filter(|p| p.has_unacked())
            .map(|p| SequenceNumber(p.highest_acked().0 + 1))
            .min()
    }

    // ========================================================================
    // PROTOCOL INPUT
    // ========================================================================

    /// Process an ACKNACK from `reader_guid`. Returns retransmissions, GAPs
    /// for evicted sequences, and (for non-final ACKNACKs) a HEARTBEAT.
    pub fn process_acknack(
        &mut self,
        reader_guid: Guid,
        acknack: &AckNackSubmessage,
    ) -> Result<Vec<SendOperation>> {
        let Some(proxy) = self.lookup_proxy_mut(reader_guid) else {
            return Ok(Vec::new());
        };
        if !proxy.process_acknack(&acknack.reader_sn_state, acknack.count) {
            return Ok(Vec::new());
        }

        // Requested sequences the reader can never have: changes that were
        // never registered for this proxy (pre-match history towards a
        // volatile reader) or that history already evicted. Both get a GAP
        // so the reader stops waiting.
        let mut irrelevant: Vec<SequenceNumber> = Vec::new();
        for seq in acknack.reader_sn_state.iter() {
            let registered = self
                .lookup_proxy(reader_guid)
                .is_some_and(|p| p.status_of(seq).is_some());
            if !registered || self.history.get_change(seq).is_none() {
                irrelevant.push(seq);
            }
        }
        let mut extra: Vec<Submessage> = Vec::new();
        for seq in &irrelevant {
            if let Some(proxy) = self.lookup_proxy_mut(reader_guid) {
                proxy.change_removed(*seq);
            }
            extra.push(Submessage::Gap(GapSubmessage::contiguous(
                reader_guid.entity_id,
                self.attributes.guid.entity_id,
                *seq,
                *seq,
            )));
        }

        let mut ops = self.produce_send_ops();

        if !acknack.final_flag {
            extra.push(Submessage::Heartbeat(self.next_heartbeat(
                reader_guid.entity_id,
                true,
            )));
        }
        if !extra.is_empty() {
            if let Some(proxy) = self.lookup_proxy(reader_guid) {
                let proxy = proxy.clone_meta();
                ops.push(self.message_to_meta(&proxy, extra));
            }
        }
        Ok(ops)
    }

    /// Process a NACK_FRAG: queue the named fragments for retransmission.
    pub fn process_nackfrag(
        &mut self,
        reader_guid: Guid,
        nack: &NackFragSubmessage,
    ) -> Result<Vec<SendOperation>> {
        let Some(proxy) = self.lookup_proxy_mut(reader_guid) else {
            return Ok(Vec::new());
        };
        let fragments: Vec<u32> = nack.fragment_number_state.iter().collect();
        if !proxy.process_nackfrag(nack.writer_sn, fragments.into_iter(), nack.count) {
            return Ok(Vec::new());
        }
        Ok(self.produce_send_ops())
    }

    // ========================================================================
    // TIMERS
    // ========================================================================

    /// Periodic HEARTBEAT: one per proxy holding unacknowledged changes,
    /// soliciting an ACKNACK (`final = false`).
    pub fn on_heartbeat_timer(&mut self) -> Vec<SendOperation> {
        let pending: Vec<Guid> = self
            .proxies
            .iter()
            .filter(|p| p.has_unacked())
            .map(|p| p.remote_guid())
            .collect();
        let mut ops = Vec::new();
        for guid in pending {
            let hb = self.next_heartbeat(guid.entity_id, false);
            if let Some(proxy) = self.lookup_proxy(guid) {
                let meta = proxy.clone_meta();
                ops.push(self.message_to_meta(&meta, vec![Submessage::Heartbeat(hb)]));
            }
        }
        ops
    }

    fn next_heartbeat(&mut self, reader_id: EntityId, final_flag: bool) -> HeartbeatSubmessage {
        self.heartbeat_count += 1;
        HeartbeatSubmessage {
            final_flag,
            liveliness_flag: false,
            reader_id,
            writer_id: self.attributes.guid.entity_id,
            first_sn: self.history.first_available(),
            last_sn: self.history.last_assigned(),
            count: self.heartbeat_count,
        }
    }

    #[must_use]
    pub fn heartbeat_count(&self) -> u32 {
        self.heartbeat_count
    }

    /// True (once per lapse) when a manual-liveliness writer missed its
    /// lease; surfaces LIVELINESS_LOST.
    pub fn liveliness_lapsed(&mut self, now: std::time::Instant) -> bool {
        let lease = self.attributes.qos.liveliness.lease_duration;
        if self.attributes.qos.liveliness.kind == crate::qos::LivelinessKind::Automatic
            || lease == std::time::Duration::MAX
        {
            return false;
        }
        let lapsed = now.duration_since(self.last_liveliness_assert) > lease;
        if lapsed && self.liveliness_lively {
            self.liveliness_lively = false;
            return true;
        }
        false
    }

    /// Manual liveliness assertion: HEARTBEAT with the L flag towards every
    /// matched reader, requiring no response.
    pub fn assert_liveliness(&mut self) -> Vec<SendOperation> {
        self.last_liveliness_assert = std::time::Instant::now();
        self.liveliness_lively = true;
        let guids: Vec<Guid> = self.proxies.iter().map(ReaderProxy::remote_guid).collect();
        let mut ops = Vec::new();
        for guid in guids {
            let mut hb = self.next_heartbeat(guid.entity_id, true);
            hb.liveliness_flag = true;
            if let Some(proxy) = self.lookup_proxy(guid) {
                let meta = proxy.clone_meta();
                ops.push(self.message_to_meta(&meta, vec![Submessage::Heartbeat(hb)]));
            }
        }
        ops
    }

    /// Drop every proxy belonging to a dead participant. Returns the
    /// removed reader GUIDs.
    pub fn remove_readers_of(&mut self, prefix: crate::core::guid::GuidPrefix) -> Vec<Guid> {
        let removed: Vec<Guid> = self
            .proxies
            .iter()
            .map(ReaderProxy::remote_guid)
            .filter(|g| g.prefix == prefix)
            .collect();
        for guid in &removed {
            self.matched_reader_remove(*guid);
        }
        removed
    }

    // ========================================================================
    // SEND LOOP
    // ========================================================================

    /// The send loop of Sec.8.4.9: group proxies by destination, pack one
    /// message per group with the union of UNSENT/REQUESTED changes, mark
    /// them UNDERWAY, and confirm to UNACKNOWLEDGED on return.
    pub fn produce_send_ops(&mut self) -> Vec<SendOperation> {
        // KEEP_LAST eviction may have outpaced per-proxy bookkeeping.
        let first_available = self.history.first_available();
        for proxy in &mut self.proxies {
            proxy.prune_below(first_available);
        }

        let externality = Arc::clone(&self.externality);
        self.selector.reset(false);
        let mut any = false;
        for proxy in &self.proxies {
            if !proxy.pending_changes().is_empty() {
                let guid = proxy.remote_guid();
                self.selector.enable(&guid);
                any = true;
            }
        }
        if !any {
            return Vec::new();
        }
        self.selector.selection_start();
        let rank = |l: &Locator| externality.externality_of(l);
        let plan = self.selector.select_plan(&self.supported_kinds, &rank);

        let mut ops = Vec::new();
        for destination in plan {
            let covered = destination.covered;
            // Union of pending changes over the covered proxies, ascending.
            let mut union: Vec<SequenceNumber> = covered
                .iter()
                .filter_map(|g| self.lookup_proxy(*g))
                .flat_map(|p| p.pending_changes())
                .collect();
            union.sort_unstable();
            union.dedup();

            let single = (covered.len() == 1).then(|| covered[0]);
            let reader_id = single.map_or(EntityId::UNKNOWN, |g| g.entity_id);
            let mut packer = MessagePacker::new(
                MessageHeader::ours(self.attributes.guid.prefix),
                self.attributes.max_message_size,
            );
            for sub in preamble(single.map(|g| g.prefix), RtpsTime::now()) {
                packer.push(&sub);
            }

            for seq in &union {
                let Some(change) = self.history.get_change(*seq) else {
                    continue;
                };
                if self.needs_fragmentation(change) {
                    let requested = single
                        .and_then(|g| self.lookup_proxy(g))
                        .map(|p| p.unsent_fragments_of(*seq).to_vec())
                        .filter(|f| !f.is_empty());
                    let fragments: Vec<u32> = requested.unwrap_or_else(|| {
                        (1..=change.fragment_count_for(self.attributes.fragment_size)).collect()
                    });
                    for frag in data_frag_submessages_for(
                        change,
                        reader_id,
                        self.attributes.fragment_size,
                        &fragments,
                    ) {
                        packer.push(&Submessage::DataFrag(frag));
                    }
                } else {
                    packer.push(&Submessage::Data(data_submessage_for(change, reader_id)));
                }
            }

            for guid in &covered {
                if let Some(proxy) = self.lookup_proxy_mut(*guid) {
                    for seq in &union {
                        proxy.mark_underway(*seq);
                    }
                }
            }

            for message in packer.finish() {
                ops.push(SendOperation::new(message, vec![destination.locator]));
            }
        }

        // Send buffers snapshotted: UNDERWAY becomes UNACKNOWLEDGED
        // (ACKNOWLEDGED for best-effort proxies).
        for proxy in &mut self.proxies {
            proxy.confirm_underway();
        }
        ops
    }

    fn needs_fragmentation(&self, change: &CacheChange) -> bool {
        // Room for header, preamble, and DATA fixed fields.
        change.serialized_payload.len() + 128 > self.attributes.max_message_size
    }

    /// Update the reachable locator kinds (transport registration changed).
    pub fn set_supported_kinds(&mut self, kinds: Vec<i32>) {
        self.supported_kinds = kinds;
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn message_to_proxy(&self, proxy: &ReaderProxy, subs: Vec<Submessage>) -> SendOperation {
        self.message_to_meta(&proxy.clone_meta(), subs)
    }

    fn message_to_meta(&self, meta: &ProxyMeta, subs: Vec<Submessage>) -> SendOperation {
        let mut buf = Vec::with_capacity(256);
        MessageHeader::ours(self.attributes.guid.prefix).encode(&mut buf);
        for sub in preamble(Some(meta.guid.prefix), RtpsTime::now()) {
            sub.encode(&mut buf, true);
        }
        for sub in subs {
            sub.encode(&mut buf, true);
        }
        let destinations = if meta.unicast.is_empty() {
            meta.multicast.clone()
        } else {
            meta.unicast.clone()
        };
        SendOperation::new(buf, destinations)
    }

    /// Verify that `seq` was acknowledged by all readers, for
    /// `wait_for_acknowledgments` at the participant layer.
    pub fn check_acked(&self, seq: SequenceNumber) -> Result<bool> {
        if seq.0 > self.history.last_assigned().0 {
            return Err(Error::InvalidState("sequence not yet written"));
        }
        Ok(self.is_acked_by_all(seq))
    }

    /// Retention support: drop acknowledged changes from a full KEEP_ALL
    /// history. Returns how many were reclaimed.
    pub fn try_reclaim_acked(&mut self) -> usize {
        let mut reclaimed = 0;
        loop {
            let first = match self.history.iter().next().map(|c| c.sequence_number) {
                Some(first) => first,
                None => break,
            };
            if self.is_acked_by_all(first) {
                self.history.remove_change(first);
                self.change_removed_by_history(first);
                reclaimed += 1;
            } else {
                break;
            }
        }
        reclaimed
    }
}

/// Locator snapshot of a proxy, used while `self` is mutably borrowed.
pub(crate) struct ProxyMeta {
    pub guid: Guid,
    pub unicast: Vec<Locator>,
    pub multicast: Vec<Locator>,
}

impl ReaderProxy {
    pub(crate) fn clone_meta(&self) -> ProxyMeta {
        ProxyMeta {
            guid: self.remote_guid(),
            unicast: self.unicast_locators.clone(),
            multicast: self.multicast_locators.clone(),
        }
    }
}
