// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Stateless writer (RTPS Sec.8.4.8): no per-reader state, best-effort
//! push to a fixed locator list. SPDP announcements use this variant.

use crate::core::cache_change::{ChangeKind, InstanceHandle, WriteParams};
use crate::core::guid::EntityId;
use crate::core::locator::Locator;
use crate::core::sequence_number::SequenceNumber;
use crate::core::time::RtpsTime;
use crate::history::WriterHistory;
use crate::protocol::header::MessageHeader;
use crate::protocol::submessage::{HeartbeatSubmessage, Submessage};
use crate::rtps::SendOperation;
use crate::Result;

use super::{data_frag_submessages_for, data_submessage_for, preamble, MessagePacker, WriterAttributes};

/// Writer that pushes every change to its configured locators.
pub struct StatelessWriter {
    attributes: WriterAttributes,
    history: WriterHistory,
    reader_locators: Vec<Locator>,
    heartbeat_count: u32,
}

impl StatelessWriter {
    #[must_use]
    pub fn new(attributes: WriterAttributes, history: WriterHistory) -> Self {
        StatelessWriter {
            attributes,
            history,
            reader_locators: Vec::new(),
            heartbeat_count: 0,
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

    /// Add a destination. Duplicates are ignored.
    pub fn reader_locator_add(&mut self, locator: Locator) {
        if !self.reader_locators.contains(&locator) {
            self.reader_locators.push(locator);
        }
    }

    pub fn reader_locator_remove(&mut self, locator: &Locator) {
        self.reader_locators.retain(|l| l != locator);
    }

    #[must_use]
    pub fn reader_locators(&self) -> &[Locator] {
        &self.reader_locators
    }

    /// Serialize and send one change to the fixed locator list.
    /// No retransmission state is kept.
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
        Ok((seq, self.send_change(seq)))
    }

    /// Re-send an existing change (SPDP periodic announcements re-send the
    /// same DATA(p)).
    pub fn send_change(&mut self, seq: SequenceNumber) -> Vec<SendOperation> {
        let Some(change) = self.history.get_change(seq) else {
            return Vec::new();
        };
        if self.reader_locators.is_empty() {
            return Vec::new();
        }

        let mut packer = MessagePacker::new(
            MessageHeader::ours(self.attributes.guid.prefix),
            self.attributes.max_message_size,
        );
        for sub in preamble(None, RtpsTime::now()) {
            packer.push(&sub);
        }
        let oversize =
            change.serialized_payload.len() + 128 > self.attributes.max_message_size;
        if oversize {
            let fragments: Vec<u32> =
                (1..=change.fragment_count_for(self.attributes.fragment_size)).collect();
            for frag in data_frag_submessages_for(
                change,
                EntityId::UNKNOWN,
                self.attributes.fragment_size,
                &fragments,
            ) {
                packer.push(&Submessage::DataFrag(frag));
            }
        } else {
            packer.push(&Submessage::Data(data_submessage_for(
                change,
                EntityId::UNKNOWN,
            )));
        }

        packer
            .finish()
            .into_iter()
            .map(|m| SendOperation::new(m, self.reader_locators.clone()))
            .collect()
    }

    /// Optional announcement HEARTBEAT; no retransmission follows.
    pub fn on_heartbeat_timer(&mut self) -> Vec<SendOperation> {
        if self.history.is_empty() || self.reader_locators.is_empty() {
            return Vec::new();
        }
        self.heartbeat_count += 1;
        let hb = HeartbeatSubmessage {
            final_flag: true,
            liveliness_flag: false,
            reader_id: EntityId::UNKNOWN,
            writer_id: self.attributes.guid.entity_id,
            first_sn: self.history.first_available(),
            last_sn: self.history.last_assigned(),
            count: self.heartbeat_count,
        };
        let mut buf = Vec::with_capacity(64);
        MessageHeader::ours(self.attributes.guid.prefix).encode(&mut buf);
        Submessage::Heartbeat(hb).encode(&mut buf, true);
        vec![SendOperation::new(buf, self.reader_locators.clone())]
    }
}
