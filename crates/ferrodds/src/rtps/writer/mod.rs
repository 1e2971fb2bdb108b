// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Writer state machines (RTPS Sec.8.4.7, 8.4.8, 8.4.9).

mod reader_proxy;
mod stateful;
mod stateless;

pub use reader_proxy::{ChangeForReader, ChangeForReaderStatus, ReaderProxy};
pub use stateful::{MatchedReader, StatefulWriter};
pub use stateless::StatelessWriter;

use std::time::Duration;

use crate::config::WriterConfig;
use crate::core::cache_change::{CacheChange, ChangeKind};
use crate::core::guid::{EntityId, Guid};
use crate::protocol::constants::{
    MESSAGE_HEADER_SIZE, PID_KEY_HASH, PID_STATUS_INFO, STATUS_INFO_DISPOSED,
    STATUS_INFO_UNREGISTERED,
};
use crate::protocol::header::MessageHeader;
use crate::protocol::submessage::{
    DataFragSubmessage, DataSubmessage, InfoDstSubmessage, InfoTsSubmessage, Submessage,
};
use crate::protocol::{Parameter, ParameterList};
use crate::qos::Qos;

/// Data-only attributes shared by both writer variants.
#[derive(Clone, Debug)]
pub struct WriterAttributes {
    pub guid: Guid,
    pub topic_name: String,
    pub type_name: String,
    pub qos: Qos,
    pub publish_mode: crate::config::PublishMode,
    pub heartbeat_period: Duration,
    pub nack_response_delay: Duration,
    pub fragment_size: u16,
    pub max_message_size: usize,
    pub keyed: bool,
}

impl WriterAttributes {
    #[must_use]
    pub fn from_config(guid: Guid, config: &WriterConfig, max_message_size: usize) -> Self {
        WriterAttributes {
            guid,
            topic_name: config.topic_name.clone(),
            type_name: config.type_name.clone(),
            qos: config.qos.clone(),
            publish_mode: config.publish_mode,
            heartbeat_period: config.heartbeat_period,
            nack_response_delay: config.nack_response_delay,
            fragment_size: config.fragment_size,
            max_message_size,
            keyed: config.keyed,
        }
    }
}

/// Sum type over the two writer variants.
pub enum RtpsWriter {
    Stateless(StatelessWriter),
    Stateful(StatefulWriter),
}

impl RtpsWriter {
    #[must_use]
    pub fn guid(&self) -> Guid {
        match self {
            RtpsWriter::Stateless(w) => w.attributes().guid,
            RtpsWriter::Stateful(w) => w.attributes().guid,
        }
    }
}

// ============================================================================
// MESSAGE PACKING
// ============================================================================

/// Accumulates submessages into RTPS messages no larger than `max_size`,
/// starting a new message (repeating the header) on overflow.
pub(crate) struct MessagePacker {
    header: MessageHeader,
    max_size: usize,
    messages: Vec<Vec<u8>>,
    current: Vec<u8>,
}

impl MessagePacker {
    pub(crate) fn new(header: MessageHeader, max_size: usize) -> Self {
        let mut current = Vec::with_capacity(1024);
        header.encode(&mut current);
        MessagePacker {
            header,
            max_size,
            messages: Vec::new(),
            current,
        }
    }

    /// Append a submessage, rolling over to a fresh message when it would
    /// exceed `max_size`. A submessage larger than `max_size` on its own
    /// still goes out (fragmentation happens above this layer).
    pub(crate) fn push(&mut self, submessage: &Submessage) {
        let mut encoded = Vec::new();
        submessage.encode(&mut encoded, true);
        if self.current.len() + encoded.len() > self.max_size
            && self.current.len() > MESSAGE_HEADER_SIZE
        {
            self.flush();
        }
        self.current.extend_from_slice(&encoded);
    }

    fn flush(&mut self) {
        if self.current.len() > MESSAGE_HEADER_SIZE {
            let mut fresh = Vec::with_capacity(1024);
            self.header.encode(&mut fresh);
            self.messages.push(std::mem::replace(&mut self.current, fresh));
        }
    }

    /// Finish and return all packed messages.
    pub(crate) fn finish(mut self) -> Vec<Vec<u8>> {
        self.flush();
        self.messages
    }
}

/// Build the DATA submessage for one cache change.
pub(crate) fn data_submessage_for(change: &CacheChange, reader_id: EntityId) -> DataSubmessage {
    let mut data = DataSubmessage::new_data(
        reader_id,
        change.writer_guid.entity_id,
        change.sequence_number,
        change.serialized_payload.clone(),
    );
    if change.kind.is_not_alive() {
        // Disposals travel as key payloads with status info inline.
        data.data_flag = false;
        data.key_flag = true;
        let status = match change.kind {
            ChangeKind::NotAliveDisposed => STATUS_INFO_DISPOSED,
            ChangeKind::NotAliveUnregistered => STATUS_INFO_UNREGISTERED,
            _ => STATUS_INFO_DISPOSED | STATUS_INFO_UNREGISTERED,
        };
        let mut qos = ParameterList::new();
        qos.push(Parameter::from_u32(PID_STATUS_INFO, status));
        qos.push(Parameter::new(
            PID_KEY_HASH,
            change.instance_handle.0.to_vec(),
        ));
        data.inline_qos = Some(qos);
    } else if !change.instance_handle.is_nil() {
        let mut qos = ParameterList::new();
        qos.push(Parameter::new(
            PID_KEY_HASH,
            change.instance_handle.0.to_vec(),
        ));
        data.inline_qos = Some(qos);
    }
    data
}

/// Build the DATA_FRAG submessages for the selected fragments of a change.
/// `fragments` must be ascending 1-based fragment numbers.
pub(crate) fn data_frag_submessages_for(
    change: &CacheChange,
    reader_id: EntityId,
    fragment_size: u16,
    fragments: &[u32],
) -> Vec<DataFragSubmessage> {
    let total = change.serialized_payload.len();
    let frag_len = fragment_size as usize;
    fragments
        .iter()
        .map(|&frag| {
            let start = (frag as usize - 1) * frag_len;
            let end = (start + frag_len).min(total);
            DataFragSubmessage {
                key_flag: false,
                reader_id,
                writer_id: change.writer_guid.entity_id,
                writer_sn: change.sequence_number,
                fragment_starting_num: frag,
                fragments_in_submessage: 1,
                fragment_size,
                data_size: total as u32,
                inline_qos: None,
                payload: change.serialized_payload[start..end].to_vec(),
            }
        })
        .collect()
}

/// INFO_DST + INFO_TS preamble for a destination group.
pub(crate) fn preamble(
    single_destination: Option<crate::core::guid::GuidPrefix>,
    timestamp: crate::core::time::RtpsTime,
) -> Vec<Submessage> {
    let mut out = Vec::with_capacity(2);
    if let Some(prefix) = single_destination {
        out.push(Submessage::InfoDst(InfoDstSubmessage {
            guid_prefix: prefix,
        }));
    }
    out.push(Submessage::InfoTs(InfoTsSubmessage {
        timestamp: Some(timestamp),
    }));
    out
}
