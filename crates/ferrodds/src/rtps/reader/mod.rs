// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Reader state machines (RTPS Sec.8.4.10, 8.4.11, 8.4.12).

mod fragments;
mod stateful;
mod stateless;
mod writer_proxy;

pub use fragments::FragmentAssembler;
pub use stateful::{MatchedWriter, StatefulReader};
pub use stateless::StatelessReader;
pub use writer_proxy::WriterProxy;

use std::time::Duration;

use crate::config::ReaderConfig;
use crate::core::cache_change::{CacheChange, ChangeKind, InstanceHandle};
use crate::core::guid::{Guid, GuidPrefix};
use crate::core::time::RtpsTime;
use crate::history::SampleRejectedReason;
use crate::protocol::constants::{
    PID_KEY_HASH, PID_STATUS_INFO, STATUS_INFO_DISPOSED, STATUS_INFO_UNREGISTERED,
};
use crate::protocol::submessage::DataSubmessage;
use crate::qos::Qos;

/// Data-only attributes shared by both reader variants.
#[derive(Clone, Debug)]
pub struct ReaderAttributes {
    pub guid: Guid,
    pub topic_name: String,
    pub type_name: String,
    pub qos: Qos,
    pub heartbeat_response_delay: Duration,
    pub keyed: bool,
    pub expects_inline_qos: bool,
}

impl ReaderAttributes {
    #[must_use]
    pub fn from_config(guid: Guid, config: &ReaderConfig) -> Self {
        ReaderAttributes {
            guid,
            topic_name: config.topic_name.clone(),
            type_name: config.type_name.clone(),
            qos: config.qos.clone(),
            heartbeat_response_delay: config.heartbeat_response_delay,
            keyed: config.keyed,
            expects_inline_qos: config.expects_inline_qos,
        }
    }
}

/// Sum type over the two reader variants.
pub enum RtpsReader {
    Stateless(StatelessReader),
    Stateful(StatefulReader),
}

impl RtpsReader {
    #[must_use]
    pub fn guid(&self) -> Guid {
        match self {
            RtpsReader::Stateless(r) => r.attributes().guid,
            RtpsReader::Stateful(r) => r.attributes().guid,
        }
    }
}

/// Status changes produced by reader operations; the participant maps these
/// onto the status-event channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReaderEvent {
    DataAvailable,
    SampleRejected(SampleRejectedReason),
    /// Sequences that can never be recovered (writer pruned its history).
    SampleLost { count: u64 },
    LivelinessChanged { writer: Guid, alive: bool },
    OwnershipChanged {
        instance: InstanceHandle,
        previous: Option<Guid>,
        current: Guid,
    },
    RequestedDeadlineMissed { instance: InstanceHandle },
}

/// Convert a DATA submessage into a reader-side cache change.
pub(crate) fn change_from_data(
    source_prefix: GuidPrefix,
    data: &DataSubmessage,
    timestamp: Option<RtpsTime>,
) -> CacheChange {
    let writer_guid = Guid::new(source_prefix, data.writer_id);

    let mut kind = ChangeKind::Alive;
    let mut handle = InstanceHandle::NIL;
    if let Some(qos) = &data.inline_qos {
        if let Some(status) = qos.get(PID_STATUS_INFO).and_then(|p| p.as_u32()) {
            kind = match (
                status & STATUS_INFO_DISPOSED != 0,
                status & STATUS_INFO_UNREGISTERED != 0,
            ) {
                (true, true) => ChangeKind::NotAliveDisposedUnregistered,
                (true, false) => ChangeKind::NotAliveDisposed,
                (false, true) => ChangeKind::NotAliveUnregistered,
                (false, false) => ChangeKind::Alive,
            };
        }
        if let Some(hash) = qos.get(PID_KEY_HASH) {
            if hash.value.len() >= 16 {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&hash.value[..16]);
                handle = InstanceHandle(bytes);
            }
        }
    }

    let mut change = CacheChange::new(kind, writer_guid, handle);
    change.sequence_number = data.writer_sn;
    change.serialized_payload = data.payload.clone();
    change.source_timestamp = timestamp.unwrap_or_else(RtpsTime::now);
    change
}
