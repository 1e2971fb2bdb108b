// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Simple Endpoint Discovery Protocol.
//!
//! One reliable TRANSIENT_LOCAL builtin writer/reader pair per direction
//! (publications, subscriptions). Local endpoint registrations publish
//! DATA(w)/DATA(r) incrementally; removal publishes a disposal keyed by the
//! endpoint GUID. History replay gives late-joining participants the full
//! endpoint graph automatically.

use parking_lot::Mutex;

use crate::core::cache_change::{CacheChange, ChangeKind, InstanceHandle, WriteParams};
use crate::core::guid::{EntityId, Guid, GuidPrefix};
use crate::protocol::constants::{
    BUILTIN_PUBLICATIONS_ANNOUNCER, BUILTIN_PUBLICATIONS_DETECTOR,
    BUILTIN_SUBSCRIPTIONS_ANNOUNCER, BUILTIN_SUBSCRIPTIONS_DETECTOR,
};
use crate::qos::{DurabilityKind, LivelinessKind, ReliabilityKind};
use crate::rtps::{MatchedReader, MatchedWriter, SendOperation, StatefulReader, StatefulWriter};
use crate::Result;

use super::data::{ParticipantProxyData, ReaderProxyData, WriterProxyData};

/// Discovery conclusions handed to the matching engine.
#[derive(Debug)]
pub enum EdpEvent {
    RemoteWriter(Box<WriterProxyData>),
    RemoteWriterRemoved(Guid),
    RemoteReader(Box<ReaderProxyData>),
    RemoteReaderRemoved(Guid),
}

/// The four SEDP builtin endpoints.
pub struct Edp {
    pub publications_writer: Mutex<StatefulWriter>,
    pub publications_reader: Mutex<StatefulReader>,
    pub subscriptions_writer: Mutex<StatefulWriter>,
    pub subscriptions_reader: Mutex<StatefulReader>,
}

impl Edp {
    #[must_use]
    pub fn new(
        publications_writer: StatefulWriter,
        publications_reader: StatefulReader,
        subscriptions_writer: StatefulWriter,
        subscriptions_reader: StatefulReader,
    ) -> Self {
        Edp {
            publications_writer: Mutex::new(publications_writer),
            publications_reader: Mutex::new(publications_reader),
            subscriptions_writer: Mutex::new(subscriptions_writer),
            subscriptions_reader: Mutex::new(subscriptions_reader),
        }
    }

    /// Cross-match our builtin endpoints with a freshly discovered
    /// participant's, honouring its `available_builtin_endpoints` mask.
    pub fn participant_matched(&self, remote: &ParticipantProxyData) -> Vec<SendOperation> {
        let unicast = remote.metatraffic_unicast.clone();
        let multicast = remote.metatraffic_multicast.clone();
        let mask = remote.available_builtin_endpoints;
        let mut ops = Vec::new();

        if mask & BUILTIN_PUBLICATIONS_DETECTOR != 0 {
            ops.extend(self.publications_writer.lock().matched_reader_add(
                builtin_reader(
                    remote.guid_prefix,
                    EntityId::SEDP_PUBLICATIONS_READER,
                    unicast.clone(),
                    multicast.clone(),
                ),
            ));
        }
        if mask & BUILTIN_PUBLICATIONS_ANNOUNCER != 0 {
            self.publications_reader.lock().matched_writer_add(builtin_writer(
                remote.guid_prefix,
                EntityId::SEDP_PUBLICATIONS_WRITER,
                unicast.clone(),
                multicast.clone(),
            ));
        }
        if mask & BUILTIN_SUBSCRIPTIONS_DETECTOR != 0 {
            ops.extend(self.subscriptions_writer.lock().matched_reader_add(
                builtin_reader(
                    remote.guid_prefix,
                    EntityId::SEDP_SUBSCRIPTIONS_READER,
                    unicast.clone(),
                    multicast.clone(),
                ),
            ));
        }
        if mask & BUILTIN_SUBSCRIPTIONS_ANNOUNCER != 0 {
            self.subscriptions_reader.lock().matched_writer_add(builtin_writer(
                remote.guid_prefix,
                EntityId::SEDP_SUBSCRIPTIONS_WRITER,
                unicast,
                multicast,
            ));
        }
        log::debug!(
            "[SEDP] builtin endpoints matched with {:?} (mask 0x{mask:x})",
            remote.guid_prefix
        );
        ops
    }

    /// Remove all builtin proxies towards a dead participant.
    pub fn participant_unmatched(&self, prefix: GuidPrefix) {
        self.publications_writer
            .lock()
            .matched_reader_remove(Guid::new(prefix, EntityId::SEDP_PUBLICATIONS_READER));
        self.publications_reader
            .lock()
            .matched_writer_remove(Guid::new(prefix, EntityId::SEDP_PUBLICATIONS_WRITER));
        self.subscriptions_writer
            .lock()
            .matched_reader_remove(Guid::new(prefix, EntityId::SEDP_SUBSCRIPTIONS_READER));
        self.subscriptions_reader
            .lock()
            .matched_writer_remove(Guid::new(prefix, EntityId::SEDP_SUBSCRIPTIONS_WRITER));
    }

    /// Publish DATA(w) for a freshly created local writer.
    pub fn local_writer_registered(&self, data: &WriterProxyData) -> Result<Vec<SendOperation>> {
        let payload = data.to_payload();
        let (_, ops) = self.publications_writer.lock().write(
            &payload,
            ChangeKind::Alive,
            endpoint_key(data.guid),
            WriteParams::default(),
        )?;
        Ok(ops)
    }

    /// Publish the disposal for a removed local writer.
    pub fn local_writer_removed(&self, guid: Guid) -> Result<Vec<SendOperation>> {
        let (_, ops) = self.publications_writer.lock().write(
            &[],
            ChangeKind::NotAliveDisposed,
            endpoint_key(guid),
            WriteParams::default(),
        )?;
        Ok(ops)
    }

    /// Publish DATA(r) for a freshly created local reader.
    pub fn local_reader_registered(&self, data: &ReaderProxyData) -> Result<Vec<SendOperation>> {
        let payload = data.to_payload();
        let (_, ops) = self.subscriptions_writer.lock().write(
            &payload,
            ChangeKind::Alive,
            endpoint_key(data.guid),
            WriteParams::default(),
        )?;
        Ok(ops)
    }

    /// Publish the disposal for a removed local reader.
    pub fn local_reader_removed(&self, guid: Guid) -> Result<Vec<SendOperation>> {
        let (_, ops) = self.subscriptions_writer.lock().write(
            &[],
            ChangeKind::NotAliveDisposed,
            endpoint_key(guid),
            WriteParams::default(),
        )?;
        Ok(ops)
    }

    /// Drain delivered discovery samples into matching events.
    pub fn drain_events(&self) -> Vec<EdpEvent> {
        let mut events = Vec::new();
        while let Some(change) = self.publications_reader.lock().take_next_sample() {
            if let Some(event) = publication_event(&change) {
                events.push(event);
            }
        }
        while let Some(change) = self.subscriptions_reader.lock().take_next_sample() {
            if let Some(event) = subscription_event(&change) {
                events.push(event);
            }
        }
        events
    }
}

fn builtin_reader(
    prefix: GuidPrefix,
    entity_id: EntityId,
    unicast: Vec<crate::core::locator::Locator>,
    multicast: Vec<crate::core::locator::Locator>,
) -> MatchedReader {
    MatchedReader {
        guid: Guid::new(prefix, entity_id),
        reliability: ReliabilityKind::Reliable,
        durability: DurabilityKind::TransientLocal,
        expects_inline_qos: false,
        unicast_locators: unicast,
        multicast_locators: multicast,
    }
}

fn builtin_writer(
    prefix: GuidPrefix,
    entity_id: EntityId,
    unicast: Vec<crate::core::locator::Locator>,
    multicast: Vec<crate::core::locator::Locator>,
) -> MatchedWriter {
    MatchedWriter {
        guid: Guid::new(prefix, entity_id),
        persistence_guid: None,
        reliability: ReliabilityKind::Reliable,
        ownership_strength: 0,
        liveliness_kind: LivelinessKind::Automatic,
        liveliness_lease: std::time::Duration::MAX,
        unicast_locators: unicast,
        multicast_locators: multicast,
        initial_sequence: crate::core::sequence_number::SequenceNumber(0),
    }
}

/// Instance handle of an endpoint descriptor: its GUID.
fn endpoint_key(guid: Guid) -> InstanceHandle {
    InstanceHandle(guid.to_bytes())
}

fn guid_from_key(handle: InstanceHandle) -> Guid {
    Guid::from_bytes(handle.0)
}

fn publication_event(change: &CacheChange) -> Option<EdpEvent> {
    if change.kind.is_not_alive() {
        return Some(EdpEvent::RemoteWriterRemoved(guid_from_key(
            change.instance_handle,
        )));
    }
    match WriterProxyData::from_payload(&change.serialized_payload) {
        Ok(data) => Some(EdpEvent::RemoteWriter(Box::new(data))),
        Err(e) => {
            log::warn!("[SEDP] dropping unparseable DATA(w): {e}");
            None
        }
    }
}

fn subscription_event(change: &CacheChange) -> Option<EdpEvent> {
    if change.kind.is_not_alive() {
        return Some(EdpEvent::RemoteReaderRemoved(guid_from_key(
            change.instance_handle,
        )));
    }
    match ReaderProxyData::from_payload(&change.serialized_payload) {
        Ok(data) => Some(EdpEvent::RemoteReader(Box::new(data))),
        Err(e) => {
            log::warn!("[SEDP] dropping unparseable DATA(r): {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::entity_kind;
    use crate::core::locator::Locator;
    use crate::history::{PayloadPool, ReaderHistory, WriterHistory};
    use crate::network::external_locators::ExternalLocatorsProcessor;
    use crate::qos::{HistoryKind, MemoryPolicy, Qos, ResourceLimits};
    use crate::rtps::reader::ReaderAttributes;
    use crate::rtps::writer::WriterAttributes;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::time::Duration;

    fn sedp_qos() -> Qos {
        Qos {
            reliability: ReliabilityKind::Reliable,
            durability: DurabilityKind::TransientLocal,
            history: HistoryKind::KeepAll,
            ..Qos::default()
        }
    }

    fn builtin_stateful_writer(prefix: u8, entity_id: EntityId) -> StatefulWriter {
        let guid = Guid::new(GuidPrefix([prefix; 12]), entity_id);
        let pool = Arc::new(PayloadPool::new(MemoryPolicy::DynamicReusable, 0, 0, 1024));
        let history = WriterHistory::new(
            guid,
            HistoryKind::KeepAll,
            ResourceLimits::default(),
            true,
            pool,
        );
        let attributes = WriterAttributes {
            guid,
            publish_mode: crate::config::PublishMode::Synchronous,
            topic_name: "DCPSPublication".into(),
            type_name: "WriterProxyData".into(),
            qos: sedp_qos(),
            heartbeat_period: Duration::from_millis(100),
            nack_response_delay: Duration::from_millis(5),
            fragment_size: 1344,
            max_message_size: 65_500,
            keyed: true,
        };
        StatefulWriter::new(
            attributes,
            history,
            Arc::new(ExternalLocatorsProcessor::default()),
            vec![crate::core::locator::LocatorKind::Udpv4 as i32],
        )
    }

    fn builtin_stateful_reader(prefix: u8, entity_id: EntityId) -> StatefulReader {
        let guid = Guid::new(GuidPrefix([prefix; 12]), entity_id);
        let history = ReaderHistory::new(HistoryKind::KeepAll, ResourceLimits::default(), true);
        let attributes = ReaderAttributes {
            guid,
            topic_name: "DCPSPublication".into(),
            type_name: "WriterProxyData".into(),
            qos: sedp_qos(),
            heartbeat_response_delay: Duration::from_millis(5),
            keyed: true,
            expects_inline_qos: false,
        };
        StatefulReader::new(attributes, history)
    }

    fn edp(prefix: u8) -> Edp {
        Edp::new(
            builtin_stateful_writer(prefix, EntityId::SEDP_PUBLICATIONS_WRITER),
            builtin_stateful_reader(prefix, EntityId::SEDP_PUBLICATIONS_READER),
            builtin_stateful_writer(prefix, EntityId::SEDP_SUBSCRIPTIONS_WRITER),
            builtin_stateful_reader(prefix, EntityId::SEDP_SUBSCRIPTIONS_READER),
        )
    }

    fn remote_participant(prefix: u8) -> ParticipantProxyData {
        ParticipantProxyData {
            guid_prefix: GuidPrefix([prefix; 12]),
            protocol_version: (2, 3),
            vendor_id: [0x01, 0xf7],
            domain_id: 0,
            lease_duration: Duration::from_secs(20),
            available_builtin_endpoints: crate::protocol::constants::BUILTIN_ENDPOINT_SET_DEFAULT,
            metatraffic_unicast: vec![Locator::udpv4(Ipv4Addr::new(10, 0, 0, prefix), 7651)],
            metatraffic_multicast: Vec::new(),
            default_unicast: Vec::new(),
            default_multicast: Vec::new(),
            user_data: Vec::new(),
        }
    }

    #[test]
    fn test_participant_match_creates_builtin_proxies() {
        let e = edp(1);
        e.participant_matched(&remote_participant(2));
        assert_eq!(e.publications_writer.lock().matched_readers(), 1);
        assert_eq!(e.publications_reader.lock().matched_writers(), 1);
        assert_eq!(e.subscriptions_writer.lock().matched_readers(), 1);
        assert_eq!(e.subscriptions_reader.lock().matched_writers(), 1);

        e.participant_unmatched(GuidPrefix([2; 12]));
        assert_eq!(e.publications_writer.lock().matched_readers(), 0);
        assert_eq!(e.subscriptions_reader.lock().matched_writers(), 0);
    }

    #[test]
    fn test_mask_gates_builtin_matching() {
        let e = edp(1);
        let mut remote = remote_participant(2);
        remote.available_builtin_endpoints = BUILTIN_PUBLICATIONS_DETECTOR;
        e.participant_matched(&remote);
        assert_eq!(e.publications_writer.lock().matched_readers(), 1);
        assert_eq!(e.publications_reader.lock().matched_writers(), 0);
        assert_eq!(e.subscriptions_writer.lock().matched_readers(), 0);
    }

    #[test]
    fn test_local_writer_publishes_data_w() {
        let e = edp(1);
        e.participant_matched(&remote_participant(2));

        let data = WriterProxyData {
            guid: Guid::new(
                GuidPrefix([1; 12]),
                EntityId::user(1, entity_kind::WRITER_NO_KEY),
            ),
            topic_name: "sensors/imu".into(),
            type_name: "ImuSample".into(),
            qos: Qos::default(),
            unicast_locators: Vec::new(),
            multicast_locators: Vec::new(),
            persistence_guid: None,
            type_information: Vec::new(),
        };
        let ops = e.local_writer_registered(&data).unwrap();
        assert!(!ops.is_empty(), "DATA(w) pushed to matched detector");
    }

    #[test]
    fn test_remote_publication_roundtrip_through_reader() {
        let announcing = edp(1);
        let observing = edp(2);
        // Simulate the wire: serialize DATA(w) on side 1, feed the payload
        // into side 2's publications reader as a received change.
        let data = WriterProxyData {
            guid: Guid::new(
                GuidPrefix([1; 12]),
                EntityId::user(3, entity_kind::WRITER_NO_KEY),
            ),
            topic_name: "cmd/vel".into(),
            type_name: "Twist".into(),
            qos: Qos::default(),
            unicast_locators: Vec::new(),
            multicast_locators: Vec::new(),
            persistence_guid: None,
            type_information: Vec::new(),
        };
        let _ = announcing;
        observing
            .publications_reader
            .lock()
            .matched_writer_add(builtin_writer(
                GuidPrefix([1; 12]),
                EntityId::SEDP_PUBLICATIONS_WRITER,
                Vec::new(),
                Vec::new(),
            ));

        let mut change = CacheChange::new(
            ChangeKind::Alive,
            Guid::new(GuidPrefix([1; 12]), EntityId::SEDP_PUBLICATIONS_WRITER),
            endpoint_key(data.guid),
        );
        change.sequence_number = crate::core::sequence_number::SequenceNumber(1);
        change.serialized_payload = data.to_payload();
        {
            let mut reader = observing.publications_reader.lock();
            let proxy_guid = Guid::new(GuidPrefix([1; 12]), EntityId::SEDP_PUBLICATIONS_WRITER);
            assert!(reader.lookup_proxy(proxy_guid).is_some());
            // Feed through the DATA path.
            let submessage = crate::rtps::writer::data_submessage_for(&change, EntityId::SEDP_PUBLICATIONS_READER);
            reader.process_data_msg(GuidPrefix([1; 12]), &submessage, None);
        }

        let events = observing.drain_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            EdpEvent::RemoteWriter(w) => {
                assert_eq!(w.topic_name, "cmd/vel");
                assert_eq!(w.guid, data.guid);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_disposal_yields_removed_event() {
        let e = edp(2);
        e.publications_reader.lock().matched_writer_add(builtin_writer(
            GuidPrefix([1; 12]),
            EntityId::SEDP_PUBLICATIONS_WRITER,
            Vec::new(),
            Vec::new(),
        ));

        let victim = Guid::new(
            GuidPrefix([1; 12]),
            EntityId::user(3, entity_kind::WRITER_NO_KEY),
        );
        let mut change = CacheChange::new(
            ChangeKind::NotAliveDisposed,
            Guid::new(GuidPrefix([1; 12]), EntityId::SEDP_PUBLICATIONS_WRITER),
            endpoint_key(victim),
        );
        change.sequence_number = crate::core::sequence_number::SequenceNumber(1);
        let submessage = crate::rtps::writer::data_submessage_for(&change, EntityId::SEDP_PUBLICATIONS_READER);
        e.publications_reader
            .lock()
            .process_data_msg(GuidPrefix([1; 12]), &submessage, None);

        let events = e.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            EdpEvent::RemoteWriterRemoved(guid) if *guid == victim
        ));
    }
}
