// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Discovery payloads: participant, publication, and subscription proxy
//! data, serialized as PL-CDR parameter lists behind a 4-byte
//! encapsulation header.

use std::time::Duration;

use crate::core::guid::{Guid, GuidPrefix};
use crate::core::locator::Locator;
use crate::core::time::RtpsTime;
use crate::protocol::constants as pid;
use crate::protocol::cursor::ByteReader;
use crate::protocol::{Parameter, ParameterList};
use crate::qos::{
    DestinationOrderKind, DurabilityKind, LivelinessKind, OwnershipKind, Partition, Qos,
    ReliabilityKind,
};
use crate::{Error, Result};

/// PL_CDR_LE encapsulation identifier.
const PL_CDR_LE: [u8; 2] = [0x00, 0x03];
/// PL_CDR_BE encapsulation identifier.
const PL_CDR_BE: [u8; 2] = [0x00, 0x02];

/// Wrap an encoded parameter list in its encapsulation header.
fn encapsulate(list: &ParameterList) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(&PL_CDR_LE);
    out.extend_from_slice(&[0x00, 0x00]); // options
    list.encode(&mut out, true);
    out
}

/// Strip the encapsulation header and parse the parameter list.
fn decapsulate(payload: &[u8]) -> Result<ParameterList> {
    if payload.len() < 4 {
        return Err(Error::Protocol("discovery payload shorter than header"));
    }
    let little_endian = match [payload[0], payload[1]] {
        id if id == PL_CDR_LE => true,
        id if id == PL_CDR_BE => false,
        _ => return Err(Error::Protocol("unknown discovery encapsulation")),
    };
    let mut reader = ByteReader::new(&payload[4..], little_endian);
    ParameterList::decode(&mut reader, false)
}

// Wire values for QoS kinds (DDS-RTPS v2.3 Sec.9.6.2).
const WIRE_RELIABILITY_BEST_EFFORT: u32 = 1;
const WIRE_RELIABILITY_RELIABLE: u32 = 2;

fn reliability_to_wire(kind: ReliabilityKind) -> u32 {
    match kind {
        ReliabilityKind::BestEffort => WIRE_RELIABILITY_BEST_EFFORT,
        ReliabilityKind::Reliable => WIRE_RELIABILITY_RELIABLE,
    }
}

fn reliability_from_wire(v: u32) -> ReliabilityKind {
    if v == WIRE_RELIABILITY_RELIABLE {
        ReliabilityKind::Reliable
    } else {
        ReliabilityKind::BestEffort
    }
}

fn duration_param(pid_value: u16, d: Duration) -> Parameter {
    Parameter::from_duration(pid_value, RtpsTime::from_std_duration(d))
}

fn param_duration(list: &ParameterList, pid_value: u16) -> Option<Duration> {
    list.get(pid_value)
        .and_then(Parameter::as_duration)
        .map(RtpsTime::to_duration)
}

fn push_locators(list: &mut ParameterList, pid_value: u16, locators: &[Locator]) {
    for locator in locators {
        list.push(Parameter::from_locator(pid_value, locator));
    }
}

fn read_locators(list: &ParameterList, pid_value: u16) -> Vec<Locator> {
    list.get_all(pid_value)
        .filter_map(Parameter::as_locator)
        .collect()
}

fn push_partition(list: &mut ParameterList, partition: &Partition) {
    if partition.is_default() {
        return;
    }
    // CDR sequence<string>: count then length-prefixed NUL-terminated
    // strings, each aligned to 4.
    let mut value = Vec::new();
    value.extend_from_slice(&(partition.names().len() as u32).to_le_bytes());
    for name in partition.names() {
        value.extend_from_slice(&((name.len() + 1) as u32).to_le_bytes());
        value.extend_from_slice(name.as_bytes());
        value.push(0);
        while value.len() % 4 != 0 {
            value.push(0);
        }
    }
    list.push(Parameter::new(pid::PID_PARTITION, value));
}

fn read_partition(list: &ParameterList) -> Partition {
    let Some(param) = list.get(pid::PID_PARTITION) else {
        return Partition::default();
    };
    let read_u32 = |b: &[u8]| -> Option<u32> {
        let bytes = [*b.first()?, *b.get(1)?, *b.get(2)?, *b.get(3)?];
        Some(if param.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    };
    let value = &param.value;
    let Some(count) = read_u32(value) else {
        return Partition::default();
    };
    let mut names = Vec::new();
    let mut offset = 4usize;
    for _ in 0..count.min(256) {
        let Some(len) = value.get(offset..).and_then(read_u32) else {
            break;
        };
        offset += 4;
        let len = len as usize;
        let Some(bytes) = value.get(offset..offset + len) else {
            break;
        };
        let text = &bytes[..len.saturating_sub(1)];
        if let Ok(name) = std::str::from_utf8(text) {
            names.push(name.to_string());
        }
        offset += len;
        offset = offset.div_ceil(4) * 4;
    }
    Partition::new(names)
}

// ============================================================================
// PARTICIPANT PROXY DATA
// ============================================================================

/// DATA(p): everything a remote peer needs to talk to a participant.
#[derive(Clone, Debug, PartialEq)]
pub struct ParticipantProxyData {
    pub guid_prefix: GuidPrefix,
    pub protocol_version: (u8, u8),
    pub vendor_id: [u8; 2],
    pub domain_id: u32,
    pub lease_duration: Duration,
    pub available_builtin_endpoints: u32,
    pub metatraffic_unicast: Vec<Locator>,
    pub metatraffic_multicast: Vec<Locator>,
    pub default_unicast: Vec<Locator>,
    pub default_multicast: Vec<Locator>,
    pub user_data: Vec<u8>,
}

impl ParticipantProxyData {
    /// Serialize to a DATA(p) payload.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let mut list = ParameterList::new();
        list.push(Parameter::new(
            pid::PID_PROTOCOL_VERSION,
            vec![self.protocol_version.0, self.protocol_version.1, 0, 0],
        ));
        list.push(Parameter::new(
            pid::PID_VENDOR_ID,
            vec![self.vendor_id[0], self.vendor_id[1], 0, 0],
        ));
        list.push(Parameter::from_u32(pid::PID_DOMAIN_ID, self.domain_id));
        let guid = Guid::new(self.guid_prefix, crate::core::guid::EntityId::PARTICIPANT);
        list.push(Parameter::new(
            pid::PID_PARTICIPANT_GUID,
            guid.to_bytes().to_vec(),
        ));
        list.push(duration_param(
            pid::PID_PARTICIPANT_LEASE_DURATION,
            self.lease_duration,
        ));
        list.push(Parameter::from_u32(
            pid::PID_BUILTIN_ENDPOINT_SET,
            self.available_builtin_endpoints,
        ));
        push_locators(
            &mut list,
            pid::PID_METATRAFFIC_UNICAST_LOCATOR,
            &self.metatraffic_unicast,
        );
        push_locators(
            &mut list,
            pid::PID_METATRAFFIC_MULTICAST_LOCATOR,
            &self.metatraffic_multicast,
        );
        push_locators(
            &mut list,
            pid::PID_DEFAULT_UNICAST_LOCATOR,
            &self.default_unicast,
        );
        push_locators(
            &mut list,
            pid::PID_DEFAULT_MULTICAST_LOCATOR,
            &self.default_multicast,
        );
        if !self.user_data.is_empty() {
            let mut value = Vec::with_capacity(4 + self.user_data.len());
            value.extend_from_slice(&(self.user_data.len() as u32).to_le_bytes());
            value.extend_from_slice(&self.user_data);
            list.push(Parameter::new(pid::PID_USER_DATA, value));
        }
        encapsulate(&list)
    }

    /// Parse a DATA(p) payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let list = decapsulate(payload)?;
        let guid = list
            .get(pid::PID_PARTICIPANT_GUID)
            .filter(|p| p.value.len() >= 16)
            .map(|p| {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&p.value[..16]);
                Guid::from_bytes(bytes)
            })
            .ok_or(Error::Protocol("DATA(p) missing participant GUID"))?;

        let protocol_version = list
            .get(pid::PID_PROTOCOL_VERSION)
            .filter(|p| p.value.len() >= 2)
            .map_or((2, 3), |p| (p.value[0], p.value[1]));
        let vendor_id = list
            .get(pid::PID_VENDOR_ID)
            .filter(|p| p.value.len() >= 2)
            .map_or([0, 0], |p| [p.value[0], p.value[1]]);

        let user_data = list
            .get(pid::PID_USER_DATA)
            .and_then(|p| {
                let len = p.as_u32()? as usize;
                p.value.get(4..4 + len).map(<[u8]>::to_vec)
            })
            .unwrap_or_default();

        Ok(ParticipantProxyData {
            guid_prefix: guid.prefix,
            protocol_version,
            vendor_id,
            domain_id: list
                .get(pid::PID_DOMAIN_ID)
                .and_then(Parameter::as_u32)
                .unwrap_or(0),
            lease_duration: param_duration(&list, pid::PID_PARTICIPANT_LEASE_DURATION)
                .unwrap_or(crate::config::DEFAULT_LEASE_DURATION),
            available_builtin_endpoints: list
                .get(pid::PID_BUILTIN_ENDPOINT_SET)
                .and_then(Parameter::as_u32)
                .unwrap_or(0),
            metatraffic_unicast: read_locators(&list, pid::PID_METATRAFFIC_UNICAST_LOCATOR),
            metatraffic_multicast: read_locators(&list, pid::PID_METATRAFFIC_MULTICAST_LOCATOR),
            default_unicast: read_locators(&list, pid::PID_DEFAULT_UNICAST_LOCATOR),
            default_multicast: read_locators(&list, pid::PID_DEFAULT_MULTICAST_LOCATOR),
            user_data,
        })
    }
}

// ============================================================================
// ENDPOINT PROXY DATA
// ============================================================================

/// Shared QoS portion of DATA(w)/DATA(r).
fn push_endpoint_qos(list: &mut ParameterList, qos: &Qos) {
    let mut reliability = Vec::with_capacity(12);
    reliability.extend_from_slice(&reliability_to_wire(qos.reliability).to_le_bytes());
    RtpsTime::from_std_duration(qos.max_blocking_time).encode(&mut reliability, true);
    list.push(Parameter::new(pid::PID_RELIABILITY, reliability));

    list.push(Parameter::from_u32(
        pid::PID_DURABILITY,
        qos.durability as u32,
    ));
    list.push(duration_param(pid::PID_DEADLINE, qos.deadline_period));
    list.push(duration_param(pid::PID_LATENCY_BUDGET, qos.latency_budget));
    list.push(duration_param(pid::PID_LIFESPAN, qos.lifespan));

    let mut liveliness = Vec::with_capacity(12);
    liveliness.extend_from_slice(&(qos.liveliness.kind as u32).to_le_bytes());
    RtpsTime::from_std_duration(qos.liveliness.lease_duration).encode(&mut liveliness, true);
    list.push(Parameter::new(pid::PID_LIVELINESS, liveliness));

    list.push(Parameter::from_u32(pid::PID_OWNERSHIP, qos.ownership as u32));
    list.push(Parameter::from_u32(
        pid::PID_DESTINATION_ORDER,
        qos.destination_order as u32,
    ));
    push_partition(list, &qos.partition);
}

fn read_endpoint_qos(list: &ParameterList) -> Qos {
    let mut qos = Qos::default();
    if let Some(p) = list.get(pid::PID_RELIABILITY) {
        if let Some(kind) = p.as_u32() {
            qos.reliability = reliability_from_wire(kind);
        }
        if p.value.len() >= 12 {
            if let Some(t) = RtpsTime::decode(&p.value[4..12], p.little_endian) {
                qos.max_blocking_time = t.to_duration();
            }
        }
    }
    if let Some(kind) = list.get(pid::PID_DURABILITY).and_then(Parameter::as_u32) {
        qos.durability = match kind {
            1 => DurabilityKind::TransientLocal,
            2 => DurabilityKind::Transient,
            3 => DurabilityKind::Persistent,
            _ => DurabilityKind::Volatile,
        };
    }
    if let Some(d) = param_duration(list, pid::PID_DEADLINE) {
        qos.deadline_period = d;
    }
    if let Some(d) = param_duration(list, pid::PID_LATENCY_BUDGET) {
        qos.latency_budget = d;
    }
    if let Some(d) = param_duration(list, pid::PID_LIFESPAN) {
        qos.lifespan = d;
    }
    if let Some(p) = list.get(pid::PID_LIVELINESS) {
        if let Some(kind) = p.as_u32() {
            qos.liveliness.kind = match kind {
                1 => LivelinessKind::ManualByParticipant,
                2 => LivelinessKind::ManualByTopic,
                _ => LivelinessKind::Automatic,
            };
        }
        if p.value.len() >= 12 {
            if let Some(t) = RtpsTime::decode(&p.value[4..12], p.little_endian) {
                qos.liveliness.lease_duration = t.to_duration();
            }
        }
    }
    if let Some(kind) = list.get(pid::PID_OWNERSHIP).and_then(Parameter::as_u32) {
        qos.ownership = if kind == 1 {
            OwnershipKind::Exclusive
        } else {
            OwnershipKind::Shared
        };
    }
    if let Some(kind) = list
        .get(pid::PID_DESTINATION_ORDER)
        .and_then(Parameter::as_u32)
    {
        qos.destination_order = if kind == 1 {
            DestinationOrderKind::BySourceTimestamp
        } else {
            DestinationOrderKind::ByReceptionTimestamp
        };
    }
    qos.partition = read_partition(list);
    qos
}

/// DATA(w): describes one remote writer.
#[derive(Clone, Debug)]
pub struct WriterProxyData {
    pub guid: Guid,
    pub topic_name: String,
    pub type_name: String,
    pub qos: Qos,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
    /// Present for TRANSIENT/PERSISTENT writers.
    pub persistence_guid: Option<Guid>,
    /// Opaque XTypes TypeInformation blob, compared bitwise when both
    /// sides advertise one.
    pub type_information: Vec<u8>,
}

impl WriterProxyData {
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let mut list = ParameterList::new();
        list.push(Parameter::new(
            pid::PID_ENDPOINT_GUID,
            self.guid.to_bytes().to_vec(),
        ));
        list.push(Parameter::from_string(pid::PID_TOPIC_NAME, &self.topic_name));
        list.push(Parameter::from_string(pid::PID_TYPE_NAME, &self.type_name));
        push_endpoint_qos(&mut list, &self.qos);
        list.push(Parameter::from_u32(
            pid::PID_OWNERSHIP_STRENGTH,
            self.qos.ownership_strength,
        ));
        push_locators(&mut list, pid::PID_UNICAST_LOCATOR, &self.unicast_locators);
        push_locators(
            &mut list,
            pid::PID_MULTICAST_LOCATOR,
            &self.multicast_locators,
        );
        if let Some(persistence_guid) = self.persistence_guid {
            list.push(Parameter::new(
                pid::PID_PERSISTENCE_GUID,
                persistence_guid.to_bytes().to_vec(),
            ));
        }
        if !self.type_information.is_empty() {
            list.push(Parameter::new(
                pid::PID_TYPE_INFORMATION,
                self.type_information.clone(),
            ));
        }
        encapsulate(&list)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let list = decapsulate(payload)?;
        let guid = read_endpoint_guid(&list)?;
        let mut qos = read_endpoint_qos(&list);
        if let Some(strength) = list
            .get(pid::PID_OWNERSHIP_STRENGTH)
            .and_then(Parameter::as_u32)
        {
            qos.ownership_strength = strength;
        }
        Ok(WriterProxyData {
            guid,
            topic_name: read_string(&list, pid::PID_TOPIC_NAME)?,
            type_name: read_string(&list, pid::PID_TYPE_NAME)?,
            qos,
            unicast_locators: read_locators(&list, pid::PID_UNICAST_LOCATOR),
            multicast_locators: read_locators(&list, pid::PID_MULTICAST_LOCATOR),
            persistence_guid: list
                .get(pid::PID_PERSISTENCE_GUID)
                .filter(|p| p.value.len() >= 16)
                .map(|p| {
                    let mut bytes = [0u8; 16];
                    bytes.copy_from_slice(&p.value[..16]);
                    Guid::from_bytes(bytes)
                }),
            type_information: list
                .get(pid::PID_TYPE_INFORMATION)
                .map(|p| p.value.clone())
                .unwrap_or_default(),
        })
    }
}

/// DATA(r): describes one remote reader.
#[derive(Clone, Debug)]
pub struct ReaderProxyData {
    pub guid: Guid,
    pub topic_name: String,
    pub type_name: String,
    pub qos: Qos,
    pub expects_inline_qos: bool,
    pub unicast_locators: Vec<Locator>,
    pub multicast_locators: Vec<Locator>,
    pub type_information: Vec<u8>,
}

impl ReaderProxyData {
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let mut list = ParameterList::new();
        list.push(Parameter::new(
            pid::PID_ENDPOINT_GUID,
            self.guid.to_bytes().to_vec(),
        ));
        list.push(Parameter::from_string(pid::PID_TOPIC_NAME, &self.topic_name));
        list.push(Parameter::from_string(pid::PID_TYPE_NAME, &self.type_name));
        push_endpoint_qos(&mut list, &self.qos);
        list.push(Parameter::new(
            pid::PID_EXPECTS_INLINE_QOS,
            vec![u8::from(self.expects_inline_qos), 0, 0, 0],
        ));
        push_locators(&mut list, pid::PID_UNICAST_LOCATOR, &self.unicast_locators);
        push_locators(
            &mut list,
            pid::PID_MULTICAST_LOCATOR,
            &self.multicast_locators,
        );
        if !self.type_information.is_empty() {
            list.push(Parameter::new(
                pid::PID_TYPE_INFORMATION,
                self.type_information.clone(),
            ));
        }
        encapsulate(&list)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let list = decapsulate(payload)?;
        Ok(ReaderProxyData {
            guid: read_endpoint_guid(&list)?,
            topic_name: read_string(&list, pid::PID_TOPIC_NAME)?,
            type_name: read_string(&list, pid::PID_TYPE_NAME)?,
            qos: read_endpoint_qos(&list),
            expects_inline_qos: list
                .get(pid::PID_EXPECTS_INLINE_QOS)
                .is_some_and(|p| p.value.first() == Some(&1)),
            unicast_locators: read_locators(&list, pid::PID_UNICAST_LOCATOR),
            multicast_locators: read_locators(&list, pid::PID_MULTICAST_LOCATOR),
            type_information: list
                .get(pid::PID_TYPE_INFORMATION)
                .map(|p| p.value.clone())
                .unwrap_or_default(),
        })
    }
}

fn read_endpoint_guid(list: &ParameterList) -> Result<Guid> {
    list.get(pid::PID_ENDPOINT_GUID)
        .filter(|p| p.value.len() >= 16)
        .map(|p| {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&p.value[..16]);
            Guid::from_bytes(bytes)
        })
        .ok_or(Error::Protocol("endpoint data missing GUID"))
}

fn read_string(list: &ParameterList, pid_value: u16) -> Result<String> {
    list.get(pid_value)
        .and_then(Parameter::as_string)
        .ok_or(Error::Protocol("endpoint data missing topic/type name"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::EntityId;
    use crate::qos::HistoryKind;
    use std::net::Ipv4Addr;

    fn participant_data() -> ParticipantProxyData {
        ParticipantProxyData {
            guid_prefix: GuidPrefix([5; 12]),
            protocol_version: (2, 3),
            vendor_id: [0x01, 0xf7],
            domain_id: 3,
            lease_duration: Duration::from_secs(20),
            available_builtin_endpoints: 0x3f,
            metatraffic_unicast: vec![Locator::udpv4(Ipv4Addr::new(10, 0, 0, 1), 7651)],
            metatraffic_multicast: vec![Locator::udpv4(Ipv4Addr::new(239, 255, 0, 1), 7650)],
            default_unicast: vec![Locator::udpv4(Ipv4Addr::new(10, 0, 0, 1), 7661)],
            default_multicast: Vec::new(),
            user_data: b"app=test".to_vec(),
        }
    }

    #[test]
    fn test_participant_data_roundtrip() {
        let data = participant_data();
        let back = ParticipantProxyData::from_payload(&data.to_payload()).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_participant_data_requires_guid() {
        let mut list = ParameterList::new();
        list.push(Parameter::from_u32(pid::PID_DOMAIN_ID, 0));
        let payload = encapsulate(&list);
        assert!(ParticipantProxyData::from_payload(&payload).is_err());
    }

    #[test]
    fn test_unknown_encapsulation_rejected() {
        assert!(ParticipantProxyData::from_payload(&[0x00, 0x42, 0, 0, 0, 0]).is_err());
    }

    fn writer_data() -> WriterProxyData {
        let mut qos = Qos::reliable_transient_local();
        qos.history = HistoryKind::KeepLast(4);
        qos.ownership_strength = 7;
        qos.partition = Partition::new(["telemetry/*"]);
        qos.deadline_period = Duration::from_millis(500);
        WriterProxyData {
            guid: Guid::new(GuidPrefix([2; 12]), EntityId::user(9, 0x02)),
            topic_name: "sensors/imu".into(),
            type_name: "ImuSample".into(),
            qos,
            unicast_locators: vec![Locator::udpv4(Ipv4Addr::new(10, 0, 0, 2), 7411)],
            multicast_locators: Vec::new(),
            persistence_guid: Some(Guid::new(GuidPrefix([0xaa; 12]), EntityId::user(9, 0x02))),
            type_information: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn test_writer_data_roundtrip() {
        let data = writer_data();
        let back = WriterProxyData::from_payload(&data.to_payload()).unwrap();
        assert_eq!(back.guid, data.guid);
        assert_eq!(back.topic_name, data.topic_name);
        assert_eq!(back.type_name, data.type_name);
        assert_eq!(back.qos.reliability, ReliabilityKind::Reliable);
        assert_eq!(back.qos.durability, DurabilityKind::TransientLocal);
        assert_eq!(back.qos.ownership_strength, 7);
        assert_eq!(back.qos.deadline_period, Duration::from_millis(500));
        assert!(back.qos.partition.intersects(&Partition::new(["telemetry/raw"])));
        assert_eq!(back.persistence_guid, data.persistence_guid);
        assert_eq!(back.type_information, data.type_information);
    }

    #[test]
    fn test_reader_data_roundtrip() {
        let data = ReaderProxyData {
            guid: Guid::new(GuidPrefix([3; 12]), EntityId::user(4, 0x07)),
            topic_name: "sensors/imu".into(),
            type_name: "ImuSample".into(),
            qos: Qos::default(),
            expects_inline_qos: true,
            unicast_locators: vec![Locator::udpv4(Ipv4Addr::new(10, 0, 0, 3), 7413)],
            multicast_locators: vec![Locator::udpv4(Ipv4Addr::new(239, 255, 0, 2), 7400)],
            type_information: Vec::new(),
        };
        let back = ReaderProxyData::from_payload(&data.to_payload()).unwrap();
        assert_eq!(back.guid, data.guid);
        assert!(back.expects_inline_qos);
        assert_eq!(back.unicast_locators, data.unicast_locators);
        assert_eq!(back.multicast_locators, data.multicast_locators);
    }

    #[test]
    fn test_default_partition_not_emitted() {
        let data = ReaderProxyData {
            guid: Guid::new(GuidPrefix([3; 12]), EntityId::user(4, 0x07)),
            topic_name: "t".into(),
            type_name: "T".into(),
            qos: Qos::default(),
            expects_inline_qos: false,
            unicast_locators: Vec::new(),
            multicast_locators: Vec::new(),
            type_information: Vec::new(),
        };
        let list = decapsulate(&data.to_payload()).unwrap();
        assert!(list.get(pid::PID_PARTITION).is_none());
    }
}
