// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! DATA and DATA_FRAG submessages (RTPS 2.3 Sections 9.4.5.3, 9.4.5.4).

use super::super::constants as c;
use super::super::cursor::{ByteReader, ByteWriter};
use super::super::parameter_list::ParameterList;
use super::with_submessage;
use crate::core::guid::EntityId;
use crate::core::sequence_number::{FragmentNumber, SequenceNumber};
use crate::{Error, Result};

/// Octets from after `octets_to_inline_qos` to the inline-qos position when
/// only the fixed DATA fields precede it.
const DATA_OCTETS_TO_INLINE_QOS: u16 = 16;
/// Same for DATA_FRAG (adds fragment bookkeeping fields).
const DATA_FRAG_OCTETS_TO_INLINE_QOS: u16 = 28;

/// DATA: one serialized sample or key, optionally with inline QoS.
#[derive(Clone, Debug, PartialEq)]
pub struct DataSubmessage {
    pub data_flag: bool,
    pub key_flag: bool,
    pub non_standard_payload_flag: bool,
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub inline_qos: Option<ParameterList>,
    /// Serialized payload including its encapsulation header; opaque here.
    pub payload: Vec<u8>,
}

impl DataSubmessage {
    /// Plain data sample without inline QoS.
    #[must_use]
    pub fn new_data(
        reader_id: EntityId,
        writer_id: EntityId,
        writer_sn: SequenceNumber,
        payload: Vec<u8>,
    ) -> Self {
        DataSubmessage {
            data_flag: true,
            key_flag: false,
            non_standard_payload_flag: false,
            reader_id,
            writer_id,
            writer_sn,
            inline_qos: None,
            payload,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>, little_endian: bool) {
        let mut flags = 0u8;
        if self.inline_qos.is_some() {
            flags |= c::FLAG_DATA_INLINE_QOS;
        }
        if self.data_flag {
            flags |= c::FLAG_DATA_DATA;
        }
        if self.key_flag {
            flags |= c::FLAG_DATA_KEY;
        }
        if self.non_standard_payload_flag {
            flags |= c::FLAG_DATA_NON_STANDARD_PAYLOAD;
        }

        with_submessage(out, c::SUBMESSAGE_DATA, flags, little_endian, |out| {
            let mut w = ByteWriter::new(out, little_endian);
            w.write_u16(0); // extraFlags
            w.write_u16(DATA_OCTETS_TO_INLINE_QOS);
            w.write_entity_id(self.reader_id.as_bytes());
            w.write_entity_id(self.writer_id.as_bytes());
            w.write_sequence_number(self.writer_sn);
            if let Some(qos) = &self.inline_qos {
                qos.encode(out, little_endian);
            }
            out.extend_from_slice(&self.payload);
        });
    }

    pub fn decode(flags: u8, body: &[u8], little_endian: bool) -> Result<Self> {
        let mut r = ByteReader::new(body, little_endian);
        let _extra_flags = r.read_u16()?;
        let octets_to_inline_qos = r.read_u16()?;
        let reader_id = EntityId(r.read_entity_id()?);
        let writer_id = EntityId(r.read_entity_id()?);
        let writer_sn = r.read_sequence_number()?;
        if !writer_sn.is_valid() {
            return Err(Error::Protocol("DATA with invalid sequence number"));
        }

        // octets_to_inline_qos counts from after its own field; skip any
        // extension octets a newer minor version may have added.
        let consumed_fixed = DATA_OCTETS_TO_INLINE_QOS as usize;
        let target = octets_to_inline_qos as usize;
        if target < consumed_fixed {
            return Err(Error::Protocol("DATA octets_to_inline_qos too small"));
        }
        r.skip(target - consumed_fixed)?;

        let inline_qos = if flags & c::FLAG_DATA_INLINE_QOS != 0 {
            Some(ParameterList::decode(&mut r, false)?)
        } else {
            None
        };

        let payload = if flags & (c::FLAG_DATA_DATA | c::FLAG_DATA_KEY) != 0 {
            r.rest().to_vec()
        } else {
            Vec::new()
        };

        Ok(DataSubmessage {
            data_flag: flags & c::FLAG_DATA_DATA != 0,
            key_flag: flags & c::FLAG_DATA_KEY != 0,
            non_standard_payload_flag: flags & c::FLAG_DATA_NON_STANDARD_PAYLOAD != 0,
            reader_id,
            writer_id,
            writer_sn,
            inline_qos,
            payload,
        })
    }
}

/// DATA_FRAG: one run of fragments of a large sample.
#[derive(Clone, Debug, PartialEq)]
pub struct DataFragSubmessage {
    pub key_flag: bool,
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    /// 1-based number of the first fragment carried here.
    pub fragment_starting_num: FragmentNumber,
    pub fragments_in_submessage: u16,
    pub fragment_size: u16,
    /// Total size of the complete serialized sample.
    pub data_size: u32,
    pub inline_qos: Option<ParameterList>,
    pub payload: Vec<u8>,
}

impl DataFragSubmessage {
    pub fn encode(&self, out: &mut Vec<u8>, little_endian: bool) {
        let mut flags = 0u8;
        if self.inline_qos.is_some() {
            flags |= c::FLAG_DATA_FRAG_INLINE_QOS;
        }
        if self.key_flag {
            flags |= c::FLAG_DATA_FRAG_KEY;
        }

        with_submessage(out, c::SUBMESSAGE_DATA_FRAG, flags, little_endian, |out| {
            let mut w = ByteWriter::new(out, little_endian);
            w.write_u16(0); // extraFlags
            w.write_u16(DATA_FRAG_OCTETS_TO_INLINE_QOS);
            w.write_entity_id(self.reader_id.as_bytes());
            w.write_entity_id(self.writer_id.as_bytes());
            w.write_sequence_number(self.writer_sn);
            w.write_u32(self.fragment_starting_num);
            w.write_u16(self.fragments_in_submessage);
            w.write_u16(self.fragment_size);
            w.write_u32(self.data_size);
            if let Some(qos) = &self.inline_qos {
                qos.encode(out, little_endian);
            }
            out.extend_from_slice(&self.payload);
        });
    }

    pub fn decode(flags: u8, body: &[u8], little_endian: bool) -> Result<Self> {
        let mut r = ByteReader::new(body, little_endian);
        let _extra_flags = r.read_u16()?;
        let octets_to_inline_qos = r.read_u16()?;
        let reader_id = EntityId(r.read_entity_id()?);
        let writer_id = EntityId(r.read_entity_id()?);
        let writer_sn = r.read_sequence_number()?;
        let fragment_starting_num = r.read_u32()?;
        let fragments_in_submessage = r.read_u16()?;
        let fragment_size = r.read_u16()?;
        let data_size = r.read_u32()?;

        if fragment_starting_num == 0 {
            return Err(Error::Protocol("DATA_FRAG fragment numbers are 1-based"));
        }
        if fragment_size == 0 {
            return Err(Error::Protocol("DATA_FRAG with zero fragment size"));
        }

        let consumed_fixed = DATA_FRAG_OCTETS_TO_INLINE_QOS as usize;
        let target = octets_to_inline_qos as usize;
        if target < consumed_fixed {
            return Err(Error::Protocol("DATA_FRAG octets_to_inline_qos too small"));
        }
        r.skip(target - consumed_fixed)?;

        let inline_qos = if flags & c::FLAG_DATA_FRAG_INLINE_QOS != 0 {
            Some(ParameterList::decode(&mut r, false)?)
        } else {
            None
        };

        Ok(DataFragSubmessage {
            key_flag: flags & c::FLAG_DATA_FRAG_KEY != 0,
            reader_id,
            writer_id,
            writer_sn,
            fragment_starting_num,
            fragments_in_submessage,
            fragment_size,
            data_size,
            inline_qos,
            payload: r.rest().to_vec(),
        })
    }
}
