// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! ACKNACK and NACK_FRAG submessages (RTPS 2.3 Sections 9.4.5.2, 9.4.5.13).

use super::super::constants as c;
use super::super::cursor::{ByteReader, ByteWriter};
use super::with_submessage;
use crate::core::guid::EntityId;
use crate::core::sequence_number::{
    FragmentNumberSet, SequenceNumber, SequenceNumberSet, FNSET_MAX_BITS, SNSET_MAX_BITS,
};
use crate::{Error, Result};

fn write_snset(w: &mut ByteWriter<'_>, set: &SequenceNumberSet) {
    w.write_sequence_number(set.base());
    w.write_u32(set.num_bits());
    for word in set.words() {
        w.write_u32(*word);
    }
}

fn read_snset(r: &mut ByteReader<'_>) -> Result<SequenceNumberSet> {
    let base = r.read_sequence_number()?;
    let num_bits = r.read_u32()?;
    if num_bits > SNSET_MAX_BITS {
        return Err(Error::Protocol("SequenceNumberSet over 256 bits"));
    }
    let mut words = [0u32; 8];
    for word in words.iter_mut().take(num_bits.div_ceil(32) as usize) {
        *word = r.read_u32()?;
    }
    SequenceNumberSet::from_wire(base, num_bits, &words)
        .ok_or(Error::Protocol("malformed SequenceNumberSet"))
}

/// ACKNACK: cumulative acknowledgment plus requested retransmissions.
///
/// Everything below `reader_sn_state.base` is acknowledged; set bits name
/// missing sequences the reader wants resent.
#[derive(Clone, Debug, PartialEq)]
pub struct AckNackSubmessage {
    /// F flag: the reader does not expect a HEARTBEAT in response.
    pub final_flag: bool,
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub reader_sn_state: SequenceNumberSet,
    pub count: u32,
}

impl AckNackSubmessage {
    pub fn encode(&self, out: &mut Vec<u8>, little_endian: bool) {
        let flags = if self.final_flag {
            c::FLAG_ACKNACK_FINAL
        } else {
            0
        };
        with_submessage(out, c::SUBMESSAGE_ACKNACK, flags, little_endian, |out| {
            let mut w = ByteWriter::new(out, little_endian);
            w.write_entity_id(self.reader_id.as_bytes());
            w.write_entity_id(self.writer_id.as_bytes());
            write_snset(&mut w, &self.reader_sn_state);
            w.write_u32(self.count);
        });
    }

    pub fn decode(flags: u8, body: &[u8], little_endian: bool) -> Result<Self> {
        let mut r = ByteReader::new(body, little_endian);
        let reader_id = EntityId(r.read_entity_id()?);
        let writer_id = EntityId(r.read_entity_id()?);
        let reader_sn_state = read_snset(&mut r)?;
        if !reader_sn_state.base().is_valid() {
            return Err(Error::Protocol("ACKNACK base below 1"));
        }
        let count = r.read_u32()?;
        Ok(AckNackSubmessage {
            final_flag: flags & c::FLAG_ACKNACK_FINAL != 0,
            reader_id,
            writer_id,
            reader_sn_state,
            count,
        })
    }
}

/// NACK_FRAG: fragments of one sample the reader is still missing.
#[derive(Clone, Debug, PartialEq)]
pub struct NackFragSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub fragment_number_state: FragmentNumberSet,
    pub count: u32,
}

impl NackFragSubmessage {
    pub fn encode(&self, out: &mut Vec<u8>, little_endian: bool) {
        with_submessage(out, c::SUBMESSAGE_NACK_FRAG, 0, little_endian, |out| {
            let mut w = ByteWriter::new(out, little_endian);
            w.write_entity_id(self.reader_id.as_bytes());
            w.write_entity_id(self.writer_id.as_bytes());
            w.write_sequence_number(self.writer_sn);
            w.write_u32(self.fragment_number_state.base());
            w.write_u32(self.fragment_number_state.num_bits());
            for word in self.fragment_number_state.words() {
                w.write_u32(*word);
            }
            w.write_u32(self.count);
        });
    }

    pub fn decode(body: &[u8], little_endian: bool) -> Result<Self> {
        let mut r = ByteReader::new(body, little_endian);
        let reader_id = EntityId(r.read_entity_id()?);
        let writer_id = EntityId(r.read_entity_id()?);
        let writer_sn = r.read_sequence_number()?;
        let base = r.read_u32()?;
        let num_bits = r.read_u32()?;
        if num_bits > FNSET_MAX_BITS {
            return Err(Error::Protocol("FragmentNumberSet over 256 bits"));
        }
        let mut words = [0u32; 8];
        for word in words.iter_mut().take(num_bits.div_ceil(32) as usize) {
            *word = r.read_u32()?;
        }
        let fragment_number_state = FragmentNumberSet::from_wire(base, num_bits, &words)
            .ok_or(Error::Protocol("malformed FragmentNumberSet"))?;
        let count = r.read_u32()?;
        Ok(NackFragSubmessage {
            reader_id,
            writer_id,
            writer_sn,
            fragment_number_state,
            count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::super::header::SubmessageHeader;
    use super::*;

    #[test]
    fn test_acknack_roundtrip_with_bitmap() {
        let mut state = SequenceNumberSet::new(SequenceNumber(6));
        state.insert(SequenceNumber(6));
        state.insert(SequenceNumber(9));
        let ack = AckNackSubmessage {
            final_flag: false,
            reader_id: EntityId::user(4, 0x04),
            writer_id: EntityId::user(1, 0x02),
            reader_sn_state: state,
            count: 2,
        };
        for le in [true, false] {
            let mut buf = Vec::new();
            ack.encode(&mut buf, le);
            let (hdr, body, _) = SubmessageHeader::split(&buf).unwrap();
            assert_eq!(
                AckNackSubmessage::decode(hdr.flags, body, hdr.little_endian()).unwrap(),
                ack
            );
        }
    }

    #[test]
    fn test_acknack_pure_ack_empty_bitmap() {
        let ack = AckNackSubmessage {
            final_flag: true,
            reader_id: EntityId::user(4, 0x04),
            writer_id: EntityId::user(1, 0x02),
            reader_sn_state: SequenceNumberSet::new(SequenceNumber(11)),
            count: 9,
        };
        let mut buf = Vec::new();
        ack.encode(&mut buf, true);
        let (hdr, body, _) = SubmessageHeader::split(&buf).unwrap();
        let back = AckNackSubmessage::decode(hdr.flags, body, true).unwrap();
        assert!(back.final_flag);
        assert!(back.reader_sn_state.is_empty());
        assert_eq!(back.reader_sn_state.base(), SequenceNumber(11));
    }

    #[test]
    fn test_acknack_invalid_base_rejected() {
        let ack = AckNackSubmessage {
            final_flag: false,
            reader_id: EntityId::UNKNOWN,
            writer_id: EntityId::user(1, 0x02),
            reader_sn_state: SequenceNumberSet::new(SequenceNumber(0)),
            count: 0,
        };
        let mut buf = Vec::new();
        ack.encode(&mut buf, true);
        let (hdr, body, _) = SubmessageHeader::split(&buf).unwrap();
        assert!(AckNackSubmessage::decode(hdr.flags, body, true).is_err());
    }

    #[test]
    fn test_nack_frag_roundtrip() {
        let mut frags = FragmentNumberSet::new(3);
        frags.insert(3);
        frags.insert(5);
        let nf = NackFragSubmessage {
            reader_id: EntityId::user(4, 0x07),
            writer_id: EntityId::user(1, 0x02),
            writer_sn: SequenceNumber(40),
            fragment_number_state: frags,
            count: 1,
        };
        for le in [true, false] {
            let mut buf = Vec::new();
            nf.encode(&mut buf, le);
            let (hdr, body, _) = SubmessageHeader::split(&buf).unwrap();
            assert_eq!(
                NackFragSubmessage::decode(body, hdr.little_endian()).unwrap(),
                nf
            );
        }
    }
}
