// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! HEARTBEAT and HEARTBEAT_FRAG submessages (RTPS 2.3 Sections 9.4.5.7,
//! 9.4.5.6).

use super::super::constants as c;
use super::super::cursor::{ByteReader, ByteWriter};
use super::with_submessage;
use crate::core::guid::EntityId;
use crate::core::sequence_number::{FragmentNumber, SequenceNumber};
use crate::{Error, Result};

/// HEARTBEAT: the writer's available window plus a monotonic count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatSubmessage {
    /// F flag: the reader need not respond.
    pub final_flag: bool,
    /// L flag: also asserts the writer's liveliness.
    pub liveliness_flag: bool,
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub first_sn: SequenceNumber,
    pub last_sn: SequenceNumber,
    pub count: u32,
}

impl HeartbeatSubmessage {
    pub fn encode(&self, out: &mut Vec<u8>, little_endian: bool) {
        let mut flags = 0u8;
        if self.final_flag {
            flags |= c::FLAG_HEARTBEAT_FINAL;
        }
        if self.liveliness_flag {
            flags |= c::FLAG_HEARTBEAT_LIVELINESS;
        }
        with_submessage(out, c::SUBMESSAGE_HEARTBEAT, flags, little_endian, |out| {
            let mut w = ByteWriter::new(out, little_endian);
            w.write_entity_id(self.reader_id.as_bytes());
            w.write_entity_id(self.writer_id.as_bytes());
            w.write_sequence_number(self.first_sn);
            w.write_sequence_number(self.last_sn);
            w.write_u32(self.count);
        });
    }

    pub fn decode(flags: u8, body: &[u8], little_endian: bool) -> Result<Self> {
        let mut r = ByteReader::new(body, little_endian);
        let reader_id = EntityId(r.read_entity_id()?);
        let writer_id = EntityId(r.read_entity_id()?);
        let first_sn = r.read_sequence_number()?;
        let last_sn = r.read_sequence_number()?;
        let count = r.read_u32()?;

        // An empty writer announces first = last + 1; anything below that is
        // malformed (Sec.8.3.7.5.3).
        if first_sn.0 < 1 || last_sn.0 < first_sn.0 - 1 {
            return Err(Error::Protocol("HEARTBEAT with inconsistent window"));
        }

        Ok(HeartbeatSubmessage {
            final_flag: flags & c::FLAG_HEARTBEAT_FINAL != 0,
            liveliness_flag: flags & c::FLAG_HEARTBEAT_LIVELINESS != 0,
            reader_id,
            writer_id,
            first_sn,
            last_sn,
            count,
        })
    }
}

/// HEARTBEAT_FRAG: which fragments of one sample are available.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatFragSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub last_fragment_num: FragmentNumber,
    pub count: u32,
}

impl HeartbeatFragSubmessage {
    pub fn encode(&self, out: &mut Vec<u8>, little_endian: bool) {
        with_submessage(out, c::SUBMESSAGE_HEARTBEAT_FRAG, 0, little_endian, |out| {
            let mut w = ByteWriter::new(out, little_endian);
            w.write_entity_id(self.reader_id.as_bytes());
            w.write_entity_id(self.writer_id.as_bytes());
            w.write_sequence_number(self.writer_sn);
            w.write_u32(self.last_fragment_num);
            w.write_u32(self.count);
        });
    }

    pub fn decode(body: &[u8], little_endian: bool) -> Result<Self> {
        let mut r = ByteReader::new(body, little_endian);
        Ok(HeartbeatFragSubmessage {
            reader_id: EntityId(r.read_entity_id()?),
            writer_id: EntityId(r.read_entity_id()?),
            writer_sn: r.read_sequence_number()?,
            last_fragment_num: r.read_u32()?,
            count: r.read_u32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::super::header::SubmessageHeader;
    use super::*;

    #[test]
    fn test_heartbeat_roundtrip_with_flags() {
        let hb = HeartbeatSubmessage {
            final_flag: true,
            liveliness_flag: true,
            reader_id: EntityId::UNKNOWN,
            writer_id: EntityId::user(1, 0x02),
            first_sn: SequenceNumber(3),
            last_sn: SequenceNumber(41),
            count: 17,
        };
        for le in [true, false] {
            let mut buf = Vec::new();
            hb.encode(&mut buf, le);
            let (hdr, body, _) = SubmessageHeader::split(&buf).unwrap();
            assert_eq!(
                HeartbeatSubmessage::decode(hdr.flags, body, hdr.little_endian()).unwrap(),
                hb
            );
        }
    }

    #[test]
    fn test_empty_writer_heartbeat_accepted() {
        // first = 1, last = 0 announces "nothing written yet".
        let hb = HeartbeatSubmessage {
            final_flag: true,
            liveliness_flag: false,
            reader_id: EntityId::UNKNOWN,
            writer_id: EntityId::user(1, 0x02),
            first_sn: SequenceNumber(1),
            last_sn: SequenceNumber(0),
            count: 0,
        };
        let mut buf = Vec::new();
        hb.encode(&mut buf, true);
        let (hdr, body, _) = SubmessageHeader::split(&buf).unwrap();
        assert!(HeartbeatSubmessage::decode(hdr.flags, body, true).is_ok());
    }

    #[test]
    fn test_inconsistent_window_rejected() {
        let hb = HeartbeatSubmessage {
            final_flag: false,
            liveliness_flag: false,
            reader_id: EntityId::UNKNOWN,
            writer_id: EntityId::user(1, 0x02),
            first_sn: SequenceNumber(10),
            last_sn: SequenceNumber(5),
            count: 0,
        };
        let mut buf = Vec::new();
        hb.encode(&mut buf, true);
        let (hdr, body, _) = SubmessageHeader::split(&buf).unwrap();
        assert!(HeartbeatSubmessage::decode(hdr.flags, body, true).is_err());
    }

    #[test]
    fn test_heartbeat_frag_roundtrip() {
        let hbf = HeartbeatFragSubmessage {
            reader_id: EntityId::user(2, 0x07),
            writer_id: EntityId::user(1, 0x02),
            writer_sn: SequenceNumber(6),
            last_fragment_num: 42,
            count: 3,
        };
        let mut buf = Vec::new();
        hbf.encode(&mut buf, false);
        let (hdr, body, _) = SubmessageHeader::split(&buf).unwrap();
        assert_eq!(
            HeartbeatFragSubmessage::decode(body, hdr.little_endian()).unwrap(),
            hbf
        );
    }
}
