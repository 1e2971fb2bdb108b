// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Typed RTPS submessages with wire encode/decode in both endiannesses.
//!
//! Each submessage writes its own 4-byte header and back-patches the
//! `octets_to_next_header` field once the body length is known. Decoding
//! takes the already-split header and body from
//! [`SubmessageHeader::split`](super::header::SubmessageHeader).

pub mod acknack;
pub mod data;
pub mod gap;
pub mod heartbeat;
pub mod info;

pub use acknack::{AckNackSubmessage, NackFragSubmessage};
pub use data::{DataFragSubmessage, DataSubmessage};
pub use gap::GapSubmessage;
pub use heartbeat::{HeartbeatFragSubmessage, HeartbeatSubmessage};
pub use info::{InfoDstSubmessage, InfoReplySubmessage, InfoSrcSubmessage, InfoTsSubmessage};

use super::constants as c;
use super::header::SubmessageHeader;
use crate::Result;

/// One parsed submessage.
#[derive(Clone, Debug, PartialEq)]
pub enum Submessage {
    Data(DataSubmessage),
    DataFrag(DataFragSubmessage),
    Heartbeat(HeartbeatSubmessage),
    HeartbeatFrag(HeartbeatFragSubmessage),
    AckNack(AckNackSubmessage),
    NackFrag(NackFragSubmessage),
    Gap(GapSubmessage),
    InfoTs(InfoTsSubmessage),
    InfoDst(InfoDstSubmessage),
    InfoSrc(InfoSrcSubmessage),
    InfoReply(InfoReplySubmessage),
    /// Recognized-but-ignored (PAD) or unknown id; skipped per Sec.8.3.4.1.
    Unknown { id: u8 },
}

impl Submessage {
    /// Decode one submessage from a split header and body.
    pub fn decode(header: &SubmessageHeader, body: &[u8]) -> Result<Submessage> {
        let le = header.little_endian();
        Ok(match header.id {
            c::SUBMESSAGE_DATA => Submessage::Data(DataSubmessage::decode(header.flags, body, le)?),
            c::SUBMESSAGE_DATA_FRAG => {
                Submessage::DataFrag(DataFragSubmessage::decode(header.flags, body, le)?)
            }
            c::SUBMESSAGE_HEARTBEAT => {
                Submessage::Heartbeat(HeartbeatSubmessage::decode(header.flags, body, le)?)
            }
            c::SUBMESSAGE_HEARTBEAT_FRAG => {
                Submessage::HeartbeatFrag(HeartbeatFragSubmessage::decode(body, le)?)
            }
            c::SUBMESSAGE_ACKNACK => {
                Submessage::AckNack(AckNackSubmessage::decode(header.flags, body, le)?)
            }
            c::SUBMESSAGE_NACK_FRAG => Submessage::NackFrag(NackFragSubmessage::decode(body, le)?),
            c::SUBMESSAGE_GAP => Submessage::Gap(GapSubmessage::decode(body, le)?),
            c::SUBMESSAGE_INFO_TS => {
                Submessage::InfoTs(InfoTsSubmessage::decode(header.flags, body, le)?)
            }
            c::SUBMESSAGE_INFO_DST => Submessage::InfoDst(InfoDstSubmessage::decode(body)?),
            c::SUBMESSAGE_INFO_SRC => Submessage::InfoSrc(InfoSrcSubmessage::decode(body, le)?),
            c::SUBMESSAGE_INFO_REPLY => {
                Submessage::InfoReply(InfoReplySubmessage::decode(header.flags, body, le)?)
            }
            id => Submessage::Unknown { id },
        })
    }

    /// Append the wire form of this submessage.
    pub fn encode(&self, out: &mut Vec<u8>, little_endian: bool) {
        match self {
            Submessage::Data(s) => s.encode(out, little_endian),
            Submessage::DataFrag(s) => s.encode(out, little_endian),
            Submessage::Heartbeat(s) => s.encode(out, little_endian),
            Submessage::HeartbeatFrag(s) => s.encode(out, little_endian),
            Submessage::AckNack(s) => s.encode(out, little_endian),
            Submessage::NackFrag(s) => s.encode(out, little_endian),
            Submessage::Gap(s) => s.encode(out, little_endian),
            Submessage::InfoTs(s) => s.encode(out, little_endian),
            Submessage::InfoDst(s) => s.encode(out, little_endian),
            Submessage::InfoSrc(s) => s.encode(out, little_endian),
            Submessage::InfoReply(s) => s.encode(out, little_endian),
            Submessage::Unknown { .. } => {}
        }
    }
}

/// Shared helper: write a submessage header, run `body`, patch the length.
pub(crate) fn with_submessage<F>(out: &mut Vec<u8>, id: u8, flags: u8, little_endian: bool, body: F)
where
    F: FnOnce(&mut Vec<u8>),
{
    let flags = if little_endian {
        flags | c::FLAG_ENDIANNESS
    } else {
        flags & !c::FLAG_ENDIANNESS
    };
    let len_offset = SubmessageHeader::encode_placeholder(id, flags, out);
    let body_start = out.len();
    body(out);
    // Bodies are always a 4-byte multiple per Sec.9.4.1; pad if needed.
    while (out.len() - body_start) % 4 != 0 {
        out.push(0);
    }
    let body_len = out.len() - body_start;
    SubmessageHeader::patch_length(out, len_offset, body_len, little_endian);
}

#[cfg(test)]
mod tests {
    use super::super::header::SubmessageHeader;
    use super::*;
    use crate::core::guid::EntityId;
    use crate::core::sequence_number::SequenceNumber;

    /// decode(encode(x)) == x for every submessage kind, both endiannesses.
    #[test]
    fn test_roundtrip_all_kinds_both_endiannesses() {
        let samples: Vec<Submessage> = vec![
            Submessage::Data(DataSubmessage::new_data(
                EntityId::UNKNOWN,
                EntityId::user(1, 0x03),
                SequenceNumber(9),
                vec![0, 1, 0, 0, 1, 2, 3, 4],
            )),
            Submessage::Heartbeat(HeartbeatSubmessage {
                final_flag: true,
                liveliness_flag: false,
                reader_id: EntityId::UNKNOWN,
                writer_id: EntityId::user(1, 0x02),
                first_sn: SequenceNumber(1),
                last_sn: SequenceNumber(12),
                count: 7,
            }),
            Submessage::Gap(GapSubmessage {
                reader_id: EntityId::user(2, 0x04),
                writer_id: EntityId::user(1, 0x02),
                gap_start: SequenceNumber(3),
                gap_list: crate::core::sequence_number::SequenceNumberSet::from_members(
                    SequenceNumber(6),
                    [SequenceNumber(6), SequenceNumber(8)],
                ),
            }),
            Submessage::InfoDst(InfoDstSubmessage {
                guid_prefix: crate::core::guid::GuidPrefix([3; 12]),
            }),
        ];

        for le in [true, false] {
            for submessage in &samples {
                let mut buf = Vec::new();
                submessage.encode(&mut buf, le);
                let (hdr, body, next) = SubmessageHeader::split(&buf).unwrap();
                assert_eq!(next, buf.len(), "one submessage consumed fully");
                let back = Submessage::decode(&hdr, body).unwrap();
                assert_eq!(&back, submessage, "roundtrip (little_endian={le})");
            }
        }
    }

    #[test]
    fn test_unknown_id_is_skipped_not_fatal() {
        let hdr = SubmessageHeader {
            id: 0x42,
            flags: 0x01,
            octets_to_next_header: 0,
        };
        assert!(matches!(
            Submessage::decode(&hdr, &[1, 2, 3]).unwrap(),
            Submessage::Unknown { id: 0x42 }
        ));
    }
}
