// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! GAP submessage (RTPS 2.3 Section 9.4.5.5): sequences the writer will
//! never send to this reader.

use super::super::constants as c;
use super::super::cursor::{ByteReader, ByteWriter};
use super::with_submessage;
use crate::core::guid::EntityId;
use crate::core::sequence_number::{SequenceNumber, SequenceNumberSet, SNSET_MAX_BITS};
use crate::{Error, Result};

/// GAP: the contiguous range `[gap_start, gap_list.base)` plus the set bits
/// of `gap_list` are irrelevant for the addressed reader.
#[derive(Clone, Debug, PartialEq)]
pub struct GapSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub gap_start: SequenceNumber,
    pub gap_list: SequenceNumberSet,
}

impl GapSubmessage {
    /// GAP covering a contiguous `[start, end]` range.
    #[must_use]
    pub fn contiguous(
        reader_id: EntityId,
        writer_id: EntityId,
        start: SequenceNumber,
        end: SequenceNumber,
    ) -> Self {
        GapSubmessage {
            reader_id,
            writer_id,
            gap_start: start,
            gap_list: SequenceNumberSet::new(SequenceNumber(end.0 + 1)),
        }
    }

    /// All sequence numbers this GAP marks irrelevant, ascending.
    #[must_use]
    pub fn irrelevant_sequences(&self) -> Vec<SequenceNumber> {
        let mut out: Vec<SequenceNumber> =
            (self.gap_start.0..self.gap_list.base().0).map(SequenceNumber).collect();
        out.extend(self.gap_list.iter());
        out
    }

    pub fn encode(&self, out: &mut Vec<u8>, little_endian: bool) {
        with_submessage(out, c::SUBMESSAGE_GAP, 0, little_endian, |out| {
            let mut w = ByteWriter::new(out, little_endian);
            w.write_entity_id(self.reader_id.as_bytes());
            w.write_entity_id(self.writer_id.as_bytes());
            w.write_sequence_number(self.gap_start);
            w.write_sequence_number(self.gap_list.base());
            w.write_u32(self.gap_list.num_bits());
            for word in self.gap_list.words() {
                w.write_u32(*word);
            }
        });
    }

    pub fn decode(body: &[u8], little_endian: bool) -> Result<Self> {
        let mut r = ByteReader::new(body, little_endian);
        let reader_id = EntityId(r.read_entity_id()?);
        let writer_id = EntityId(r.read_entity_id()?);
        let gap_start = r.read_sequence_number()?;
        let base = r.read_sequence_number()?;
        let num_bits = r.read_u32()?;
        if num_bits > SNSET_MAX_BITS {
            return Err(Error::Protocol("GAP list over 256 bits"));
        }
        let mut words = [0u32; 8];
        for word in words.iter_mut().take(num_bits.div_ceil(32) as usize) {
            *word = r.read_u32()?;
        }
        let gap_list = SequenceNumberSet::from_wire(base, num_bits, &words)
            .ok_or(Error::Protocol("malformed GAP list"))?;

        if !gap_start.is_valid() || base.0 < gap_start.0 {
            return Err(Error::Protocol("GAP with inconsistent range"));
        }

        Ok(GapSubmessage {
            reader_id,
            writer_id,
            gap_start,
            gap_list,
        })
    }
}
