// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Bounds-checked, endianness-aware byte cursors for submessage bodies.

use crate::core::locator::Locator;
use crate::core::sequence_number::SequenceNumber;
use crate::{Error, Result};

/// Reader over a submessage body. Every read is bounds-checked; running off
/// the end is a `Protocol` error that drops the enclosing message.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8], little_endian: bool) -> Self {
        ByteReader {
            buf,
            pos: 0,
            little_endian,
        }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[must_use]
    pub fn little_endian(&self) -> bool {
        self.little_endian
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(Error::Protocol("skip past end of submessage"));
        }
        self.pos += n;
        Ok(())
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Protocol("truncated submessage body"));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(if self.little_endian {
            u16::from_le_bytes([b[0], b[1]])
        } else {
            u16::from_be_bytes([b[0], b[1]])
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(if self.little_endian {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        })
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Entity ids are always big-endian on the wire (Sec.9.4.5.3).
    pub fn read_entity_id(&mut self) -> Result<[u8; 4]> {
        let b = self.read_bytes(4)?;
        Ok([b[0], b[1], b[2], b[3]])
    }

    pub fn read_sequence_number(&mut self) -> Result<SequenceNumber> {
        let high = self.read_i32()?;
        let low = self.read_u32()?;
        Ok(SequenceNumber::from_parts(high, low))
    }

    pub fn read_locator(&mut self) -> Result<Locator> {
        let kind = self.read_i32()?;
        let port = self.read_u32()?;
        let address_bytes = self.read_bytes(16)?;
        let mut address = [0u8; 16];
        address.copy_from_slice(address_bytes);
        Ok(Locator {
            kind,
            port,
            address,
        })
    }

    /// Align the read position to `n` bytes from the start of the body.
    pub fn align(&mut self, n: usize) -> Result<()> {
        let rem = self.pos % n;
        if rem != 0 {
            self.skip(n - rem)?;
        }
        Ok(())
    }
}

/// Writer building a submessage body in the selected endianness.
pub struct ByteWriter<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
    little_endian: bool,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut Vec<u8>, little_endian: bool) -> Self {
        let start = buf.len();
        ByteWriter {
            buf,
            start,
            little_endian,
        }
    }

    #[must_use]
    pub fn written(&self) -> usize {
        self.buf.len() - self.start
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        let b = if self.little_endian {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        };
        self.buf.extend_from_slice(&b);
    }

    pub fn write_u32(&mut self, v: u32) {
        let b = if self.little_endian {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        };
        self.buf.extend_from_slice(&b);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_u32(v as u32);
    }

    pub fn write_entity_id(&mut self, id: &[u8; 4]) {
        self.buf.extend_from_slice(id);
    }

    pub fn write_sequence_number(&mut self, sn: SequenceNumber) {
        let (high, low) = sn.to_parts();
        self.write_i32(high);
        self.write_u32(low);
    }

    pub fn write_locator(&mut self, loc: &Locator) {
        self.write_i32(loc.kind);
        self.write_u32(loc.port);
        self.write_bytes(&loc.address);
    }

    /// Pad with zeros to an `n`-byte boundary relative to the body start.
    pub fn align(&mut self, n: usize) {
        while self.written() % n != 0 {
            self.buf.push(0);
        }
    }
}
