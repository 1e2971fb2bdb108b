// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! RTPS message header and submessage header (Sec.8.3.3, 9.4.4).

use super::constants::{
    MESSAGE_HEADER_SIZE, RTPS_MAGIC, RTPS_VERSION_MAJOR, SUBMESSAGE_HEADER_SIZE, VENDOR_ID,
};
use crate::core::guid::{GuidPrefix, GUID_PREFIX_LEN};
use crate::{Error, Result};

/// 20-byte RTPS message header.
///
/// ```text
/// 0        4        6        8                    20
/// +--------+--------+--------+--------------------+
/// | "RTPS" | ver    | vendor | guid prefix (12)   |
/// +--------+--------+--------+--------------------+
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MessageHeader {
    pub version: (u8, u8),
    pub vendor_id: [u8; 2],
    pub guid_prefix: GuidPrefix,
}

impl MessageHeader {
    /// Header announcing this implementation.
    #[must_use]
    pub fn ours(guid_prefix: GuidPrefix) -> Self {
        MessageHeader {
            version: (RTPS_VERSION_MAJOR, super::constants::RTPS_VERSION_MINOR),
            vendor_id: VENDOR_ID,
            guid_prefix,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(RTPS_MAGIC);
        out.push(self.version.0);
        out.push(self.version.1);
        out.extend_from_slice(&self.vendor_id);
        out.extend_from_slice(self.guid_prefix.as_bytes());
    }

    /// Parse and validate. Drops non-RTPS traffic and incompatible major
    /// versions (only 2.x is accepted).
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < MESSAGE_HEADER_SIZE {
            return Err(Error::Protocol("message shorter than RTPS header"));
        }
        if &buf[0..4] != RTPS_MAGIC {
            return Err(Error::Protocol("missing RTPS magic"));
        }
        let version = (buf[4], buf[5]);
        if version.0 != RTPS_VERSION_MAJOR {
            return Err(Error::Protocol("unsupported RTPS major version"));
        }
        let vendor_id = [buf[6], buf[7]];
        let mut prefix = [0u8; GUID_PREFIX_LEN];
        prefix.copy_from_slice(&buf[8..20]);
        Ok(MessageHeader {
            version,
            vendor_id,
            guid_prefix: GuidPrefix(prefix),
        })
    }
}

/// 4-byte submessage header.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SubmessageHeader {
    pub id: u8,
    pub flags: u8,
    /// Octets from the end of this header to the start of the next one.
    /// Zero means "extends to the end of the message" (Sec.9.4.5.1.3).
    pub octets_to_next_header: u16,
}

impl SubmessageHeader {
    #[must_use]
    pub fn little_endian(&self) -> bool {
        self.flags & super::constants::FLAG_ENDIANNESS != 0
    }

    /// Parse one submessage header plus its body slice out of `buf`.
    ///
    /// Returns the header, the body, and the offset of the next submessage.
    /// A length field running past the buffer aborts the message.
    pub fn split(buf: &[u8]) -> Result<(SubmessageHeader, &[u8], usize)> {
        if buf.len() < SUBMESSAGE_HEADER_SIZE {
            return Err(Error::Protocol("truncated submessage header"));
        }
        let id = buf[0];
        let flags = buf[1];
        let little_endian = flags & super::constants::FLAG_ENDIANNESS != 0;
        let octets = if little_endian {
            u16::from_le_bytes([buf[2], buf[3]])
        } else {
            u16::from_be_bytes([buf[2], buf[3]])
        };

        let body_len = if octets == 0 {
            buf.len() - SUBMESSAGE_HEADER_SIZE
        } else {
            octets as usize
        };
        let end = SUBMESSAGE_HEADER_SIZE
            .checked_add(body_len)
            .ok_or(Error::Protocol("submessage length overflow"))?;
        if end > buf.len() {
            return Err(Error::Protocol("octets_to_next_header past buffer end"));
        }

        let header = SubmessageHeader {
            id,
            flags,
            octets_to_next_header: octets,
        };
        Ok((header, &buf[SUBMESSAGE_HEADER_SIZE..end], end))
    }

    /// Emit header bytes; the length is back-patched by the caller once the
    /// body size is known.
    pub fn encode_placeholder(id: u8, flags: u8, out: &mut Vec<u8>) -> usize {
        out.push(id);
        out.push(flags);
        out.extend_from_slice(&[0, 0]);
        out.len() - 2
    }

    /// Patch the length field written by `encode_placeholder`.
    pub fn patch_length(out: &mut [u8], len_offset: usize, body_len: usize, little_endian: bool) {
        let v = body_len as u16;
        let bytes = if little_endian {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        };
        out[len_offset..len_offset + 2].copy_from_slice(&bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let hdr = MessageHeader::ours(GuidPrefix([9; 12]));
        let mut buf = Vec::new();
        hdr.encode(&mut buf);
        assert_eq!(buf.len(), MESSAGE_HEADER_SIZE);
        assert_eq!(MessageHeader::decode(&buf).unwrap(), hdr);
    }

    #[test]
    fn test_header_rejects_foreign_magic() {
        let mut buf = Vec::new();
        MessageHeader::ours(GuidPrefix([1; 12])).encode(&mut buf);
        buf[0] = b'X';
        assert!(MessageHeader::decode(&buf).is_err());
    }

    #[test]
    fn test_header_rejects_wrong_major() {
        let mut buf = Vec::new();
        MessageHeader::ours(GuidPrefix([1; 12])).encode(&mut buf);
        buf[4] = 3;
        assert!(MessageHeader::decode(&buf).is_err());
    }

    #[test]
    fn test_submessage_split_validates_length() {
        // Claimed body of 100 bytes, only 4 available.
        let buf = [0x07u8, 0x01, 100, 0, 1, 2, 3, 4];
        assert!(SubmessageHeader::split(&buf).is_err());
    }

    #[test]
    fn test_submessage_zero_length_extends_to_end() {
        let buf = [0x09u8, 0x01, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8];
        let (hdr, body, next) = SubmessageHeader::split(&buf).unwrap();
        assert_eq!(hdr.id, 0x09);
        assert_eq!(body.len(), 8);
        assert_eq!(next, buf.len());
    }

    #[test]
    fn test_submessage_big_endian_length() {
        // flags without endianness bit -> big-endian length field
        let buf = [0x07u8, 0x00, 0, 4, 9, 9, 9, 9, 0xaa];
        let (_, body, next) = SubmessageHeader::split(&buf).unwrap();
        assert_eq!(body, &[9, 9, 9, 9]);
        assert_eq!(next, 8);
    }
}
