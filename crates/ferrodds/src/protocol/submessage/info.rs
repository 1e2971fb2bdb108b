// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Interpreter-state submessages: INFO_TS, INFO_DST, INFO_SRC, INFO_REPLY
//! (RTPS 2.3 Sections 9.4.5.8-9.4.5.11).

use super::super::constants as c;
use super::super::cursor::{ByteReader, ByteWriter};
use super::with_submessage;
use crate::core::guid::{GuidPrefix, GUID_PREFIX_LEN};
use crate::core::locator::Locator;
use crate::core::time::RtpsTime;
use crate::{Error, Result};

/// INFO_TS: source timestamp for subsequent submessages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InfoTsSubmessage {
    /// `None` invalidates the current timestamp (I flag set).
    pub timestamp: Option<RtpsTime>,
}

impl InfoTsSubmessage {
    pub fn encode(&self, out: &mut Vec<u8>, little_endian: bool) {
        let flags = if self.timestamp.is_none() {
            c::FLAG_INFO_TS_INVALIDATE
        } else {
            0
        };
        with_submessage(out, c::SUBMESSAGE_INFO_TS, flags, little_endian, |out| {
            if let Some(ts) = self.timestamp {
                ts.encode(out, little_endian);
            }
        });
    }

    pub fn decode(flags: u8, body: &[u8], little_endian: bool) -> Result<Self> {
        if flags & c::FLAG_INFO_TS_INVALIDATE != 0 {
            return Ok(InfoTsSubmessage { timestamp: None });
        }
        let ts = RtpsTime::decode(body, little_endian)
            .ok_or(Error::Protocol("INFO_TS missing timestamp"))?;
        Ok(InfoTsSubmessage {
            timestamp: Some(ts),
        })
    }
}

/// INFO_DST: subsequent submessages address only this participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InfoDstSubmessage {
    pub guid_prefix: GuidPrefix,
}

impl InfoDstSubmessage {
    pub fn encode(&self, out: &mut Vec<u8>, little_endian: bool) {
        with_submessage(out, c::SUBMESSAGE_INFO_DST, 0, little_endian, |out| {
            out.extend_from_slice(self.guid_prefix.as_bytes());
        });
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        if body.len() < GUID_PREFIX_LEN {
            return Err(Error::Protocol("INFO_DST shorter than guid prefix"));
        }
        let mut prefix = [0u8; GUID_PREFIX_LEN];
        prefix.copy_from_slice(&body[..GUID_PREFIX_LEN]);
        Ok(InfoDstSubmessage {
            guid_prefix: GuidPrefix(prefix),
        })
    }
}

/// INFO_SRC: subsequent submessages come from a different source than the
/// message header claims (relay scenarios).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InfoSrcSubmessage {
    pub version: (u8, u8),
    pub vendor_id: [u8; 2],
    pub guid_prefix: GuidPrefix,
}

impl InfoSrcSubmessage {
    pub fn encode(&self, out: &mut Vec<u8>, little_endian: bool) {
        with_submessage(out, c::SUBMESSAGE_INFO_SRC, 0, little_endian, |out| {
            let mut w = ByteWriter::new(out, little_endian);
            w.write_u32(0); // unused
            w.write_u8(self.version.0);
            w.write_u8(self.version.1);
            w.write_bytes(&self.vendor_id);
            w.write_bytes(self.guid_prefix.as_bytes());
        });
    }

    pub fn decode(body: &[u8], little_endian: bool) -> Result<Self> {
        let mut r = ByteReader::new(body, little_endian);
        let _unused = r.read_u32()?;
        let version = (r.read_u8()?, r.read_u8()?);
        let vendor = r.read_bytes(2)?;
        let prefix_bytes = r.read_bytes(GUID_PREFIX_LEN)?;
        let mut prefix = [0u8; GUID_PREFIX_LEN];
        prefix.copy_from_slice(prefix_bytes);
        Ok(InfoSrcSubmessage {
            version,
            vendor_id: [vendor[0], vendor[1]],
            guid_prefix: GuidPrefix(prefix),
        })
    }
}

/// INFO_REPLY: where to send replies to subsequent submessages.
#[derive(Clone, Debug, PartialEq)]
pub struct InfoReplySubmessage {
    pub unicast_locators: Vec<Locator>,
    /// Present only when the M flag is set.
    pub multicast_locators: Option<Vec<Locator>>,
}

impl InfoReplySubmessage {
    pub fn encode(&self, out: &mut Vec<u8>, little_endian: bool) {
        let flags = if self.multicast_locators.is_some() {
            c::FLAG_INFO_REPLY_MULTICAST
        } else {
            0
        };
        with_submessage(out, c::SUBMESSAGE_INFO_REPLY, flags, little_endian, |out| {
            let mut w = ByteWriter::new(out, little_endian);
            w.write_u32(self.unicast_locators.len() as u32);
            for loc in &self.unicast_locators {
                w.write_locator(loc);
            }
            if let Some(mc) = &self.multicast_locators {
                w.write_u32(mc.len() as u32);
                for loc in mc {
                    w.write_locator(loc);
                }
            }
        });
    }

    pub fn decode(flags: u8, body: &[u8], little_endian: bool) -> Result<Self> {
        let mut r = ByteReader::new(body, little_endian);
        let unicast_locators = Self::read_locator_list(&mut r)?;
        let multicast_locators = if flags & c::FLAG_INFO_REPLY_MULTICAST != 0 {
            Some(Self::read_locator_list(&mut r)?)
        } else {
            None
        };
        Ok(InfoReplySubmessage {
            unicast_locators,
            multicast_locators,
        })
    }

    fn read_locator_list(r: &mut ByteReader<'_>) -> Result<Vec<Locator>> {
        let count = r.read_u32()? as usize;
        // 24 bytes per locator bounds the count against the remaining body.
        if count > r.remaining() / 24 {
            return Err(Error::Protocol("locator list count past buffer"));
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(r.read_locator()?);
        }
        Ok(out)
    }
}
