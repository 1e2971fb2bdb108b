// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Parameter list (PL-CDR) encoding: `{pid:u16, length:u16, value}` entries,
//! values padded to 4-byte alignment, terminated by PID_SENTINEL
//! (Sec.9.4.2.11).

use super::constants::{PID_FLAG_MUST_UNDERSTAND, PID_FLAG_VENDOR_SPECIFIC, PID_PAD, PID_SENTINEL};
use super::cursor::{ByteReader, ByteWriter};
use crate::core::locator::Locator;
use crate::{Error, Result};

/// One TLV entry. The value is stored unpadded; padding is a wire concern.
/// `little_endian` records the byte order the value was serialized in, so
/// accessors decode big-endian peers correctly. Equality compares pid and
/// value only; the byte-order tag is bookkeeping.
#[derive(Clone, Eq, Debug)]
pub struct Parameter {
    pub pid: u16,
    pub value: Vec<u8>,
    pub little_endian: bool,
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        self.pid == other.pid && self.value == other.value
    }
}

impl Parameter {
    #[must_use]
    pub fn new(pid: u16, value: Vec<u8>) -> Self {
        Parameter {
            pid,
            value,
            little_endian: true,
        }
    }

    /// u32 value helper (little-endian storage convention for built values).
    #[must_use]
    pub fn from_u32(pid: u16, v: u32) -> Self {
        Parameter::new(pid, v.to_le_bytes().to_vec())
    }

    /// CDR string helper: length-prefixed, NUL-terminated.
    #[must_use]
    pub fn from_string(pid: u16, s: &str) -> Self {
        let mut value = Vec::with_capacity(4 + s.len() + 1);
        value.extend_from_slice(&((s.len() + 1) as u32).to_le_bytes());
        value.extend_from_slice(s.as_bytes());
        value.push(0);
        Parameter::new(pid, value)
    }

    #[must_use]
    pub fn from_locator(pid: u16, loc: &Locator) -> Self {
        let mut value = Vec::with_capacity(24);
        loc.encode(&mut value);
        Parameter::new(pid, value)
    }

    /// Interpret the value as u32 in its recorded byte order.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        let b = self.value.get(..4)?;
        let bytes = [b[0], b[1], b[2], b[3]];
        Some(if self.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    /// Interpret the value as an RTPS Duration_t (seconds + 2^-32 fraction).
    #[must_use]
    pub fn as_duration(&self) -> Option<crate::core::time::RtpsTime> {
        crate::core::time::RtpsTime::decode(&self.value, self.little_endian)
    }

    #[must_use]
    pub fn from_duration(pid: u16, time: crate::core::time::RtpsTime) -> Self {
        let mut value = Vec::with_capacity(8);
        time.encode(&mut value, true);
        Parameter::new(pid, value)
    }

    /// Interpret the value as a CDR string.
    #[must_use]
    pub fn as_string(&self) -> Option<String> {
        let len = self.as_u32()? as usize;
        if len == 0 {
            return Some(String::new());
        }
        let bytes = self.value.get(4..4 + len)?;
        // Strip the trailing NUL.
        let text = &bytes[..len.saturating_sub(1)];
        String::from_utf8(text.to_vec()).ok()
    }

    #[must_use]
    pub fn as_locator(&self) -> Option<Locator> {
        if self.little_endian {
            Locator::decode(&self.value)
        } else {
            let mut r = ByteReader::new(&self.value, false);
            r.read_locator().ok()
        }
    }

    /// True when the receiver may not silently skip this parameter.
    #[must_use]
    pub fn must_understand(&self) -> bool {
        self.pid & PID_FLAG_MUST_UNDERSTAND != 0 && self.pid & PID_FLAG_VENDOR_SPECIFIC == 0
    }
}

/// Ordered parameter list.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ParameterList {
    pub params: Vec<Parameter>,
}

impl ParameterList {
    #[must_use]
    pub fn new() -> Self {
        ParameterList { params: Vec::new() }
    }

    pub fn push(&mut self, p: Parameter) {
        self.params.push(p);
    }

    /// First parameter with the given pid.
    #[must_use]
    pub fn get(&self, pid: u16) -> Option<&Parameter> {
        self.params.iter().find(|p| p.pid == pid)
    }

    /// All parameters with the given pid (locator lists repeat pids).
    pub fn get_all(&self, pid: u16) -> impl Iterator<Item = &Parameter> {
        self.params.iter().filter(move |p| p.pid == pid)
    }

    /// Serialize including the sentinel, padding every value to 4 bytes.
    pub fn encode(&self, out: &mut Vec<u8>, little_endian: bool) {
        let mut w = ByteWriter::new(out, little_endian);
        for p in &self.params {
            let padded = p.value.len().div_ceil(4) * 4;
            w.write_u16(p.pid);
            w.write_u16(padded as u16);
            w.write_bytes(&p.value);
            for _ in p.value.len()..padded {
                w.write_u8(0);
            }
        }
        w.write_u16(PID_SENTINEL);
        w.write_u16(0);
    }

    /// Parse until the sentinel. `strict` rejects unknown must-understand
    /// pids; otherwise unknown parameters are kept verbatim for the caller.
    pub fn decode(reader: &mut ByteReader<'_>, strict: bool) -> Result<Self> {
        let little_endian = reader.little_endian();
        let mut list = ParameterList::new();
        loop {
            let pid = reader.read_u16()?;
            let len = reader.read_u16()? as usize;
            if pid == PID_SENTINEL {
                return Ok(list);
            }
            if len % 4 != 0 {
                return Err(Error::Protocol("parameter length not 4-byte aligned"));
            }
            let value = reader.read_bytes(len)?.to_vec();
            if pid == PID_PAD {
                continue;
            }
            let mut param = Parameter::new(pid, value);
            param.little_endian = little_endian;
            if strict && param.must_understand() && !is_known_pid(pid) {
                return Err(Error::UnknownMandatoryParameter(pid));
            }
            list.push(param);
        }
    }
}

/// Parameter ids this implementation interprets.
fn is_known_pid(pid: u16) -> bool {
    use super::constants as c;
    matches!(
        pid,
        c::PID_PARTICIPANT_LEASE_DURATION
            | c::PID_TIME_BASED_FILTER
            | c::PID_TOPIC_NAME
            | c::PID_OWNERSHIP_STRENGTH
            | c::PID_TYPE_NAME
            | c::PID_DOMAIN_ID
            | c::PID_PROTOCOL_VERSION
            | c::PID_VENDOR_ID
            | c::PID_RELIABILITY
            | c::PID_LIVELINESS
            | c::PID_DURABILITY
            | c::PID_DURABILITY_SERVICE
            | c::PID_OWNERSHIP
            | c::PID_PRESENTATION
            | c::PID_DEADLINE
            | c::PID_DESTINATION_ORDER
            | c::PID_LATENCY_BUDGET
            | c::PID_PARTITION
            | c::PID_LIFESPAN
            | c::PID_USER_DATA
            | c::PID_GROUP_DATA
            | c::PID_TOPIC_DATA
            | c::PID_UNICAST_LOCATOR
            | c::PID_MULTICAST_LOCATOR
            | c::PID_DEFAULT_UNICAST_LOCATOR
            | c::PID_METATRAFFIC_UNICAST_LOCATOR
            | c::PID_METATRAFFIC_MULTICAST_LOCATOR
            | c::PID_CONTENT_FILTER_PROPERTY
            | c::PID_EXPECTS_INLINE_QOS
            | c::PID_DEFAULT_MULTICAST_LOCATOR
            | c::PID_HISTORY
            | c::PID_RESOURCE_LIMITS
            | c::PID_PARTICIPANT_GUID
            | c::PID_GROUP_GUID
            | c::PID_BUILTIN_ENDPOINT_SET
            | c::PID_ENDPOINT_GUID
            | c::PID_KEY_HASH
            | c::PID_STATUS_INFO
            | c::PID_TYPE_CONSISTENCY
            | c::PID_TYPE_INFORMATION
            | c::PID_RELATED_SAMPLE_IDENTITY
            | c::PID_ENDPOINT_SECURITY_INFO
            | c::PID_PARTICIPANT_SECURITY_INFO
    )
}
