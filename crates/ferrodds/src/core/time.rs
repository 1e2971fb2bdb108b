// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! RTPS Time_t: seconds plus a 2^-32 fractional part (RTPS 2.3 Section 9.3.2).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wire timestamp carried by INFO_TS and stamped onto cache changes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct RtpsTime {
    pub seconds: i32,
    pub fraction: u32,
}

impl RtpsTime {
    /// TIME_INVALID sentinel (0xffffffff / 0xffffffff).
    pub const INVALID: RtpsTime = RtpsTime {
        seconds: -1,
        fraction: 0xffff_ffff,
    };
    /// TIME_INFINITE (0x7fffffff seconds, max fraction).
    pub const INFINITE: RtpsTime = RtpsTime {
        seconds: i32::MAX,
        fraction: 0xffff_ffff,
    };
    pub const ZERO: RtpsTime = RtpsTime {
        seconds: 0,
        fraction: 0,
    };

    /// Current wall-clock time in RTPS representation.
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_duration_since_epoch(since_epoch)
    }

    #[must_use]
    pub fn from_duration_since_epoch(d: Duration) -> Self {
        // fraction = nanos * 2^32 / 1e9, computed in u64 to avoid overflow
        let fraction = ((u64::from(d.subsec_nanos()) << 32) / 1_000_000_000) as u32;
        RtpsTime {
            seconds: d.as_secs() as i32,
            fraction,
        }
    }

    /// Convert an RTPS duration value to a std `Duration`. `INFINITE` maps to
    /// `Duration::MAX`.
    #[must_use]
    pub fn to_duration(self) -> Duration {
        if self == Self::INFINITE {
            return Duration::MAX;
        }
        let nanos = ((u64::from(self.fraction) * 1_000_000_000) >> 32) as u32;
        Duration::new(self.seconds.max(0) as u64, nanos)
    }

    #[must_use]
    pub fn from_std_duration(d: Duration) -> Self {
        if d == Duration::MAX {
            return Self::INFINITE;
        }
        Self::from_duration_since_epoch(d)
    }

    #[must_use]
    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }

    /// Encode as 8 wire bytes in the requested endianness.
    pub fn encode(self, out: &mut Vec<u8>, little_endian: bool) {
        if little_endian {
            out.extend_from_slice(&self.seconds.to_le_bytes());
            out.extend_from_slice(&self.fraction.to_le_bytes());
        } else {
            out.extend_from_slice(&self.seconds.to_be_bytes());
            out.extend_from_slice(&self.fraction.to_be_bytes());
        }
    }

    /// Decode from 8 wire bytes.
    #[must_use]
    pub fn decode(bytes: &[u8], little_endian: bool) -> Option<Self> {
        if bytes.len() < 8 {
            return None;
        }
        let s = [bytes[0], bytes[1], bytes[2], bytes[3]];
        let f = [bytes[4], bytes[5], bytes[6], bytes[7]];
        Some(if little_endian {
            RtpsTime {
                seconds: i32::from_le_bytes(s),
                fraction: u32::from_le_bytes(f),
            }
        } else {
            RtpsTime {
                seconds: i32::from_be_bytes(s),
                fraction: u32::from_be_bytes(f),
            }
        })
    }
}
