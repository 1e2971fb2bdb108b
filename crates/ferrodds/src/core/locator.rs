// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Transport-level addresses (RTPS 2.3 Section 8.2.1.1 / 9.3.2).
//!
//! A locator is `{ kind: i32, port: u32, address: [u8; 16] }`, 24 bytes on
//! the wire with kind and port little-endian inside parameter lists. IPv4
//! addresses occupy the last four address octets.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Locator kind discriminants.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(i32)]
pub enum LocatorKind {
    Invalid = -1,
    Reserved = 0,
    Udpv4 = 1,
    Udpv6 = 2,
    Tcpv4 = 4,
    Tcpv6 = 8,
    /// Shared memory; 16 plus the SHM mapping major version.
    Shm = 16,
}

impl LocatorKind {
    #[must_use]
    pub fn from_i32(v: i32) -> LocatorKind {
        match v {
            1 => LocatorKind::Udpv4,
            2 => LocatorKind::Udpv6,
            4 => LocatorKind::Tcpv4,
            8 => LocatorKind::Tcpv6,
            v if v >= 16 => LocatorKind::Shm,
            0 => LocatorKind::Reserved,
            _ => LocatorKind::Invalid,
        }
    }
}

/// Serialized locator size on the wire.
pub const LOCATOR_WIRE_SIZE: usize = 24;

/// A transport endpoint address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locator {
    pub kind: i32,
    pub port: u32,
    pub address: [u8; 16],
}

impl Locator {
    /// The invalid locator sentinel.
    pub const INVALID: Locator = Locator {
        kind: LocatorKind::Invalid as i32,
        port: 0,
        address: [0; 16],
    };

    #[must_use]
    pub fn new(kind: LocatorKind, port: u32, address: [u8; 16]) -> Self {
        Locator {
            kind: kind as i32,
            port,
            address,
        }
    }

    /// UDPv4 locator from an IPv4 address and port.
    #[must_use]
    pub fn udpv4(ip: Ipv4Addr, port: u16) -> Self {
        let mut address = [0u8; 16];
        address[12..].copy_from_slice(&ip.octets());
        Locator {
            kind: LocatorKind::Udpv4 as i32,
            port: u32::from(port),
            address,
        }
    }

    /// UDPv6 locator from an IPv6 address and port.
    #[must_use]
    pub fn udpv6(ip: Ipv6Addr, port: u16) -> Self {
        Locator {
            kind: LocatorKind::Udpv6 as i32,
            port: u32::from(port),
            address: ip.octets(),
        }
    }

    /// Convert a socket address into the matching UDP locator.
    #[must_use]
    pub fn from_udp_socket_addr(addr: SocketAddr) -> Self {
        match addr.ip() {
            IpAddr::V4(ip) => Locator::udpv4(ip, addr.port()),
            IpAddr::V6(ip) => Locator::udpv6(ip, addr.port()),
        }
    }

    /// Socket address for UDP locators; `None` for other kinds or a port
    /// that does not fit in 16 bits.
    #[must_use]
    pub fn to_udp_socket_addr(&self) -> Option<SocketAddr> {
        let port = u16::try_from(self.port).ok()?;
        match LocatorKind::from_i32(self.kind) {
            LocatorKind::Udpv4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.address[12..]);
                Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
            }
            LocatorKind::Udpv6 => Some(SocketAddr::new(
                IpAddr::V6(Ipv6Addr::from(self.address)),
                port,
            )),
            _ => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> LocatorKind {
        LocatorKind::from_i32(self.kind)
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.kind > 0 && self.port > 0
    }

    /// True for multicast addresses (UDPv4 224/4, UDPv6 ff00::/8).
    #[must_use]
    pub fn is_multicast(&self) -> bool {
        match LocatorKind::from_i32(self.kind) {
            LocatorKind::Udpv4 => (224..=239).contains(&self.address[12]),
            LocatorKind::Udpv6 => self.address[0] == 0xff,
            _ => false,
        }
    }

    /// IPv4 loopback or IPv6 ::1.
    #[must_use]
    pub fn is_loopback(&self) -> bool {
        match LocatorKind::from_i32(self.kind) {
            LocatorKind::Udpv4 => self.address[12] == 127,
            LocatorKind::Udpv6 => Ipv6Addr::from(self.address).is_loopback(),
            LocatorKind::Shm => true,
            _ => false,
        }
    }

    /// Serialize to the 24-byte wire form (kind and port little-endian).
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.kind.to_le_bytes());
        out.extend_from_slice(&self.port.to_le_bytes());
        out.extend_from_slice(&self.address);
    }

    /// Parse from the 24-byte wire form.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < LOCATOR_WIRE_SIZE {
            return None;
        }
        let kind = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let port = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let mut address = [0u8; 16];
        address.copy_from_slice(&bytes[8..24]);
        Some(Locator {
            kind,
            port,
            address,
        })
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_udp_socket_addr() {
            Some(addr) => write!(f, "{:?}:{addr}", self.kind()),
            None => write!(f, "{:?}:port={}", self.kind(), self.port),
        }
    }
}

/// Ordered list of locators with first-match-wins duplicate suppression.
pub type LocatorList = Vec<Locator>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udpv4_socket_addr_roundtrip() {
        let addr: SocketAddr = "192.168.1.42:7411".parse().unwrap();
        let loc = Locator::from_udp_socket_addr(addr);
        assert_eq!(loc.kind(), LocatorKind::Udpv4);
        assert_eq!(loc.to_udp_socket_addr(), Some(addr));
    }

    #[test]
    fn test_wire_roundtrip() {
        let loc = Locator::udpv4(Ipv4Addr::new(239, 255, 0, 1), 7400);
        let mut buf = Vec::new();
        loc.encode(&mut buf);
        assert_eq!(buf.len(), LOCATOR_WIRE_SIZE);
        assert_eq!(Locator::decode(&buf), Some(loc));
    }

    #[test]
    fn test_multicast_detection() {
        assert!(Locator::udpv4(Ipv4Addr::new(239, 255, 0, 1), 7400).is_multicast());
        assert!(!Locator::udpv4(Ipv4Addr::new(192, 168, 0, 1), 7400).is_multicast());
        assert!(Locator::udpv6("ff02::1".parse().unwrap(), 7400).is_multicast());
    }

    #[test]
    fn test_decode_truncated_fails() {
        assert!(Locator::decode(&[0u8; 23]).is_none());
    }

    #[test]
    fn test_shm_kind_includes_version() {
        assert_eq!(LocatorKind::from_i32(16), LocatorKind::Shm);
        assert_eq!(LocatorKind::from_i32(17), LocatorKind::Shm);
    }
}
