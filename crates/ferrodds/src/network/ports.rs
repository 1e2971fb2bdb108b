// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! RTPS v2.3 well-known port mapping (Sec.9.6.1.1).
//!
//! `port = PB + DG * domain_id + offset + PG * participant_id` with
//! PB = 7400, DG = 250, PG = 2 and offsets d0-d3 selecting
//! {metatraffic multicast, metatraffic unicast, user multicast,
//! user unicast}.

use crate::config::{
    DOMAIN_ID_GAIN, OFFSET_METATRAFFIC_MULTICAST, OFFSET_METATRAFFIC_UNICAST,
    OFFSET_USER_MULTICAST, OFFSET_USER_UNICAST, PARTICIPANT_ID_GAIN, PORT_BASE,
};
use crate::{Error, Result};

/// Well-known ports for one participant in one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// SPDP multicast (d0), shared by every participant of the domain.
    pub metatraffic_multicast: u16,
    /// Discovery unicast (d1), unique per participant.
    pub metatraffic_unicast: u16,
    /// User-data multicast (d2).
    pub user_multicast: u16,
    /// User-data unicast (d3), unique per participant.
    pub user_unicast: u16,
}

impl PortMapping {
    /// Compute ports from domain and participant ids.
    pub fn calculate(domain_id: u32, participant_id: u32) -> Result<Self> {
        if domain_id >= 233 {
            return Err(Error::InvalidDomainId(domain_id));
        }
        if participant_id >= 120 {
            return Err(Error::InvalidParticipantId(participant_id));
        }

        let domain = domain_id as u16;
        let participant = participant_id as u16;
        let domain_base = PORT_BASE + DOMAIN_ID_GAIN * domain;
        let participant_gain = PARTICIPANT_ID_GAIN * participant;

        Ok(PortMapping {
            metatraffic_multicast: domain_base + OFFSET_METATRAFFIC_MULTICAST,
            metatraffic_unicast: domain_base + OFFSET_METATRAFFIC_UNICAST + participant_gain,
            user_multicast: domain_base + OFFSET_USER_MULTICAST,
            user_unicast: domain_base + OFFSET_USER_UNICAST + participant_gain,
        })
    }

    /// Probe participant ids until one with free unicast ports is found.
    /// The multicast ports are shared via reuse-address and never probed.
    pub fn auto_assign(domain_id: u32) -> Result<(Self, u32)> {
        for pid in 0..120u32 {
            let mapping = Self::calculate(domain_id, pid)?;
            if port_available(mapping.metatraffic_unicast) && port_available(mapping.user_unicast) {
                log::debug!(
                    "[PORTS] auto-assigned participant_id={pid} (meta={}, user={})",
                    mapping.metatraffic_unicast,
                    mapping.user_unicast
                );
                return Ok((mapping, pid));
            }
        }
        Err(Error::NoAvailableParticipantId)
    }
}

fn port_available(port: u16) -> bool {
    std::net::UdpSocket::bind(("0.0.0.0", port)).is_ok()
}
