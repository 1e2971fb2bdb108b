// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Runtime configuration and RTPS protocol constants.

use std::time::Duration;

use crate::core::guid::EntityId;
use crate::core::locator::Locator;
use crate::qos::{MemoryPolicy, Qos};

// ============================================================================
// RTPS CONSTANTS (OMG DDS-RTPS v2.3, Section 9.6.1.1)
// ============================================================================

/// Port base number (PB).
pub const PORT_BASE: u16 = 7400;
/// Domain id gain (DG).
pub const DOMAIN_ID_GAIN: u16 = 250;
/// Participant id gain (PG).
pub const PARTICIPANT_ID_GAIN: u16 = 2;
/// Additional offset d0: metatraffic multicast.
pub const OFFSET_METATRAFFIC_MULTICAST: u16 = 0;
/// Additional offset d1: metatraffic unicast.
pub const OFFSET_METATRAFFIC_UNICAST: u16 = 1;
/// Additional offset d2: user multicast.
pub const OFFSET_USER_MULTICAST: u16 = 10;
/// Additional offset d3: user unicast.
pub const OFFSET_USER_UNICAST: u16 = 11;

/// Well-known SPDP multicast group.
pub const DEFAULT_MULTICAST_GROUP: [u8; 4] = [239, 255, 0, 1];

/// Largest RTPS message this implementation emits (fits a UDP datagram).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 65_500;
/// Default payload bytes per DATA_FRAG fragment.
pub const DEFAULT_FRAGMENT_SIZE: u16 = 1_344;
/// Payloads above this travel as DATA_FRAG.
pub const DEFAULT_MAX_UNFRAGMENTED_SIZE: usize = 60 * 1024;

/// Default periodic HEARTBEAT interval for stateful writers.
pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_millis(100);
/// Default delay before answering a non-final HEARTBEAT with an ACKNACK.
pub const DEFAULT_HEARTBEAT_RESPONSE_DELAY: Duration = Duration::from_millis(5);
/// Default delay before a writer answers an ACKNACK with a HEARTBEAT.
pub const DEFAULT_NACK_RESPONSE_DELAY: Duration = Duration::from_millis(5);

/// Default remote-participant lease.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(20);

// ============================================================================
// DISCOVERY CONFIGURATION
// ============================================================================

/// Participant discovery mode.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum DiscoveryProtocol {
    /// SPDP multicast announcements plus SEDP endpoint exchange.
    #[default]
    Simple,
    /// Announce to configured servers only; servers relay.
    Client,
    /// Like Client but also receives the full graph from servers.
    SuperClient,
    /// Server side of discovery-server (out of scope; configuration only).
    Server,
    /// Server with persistence backup (out of scope; configuration only).
    Backup,
    /// Discovery disabled; only manually configured endpoints match.
    None,
}

/// Burst of early SPDP announcements for fast startup convergence.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct InitialAnnouncements {
    pub count: u32,
    pub period: Duration,
}

impl Default for InitialAnnouncements {
    fn default() -> Self {
        InitialAnnouncements {
            count: 5,
            period: Duration::from_millis(100),
        }
    }
}

/// Discovery behaviour of one participant.
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    pub protocol: DiscoveryProtocol,
    /// How long a remote participant stays alive without announcements.
    pub lease_duration: Duration,
    /// SPDP resend interval. `None` selects `lease_duration / 3`.
    pub lease_announcement_period: Option<Duration>,
    pub initial_announcements: InitialAnnouncements,
    /// Server locators for `Client`/`SuperClient` modes.
    pub servers: Vec<Locator>,
    /// Re-announce interval towards servers while unacknowledged.
    pub client_resync_period: Duration,
}

impl DiscoveryConfig {
    /// Effective SPDP resend interval.
    #[must_use]
    pub fn announcement_period(&self) -> Duration {
        self.lease_announcement_period
            .unwrap_or(self.lease_duration / 3)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            protocol: DiscoveryProtocol::Simple,
            lease_duration: DEFAULT_LEASE_DURATION,
            lease_announcement_period: None,
            initial_announcements: InitialAnnouncements::default(),
            servers: Vec::new(),
            client_resync_period: Duration::from_millis(500),
        }
    }
}

// ============================================================================
// PARTICIPANT CONFIGURATION
// ============================================================================

/// Configuration of one RTPS participant.
#[derive(Clone, Debug)]
pub struct ParticipantConfig {
    /// Selects the well-known port family.
    pub domain_id: u32,
    /// Per-host uniqueness; `None` probes for a free id.
    pub participant_id: Option<u32>,
    pub discovery: DiscoveryConfig,
    /// Opaque application metadata announced in DATA(p).
    pub user_data: Vec<u8>,
    /// Register the built-in UDPv4 transport.
    pub use_builtin_transports: bool,
    /// Addresses (with netmasks) by which this participant is reachable from
    /// outside its subnet, grouped by externality rank.
    pub external_locators: Vec<crate::network::external_locators::ExternalLocatorEntry>,
    pub memory_policy: MemoryPolicy,
    pub max_message_size: usize,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        ParticipantConfig {
            domain_id: 0,
            participant_id: None,
            discovery: DiscoveryConfig::default(),
            user_data: Vec::new(),
            use_builtin_transports: true,
            external_locators: Vec::new(),
            memory_policy: MemoryPolicy::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ParticipantConfig {
    #[must_use]
    pub fn with_domain(domain_id: u32) -> Self {
        ParticipantConfig {
            domain_id,
            ..ParticipantConfig::default()
        }
    }
}

// ============================================================================
// ENDPOINT CONFIGURATION
// ============================================================================

/// Publish path selection for a writer.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PublishMode {
    /// Send inline on `add_change`.
    #[default]
    Synchronous,
    /// Queue changes for the writer's flush thread.
    Asynchronous,
}

/// Configuration of one local writer.
#[derive(Clone, Debug)]
pub struct WriterConfig {
    pub topic_name: String,
    pub type_name: String,
    pub qos: Qos,
    /// Explicit entity id; `None` auto-allocates with the topic-kind nibble.
    pub entity_id: Option<EntityId>,
    pub publish_mode: PublishMode,
    /// Periodic HEARTBEAT interval.
    pub heartbeat_period: Duration,
    pub nack_response_delay: Duration,
    pub fragment_size: u16,
    /// Keyed topics get per-instance history bookkeeping.
    pub keyed: bool,
}

impl WriterConfig {
    #[must_use]
    pub fn new(topic_name: &str, type_name: &str, qos: Qos) -> Self {
        WriterConfig {
            topic_name: topic_name.to_string(),
            type_name: type_name.to_string(),
            qos,
            entity_id: None,
            publish_mode: PublishMode::Synchronous,
            heartbeat_period: DEFAULT_HEARTBEAT_PERIOD,
            nack_response_delay: DEFAULT_NACK_RESPONSE_DELAY,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            keyed: false,
        }
    }

    /// RELIABLE writer with otherwise default QoS.
    #[must_use]
    pub fn reliable(topic_name: &str, type_name: &str) -> Self {
        let mut qos = Qos::default();
        qos.reliability = crate::qos::ReliabilityKind::Reliable;
        Self::new(topic_name, type_name, qos)
    }
}

/// Configuration of one local reader.
#[derive(Clone, Debug)]
pub struct ReaderConfig {
    pub topic_name: String,
    pub type_name: String,
    pub qos: Qos,
    pub entity_id: Option<EntityId>,
    /// Delay before answering a non-final HEARTBEAT (jittered).
    pub heartbeat_response_delay: Duration,
    pub keyed: bool,
    /// Ask writers to attach inline QoS to DATA.
    pub expects_inline_qos: bool,
}

impl ReaderConfig {
    #[must_use]
    pub fn new(topic_name: &str, type_name: &str, qos: Qos) -> Self {
        ReaderConfig {
            topic_name: topic_name.to_string(),
            type_name: type_name.to_string(),
            qos,
            entity_id: None,
            heartbeat_response_delay: DEFAULT_HEARTBEAT_RESPONSE_DELAY,
            keyed: false,
            expects_inline_qos: false,
        }
    }

    #[must_use]
    pub fn reliable(topic_name: &str, type_name: &str) -> Self {
        let mut qos = Qos::default();
        qos.reliability = crate::qos::ReliabilityKind::Reliable;
        Self::new(topic_name, type_name, qos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_announcement_period_defaults_to_third_of_lease() {
        let cfg = DiscoveryConfig {
            lease_duration: Duration::from_secs(30),
            ..DiscoveryConfig::default()
        };
        assert_eq!(cfg.announcement_period(), Duration::from_secs(10));
    }

    #[test]
    fn test_explicit_announcement_period_wins() {
        let cfg = DiscoveryConfig {
            lease_duration: Duration::from_secs(30),
            lease_announcement_period: Some(Duration::from_secs(2)),
            ..DiscoveryConfig::default()
        };
        assert_eq!(cfg.announcement_period(), Duration::from_secs(2));
    }
}
