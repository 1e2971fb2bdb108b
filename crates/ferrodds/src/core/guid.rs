// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! GUIDs and entity identifiers (RTPS 2.3 Section 8.2.4).
//!
//! A GUID is a 12-byte participant prefix plus a 4-byte entity id. The last
//! octet of the entity id encodes the entity kind (builtin vs user, writer vs
//! reader, keyed vs unkeyed).

use std::fmt;

/// Length of a GUID prefix in bytes.
pub const GUID_PREFIX_LEN: usize = 12;

/// 12-byte participant prefix, unique per participant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GuidPrefix(pub [u8; GUID_PREFIX_LEN]);

impl GuidPrefix {
    /// The unknown prefix (all zeros). Used by INFO_DST to address everyone.
    pub const UNKNOWN: GuidPrefix = GuidPrefix([0; GUID_PREFIX_LEN]);

    /// Generate a prefix from host, process, and participant identity plus
    /// entropy. Two participants on the same host never collide because the
    /// participant counter differs; across hosts the host id differs.
    #[must_use]
    pub fn generate(host_id: u32, participant_id: u32) -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let pid = std::process::id();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);

        let mut prefix = [0u8; GUID_PREFIX_LEN];
        prefix[0..4].copy_from_slice(&host_id.to_be_bytes());
        prefix[4..8].copy_from_slice(&pid.to_be_bytes());
        prefix[8..10].copy_from_slice(&(participant_id as u16).to_be_bytes());
        prefix[10..12].copy_from_slice(&(nanos as u16).to_be_bytes());
        GuidPrefix(prefix)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; GUID_PREFIX_LEN] {
        &self.0
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl fmt::Debug for GuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 && i % 4 == 0 {
                write!(f, ".")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

// ============================================================================
// ENTITY ID
// ============================================================================

/// Entity kind octet values (RTPS 2.3 Table 9.1).
pub mod entity_kind {
    /// Built-in entity flag bit.
    pub const BUILTIN: u8 = 0xc0;
    /// Unknown entity.
    pub const UNKNOWN: u8 = 0x00;
    /// Participant.
    pub const PARTICIPANT: u8 = 0x01;
    /// User-defined writer with key.
    pub const WRITER_WITH_KEY: u8 = 0x02;
    /// User-defined writer without key.
    pub const WRITER_NO_KEY: u8 = 0x03;
    /// User-defined reader without key.
    pub const READER_NO_KEY: u8 = 0x04;
    /// User-defined reader with key.
    pub const READER_WITH_KEY: u8 = 0x07;
    /// Built-in writer with key.
    pub const BUILTIN_WRITER_WITH_KEY: u8 = 0xc2;
    /// Built-in reader with key.
    pub const BUILTIN_READER_WITH_KEY: u8 = 0xc7;
}

/// 4-byte entity identifier: 3 key octets plus a kind octet.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EntityId(pub [u8; 4]);

impl EntityId {
    /// Unknown entity (e.g. DATA addressed to all readers of a writer).
    pub const UNKNOWN: EntityId = EntityId([0, 0, 0, 0]);
    /// The participant itself.
    pub const PARTICIPANT: EntityId = EntityId([0, 0, 1, 0xc1]);

    // Built-in discovery endpoints (RTPS 2.3 Section 8.5.4.2).
    pub const SPDP_WRITER: EntityId = EntityId([0, 1, 0, 0xc2]);
    pub const SPDP_READER: EntityId = EntityId([0, 1, 0, 0xc7]);
    pub const SEDP_PUBLICATIONS_WRITER: EntityId = EntityId([0, 0, 3, 0xc2]);
    pub const SEDP_PUBLICATIONS_READER: EntityId = EntityId([0, 0, 3, 0xc7]);
    pub const SEDP_SUBSCRIPTIONS_WRITER: EntityId = EntityId([0, 0, 4, 0xc2]);
    pub const SEDP_SUBSCRIPTIONS_READER: EntityId = EntityId([0, 0, 4, 0xc7]);
    pub const PARTICIPANT_MESSAGE_WRITER: EntityId = EntityId([0, 2, 0, 0xc2]);
    pub const PARTICIPANT_MESSAGE_READER: EntityId = EntityId([0, 2, 0, 0xc7]);

    /// Build a user entity id from a 24-bit key and a kind octet.
    #[must_use]
    pub fn user(key: u32, kind: u8) -> Self {
        let k = key.to_be_bytes();
        EntityId([k[1], k[2], k[3], kind])
    }

    /// Entity kind octet.
    #[must_use]
    pub fn kind(&self) -> u8 {
        self.0[3]
    }

    /// True for built-in (discovery) entities.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.kind() & entity_kind::BUILTIN == entity_kind::BUILTIN
    }

    /// True when the kind octet names a writer.
    #[must_use]
    pub fn is_writer(&self) -> bool {
        matches!(
            self.kind() & 0x0f,
            0x02 | 0x03
        )
    }

    /// True when the kind octet names a reader.
    #[must_use]
    pub fn is_reader(&self) -> bool {
        matches!(self.kind() & 0x0f, 0x04 | 0x07)
    }

    /// True when the entity's topic is keyed.
    #[must_use]
    pub fn has_key(&self) -> bool {
        matches!(self.kind() & 0x0f, 0x02 | 0x07)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}.{:02x}.{:02x}.{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

// ============================================================================
// GUID
// ============================================================================

/// Globally unique identifier of a participant or endpoint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Guid {
    pub prefix: GuidPrefix,
    pub entity_id: EntityId,
}

impl Guid {
    /// The unknown GUID.
    pub const UNKNOWN: Guid = Guid {
        prefix: GuidPrefix::UNKNOWN,
        entity_id: EntityId::UNKNOWN,
    };

    #[must_use]
    pub fn new(prefix: GuidPrefix, entity_id: EntityId) -> Self {
        Guid { prefix, entity_id }
    }

    /// Parse from 16 wire bytes (prefix then entity id).
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut prefix = [0u8; GUID_PREFIX_LEN];
        prefix.copy_from_slice(&bytes[..GUID_PREFIX_LEN]);
        let mut eid = [0u8; 4];
        eid.copy_from_slice(&bytes[GUID_PREFIX_LEN..]);
        Guid {
            prefix: GuidPrefix(prefix),
            entity_id: EntityId(eid),
        }
    }

    /// Serialize to 16 wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..GUID_PREFIX_LEN].copy_from_slice(&self.prefix.0);
        out[GUID_PREFIX_LEN..].copy_from_slice(&self.entity_id.0);
        out
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}|{:?}", self.prefix, self.entity_id)
    }
}
