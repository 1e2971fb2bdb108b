// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! QoS policy types consumed by the RTPS core.
//!
//! Only the policies that shape protocol behaviour or matching live here;
//! presentation-layer policies the core merely transports (user/topic/group
//! data) are opaque byte blobs.

pub mod partition;

pub use partition::Partition;

use std::time::Duration;

/// Sentinel for unlimited resource-limit entries.
pub const LENGTH_UNLIMITED: usize = usize::MAX;

/// Whether delivery is retransmitted on loss.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ReliabilityKind {
    #[default]
    BestEffort,
    Reliable,
}

/// Whether past samples are retained for late-joining readers.
/// Ordered: each kind satisfies all kinds below it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub enum DurabilityKind {
    #[default]
    Volatile,
    TransientLocal,
    Transient,
    Persistent,
}

/// History retention policy.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HistoryKind {
    /// Keep the newest `depth` changes per instance.
    KeepLast(u32),
    /// Keep everything until resource limits push back.
    KeepAll,
}

impl Default for HistoryKind {
    fn default() -> Self {
        HistoryKind::KeepLast(1)
    }
}

impl HistoryKind {
    /// KEEP_LAST depth; `None` for KEEP_ALL.
    #[must_use]
    pub fn depth(&self) -> Option<u32> {
        match self {
            HistoryKind::KeepLast(d) => Some(*d),
            HistoryKind::KeepAll => None,
        }
    }
}

/// Hard caps on history occupancy.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ResourceLimits {
    pub max_samples: usize,
    pub max_instances: usize,
    pub max_samples_per_instance: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits {
            max_samples: LENGTH_UNLIMITED,
            max_instances: LENGTH_UNLIMITED,
            max_samples_per_instance: LENGTH_UNLIMITED,
        }
    }
}

/// Protocol-level writer-aliveness policy.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub enum LivelinessKind {
    #[default]
    Automatic,
    ManualByParticipant,
    ManualByTopic,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Liveliness {
    pub kind: LivelinessKind,
    pub lease_duration: Duration,
    pub announcement_period: Duration,
}

impl Default for Liveliness {
    fn default() -> Self {
        Liveliness {
            kind: LivelinessKind::Automatic,
            lease_duration: Duration::MAX,
            announcement_period: Duration::MAX,
        }
    }
}

/// Writer arbitration policy for keyed instances.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum OwnershipKind {
    #[default]
    Shared,
    Exclusive,
}

/// Which timestamp orders samples at the reader.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub enum DestinationOrderKind {
    #[default]
    ByReceptionTimestamp,
    BySourceTimestamp,
}

/// Presentation access scope (carried and matched, coherent GROUP access is
/// not implemented).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub enum PresentationAccessScope {
    #[default]
    Instance,
    Topic,
    Group,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Presentation {
    pub access_scope: PresentationAccessScope,
    pub coherent_access: bool,
    pub ordered_access: bool,
}

/// Type-consistency enforcement for assignability checks.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum TypeConsistencyKind {
    Exact,
    #[default]
    Declared,
    Assignable,
}

/// Pool behaviour for payload and change allocation.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum MemoryPolicy {
    /// Fixed-size slots allocated up front; oversize payloads rejected.
    Preallocated,
    /// Slots allocated up front, grown when a payload exceeds the slot.
    #[default]
    PreallocatedWithRealloc,
    /// Nothing allocated up front, every allocation exact-fit.
    DynamicReserve,
    /// Exact-fit allocations kept for reuse after release.
    DynamicReusable,
}

/// Identifiers reported through `last_policy_id` on incompatible-QoS
/// statuses (DDS v1.4 Section 2.2.3 policy ids).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum PolicyId {
    Invalid = 0,
    UserData = 1,
    Durability = 2,
    Presentation = 3,
    Deadline = 4,
    LatencyBudget = 5,
    Ownership = 6,
    OwnershipStrength = 7,
    Liveliness = 8,
    Partition = 10,
    Reliability = 11,
    DestinationOrder = 12,
    History = 13,
    ResourceLimits = 14,
    TopicData = 18,
    GroupData = 19,
    Lifespan = 21,
}

/// Full policy set attached to one endpoint.
///
/// Writer-only fields (`ownership_strength`) are ignored on readers.
#[derive(Clone, Debug)]
pub struct Qos {
    pub reliability: ReliabilityKind,
    /// Bound on blocked RELIABLE writes against a full KEEP_ALL history.
    pub max_blocking_time: Duration,
    pub durability: DurabilityKind,
    pub history: HistoryKind,
    pub resource_limits: ResourceLimits,
    pub deadline_period: Duration,
    pub latency_budget: Duration,
    pub lifespan: Duration,
    pub liveliness: Liveliness,
    pub ownership: OwnershipKind,
    pub ownership_strength: u32,
    pub destination_order: DestinationOrderKind,
    pub presentation: Presentation,
    pub partition: Partition,
    pub type_consistency: TypeConsistencyKind,
    pub user_data: Vec<u8>,
    pub topic_data: Vec<u8>,
    pub group_data: Vec<u8>,
}

impl Default for Qos {
    fn default() -> Self {
        Qos {
            reliability: ReliabilityKind::BestEffort,
            max_blocking_time: Duration::from_millis(100),
            durability: DurabilityKind::Volatile,
            history: HistoryKind::default(),
            resource_limits: ResourceLimits::default(),
            deadline_period: Duration::MAX,
            latency_budget: Duration::ZERO,
            lifespan: Duration::MAX,
            liveliness: Liveliness::default(),
            ownership: OwnershipKind::Shared,
            ownership_strength: 0,
            destination_order: DestinationOrderKind::ByReceptionTimestamp,
            presentation: Presentation::default(),
            partition: Partition::default(),
            type_consistency: TypeConsistencyKind::default(),
            user_data: Vec::new(),
            topic_data: Vec::new(),
            group_data: Vec::new(),
        }
    }
}

impl Qos {
    /// RELIABLE + TRANSIENT_LOCAL + KEEP_ALL, the usual state-topic profile.
    #[must_use]
    pub fn reliable_transient_local() -> Self {
        Qos {
            reliability: ReliabilityKind::Reliable,
            durability: DurabilityKind::TransientLocal,
            history: HistoryKind::KeepAll,
            ..Qos::default()
        }
    }

    /// Validate internally consistent policy values.
    pub fn validate(&self) -> crate::Result<()> {
        if let HistoryKind::KeepLast(0) = self.history {
            return Err(crate::Error::InvalidQos("KEEP_LAST depth must be >= 1"));
        }
        if let HistoryKind::KeepLast(depth) = self.history {
            if self.resource_limits.max_samples_per_instance != LENGTH_UNLIMITED
                && (depth as usize) > self.resource_limits.max_samples_per_instance
            {
                return Err(crate::Error::InvalidQos(
                    "KEEP_LAST depth exceeds max_samples_per_instance",
                ));
            }
        }
        Ok(())
    }
}
