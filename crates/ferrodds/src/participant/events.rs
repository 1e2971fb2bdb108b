// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Status-change events.
//!
//! The core never invokes listeners inside network callbacks: status
//! changes are posted onto a per-participant channel and the application
//! adapter drains it off the network thread, which removes the re-entrancy
//! hazards of synchronous listener dispatch.

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::core::cache_change::InstanceHandle;
use crate::core::guid::{Guid, GuidPrefix};
use crate::history::SampleRejectedReason;
use crate::qos::PolicyId;

/// Why a remote participant left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParticipantRemovalReason {
    LeaseExpired,
    Disposed,
}

/// One status change, as surfaced to the application adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusEvent {
    ParticipantDiscovered {
        prefix: GuidPrefix,
    },
    ParticipantRemoved {
        prefix: GuidPrefix,
        reason: ParticipantRemovalReason,
    },
    PublicationMatched {
        writer: Guid,
        remote_reader: Guid,
        current_count_change: i32,
    },
    SubscriptionMatched {
        reader: Guid,
        remote_writer: Guid,
        current_count_change: i32,
    },
    OfferedIncompatibleQos {
        writer: Guid,
        last_policy_id: PolicyId,
    },
    RequestedIncompatibleQos {
        reader: Guid,
        last_policy_id: PolicyId,
    },
    DataAvailable {
        reader: Guid,
    },
    SampleRejected {
        reader: Guid,
        reason: SampleRejectedReason,
    },
    SampleLost {
        reader: Guid,
        count: u64,
    },
    LivelinessChanged {
        reader: Guid,
        writer: Guid,
        alive: bool,
    },
    LivelinessLost {
        writer: Guid,
    },
    OwnershipChanged {
        reader: Guid,
        instance: InstanceHandle,
        current_owner: Guid,
    },
    RequestedDeadlineMissed {
        reader: Guid,
        instance: InstanceHandle,
    },
}

/// The per-participant status channel.
pub struct StatusEvents {
    tx: Sender<StatusEvent>,
    rx: Receiver<StatusEvent>,
}

impl Default for StatusEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusEvents {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        StatusEvents { tx, rx }
    }

    /// Sender handle for the core side.
    #[must_use]
    pub fn sender(&self) -> Sender<StatusEvent> {
        self.tx.clone()
    }

    /// Non-blocking drain.
    #[must_use]
    pub fn try_next(&self) -> Option<StatusEvent> {
        self.rx.try_recv().ok()
    }

    /// Blocking receive with deadline.
    #[must_use]
    pub fn next_timeout(&self, timeout: Duration) -> Option<StatusEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drain everything currently queued.
    #[must_use]
    pub fn drain(&self) -> Vec<StatusEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::EntityId;

    #[test]
    fn test_post_and_drain() {
        let events = StatusEvents::new();
        let tx = events.sender();
        tx.send(StatusEvent::ParticipantDiscovered {
            prefix: GuidPrefix([1; 12]),
        })
        .unwrap();
        tx.send(StatusEvent::DataAvailable {
            reader: Guid::new(GuidPrefix([2; 12]), EntityId::user(1, 0x07)),
        })
        .unwrap();

        let drained = events.drain();
        assert_eq!(drained.len(), 2);
        assert!(events.try_next().is_none());
    }

    #[test]
    fn test_timeout_returns_none() {
        let events = StatusEvents::new();
        assert!(events.next_timeout(Duration::from_millis(10)).is_none());
    }
}
