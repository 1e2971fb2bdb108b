// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Simple Participant Discovery Protocol.
//!
//! A stateless writer pushes DATA(p) to the well-known multicast locator on
//! the announcement timer; received DATA(p)s maintain the remote-participant
//! registry with a lease timer each. Lease expiry removes the participant
//! and every endpoint proxy that hangs off it.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;

use crate::config::{DiscoveryConfig, InitialAnnouncements};
use crate::core::cache_change::{ChangeKind, InstanceHandle, WriteParams};
use crate::core::guid::{Guid, GuidPrefix};
use crate::core::sequence_number::SequenceNumber;
use crate::protocol::constants::{STATUS_INFO_DISPOSED, STATUS_INFO_UNREGISTERED};
use crate::rtps::{SendOperation, StatelessWriter};
use crate::Result;

use super::data::ParticipantProxyData;

/// Duplicate-announcement suppression table size.
const SEEN_CACHE_CAPACITY: usize = 256;

/// One discovered remote participant.
pub struct DiscoveredParticipant {
    pub data: ParticipantProxyData,
    pub last_announcement: Instant,
}

impl DiscoveredParticipant {
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.data.lease_duration != Duration::MAX
            && now.duration_since(self.last_announcement) > self.data.lease_duration
    }
}

/// What a processed DATA(p) meant.
#[derive(Debug, PartialEq, Eq)]
pub enum PdpEvent {
    /// First announcement from this participant.
    Discovered(GuidPrefix),
    /// Refresh (lease renewed) or changed locators.
    Refreshed(GuidPrefix),
    /// Graceful dispose: unmatch everything now.
    Disposed(GuidPrefix),
    /// Duplicate or self announcement; nothing to do.
    Ignored,
}

/// Participant discovery state.
pub struct Pdp {
    local: ParticipantProxyData,
    announcer: Mutex<StatelessWriter>,
    remote: DashMap<GuidPrefix, DiscoveredParticipant>,
    /// (prefix, payload hash) of recently processed announcements.
    seen: Mutex<LruCache<GuidPrefix, u64>>,
    initial: InitialAnnouncements,
    announcements_sent: Mutex<u32>,
    announcement_period: Duration,
    announcement_seq: Mutex<Option<SequenceNumber>>,
}

impl Pdp {
    #[must_use]
    pub fn new(
        local: ParticipantProxyData,
        announcer: StatelessWriter,
        config: &DiscoveryConfig,
    ) -> Self {
        Pdp {
            local,
            announcer: Mutex::new(announcer),
            remote: DashMap::new(),
            seen: Mutex::new(LruCache::new(
                NonZeroUsize::new(SEEN_CACHE_CAPACITY).expect("capacity > 0"),
            )),
            initial: config.initial_announcements,
            announcements_sent: Mutex::new(0),
            announcement_period: config.announcement_period(),
            announcement_seq: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn local(&self) -> &ParticipantProxyData {
        &self.local
    }

    /// The delay until the next announcement: the initial burst uses
    /// `initial_announcements.period`, afterwards the lease-derived period.
    #[must_use]
    pub fn next_announcement_delay(&self) -> Duration {
        if *self.announcements_sent.lock() < self.initial.count {
            self.initial.period
        } else {
            self.announcement_period
        }
    }

    /// Emit (or re-emit) the DATA(p) announcement.
    pub fn announce(&self) -> Result<Vec<SendOperation>> {
        let mut writer = self.announcer.lock();
        let mut seq_guard = self.announcement_seq.lock();
        let ops = match *seq_guard {
            Some(seq) => writer.send_change(seq),
            None => {
                let payload = self.local.to_payload();
                let handle = participant_key(self.local.guid_prefix);
                let (seq, ops) =
                    writer.write(&payload, ChangeKind::Alive, handle, WriteParams::default())?;
                *seq_guard = Some(seq);
                ops
            }
        };
        *self.announcements_sent.lock() += 1;
        Ok(ops)
    }

    /// Announce graceful shutdown: DATA(p) disposed + unregistered.
    pub fn dispose(&self) -> Result<Vec<SendOperation>> {
        let mut writer = self.announcer.lock();
        let handle = participant_key(self.local.guid_prefix);
        let (_, ops) = writer.write(
            &[],
            ChangeKind::NotAliveDisposedUnregistered,
            handle,
            WriteParams::default(),
        )?;
        Ok(ops)
    }

    /// Process a received DATA(p) payload (or disposal).
    pub fn process_announcement(
        &self,
        payload: &[u8],
        status_info: u32,
        source_prefix: GuidPrefix,
    ) -> PdpEvent {
        if source_prefix == self.local.guid_prefix {
            return PdpEvent::Ignored;
        }

        if status_info & (STATUS_INFO_DISPOSED | STATUS_INFO_UNREGISTERED) != 0 {
            return if self.remote.remove(&source_prefix).is_some() {
                log::info!("[SPDP] participant {source_prefix:?} disposed");
                self.seen.lock().pop(&source_prefix);
                PdpEvent::Disposed(source_prefix)
            } else {
                PdpEvent::Ignored
            };
        }

        let data = match ParticipantProxyData::from_payload(payload) {
            Ok(data) => data,
            Err(e) => {
                // Discovery never fails fatally on foreign garbage.
                log::warn!("[SPDP] dropping unparseable DATA(p): {e}");
                return PdpEvent::Ignored;
            }
        };
        if data.guid_prefix == self.local.guid_prefix {
            return PdpEvent::Ignored;
        }
        if data.domain_id != self.local.domain_id {
            log::trace!("[SPDP] ignoring DATA(p) from domain {}", data.domain_id);
            return PdpEvent::Ignored;
        }

        let mut hasher = DefaultHasher::new();
        payload.hash(&mut hasher);
        let digest = hasher.finish();
        let repeat = self.seen.lock().put(data.guid_prefix, digest) == Some(digest);

        let prefix = data.guid_prefix;
        let existed = self.remote.contains_key(&prefix);
        self.remote.insert(
            prefix,
            DiscoveredParticipant {
                data,
                last_announcement: Instant::now(),
            },
        );

        if !existed {
            log::info!("[SPDP] discovered participant {prefix:?}");
            PdpEvent::Discovered(prefix)
        } else if repeat {
            // Same payload again: a lease renewal only.
            PdpEvent::Ignored
        } else {
            PdpEvent::Refreshed(prefix)
        }
    }

    /// Lease sweep: drop remote participants whose lease ran out.
    pub fn sweep_leases(&self, now: Instant) -> Vec<GuidPrefix> {
        let expired: Vec<GuidPrefix> = self
            .remote
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| *entry.key())
            .collect();
        for prefix in &expired {
            log::info!("[SPDP] lease expired for participant {prefix:?}");
            self.remote.remove(prefix);
            self.seen.lock().pop(prefix);
        }
        expired
    }

    #[must_use]
    pub fn lookup(&self, prefix: &GuidPrefix) -> Option<ParticipantProxyData> {
        self.remote.get(prefix).map(|e| e.data.clone())
    }

    #[must_use]
    pub fn remote_count(&self) -> usize {
        self.remote.len()
    }

    pub fn remote_prefixes(&self) -> Vec<GuidPrefix> {
        self.remote.iter().map(|e| *e.key()).collect()
    }

    /// Refresh the liveliness of a known participant (any traffic from it
    /// counts towards the lease).
    pub fn touch(&self, prefix: &GuidPrefix) {
        if let Some(mut entry) = self.remote.get_mut(prefix) {
            entry.last_announcement = Instant::now();
        }
    }
}

/// DATA(p) instance handle: the participant GUID as key hash.
fn participant_key(prefix: GuidPrefix) -> InstanceHandle {
    let guid = Guid::new(prefix, crate::core::guid::EntityId::PARTICIPANT);
    InstanceHandle(guid.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::EntityId;
    use crate::core::locator::Locator;
    use crate::history::{PayloadPool, WriterHistory};
    use crate::qos::{HistoryKind, MemoryPolicy, Qos, ResourceLimits};
    use crate::rtps::writer::WriterAttributes;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn local_data(prefix: u8) -> ParticipantProxyData {
        ParticipantProxyData {
            guid_prefix: GuidPrefix([prefix; 12]),
            protocol_version: (2, 3),
            vendor_id: [0x01, 0xf7],
            domain_id: 0,
            lease_duration: Duration::from_millis(50),
            available_builtin_endpoints: 0x3f,
            metatraffic_unicast: Vec::new(),
            metatraffic_multicast: Vec::new(),
            default_unicast: Vec::new(),
            default_multicast: Vec::new(),
            user_data: Vec::new(),
        }
    }

    fn pdp(prefix: u8) -> Pdp {
        let guid = Guid::new(GuidPrefix([prefix; 12]), EntityId::SPDP_WRITER);
        let pool = Arc::new(PayloadPool::new(MemoryPolicy::DynamicReusable, 0, 0, 64));
        let history = WriterHistory::new(
            guid,
            HistoryKind::KeepLast(1),
            ResourceLimits::default(),
            true,
            pool,
        );
        let attributes = WriterAttributes {
            guid,
            publish_mode: crate::config::PublishMode::Synchronous,
            topic_name: "DCPSParticipant".into(),
            type_name: "ParticipantProxyData".into(),
            qos: Qos::default(),
            heartbeat_period: Duration::from_secs(3),
            nack_response_delay: Duration::from_millis(5),
            fragment_size: 1344,
            max_message_size: 65_500,
            keyed: true,
        };
        let mut announcer = StatelessWriter::new(attributes, history);
        announcer.reader_locator_add(Locator::udpv4(Ipv4Addr::new(239, 255, 0, 1), 7400));
        Pdp::new(local_data(prefix), announcer, &DiscoveryConfig::default())
    }

    #[test]
    fn test_initial_announcement_burst_cadence() {
        let p = pdp(1);
        let initial = InitialAnnouncements::default();
        for _ in 0..initial.count {
            assert_eq!(p.next_announcement_delay(), initial.period);
            p.announce().unwrap();
        }
        assert_eq!(
            p.next_announcement_delay(),
            DiscoveryConfig::default().announcement_period()
        );
    }

    #[test]
    fn test_announce_produces_data_p() {
        let p = pdp(1);
        let ops = p.announce().unwrap();
        assert_eq!(ops.len(), 1);
        // Re-announce re-sends the same change.
        let again = p.announce().unwrap();
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn test_discovery_and_refresh() {
        let p = pdp(1);
        let remote = local_data(2);
        let payload = remote.to_payload();

        assert_eq!(
            p.process_announcement(&payload, 0, remote.guid_prefix),
            PdpEvent::Discovered(remote.guid_prefix)
        );
        // Identical payload again: lease renewal, no re-match churn.
        assert_eq!(
            p.process_announcement(&payload, 0, remote.guid_prefix),
            PdpEvent::Ignored
        );
        assert_eq!(p.remote_count(), 1);

        // Changed locators: refresh.
        let mut changed = remote.clone();
        changed.default_unicast = vec![Locator::udpv4(Ipv4Addr::new(10, 0, 0, 7), 7411)];
        assert_eq!(
            p.process_announcement(&changed.to_payload(), 0, changed.guid_prefix),
            PdpEvent::Refreshed(changed.guid_prefix)
        );
    }

    #[test]
    fn test_self_announcement_ignored() {
        let p = pdp(1);
        let payload = local_data(1).to_payload();
        assert_eq!(
            p.process_announcement(&payload, 0, GuidPrefix([1; 12])),
            PdpEvent::Ignored
        );
        assert_eq!(p.remote_count(), 0);
    }

    #[test]
    fn test_wrong_domain_ignored() {
        let p = pdp(1);
        let mut remote = local_data(2);
        remote.domain_id = 9;
        assert_eq!(
            p.process_announcement(&remote.to_payload(), 0, remote.guid_prefix),
            PdpEvent::Ignored
        );
    }

    #[test]
    fn test_dispose_removes_participant() {
        let p = pdp(1);
        let remote = local_data(2);
        p.process_announcement(&remote.to_payload(), 0, remote.guid_prefix);
        assert_eq!(p.remote_count(), 1);

        assert_eq!(
            p.process_announcement(&[], STATUS_INFO_DISPOSED, remote.guid_prefix),
            PdpEvent::Disposed(remote.guid_prefix)
        );
        assert_eq!(p.remote_count(), 0);
    }

    #[test]
    fn test_lease_expiry_sweep() {
        let p = pdp(1);
        let remote = local_data(2); // 50 ms lease
        p.process_announcement(&remote.to_payload(), 0, remote.guid_prefix);

        assert!(p.sweep_leases(Instant::now()).is_empty());
        std::thread::sleep(Duration::from_millis(80));
        let expired = p.sweep_leases(Instant::now());
        assert_eq!(expired, vec![remote.guid_prefix]);
        assert_eq!(p.remote_count(), 0);
    }

    #[test]
    fn test_garbage_payload_never_fatal() {
        let p = pdp(1);
        assert_eq!(
            p.process_announcement(&[0xff; 10], 0, GuidPrefix([7; 12])),
            PdpEvent::Ignored
        );
    }

    #[test]
    fn test_dispose_emits_status_data() {
        let p = pdp(1);
        let ops = p.dispose().unwrap();
        assert_eq!(ops.len(), 1);
    }
}
