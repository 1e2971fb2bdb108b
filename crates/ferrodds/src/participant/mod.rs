// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! The participant core: owns transports, endpoints, discovery, and the
//! timer service; demultiplexes incoming messages to endpoints by GUID.
//!
//! Locking discipline: one mutex per endpoint guards its history and
//! proxies; the remote-participant map is concurrent. No lock is held
//! across transport sends: state machines return [`SendOperation`]s and
//! the participant emits them after every endpoint lock is released.

pub mod demux;
pub mod events;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::config::{DiscoveryProtocol, ParticipantConfig, ReaderConfig, WriterConfig};
use crate::core::cache_change::{CacheChange, ChangeKind, InstanceHandle, WriteParams};
use crate::core::guid::{entity_kind, EntityId, Guid, GuidPrefix};
use crate::core::locator::Locator;
use crate::core::sequence_number::SequenceNumber;
use crate::core::time::RtpsTime;
use crate::discovery::data::{ParticipantProxyData, ReaderProxyData, WriterProxyData};
use crate::discovery::{DiscoveryServerClient, Edp, EdpEvent, Pdp};
use crate::event::TimerService;
use crate::history::{PayloadPool, ReaderHistory, WriterHistory};
use crate::matching::{check_match, MatchCandidate, MatchingOutcome};
use crate::network::external_locators::ExternalLocatorsProcessor;
use crate::network::ports::PortMapping;
use crate::persistence::PersistenceService;
use crate::protocol::constants::{
    BUILTIN_ENDPOINT_SET_DEFAULT, RTPS_VERSION_MAJOR, RTPS_VERSION_MINOR, VENDOR_ID,
};
use crate::protocol::MessageReceiver;
use crate::qos::{DurabilityKind, HistoryKind, ReliabilityKind};
use crate::rtps::reader::ReaderAttributes;
use crate::rtps::writer::WriterAttributes;
use crate::rtps::{
    MatchedReader, MatchedWriter, ReaderEvent, SendOperation, StatefulReader, StatefulWriter,
    StatelessWriter,
};
use crate::transport::{TransportPlugin, TransportRegistry, UdpTransport};
use crate::{Error, Result};

use events::{ParticipantRemovalReason, StatusEvent, StatusEvents};

/// Payload pool slot size for preallocated policies.
const POOL_SLOT_SIZE: usize = 64 * 1024;
/// Payload buffers per endpoint pool.
const POOL_MAX_BUFFERS: usize = 4096;
/// Lease sweep cadence.
const LEASE_SWEEP_PERIOD: Duration = Duration::from_secs(1);
/// Reader timer sweep cadence (liveliness, deadline, lifespan).
const READER_SWEEP_PERIOD: Duration = Duration::from_millis(100);
/// Asynchronous publish-mode flush cadence.
const ASYNC_FLUSH_PERIOD: Duration = Duration::from_millis(2);

pub(crate) struct ParticipantInner {
    config: ParticipantConfig,
    guid_prefix: GuidPrefix,
    timer: Arc<TimerService>,
    transports: TransportRegistry,
    events: StatusEvents,
    pdp: Pdp,
    edp: Edp,
    ds_client: Option<DiscoveryServerClient>,
    writers: DashMap<EntityId, Arc<Mutex<StatefulWriter>>>,
    readers: DashMap<EntityId, Arc<Mutex<StatefulReader>>>,
    local_writer_data: DashMap<EntityId, WriterProxyData>,
    local_reader_data: DashMap<EntityId, ReaderProxyData>,
    remote_writers: DashMap<Guid, WriterProxyData>,
    remote_readers: DashMap<Guid, ReaderProxyData>,
    entity_counter: AtomicU32,
    externality: Arc<ExternalLocatorsProcessor>,
    persistence: Mutex<Option<Arc<dyn PersistenceService>>>,
    default_unicast: Vec<Locator>,
    /// Bumped on DataAvailable; `wait_for_unread` blocks on it.
    unread_signal: (Mutex<u64>, Condvar),
    /// Self-rescheduling SPDP announcement timer.
    announce_timer_id: Mutex<Option<crate::event::TimerId>>,
    shutdown: AtomicBool,
}

/// A running RTPS participant.
pub struct RtpsParticipant {
    inner: Arc<ParticipantInner>,
}

impl RtpsParticipant {
    /// Create a participant with the builtin UDPv4 transport on the
    /// well-known ports.
    pub fn new(config: ParticipantConfig) -> Result<Self> {
        if !config.use_builtin_transports {
            return Err(Error::InvalidConfig(
                "no transports: use with_transport or enable builtin transports",
            ));
        }
        let (mapping, participant_id) = match config.participant_id {
            Some(id) => (PortMapping::calculate(config.domain_id, id)?, id),
            None => PortMapping::auto_assign(config.domain_id)?,
        };
        let transport: Arc<dyn TransportPlugin> = Arc::new(UdpTransport::new()?);

        let multicast_group = std::net::Ipv4Addr::from(crate::config::DEFAULT_MULTICAST_GROUP);
        let metatraffic_multicast =
            vec![Locator::udpv4(multicast_group, mapping.metatraffic_multicast)];
        let wildcard_meta =
            Locator::udpv4(std::net::Ipv4Addr::UNSPECIFIED, mapping.metatraffic_unicast);
        let wildcard_user = Locator::udpv4(std::net::Ipv4Addr::UNSPECIFIED, mapping.user_unicast);
        let metatraffic_unicast = transport.normalize_locator(&wildcard_meta);
        let default_unicast = transport.normalize_locator(&wildcard_user);

        Self::build(
            config,
            participant_id,
            transport,
            metatraffic_unicast,
            metatraffic_multicast,
            default_unicast,
        )
    }

    /// Create a participant over an explicit transport and locator set
    /// (tests, SHM-style fabrics, custom deployments).
    pub fn with_transport(
        config: ParticipantConfig,
        transport: Arc<dyn TransportPlugin>,
        metatraffic_unicast: Vec<Locator>,
        metatraffic_multicast: Vec<Locator>,
        default_unicast: Vec<Locator>,
    ) -> Result<Self> {
        let participant_id = config.participant_id.unwrap_or(0);
        Self::build(
            config,
            participant_id,
            transport,
            metatraffic_unicast,
            metatraffic_multicast,
            default_unicast,
        )
    }

    fn build(
        config: ParticipantConfig,
        participant_id: u32,
        transport: Arc<dyn TransportPlugin>,
        metatraffic_unicast: Vec<Locator>,
        metatraffic_multicast: Vec<Locator>,
        default_unicast: Vec<Locator>,
    ) -> Result<Self> {
        let host_id = host_id();
        let guid_prefix = GuidPrefix::generate(host_id, participant_id);
        let externality = Arc::new(ExternalLocatorsProcessor::new(
            config.external_locators.clone(),
        ));

        let mut transports = TransportRegistry::new();
        transports.register(Arc::clone(&transport));
        let supported_kinds = transports.supported_kinds();

        // Builtin endpoints.
        let local_data = ParticipantProxyData {
            guid_prefix,
            protocol_version: (RTPS_VERSION_MAJOR, RTPS_VERSION_MINOR),
            vendor_id: VENDOR_ID,
            domain_id: config.domain_id,
            lease_duration: config.discovery.lease_duration,
            available_builtin_endpoints: BUILTIN_ENDPOINT_SET_DEFAULT,
            metatraffic_unicast: metatraffic_unicast.clone(),
            metatraffic_multicast: metatraffic_multicast.clone(),
            default_unicast: default_unicast.clone(),
            default_multicast: Vec::new(),
            user_data: config.user_data.clone(),
        };

        let mut spdp_writer = builtin_stateless_writer(guid_prefix, config.max_message_size);
        match config.discovery.protocol {
            DiscoveryProtocol::Client | DiscoveryProtocol::SuperClient => {
                for server in &config.discovery.servers {
                    spdp_writer.reader_locator_add(*server);
                }
            }
            DiscoveryProtocol::None => {}
            _ => {
                for locator in &metatraffic_multicast {
                    spdp_writer.reader_locator_add(*locator);
                }
            }
        }
        let pdp = Pdp::new(local_data, spdp_writer, &config.discovery);

        let edp = Edp::new(
            builtin_stateful_writer(
                guid_prefix,
                EntityId::SEDP_PUBLICATIONS_WRITER,
                "DCPSPublication",
                Arc::clone(&externality),
                supported_kinds.clone(),
                config.max_message_size,
            ),
            builtin_stateful_reader(guid_prefix, EntityId::SEDP_PUBLICATIONS_READER, "DCPSPublication"),
            builtin_stateful_writer(
                guid_prefix,
                EntityId::SEDP_SUBSCRIPTIONS_WRITER,
                "DCPSSubscription",
                Arc::clone(&externality),
                supported_kinds,
                config.max_message_size,
            ),
            builtin_stateful_reader(guid_prefix, EntityId::SEDP_SUBSCRIPTIONS_READER, "DCPSSubscription"),
        );

        let ds_client = matches!(
            config.discovery.protocol,
            DiscoveryProtocol::Client | DiscoveryProtocol::SuperClient
        )
        .then(|| DiscoveryServerClient::new(&config.discovery));

        let inner = Arc::new(ParticipantInner {
            config,
            guid_prefix,
            timer: Arc::new(TimerService::new("participant")),
            transports,
            events: StatusEvents::new(),
            pdp,
            edp,
            ds_client,
            writers: DashMap::new(),
            readers: DashMap::new(),
            local_writer_data: DashMap::new(),
            local_reader_data: DashMap::new(),
            remote_writers: DashMap::new(),
            remote_readers: DashMap::new(),
            entity_counter: AtomicU32::new(1),
            externality,
            persistence: Mutex::new(None),
            default_unicast,
            unread_signal: (Mutex::new(0), Condvar::new()),
            announce_timer_id: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        });

        // Receive channels: metatraffic (unicast + multicast) and user data.
        for locator in metatraffic_unicast
            .iter()
            .chain(metatraffic_multicast.iter())
            .chain(inner.default_unicast.iter())
        {
            let weak = Arc::downgrade(&inner);
            transport.create_input_channel(
                *locator,
                inner.config.max_message_size,
                Arc::new(move |datagram, source| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_datagram(datagram, source);
                    }
                }),
            )?;
        }
        transport.create_output_channel(Locator::INVALID)?;

        inner.start_discovery_timers();

        // SEDP builtin writers run the reliability protocol too.
        let weak = Arc::downgrade(&inner);
        inner.timer.register_periodic(
            Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let ops = inner.edp.publications_writer.lock().on_heartbeat_timer();
                    inner.send_ops(ops);
                    let ops = inner.edp.subscriptions_writer.lock().on_heartbeat_timer();
                    inner.send_ops(ops);
                }
            }),
            Duration::from_millis(250),
        );

        log::info!(
            "[PARTICIPANT] {guid_prefix:?} up (domain {}, protocol {:?})",
            inner.config.domain_id,
            inner.config.discovery.protocol
        );
        Ok(RtpsParticipant { inner })
    }

    #[must_use]
    pub fn guid_prefix(&self) -> GuidPrefix {
        self.inner.guid_prefix
    }

    /// Install the durability persistence backend. Must happen before
    /// TRANSIENT/PERSISTENT endpoints are created.
    pub fn set_persistence(&self, service: Arc<dyn PersistenceService>) {
        *self.inner.persistence.lock() = Some(service);
    }

    /// The status-event channel of this participant.
    #[must_use]
    pub fn events(&self) -> &StatusEvents {
        &self.inner.events
    }

    #[must_use]
    pub fn remote_participant_count(&self) -> usize {
        self.inner.pdp.remote_count()
    }

    // ========================================================================
    // ENDPOINT FACTORY
    // ========================================================================

    /// Create a stateful writer and push it through discovery.
    pub fn create_writer(&self, config: WriterConfig) -> Result<Writer> {
        config.qos.validate()?;
        let entity_id = match config.entity_id {
            Some(id) => id,
            None => self.inner.allocate_entity_id(true, config.keyed),
        };
        let guid = Guid::new(self.inner.guid_prefix, entity_id);
        if self.inner.writers.contains_key(&entity_id) {
            return Err(Error::InvalidConfig("entity id already in use"));
        }

        let pool = Arc::new(PayloadPool::new(
            self.inner.config.memory_policy,
            POOL_SLOT_SIZE,
            8,
            POOL_MAX_BUFFERS,
        ));
        let mut history = WriterHistory::new(
            guid,
            config.qos.history,
            config.qos.resource_limits,
            config.keyed,
            pool,
        );

        // TRANSIENT+ durability goes through the persistence plugin.
        if config.qos.durability >= DurabilityKind::Transient {
            let service = self
                .inner
                .persistence
                .lock()
                .clone()
                .ok_or(Error::InvalidConfig(
                    "TRANSIENT/PERSISTENT writer requires a persistence service",
                ))?;
            for change in service.load_writer_from_storage(guid)? {
                let payload = change.serialized_payload.clone();
                let mut restored = history.new_change(change.kind, change.instance_handle, payload.len())?;
                restored.serialized_payload.extend_from_slice(&payload);
                history.add_change(restored, change.write_params)?;
            }
            let persist_service = Arc::clone(&service);
            history.set_pre_commit(Box::new(move |change| {
                persist_service.add_writer_change_to_storage(guid, change)
            }));
            let persist_service = Arc::clone(&service);
            history.set_on_remove(Box::new(move |seq| {
                if let Err(e) = persist_service.remove_writer_change_from_storage(guid, seq) {
                    log::warn!("[WRITER] persistence removal failed: {e}");
                }
            }));
        }

        let attributes = WriterAttributes::from_config(guid, &config, self.inner.config.max_message_size);
        let reliable = attributes.qos.reliability == ReliabilityKind::Reliable;
        let heartbeat_period = attributes.heartbeat_period;
        let writer = Arc::new(Mutex::new(StatefulWriter::new(
            attributes,
            history,
            Arc::clone(&self.inner.externality),
            self.inner.transports.supported_kinds(),
        )));
        self.inner.writers.insert(entity_id, Arc::clone(&writer));

        // Announce through SEDP and match against known remote readers.
        let data = WriterProxyData {
            guid,
            topic_name: config.topic_name.clone(),
            type_name: config.type_name.clone(),
            qos: config.qos.clone(),
            unicast_locators: self.inner.default_unicast.clone(),
            multicast_locators: Vec::new(),
            persistence_guid: (config.qos.durability >= DurabilityKind::Transient).then_some(guid),
            type_information: Vec::new(),
        };
        self.inner.local_writer_data.insert(entity_id, data.clone());
        let ops = self.inner.edp.local_writer_registered(&data)?;
        self.inner.send_ops(ops);
        self.inner.match_local_writer_against_remotes();

        // Periodic heartbeat drives the reliability protocol.
        if reliable {
            let weak = Arc::downgrade(&self.inner);
            let writer_timer = Arc::clone(&writer);
            self.inner.timer.register_periodic(
                Arc::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        let ops = writer_timer.lock().on_heartbeat_timer();
                        inner.send_ops(ops);
                    }
                }),
                heartbeat_period,
            );
        }

        // Asynchronous publish mode: a flush tick drains UNSENT changes.
        if config.publish_mode == crate::config::PublishMode::Asynchronous {
            let weak = Arc::downgrade(&self.inner);
            let writer_flush = Arc::clone(&writer);
            self.inner.timer.register_periodic(
                Arc::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        let ops = writer_flush.lock().flush();
                        inner.send_ops(ops);
                    }
                }),
                ASYNC_FLUSH_PERIOD,
            );
        }

        // Manual-liveliness writers report LIVELINESS_LOST on lapse.
        let manual_liveliness = config.qos.liveliness.kind != crate::qos::LivelinessKind::Automatic
            && config.qos.liveliness.lease_duration != Duration::MAX;
        if manual_liveliness {
            let weak = Arc::downgrade(&self.inner);
            let writer_sweep = Arc::clone(&writer);
            let writer_guid = guid;
            self.inner.timer.register_periodic(
                Arc::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        if writer_sweep.lock().liveliness_lapsed(Instant::now()) {
                            let _ = inner
                                .events
                                .sender()
                                .send(StatusEvent::LivelinessLost { writer: writer_guid });
                        }
                    }
                }),
                READER_SWEEP_PERIOD,
            );
        }

        Ok(Writer {
            guid,
            inner: writer,
            participant: Arc::clone(&self.inner),
        })
    }

    /// Create a stateful reader and push it through discovery.
    pub fn create_reader(&self, config: ReaderConfig) -> Result<Reader> {
        config.qos.validate()?;
        let entity_id = match config.entity_id {
            Some(id) => id,
            None => self.inner.allocate_entity_id(false, config.keyed),
        };
        let guid = Guid::new(self.inner.guid_prefix, entity_id);
        if self.inner.readers.contains_key(&entity_id) {
            return Err(Error::InvalidConfig("entity id already in use"));
        }

        let history = ReaderHistory::new(config.qos.history, config.qos.resource_limits, config.keyed);
        let attributes = ReaderAttributes::from_config(guid, &config);
        let reader = Arc::new(Mutex::new(StatefulReader::new(attributes, history)));
        self.inner.readers.insert(entity_id, Arc::clone(&reader));

        let data = ReaderProxyData {
            guid,
            topic_name: config.topic_name.clone(),
            type_name: config.type_name.clone(),
            qos: config.qos.clone(),
            expects_inline_qos: config.expects_inline_qos,
            unicast_locators: self.inner.default_unicast.clone(),
            multicast_locators: Vec::new(),
            type_information: Vec::new(),
        };
        self.inner.local_reader_data.insert(entity_id, data.clone());
        let ops = self.inner.edp.local_reader_registered(&data)?;
        self.inner.send_ops(ops);
        self.inner.match_local_reader_against_remotes();

        // Liveliness / deadline / lifespan sweep.
        let weak = Arc::downgrade(&self.inner);
        let reader_timer = Arc::clone(&reader);
        let reader_guid = guid;
        self.inner.timer.register_periodic(
            Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let mut events = Vec::new();
                    {
                        let mut r = reader_timer.lock();
                        events.extend(r.check_liveliness(Instant::now()));
                        events.extend(r.check_deadlines(RtpsTime::now()));
                        r.apply_lifespan(RtpsTime::now());
                    }
                    inner.forward_reader_events(reader_guid, events);
                }
            }),
            READER_SWEEP_PERIOD,
        );

        Ok(Reader {
            guid,
            inner: reader,
            participant: Arc::clone(&self.inner),
            durable: config.qos.durability >= DurabilityKind::Transient,
        })
    }

    /// Remove a local writer: SEDP disposal plus teardown.
    pub fn delete_writer(&self, writer: &Writer) -> Result<()> {
        let entity_id = writer.guid.entity_id;
        self.inner.writers.remove(&entity_id);
        self.inner.local_writer_data.remove(&entity_id);
        let ops = self.inner.edp.local_writer_removed(writer.guid)?;
        self.inner.send_ops(ops);
        Ok(())
    }

    /// Remove a local reader: SEDP disposal plus teardown.
    pub fn delete_reader(&self, reader: &Reader) -> Result<()> {
        let entity_id = reader.guid.entity_id;
        self.inner.readers.remove(&entity_id);
        self.inner.local_reader_data.remove(&entity_id);
        let ops = self.inner.edp.local_reader_removed(reader.guid)?;
        self.inner.send_ops(ops);
        Ok(())
    }
}

impl Drop for RtpsParticipant {
    fn drop(&mut self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        // Graceful dispose, then tear the machinery down.
        if let Ok(ops) = self.inner.pdp.dispose() {
            let ops = match &self.inner.ds_client {
                Some(client) => client.redirect_announcements(ops),
                None => ops,
            };
            self.inner.send_ops(ops);
        }
        self.inner.timer.stop();
        self.inner.transports.shutdown();
        log::info!("[PARTICIPANT] {:?} down", self.inner.guid_prefix);
    }
}

// ============================================================================
// ENDPOINT HANDLES
// ============================================================================

/// Handle to a local stateful writer.
pub struct Writer {
    guid: Guid,
    inner: Arc<Mutex<StatefulWriter>>,
    participant: Arc<ParticipantInner>,
}

impl Writer {
    #[must_use]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// Write one serialized sample. Blocks up to `max_blocking_time` when a
    /// RELIABLE KEEP_ALL history is full, then fails with `Timeout`.
    pub fn write(&self, payload: Vec<u8>) -> Result<SequenceNumber> {
        self.write_with(ChangeKind::Alive, InstanceHandle::NIL, &payload)
    }

    /// Write one sample of a keyed instance.
    pub fn write_keyed(&self, handle: InstanceHandle, payload: Vec<u8>) -> Result<SequenceNumber> {
        self.write_with(ChangeKind::Alive, handle, &payload)
    }

    /// Dispose a keyed instance.
    pub fn dispose(&self, handle: InstanceHandle) -> Result<SequenceNumber> {
        self.write_with(ChangeKind::NotAliveDisposed, handle, &[])
    }

    /// Unregister a keyed instance.
    pub fn unregister(&self, handle: InstanceHandle) -> Result<SequenceNumber> {
        self.write_with(ChangeKind::NotAliveUnregistered, handle, &[])
    }

    fn write_with(
        &self,
        kind: ChangeKind,
        handle: InstanceHandle,
        payload: &[u8],
    ) -> Result<SequenceNumber> {
        let deadline = Instant::now() + self.inner.lock().attributes().qos.max_blocking_time;
        loop {
            let attempt = {
                let mut writer = self.inner.lock();
                match writer.write(payload, kind, handle, WriteParams::default()) {
                    Ok((seq, ops)) => Ok((seq, ops)),
                    Err(Error::ResourceLimit(what)) => {
                        // Acknowledged changes can be reclaimed to make room.
                        if writer.try_reclaim_acked() > 0 {
                            continue;
                        }
                        Err(Error::ResourceLimit(what))
                    }
                    Err(e) => return Err(e),
                }
            };
            match attempt {
                Ok((seq, ops)) => {
                    self.participant.send_ops(ops);
                    return Ok(seq);
                }
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(Error::ResourceLimit(_)) => return Err(Error::Timeout),
                Err(e) => return Err(e),
            }
        }
    }

    /// Block until every matched reader acknowledged everything written,
    /// or fail with `Timeout`.
    pub fn wait_for_acknowledgments(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let last = self.inner.lock().history().last_assigned();
        if last.0 == 0 {
            return Ok(());
        }
        loop {
            if self.inner.lock().check_acked(last)? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Manual liveliness assertion (MANUAL_BY_TOPIC).
    pub fn assert_liveliness(&self) {
        let ops = self.inner.lock().assert_liveliness();
        self.participant.send_ops(ops);
    }

    #[must_use]
    pub fn matched_reader_count(&self) -> usize {
        self.inner.lock().matched_readers()
    }
}

/// Handle to a local stateful reader.
pub struct Reader {
    guid: Guid,
    inner: Arc<Mutex<StatefulReader>>,
    participant: Arc<ParticipantInner>,
    /// TRANSIENT+ durability: progress is mirrored to persistence.
    durable: bool,
}

impl Reader {
    #[must_use]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// Take the next sample exposable in order, if any. Durable readers
    /// record their progress with the persistence service so redelivery
    /// resumes past it after a restart.
    #[must_use]
    pub fn take(&self) -> Option<CacheChange> {
        let change = self.inner.lock().take_next_sample()?;
        if self.durable {
            if let Some(service) = self.participant.persistence.lock().clone() {
                let persist_writer = self
                    .inner
                    .lock()
                    .lookup_proxy(change.writer_guid)
                    .map_or(change.writer_guid, |p| p.persistence_guid());
                if let Err(e) = service.update_writer_seq_on_storage(
                    self.guid,
                    persist_writer,
                    change.sequence_number,
                ) {
                    log::warn!("[READER] persistence progress update failed: {e}");
                }
            }
        }
        Some(change)
    }

    /// Block until an unread sample is available or the timeout elapses.
    pub fn wait_for_unread(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.inner.lock().history().unread_count() > 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (lock, condvar) = &self.participant.unread_signal;
            let mut counter = lock.lock();
            // Re-check under the signal lock to avoid a lost wakeup.
            if self.inner.lock().history().unread_count() > 0 {
                return true;
            }
            let _ = condvar.wait_for(&mut counter, deadline - now);
        }
    }

    /// Convenience: wait, then take.
    pub fn take_timeout(&self, timeout: Duration) -> Option<CacheChange> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(change) = self.take() {
                return Some(change);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.wait_for_unread(remaining) {
                // One final race-free attempt.
                return self.take();
            }
            // Unread changes may not be exposable yet (sequence gap still
            // being repaired); yield instead of spinning.
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[must_use]
    pub fn matched_writer_count(&self) -> usize {
        self.inner.lock().matched_writers()
    }
}

// ============================================================================
// INNER: DISCOVERY, MATCHING, SENDING
// ============================================================================

impl ParticipantInner {
    pub(crate) fn timer(&self) -> &Arc<TimerService> {
        &self.timer
    }

    pub(crate) fn pdp(&self) -> &Pdp {
        &self.pdp
    }

    pub(crate) fn edp(&self) -> &Edp {
        &self.edp
    }

    pub(crate) fn writer_by_entity(
        &self,
        entity_id: EntityId,
    ) -> Option<Arc<Mutex<StatefulWriter>>> {
        self.writers.get(&entity_id).map(|e| Arc::clone(e.value()))
    }

    pub(crate) fn reader_by_entity(
        &self,
        entity_id: EntityId,
    ) -> Option<Arc<Mutex<StatefulReader>>> {
        self.readers.get(&entity_id).map(|e| Arc::clone(e.value()))
    }

    /// Readers addressed by a submessage: the named one, or every user
    /// reader when the entity id is UNKNOWN (each ignores unmatched
    /// writers itself).
    pub(crate) fn readers_for(
        &self,
        entity_id: EntityId,
    ) -> Vec<(Guid, Arc<Mutex<StatefulReader>>)> {
        if entity_id == EntityId::UNKNOWN {
            self.readers
                .iter()
                .map(|e| {
                    (
                        Guid::new(self.guid_prefix, *e.key()),
                        Arc::clone(e.value()),
                    )
                })
                .collect()
        } else {
            self.reader_by_entity(entity_id)
                .map(|r| vec![(Guid::new(self.guid_prefix, entity_id), r)])
                .unwrap_or_default()
        }
    }

    fn allocate_entity_id(&self, writer: bool, keyed: bool) -> EntityId {
        let key = self.entity_counter.fetch_add(1, Ordering::Relaxed);
        let kind = match (writer, keyed) {
            (true, true) => entity_kind::WRITER_WITH_KEY,
            (true, false) => entity_kind::WRITER_NO_KEY,
            (false, true) => entity_kind::READER_WITH_KEY,
            (false, false) => entity_kind::READER_NO_KEY,
        };
        EntityId::user(key, kind)
    }

    /// Emit send operations through the transports (no endpoint lock held).
    pub(crate) fn send_ops(&self, ops: Vec<SendOperation>) {
        if self.shutdown.load(Ordering::Relaxed) {
            return;
        }
        let deadline = Instant::now() + Duration::from_millis(100);
        for op in ops {
            self.transports.send(&op.message, &op.destinations, deadline);
        }
    }

    fn start_discovery_timers(self: &Arc<Self>) {
        if self.config.discovery.protocol == DiscoveryProtocol::None {
            return;
        }

        // SPDP announcements: self-rescheduling to honour the initial burst.
        let weak = Arc::downgrade(self);
        let announce_id = self.timer.register(
            Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.announce_tick();
                }
            }),
            None,
        );
        self.timer.restart_timer(announce_id, Duration::from_millis(1));
        // Stash the id so announce_tick can reschedule itself.
        *self.announce_timer_id.lock() = Some(announce_id);

        // Remote participant lease sweep.
        let weak = Arc::downgrade(self);
        self.timer.register_periodic(
            Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    for prefix in inner.pdp.sweep_leases(Instant::now()) {
                        inner.remove_remote_participant(
                            prefix,
                            ParticipantRemovalReason::LeaseExpired,
                        );
                    }
                }
            }),
            LEASE_SWEEP_PERIOD,
        );
    }

    fn announce_tick(self: &Arc<Self>) {
        match self.pdp.announce() {
            Ok(ops) => {
                let ops = match &self.ds_client {
                    Some(client) => client.redirect_announcements(ops),
                    None => ops,
                };
                self.send_ops(ops);
            }
            Err(e) => log::warn!("[SPDP] announcement failed: {e}"),
        }
        let delay = match &self.ds_client {
            Some(client) if client.needs_resync() => client.resync_period(),
            _ => self.pdp.next_announcement_delay(),
        };
        if let Some(id) = *self.announce_timer_id.lock() {
            self.timer.restart_timer(id, delay);
        }
    }

    /// A new participant appeared: match builtin endpoints and answer with
    /// our own announcement so discovery converges symmetrically.
    pub(crate) fn on_participant_discovered(self: &Arc<Self>, prefix: GuidPrefix) {
        let Some(data) = self.pdp.lookup(&prefix) else {
            return;
        };
        if let Some(client) = &self.ds_client {
            if let Some(source) = data.metatraffic_unicast.first() {
                client.server_answered(*source, prefix);
            }
        }
        let ops = self.edp.participant_matched(&data);
        self.send_ops(ops);

        // Unicast our DATA(p) straight back to the newcomer.
        if let Ok(ops) = self.pdp.announce() {
            let retargeted: Vec<SendOperation> = ops
                .into_iter()
                .map(|op| SendOperation::new(op.message, data.metatraffic_unicast.clone()))
                .collect();
            self.send_ops(retargeted);
        }

        let _ = self
            .events
            .sender()
            .send(StatusEvent::ParticipantDiscovered { prefix });
    }

    /// Remove a remote participant and every proxy that referenced it.
    pub(crate) fn remove_remote_participant(
        self: &Arc<Self>,
        prefix: GuidPrefix,
        reason: ParticipantRemovalReason,
    ) {
        self.edp.participant_unmatched(prefix);
        if let Some(client) = &self.ds_client {
            client.server_lost(prefix);
        }

        for (entity_id, writer) in self.writer_snapshot() {
            let removed = writer.lock().remove_readers_of(prefix);
            let writer_guid = Guid::new(self.guid_prefix, entity_id);
            for remote_reader in removed {
                let _ = self.events.sender().send(StatusEvent::PublicationMatched {
                    writer: writer_guid,
                    remote_reader,
                    current_count_change: -1,
                });
            }
        }
        for (entity_id, reader) in self.reader_snapshot() {
            let removed = reader.lock().remove_writers_of(prefix);
            let reader_guid = Guid::new(self.guid_prefix, entity_id);
            for remote_writer in removed {
                let _ = self.events.sender().send(StatusEvent::SubscriptionMatched {
                    reader: reader_guid,
                    remote_writer,
                    current_count_change: -1,
                });
            }
        }
        self.remote_writers.retain(|guid, _| guid.prefix != prefix);
        self.remote_readers.retain(|guid, _| guid.prefix != prefix);

        let _ = self
            .events
            .sender()
            .send(StatusEvent::ParticipantRemoved { prefix, reason });
    }

    /// Apply freshly drained SEDP events to the matching engine.
    pub(crate) fn apply_edp_events(self: &Arc<Self>, events: Vec<EdpEvent>) {
        for event in events {
            match event {
                EdpEvent::RemoteWriter(data) => self.on_remote_writer(*data),
                EdpEvent::RemoteWriterRemoved(guid) => self.on_remote_writer_removed(guid),
                EdpEvent::RemoteReader(data) => self.on_remote_reader(*data),
                EdpEvent::RemoteReaderRemoved(guid) => self.on_remote_reader_removed(guid),
            }
        }
    }

    /// Endpoint-table snapshots: never hold the concurrent-map shard while
    /// taking an endpoint lock.
    fn writer_snapshot(&self) -> Vec<(EntityId, Arc<Mutex<StatefulWriter>>)> {
        self.writers
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect()
    }

    fn reader_snapshot(&self) -> Vec<(EntityId, Arc<Mutex<StatefulReader>>)> {
        self.readers
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect()
    }

    fn on_remote_writer(self: &Arc<Self>, data: WriterProxyData) {
        self.remote_writers.insert(data.guid, data.clone());
        let participant = self.pdp.lookup(&data.guid.prefix);

        for (entity_id, reader_arc) in self.reader_snapshot() {
            let Some(local) = self.local_reader_data.get(&entity_id).map(|e| e.value().clone()) else {
                continue;
            };
            let reader_guid = local.guid;
            let offered = MatchCandidate {
                topic_name: &data.topic_name,
                type_name: &data.type_name,
                qos: &data.qos,
                type_information: &data.type_information,
            };
            let requested = MatchCandidate {
                topic_name: &local.topic_name,
                type_name: &local.type_name,
                qos: &local.qos,
                type_information: &local.type_information,
            };
            match check_match(&offered, &requested) {
                MatchingOutcome::Ok => {
                    let unicast = if data.unicast_locators.is_empty() {
                        participant
                            .as_ref()
                            .map(|p| p.default_unicast.clone())
                            .unwrap_or_default()
                    } else {
                        data.unicast_locators.clone()
                    };
                    let initial_sequence = self.persisted_reader_mark(reader_guid, &data);
                    let added = reader_arc.lock().matched_writer_add(MatchedWriter {
                        guid: data.guid,
                        persistence_guid: data.persistence_guid,
                        reliability: data.qos.reliability,
                        ownership_strength: data.qos.ownership_strength,
                        liveliness_kind: data.qos.liveliness.kind,
                        liveliness_lease: data.qos.liveliness.lease_duration,
                        unicast_locators: unicast,
                        multicast_locators: data.multicast_locators.clone(),
                        initial_sequence,
                    });
                    if added {
                        let _ = self.events.sender().send(StatusEvent::SubscriptionMatched {
                            reader: reader_guid,
                            remote_writer: data.guid,
                            current_count_change: 1,
                        });
                    }
                }
                MatchingOutcome::Fail(failure) if failure.reason_mask
                    & crate::matching::reason::INCOMPATIBLE_QOS
                    != 0 =>
                {
                    let _ = self
                        .events
                        .sender()
                        .send(StatusEvent::RequestedIncompatibleQos {
                            reader: reader_guid,
                            last_policy_id: failure.last_policy_id(),
                        });
                }
                MatchingOutcome::Fail(_) => {}
            }
        }
    }

    fn on_remote_writer_removed(self: &Arc<Self>, guid: Guid) {
        self.remote_writers.remove(&guid);
        for (entity_id, reader) in self.reader_snapshot() {
            if reader.lock().matched_writer_remove(guid) {
                let reader_guid = Guid::new(self.guid_prefix, entity_id);
                let _ = self.events.sender().send(StatusEvent::SubscriptionMatched {
                    reader: reader_guid,
                    remote_writer: guid,
                    current_count_change: -1,
                });
            }
        }
    }

    fn on_remote_reader(self: &Arc<Self>, data: ReaderProxyData) {
        self.remote_readers.insert(data.guid, data.clone());
        let participant = self.pdp.lookup(&data.guid.prefix);

        for (entity_id, writer_arc) in self.writer_snapshot() {
            let Some(local) = self.local_writer_data.get(&entity_id).map(|e| e.value().clone()) else {
                continue;
            };
            let writer_guid = local.guid;
            let offered = MatchCandidate {
                topic_name: &local.topic_name,
                type_name: &local.type_name,
                qos: &local.qos,
                type_information: &local.type_information,
            };
            let requested = MatchCandidate {
                topic_name: &data.topic_name,
                type_name: &data.type_name,
                qos: &data.qos,
                type_information: &data.type_information,
            };
            match check_match(&offered, &requested) {
                MatchingOutcome::Ok => {
                    let unicast = if data.unicast_locators.is_empty() {
                        participant
                            .as_ref()
                            .map(|p| p.default_unicast.clone())
                            .unwrap_or_default()
                    } else {
                        data.unicast_locators.clone()
                    };
                    let existed = writer_arc.lock().lookup_proxy(data.guid).is_some();
                    let ops = writer_arc.lock().matched_reader_add(MatchedReader {
                        guid: data.guid,
                        reliability: data.qos.reliability,
                        durability: data.qos.durability,
                        expects_inline_qos: data.expects_inline_qos,
                        unicast_locators: unicast,
                        multicast_locators: data.multicast_locators.clone(),
                    });
                    self.send_ops(ops);
                    if !existed {
                        let _ = self.events.sender().send(StatusEvent::PublicationMatched {
                            writer: writer_guid,
                            remote_reader: data.guid,
                            current_count_change: 1,
                        });
                    }
                }
                MatchingOutcome::Fail(failure) if failure.reason_mask
                    & crate::matching::reason::INCOMPATIBLE_QOS
                    != 0 =>
                {
                    let _ = self
                        .events
                        .sender()
                        .send(StatusEvent::OfferedIncompatibleQos {
                            writer: writer_guid,
                            last_policy_id: failure.last_policy_id(),
                        });
                }
                MatchingOutcome::Fail(_) => {}
            }
        }
    }

    fn on_remote_reader_removed(self: &Arc<Self>, guid: Guid) {
        self.remote_readers.remove(&guid);
        for (entity_id, writer) in self.writer_snapshot() {
            if writer.lock().matched_reader_remove(guid) {
                let writer_guid = Guid::new(self.guid_prefix, entity_id);
                let _ = self.events.sender().send(StatusEvent::PublicationMatched {
                    writer: writer_guid,
                    remote_reader: guid,
                    current_count_change: -1,
                });
            }
        }
    }

    /// Re-run matching over every known remote (idempotent per pair); used
    /// when a local endpoint appears after discovery already ran.
    fn match_local_writer_against_remotes(self: &Arc<Self>) {
        let remotes: Vec<ReaderProxyData> =
            self.remote_readers.iter().map(|e| e.value().clone()).collect();
        for remote in remotes {
            self.on_remote_reader(remote);
        }
    }

    fn match_local_reader_against_remotes(self: &Arc<Self>) {
        let remotes: Vec<WriterProxyData> =
            self.remote_writers.iter().map(|e| e.value().clone()).collect();
        for remote in remotes {
            self.on_remote_writer(remote);
        }
    }

    fn persisted_reader_mark(&self, reader_guid: Guid, writer: &WriterProxyData) -> SequenceNumber {
        let Some(service) = self.persistence.lock().clone() else {
            return SequenceNumber(0);
        };
        let key = writer.persistence_guid.unwrap_or(writer.guid);
        service
            .load_reader_from_storage(reader_guid)
            .ok()
            .and_then(|map| map.get(&key).copied())
            .unwrap_or(SequenceNumber(0))
    }

    /// Map reader state-machine events onto the status channel.
    pub(crate) fn forward_reader_events(
        self: &Arc<Self>,
        reader_guid: Guid,
        events: Vec<ReaderEvent>,
    ) {
        for event in events {
            let status = match event {
                ReaderEvent::DataAvailable => {
                    let (lock, condvar) = &self.unread_signal;
                    *lock.lock() += 1;
                    condvar.notify_all();
                    Some(StatusEvent::DataAvailable {
                        reader: reader_guid,
                    })
                }
                ReaderEvent::SampleRejected(reason) => Some(StatusEvent::SampleRejected {
                    reader: reader_guid,
                    reason,
                }),
                ReaderEvent::SampleLost { count } => Some(StatusEvent::SampleLost {
                    reader: reader_guid,
                    count,
                }),
                ReaderEvent::LivelinessChanged { writer, alive } => {
                    Some(StatusEvent::LivelinessChanged {
                        reader: reader_guid,
                        writer,
                        alive,
                    })
                }
                ReaderEvent::OwnershipChanged {
                    instance, current, ..
                } => Some(StatusEvent::OwnershipChanged {
                    reader: reader_guid,
                    instance,
                    current_owner: current,
                }),
                ReaderEvent::RequestedDeadlineMissed { instance } => {
                    Some(StatusEvent::RequestedDeadlineMissed {
                        reader: reader_guid,
                        instance,
                    })
                }
            };
            if let Some(status) = status {
                let _ = self.events.sender().send(status);
            }
        }
    }

    /// Entry point for every received datagram.
    pub(crate) fn handle_datagram(self: &Arc<Self>, datagram: &[u8], source: Locator) {
        let receiver = MessageReceiver::new(self.guid_prefix);
        let mut handler = demux::Demux::new(self);
        match receiver.process(datagram, Some(source), &mut handler) {
            Ok(_) => handler.finish(),
            Err(e) => {
                // Drop the message, keep the session.
                log::debug!("[DEMUX] dropped malformed message from {source:?}: {e}");
                handler.finish();
            }
        }
    }
}

// ============================================================================
// BUILTIN ENDPOINT CONSTRUCTION
// ============================================================================

fn builtin_stateless_writer(prefix: GuidPrefix, max_message_size: usize) -> StatelessWriter {
    let guid = Guid::new(prefix, EntityId::SPDP_WRITER);
    let pool = Arc::new(PayloadPool::new(
        crate::qos::MemoryPolicy::DynamicReusable,
        0,
        0,
        64,
    ));
    let history = WriterHistory::new(
        guid,
        HistoryKind::KeepLast(1),
        crate::qos::ResourceLimits::default(),
        true,
        pool,
    );
    let attributes = WriterAttributes {
        guid,
        publish_mode: crate::config::PublishMode::Synchronous,
        topic_name: "DCPSParticipant".into(),
        type_name: "ParticipantProxyData".into(),
        qos: crate::qos::Qos::default(),
        heartbeat_period: Duration::from_secs(3),
        nack_response_delay: Duration::from_millis(5),
        fragment_size: crate::config::DEFAULT_FRAGMENT_SIZE,
        max_message_size,
        keyed: true,
    };
    StatelessWriter::new(attributes, history)
}

fn sedp_qos() -> crate::qos::Qos {
    crate::qos::Qos {
        reliability: ReliabilityKind::Reliable,
        durability: DurabilityKind::TransientLocal,
        history: HistoryKind::KeepAll,
        ..crate::qos::Qos::default()
    }
}

fn builtin_stateful_writer(
    prefix: GuidPrefix,
    entity_id: EntityId,
    topic: &str,
    externality: Arc<ExternalLocatorsProcessor>,
    supported_kinds: Vec<i32>,
    max_message_size: usize,
) -> StatefulWriter {
    let guid = Guid::new(prefix, entity_id);
    let pool = Arc::new(PayloadPool::new(
        crate::qos::MemoryPolicy::DynamicReusable,
        0,
        0,
        1024,
    ));
    let history = WriterHistory::new(
        guid,
        HistoryKind::KeepAll,
        crate::qos::ResourceLimits::default(),
        true,
        pool,
    );
    let attributes = WriterAttributes {
        guid,
        publish_mode: crate::config::PublishMode::Synchronous,
        topic_name: topic.into(),
        type_name: topic.into(),
        qos: sedp_qos(),
        heartbeat_period: Duration::from_millis(250),
        nack_response_delay: Duration::from_millis(5),
        fragment_size: crate::config::DEFAULT_FRAGMENT_SIZE,
        max_message_size,
        keyed: true,
    };
    StatefulWriter::new(attributes, history, externality, supported_kinds)
}

fn builtin_stateful_reader(prefix: GuidPrefix, entity_id: EntityId, topic: &str) -> StatefulReader {
    let guid = Guid::new(prefix, entity_id);
    let history = ReaderHistory::new(
        HistoryKind::KeepAll,
        crate::qos::ResourceLimits::default(),
        true,
    );
    let attributes = ReaderAttributes {
        guid,
        topic_name: topic.into(),
        type_name: topic.into(),
        qos: sedp_qos(),
        heartbeat_response_delay: Duration::from_millis(2),
        keyed: true,
        expects_inline_qos: false,
    };
    StatefulReader::new(attributes, history)
}

/// Host identity folded into GUID prefixes.
fn host_id() -> u32 {
    match local_ip_address::local_ip() {
        Ok(std::net::IpAddr::V4(ip)) => u32::from_be_bytes(ip.octets()),
        _ => 0x7f00_0001,
    }
}
