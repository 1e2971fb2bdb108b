// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Incoming-message demultiplexer (Sec.8.3.7 receive rules).
//!
//! The [`MessageReceiver`](crate::protocol::MessageReceiver) has already
//! applied INFO_TS/INFO_DST bookkeeping and destination filtering; this
//! handler routes entity submessages by entity id: DATA/DATA_FRAG/
//! HEARTBEAT/GAP to the reader table, ACKNACK/NACK_FRAG to the writer
//! table, builtin entity ids to discovery. Unknown entity ids are silently
//! ignored. No transport send happens while an endpoint lock is held;
//! responses accumulate and go out in `finish`.

use std::sync::Arc;
use std::time::Duration;

use crate::core::guid::{EntityId, Guid};
use crate::discovery::PdpEvent;
use crate::protocol::constants::PID_STATUS_INFO;
use crate::protocol::receiver::{ReceiverContext, SubmessageHandler};
use crate::protocol::submessage::{
    AckNackSubmessage, DataFragSubmessage, DataSubmessage, GapSubmessage,
    HeartbeatFragSubmessage, HeartbeatSubmessage, NackFragSubmessage,
};
use crate::rtps::SendOperation;

use super::events::ParticipantRemovalReason;
use super::ParticipantInner;

/// Which reader should answer a heartbeat after its response delay.
#[derive(Clone, Copy)]
enum ReaderTarget {
    User(EntityId),
    EdpPublications,
    EdpSubscriptions,
}

pub(crate) struct Demux<'a> {
    inner: &'a Arc<ParticipantInner>,
    ops: Vec<SendOperation>,
    acknack_schedules: Vec<(ReaderTarget, Guid, Duration)>,
    edp_dirty: bool,
}

impl<'a> Demux<'a> {
    pub(crate) fn new(inner: &'a Arc<ParticipantInner>) -> Self {
        Demux {
            inner,
            ops: Vec::new(),
            acknack_schedules: Vec::new(),
            edp_dirty: false,
        }
    }

    /// Flush accumulated responses after the whole message was processed
    /// (every endpoint lock released).
    pub(crate) fn finish(self) {
        let inner = self.inner;
        inner.send_ops(self.ops);

        for (target, writer_guid, delay) in self.acknack_schedules {
            let weak = Arc::downgrade(inner);
            inner.timer().schedule_once(delay, move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let ops = match target {
                    ReaderTarget::User(entity_id) => inner
                        .reader_by_entity(entity_id)
                        .map(|r| r.lock().produce_acknack(writer_guid))
                        .unwrap_or_default(),
                    ReaderTarget::EdpPublications => inner
                        .edp()
                        .publications_reader
                        .lock()
                        .produce_acknack(writer_guid),
                    ReaderTarget::EdpSubscriptions => inner
                        .edp()
                        .subscriptions_reader
                        .lock()
                        .produce_acknack(writer_guid),
                };
                inner.send_ops(ops);
            });
        }

        if self.edp_dirty {
            let events = inner.edp().drain_events();
            inner.apply_edp_events(events);
        }
    }

    fn handle_spdp_data(&mut self, ctx: &ReceiverContext, data: &DataSubmessage) {
        let status_info = data
            .inline_qos
            .as_ref()
            .and_then(|qos| qos.get(PID_STATUS_INFO))
            .and_then(|p| p.as_u32())
            .unwrap_or(0);
        // Any announcement from a participant asserts the liveliness of its
        // AUTOMATIC and MANUAL_BY_PARTICIPANT writers.
        if status_info == 0 {
            for (_, reader) in self.inner.readers_for(EntityId::UNKNOWN) {
                reader.lock().assert_writer_liveliness(ctx.source_guid_prefix);
            }
        }
        match self.inner.pdp().process_announcement(
            &data.payload,
            status_info,
            ctx.source_guid_prefix,
        ) {
            PdpEvent::Discovered(prefix) => self.inner.on_participant_discovered(prefix),
            PdpEvent::Refreshed(prefix) => {
                // Locators may have changed; rematch builtin endpoints.
                if let Some(data) = self.inner.pdp().lookup(&prefix) {
                    let ops = self.inner.edp().participant_matched(&data);
                    self.ops.extend(ops);
                }
            }
            PdpEvent::Disposed(prefix) => self
                .inner
                .remove_remote_participant(prefix, ParticipantRemovalReason::Disposed),
            PdpEvent::Ignored => {}
        }
    }
}

impl SubmessageHandler for Demux<'_> {
    fn on_data(&mut self, ctx: &ReceiverContext, data: &DataSubmessage) {
        match data.writer_id {
            EntityId::SPDP_WRITER => self.handle_spdp_data(ctx, data),
            EntityId::SEDP_PUBLICATIONS_WRITER => {
                self.inner.edp().publications_reader.lock().process_data_msg(
                    ctx.source_guid_prefix,
                    data,
                    ctx.timestamp,
                );
                self.edp_dirty = true;
            }
            EntityId::SEDP_SUBSCRIPTIONS_WRITER => {
                self.inner.edp().subscriptions_reader.lock().process_data_msg(
                    ctx.source_guid_prefix,
                    data,
                    ctx.timestamp,
                );
                self.edp_dirty = true;
            }
            _ => {
                for (reader_guid, reader) in self.inner.readers_for(data.reader_id) {
                    let events = reader.lock().process_data_msg(
                        ctx.source_guid_prefix,
                        data,
                        ctx.timestamp,
                    );
                    self.inner.forward_reader_events(reader_guid, events);
                }
            }
        }
    }

    fn on_data_frag(&mut self, ctx: &ReceiverContext, frag: &DataFragSubmessage) {
        for (reader_guid, reader) in self.inner.readers_for(frag.reader_id) {
            let events =
                reader
                    .lock()
                    .process_data_frag_msg(ctx.source_guid_prefix, frag, ctx.timestamp);
            self.inner.forward_reader_events(reader_guid, events);
        }
    }

    fn on_heartbeat(&mut self, ctx: &ReceiverContext, heartbeat: &HeartbeatSubmessage) {
        let writer_guid = Guid::new(ctx.source_guid_prefix, heartbeat.writer_id);
        match heartbeat.writer_id {
            EntityId::SEDP_PUBLICATIONS_WRITER => {
                let disposition = self
                    .inner
                    .edp()
                    .publications_reader
                    .lock()
                    .process_heartbeat_msg(ctx.source_guid_prefix, heartbeat);
                if let Some(delay) = disposition.acknack_after {
                    self.acknack_schedules
                        .push((ReaderTarget::EdpPublications, writer_guid, delay));
                }
            }
            EntityId::SEDP_SUBSCRIPTIONS_WRITER => {
                let disposition = self
                    .inner
                    .edp()
                    .subscriptions_reader
                    .lock()
                    .process_heartbeat_msg(ctx.source_guid_prefix, heartbeat);
                if let Some(delay) = disposition.acknack_after {
                    self.acknack_schedules
                        .push((ReaderTarget::EdpSubscriptions, writer_guid, delay));
                }
            }
            _ => {
                for (reader_guid, reader) in self.inner.readers_for(heartbeat.reader_id) {
                    let disposition = reader
                        .lock()
                        .process_heartbeat_msg(ctx.source_guid_prefix, heartbeat);
                    self.inner
                        .forward_reader_events(reader_guid, disposition.events);
                    if let Some(delay) = disposition.acknack_after {
                        self.acknack_schedules.push((
                            ReaderTarget::User(reader_guid.entity_id),
                            writer_guid,
                            delay,
                        ));
                    }
                }
            }
        }
    }

    fn on_heartbeat_frag(&mut self, ctx: &ReceiverContext, heartbeat: &HeartbeatFragSubmessage) {
        // Missing fragments are answered through the regular ACKNACK path,
        // which piggybacks NACK_FRAG for partial samples.
        let writer_guid = Guid::new(ctx.source_guid_prefix, heartbeat.writer_id);
        for (reader_guid, reader) in self.inner.readers_for(heartbeat.reader_id) {
            let delay = reader.lock().attributes().heartbeat_response_delay;
            self.acknack_schedules.push((
                ReaderTarget::User(reader_guid.entity_id),
                writer_guid,
                delay,
            ));
        }
    }

    fn on_acknack(&mut self, ctx: &ReceiverContext, acknack: &AckNackSubmessage) {
        let reader_guid = Guid::new(ctx.source_guid_prefix, acknack.reader_id);
        match acknack.writer_id {
            EntityId::SEDP_PUBLICATIONS_WRITER => {
                if let Ok(ops) = self
                    .inner
                    .edp()
                    .publications_writer
                    .lock()
                    .process_acknack(reader_guid, acknack)
                {
                    self.ops.extend(ops);
                }
            }
            EntityId::SEDP_SUBSCRIPTIONS_WRITER => {
                if let Ok(ops) = self
                    .inner
                    .edp()
                    .subscriptions_writer
                    .lock()
                    .process_acknack(reader_guid, acknack)
                {
                    self.ops.extend(ops);
                }
            }
            EntityId::SPDP_WRITER => {
                // SPDP is best-effort; a peer acknacking it is ignored.
            }
            entity_id => {
                if let Some(writer) = self.inner.writer_by_entity(entity_id) {
                    match writer.lock().process_acknack(reader_guid, acknack) {
                        Ok(ops) => self.ops.extend(ops),
                        Err(e) => log::debug!("[DEMUX] acknack processing failed: {e}"),
                    }
                }
                // Unknown entity ids are silently ignored.
            }
        }
    }

    fn on_nack_frag(&mut self, ctx: &ReceiverContext, nack: &NackFragSubmessage) {
        let reader_guid = Guid::new(ctx.source_guid_prefix, nack.reader_id);
        if let Some(writer) = self.inner.writer_by_entity(nack.writer_id) {
            match writer.lock().process_nackfrag(reader_guid, nack) {
                Ok(ops) => self.ops.extend(ops),
                Err(e) => log::debug!("[DEMUX] nackfrag processing failed: {e}"),
            }
        }
    }

    fn on_gap(&mut self, ctx: &ReceiverContext, gap: &GapSubmessage) {
        match gap.writer_id {
            EntityId::SEDP_PUBLICATIONS_WRITER => {
                self.inner
                    .edp()
                    .publications_reader
                    .lock()
                    .process_gap_msg(ctx.source_guid_prefix, gap);
            }
            EntityId::SEDP_SUBSCRIPTIONS_WRITER => {
                self.inner
                    .edp()
                    .subscriptions_reader
                    .lock()
                    .process_gap_msg(ctx.source_guid_prefix, gap);
            }
            _ => {
                for (_, reader) in self.inner.readers_for(gap.reader_id) {
                    reader.lock().process_gap_msg(ctx.source_guid_prefix, gap);
                }
            }
        }
    }
}
