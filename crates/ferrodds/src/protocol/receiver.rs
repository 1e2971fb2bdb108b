// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! RTPS message receiver (Sec.8.3.4): walks a datagram's submessages,
//! maintaining the interpreter state (source, destination, timestamp) that
//! INFO_* submessages mutate, and hands entity submessages to a handler.
//!
//! A malformed submessage aborts the remainder of the message, never the
//! session. Unknown submessage ids are skipped.

use super::header::{MessageHeader, SubmessageHeader};
use super::submessage::{
    AckNackSubmessage, DataFragSubmessage, DataSubmessage, GapSubmessage,
    HeartbeatFragSubmessage, HeartbeatSubmessage, NackFragSubmessage, Submessage,
};
use crate::core::guid::GuidPrefix;
use crate::core::locator::Locator;
use crate::core::time::RtpsTime;
use crate::Result;

/// Interpreter state for the submessages of one message.
#[derive(Clone, Copy, Debug)]
pub struct ReceiverContext {
    /// Prefix of the sending participant (header, or INFO_SRC override).
    pub source_guid_prefix: GuidPrefix,
    pub source_vendor_id: [u8; 2],
    pub source_version: (u8, u8),
    /// Set by INFO_DST: only endpoints of this participant may consume
    /// subsequent submessages. `None` addresses everyone.
    pub dest_guid_prefix: Option<GuidPrefix>,
    /// Set by INFO_TS: source timestamp for subsequent DATA.
    pub timestamp: Option<RtpsTime>,
    /// Transport-level origin of the datagram, when known.
    pub source_locator: Option<Locator>,
}

/// Consumer of entity submessages. The receiver has already applied INFO_*
/// bookkeeping; handlers must not perform I/O (Sec.8.3.4.1 receive-path
/// discipline).
pub trait SubmessageHandler {
    fn on_data(&mut self, ctx: &ReceiverContext, data: &DataSubmessage);
    fn on_data_frag(&mut self, ctx: &ReceiverContext, frag: &DataFragSubmessage);
    fn on_heartbeat(&mut self, ctx: &ReceiverContext, heartbeat: &HeartbeatSubmessage);
    fn on_heartbeat_frag(&mut self, ctx: &ReceiverContext, heartbeat: &HeartbeatFragSubmessage);
    fn on_acknack(&mut self, ctx: &ReceiverContext, acknack: &AckNackSubmessage);
    fn on_nack_frag(&mut self, ctx: &ReceiverContext, nack: &NackFragSubmessage);
    fn on_gap(&mut self, ctx: &ReceiverContext, gap: &GapSubmessage);
}

/// Stateless message walker bound to the local participant's prefix.
pub struct MessageReceiver {
    own_prefix: GuidPrefix,
}

impl MessageReceiver {
    #[must_use]
    pub fn new(own_prefix: GuidPrefix) -> Self {
        MessageReceiver { own_prefix }
    }

    /// Process one datagram. Returns `Ok(false)` when the message was
    /// dropped whole (self-sourced or foreign protocol), `Ok(true)` when at
    /// least the header parsed and submessages were dispatched.
    pub fn process<H: SubmessageHandler>(
        &self,
        datagram: &[u8],
        source_locator: Option<Locator>,
        handler: &mut H,
    ) -> Result<bool> {
        let header = MessageHeader::decode(datagram)?;
        if header.guid_prefix == self.own_prefix {
            // Our own multicast loopback.
            return Ok(false);
        }

        let mut ctx = ReceiverContext {
            source_guid_prefix: header.guid_prefix,
            source_vendor_id: header.vendor_id,
            source_version: header.version,
            dest_guid_prefix: None,
            timestamp: None,
            source_locator,
        };

        let mut offset = super::constants::MESSAGE_HEADER_SIZE;
        while offset < datagram.len() {
            let (sub_header, body, consumed) = SubmessageHeader::split(&datagram[offset..])?;
            offset += consumed;

            let submessage = Submessage::decode(&sub_header, body)?;
            match &submessage {
                Submessage::InfoTs(ts) => ctx.timestamp = ts.timestamp,
                Submessage::InfoDst(dst) => {
                    ctx.dest_guid_prefix = if dst.guid_prefix.is_unknown() {
                        None
                    } else {
                        Some(dst.guid_prefix)
                    };
                }
                Submessage::InfoSrc(src) => {
                    ctx.source_guid_prefix = src.guid_prefix;
                    ctx.source_vendor_id = src.vendor_id;
                    ctx.source_version = src.version;
                    // A new source resets the per-source interpreter state.
                    ctx.timestamp = None;
                }
                Submessage::InfoReply(_) => {
                    // Reply locators are advisory; discovery-announced
                    // locators take precedence in this implementation.
                }
                Submessage::Unknown { id } => {
                    log::trace!("[RECEIVER] skipping unknown submessage id 0x{id:02x}");
                }
                Submessage::Data(_)
                | Submessage::DataFrag(_)
                | Submessage::Heartbeat(_)
                | Submessage::HeartbeatFrag(_)
                | Submessage::AckNack(_)
                | Submessage::NackFrag(_)
                | Submessage::Gap(_) => {
                    if self.addressed_to_us(&ctx) {
                        dispatch(&ctx, &submessage, handler);
                    }
                }
            }
        }
        Ok(true)
    }

    fn addressed_to_us(&self, ctx: &ReceiverContext) -> bool {
        match ctx.dest_guid_prefix {
            None => true,
            Some(dst) => dst == self.own_prefix,
        }
    }
}

fn dispatch<H: SubmessageHandler>(ctx: &ReceiverContext, sub: &Submessage, handler: &mut H) {
    match sub {
        Submessage::Data(s) => handler.on_data(ctx, s),
        Submessage::DataFrag(s) => handler.on_data_frag(ctx, s),
        Submessage::Heartbeat(s) => handler.on_heartbeat(ctx, s),
        Submessage::HeartbeatFrag(s) => handler.on_heartbeat_frag(ctx, s),
        Submessage::AckNack(s) => handler.on_acknack(ctx, s),
        Submessage::NackFrag(s) => handler.on_nack_frag(ctx, s),
        Submessage::Gap(s) => handler.on_gap(ctx, s),
        _ => {}
    }
}
