// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Transport plugin interface and the registry the participant sends
//! through.
//!
//! Transports are pluggable behind [`TransportPlugin`]; the core ships a
//! UDPv4 implementation and an intra-process loopback used by the
//! integration tests.

pub mod mem;
pub mod udp;

pub use mem::{MemHub, MemTransport};
pub use udp::UdpTransport;

use std::sync::Arc;
use std::time::Instant;

use crate::core::locator::Locator;
use crate::Result;

/// Callback invoked for every received datagram: `(payload, source)`.
/// Runs on the transport's receive thread; implementations parse and
/// dispatch inline and must not block.
pub type DatagramCallback = Arc<dyn Fn(&[u8], Locator) + Send + Sync>;

/// A pluggable transport implementation.
pub trait TransportPlugin: Send + Sync {
    /// Locator kinds this transport can reach.
    fn supported_kinds(&self) -> Vec<i32>;

    /// Open a receive channel bound to `locator` (joining multicast groups
    /// as needed); `on_datagram` fires for every received datagram.
    fn create_input_channel(
        &self,
        locator: Locator,
        max_message_size: usize,
        on_datagram: DatagramCallback,
    ) -> Result<()>;

    /// Prepare for sending towards `locator`'s kind.
    fn create_output_channel(&self, locator: Locator) -> Result<()>;

    /// Send one buffer to each destination. Returns false when every
    /// destination failed; partial success is success (reliability sits
    /// above the transport).
    fn send(&self, buffer: &[u8], destinations: &[Locator], deadline: Instant) -> bool;

    fn is_locator_supported(&self, locator: &Locator) -> bool;

    /// Expand wildcard locators (e.g. 0.0.0.0) into concrete per-interface
    /// locators for announcement.
    fn normalize_locator(&self, locator: &Locator) -> Vec<Locator>;

    /// Close all channels and join receive threads.
    fn shutdown(&self);
}

/// The participant's set of registered transports.
#[derive(Default)]
pub struct TransportRegistry {
    transports: Vec<Arc<dyn TransportPlugin>>,
}

impl TransportRegistry {
    #[must_use]
    pub fn new() -> Self {
        TransportRegistry::default()
    }

    pub fn register(&mut self, transport: Arc<dyn TransportPlugin>) {
        self.transports.push(transport);
    }

    #[must_use]
    pub fn transports(&self) -> &[Arc<dyn TransportPlugin>] {
        &self.transports
    }

    /// Union of locator kinds reachable through any registered transport.
    #[must_use]
    pub fn supported_kinds(&self) -> Vec<i32> {
        let mut kinds: Vec<i32> = self
            .transports
            .iter()
            .flat_map(|t| t.supported_kinds())
            .collect();
        kinds.sort_unstable();
        kinds.dedup();
        kinds
    }

    /// Route one buffer to each destination through whichever transport
    /// supports it.
    pub fn send(&self, buffer: &[u8], destinations: &[Locator], deadline: Instant) {
        for transport in &self.transports {
            let reachable: Vec<Locator> = destinations
                .iter()
                .filter(|l| transport.is_locator_supported(l))
                .copied()
                .collect();
            if !reachable.is_empty() && !transport.send(buffer, &reachable, deadline) {
                log::debug!("[TRANSPORT] send failed towards {reachable:?}");
            }
        }
    }

    pub fn shutdown(&self) {
        for transport in &self.transports {
            transport.shutdown();
        }
    }
}
