// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Shared fixtures for the end-to-end tests: participants wired over the
//! intra-process hub instead of real sockets.
#![allow(dead_code)] // not every binary uses every fixture

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ferrodds::core::locator::Locator;
use ferrodds::transport::{MemHub, MemTransport};
use ferrodds::{ParticipantConfig, RtpsParticipant};

/// The shared "multicast" locator every test participant listens on.
pub fn multicast() -> Locator {
    Locator::udpv4(Ipv4Addr::new(239, 255, 0, 1), 7400)
}

/// Per-participant metatraffic unicast locator.
pub fn meta_unicast(n: u8) -> Locator {
    Locator::udpv4(Ipv4Addr::new(10, 0, 0, n), 7401)
}

/// Per-participant user-data unicast locator.
pub fn user_unicast(n: u8) -> Locator {
    Locator::udpv4(Ipv4Addr::new(10, 0, 0, n), 7411)
}

/// Build a participant on the hub with the given host octet.
pub fn participant(hub: &Arc<MemHub>, n: u8, config: ParticipantConfig) -> RtpsParticipant {
    let transport = Arc::new(MemTransport::new(Arc::clone(hub), meta_unicast(n)));
    RtpsParticipant::with_transport(
        config,
        transport,
        vec![meta_unicast(n)],
        vec![multicast()],
        vec![user_unicast(n)],
    )
    .expect("participant construction")
}

/// Poll `pred` until it holds or `budget` elapses.
pub fn wait_until<F: FnMut() -> bool>(mut pred: F, budget: Duration) -> bool {
    let deadline = Instant::now() + budget;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    pred()
}

/// Generous budget for discovery and reliability cycles.
pub const E2E_BUDGET: Duration = Duration::from_secs(10);
