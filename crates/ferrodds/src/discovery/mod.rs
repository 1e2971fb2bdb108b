// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Participant and endpoint discovery.
//!
//! SPDP announces the participant on well-known multicast; SEDP exchanges
//! writer/reader descriptors over reliable builtin endpoints; the
//! discovery-server client replaces multicast with unicast announcements to
//! configured servers.

pub mod data;
pub mod edp;
pub mod pdp;
pub mod server;

pub use data::{ParticipantProxyData, ReaderProxyData, WriterProxyData};
pub use edp::{Edp, EdpEvent};
pub use pdp::{Pdp, PdpEvent};
pub use server::DiscoveryServerClient;
