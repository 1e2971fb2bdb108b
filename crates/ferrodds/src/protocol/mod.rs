// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! RTPS message codec (DDS-RTPS v2.3 Sections 8.3, 9.4).
//!
//! Encoding and decoding of the full submessage vocabulary, parameter lists,
//! and the 20-byte message header. Endianness is per-message: the flag bit 0
//! of each submessage header selects the deserialization mode; serialization
//! uses the sender's preferred order (little-endian here).

pub mod constants;
pub mod cursor;
pub mod header;
pub mod parameter_list;
pub mod receiver;
pub mod submessage;

pub use header::MessageHeader;
pub use parameter_list::{Parameter, ParameterList};
pub use receiver::MessageReceiver;
pub use submessage::Submessage;
