// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! RTPS endpoint state machines.
//!
//! Writers and readers come in stateless and stateful flavours expressed as
//! sum types over small data-only state structs; pluggable behaviour
//! (transport, persistence) stays behind traits. State machines never touch
//! the network themselves: every operation returns the messages to emit as
//! [`SendOperation`]s, and the caller sends them after releasing the
//! endpoint lock.

pub mod reader;
pub mod writer;

pub use reader::{
    MatchedWriter, ReaderEvent, RtpsReader, StatefulReader, StatelessReader, WriterProxy,
};
pub use writer::{
    ChangeForReaderStatus, MatchedReader, ReaderProxy, RtpsWriter, StatefulWriter, StatelessWriter,
};

use crate::core::locator::Locator;

/// One RTPS message bound for a set of destinations. Produced under the
/// endpoint lock, emitted after it is released.
#[derive(Debug)]
pub struct SendOperation {
    pub message: Vec<u8>,
    pub destinations: Vec<Locator>,
}

impl SendOperation {
    #[must_use]
    pub fn new(message: Vec<u8>, destinations: Vec<Locator>) -> Self {
        SendOperation {
            message,
            destinations,
        }
    }
}
