// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Writer and reader history caches.
//!
//! Both variants keep changes in ascending sequence-number order per writer
//! and enforce `{max_samples, max_instances, max_samples_per_instance}`.
//! Operations are synchronous and never perform I/O; blocking semantics
//! (RELIABLE + KEEP_ALL back-pressure) live in the endpoint state machines.

pub mod pool;
pub mod reader_history;
pub mod writer_history;

pub use pool::PayloadPool;
pub use reader_history::{ReaderHistory, ReceivedOutcome, SampleRejectedReason};
pub use writer_history::WriterHistory;

/// Instance view state: has the application seen this instance before.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ViewState {
    New,
    NotNew,
}

/// Instance lifecycle state derived from change kinds and writer liveliness.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InstanceState {
    Alive,
    NotAliveDisposed,
    NotAliveNoWriters,
}
