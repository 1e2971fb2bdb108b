// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Crate-wide error type.
//!
//! Recovery is local wherever possible: a malformed submessage drops the
//! enclosing message (never the session), resource exhaustion surfaces as a
//! status on the operation that hit the limit, and `Timeout` is always
//! distinct from hard failure so blocking callers can tell the two apart.

use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the RTPS core.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    /// Domain ID out of range (0-232).
    InvalidDomainId(u32),
    /// Participant ID out of range (0-119).
    InvalidParticipantId(u32),
    /// No free participant ID on this host (all unicast port pairs occupied).
    NoAvailableParticipantId,
    /// QoS policy is invalid on its own (e.g. KEEP_LAST depth of zero).
    InvalidQos(&'static str),
    /// Entity configuration rejected (bad entity id, duplicate topic, ...).
    InvalidConfig(&'static str),

    // ========================================================================
    // Protocol
    // ========================================================================
    /// Malformed submessage, bad length field, or truncated buffer.
    /// The enclosing message is dropped; the session continues.
    Protocol(&'static str),
    /// A parameter with the must-understand bit set was not recognized.
    UnknownMandatoryParameter(u16),

    // ========================================================================
    // Resources
    // ========================================================================
    /// History, pool, or proxy capacity reached.
    ResourceLimit(&'static str),
    /// Writer history full and the blocked `add_change` deadline elapsed.
    Timeout,

    // ========================================================================
    // Runtime
    // ========================================================================
    /// Operation attempted on a torn-down or not-yet-enabled entity.
    InvalidState(&'static str),
    /// Requested entity does not exist.
    NotFound,
    /// Transport plugin reported a send/receive failure.
    Transport(std::io::Error),
    /// Internal invariant violated; the participant must be torn down.
    Fatal(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidDomainId(id) => write!(f, "domain id {id} out of range (0-232)"),
            Error::InvalidParticipantId(id) => {
                write!(f, "participant id {id} out of range (0-119)")
            }
            Error::NoAvailableParticipantId => write!(f, "no free participant id on this host"),
            Error::InvalidQos(why) => write!(f, "invalid qos: {why}"),
            Error::InvalidConfig(why) => write!(f, "invalid configuration: {why}"),
            Error::Protocol(why) => write!(f, "protocol error: {why}"),
            Error::UnknownMandatoryParameter(pid) => {
                write!(f, "unknown must-understand parameter 0x{pid:04x}")
            }
            Error::ResourceLimit(what) => write!(f, "resource limit reached: {what}"),
            Error::Timeout => write!(f, "operation timed out"),
            Error::InvalidState(why) => write!(f, "invalid state: {why}"),
            Error::NotFound => write!(f, "entity not found"),
            Error::Transport(e) => write!(f, "transport error: {e}"),
            Error::Fatal(why) => write!(f, "fatal internal error: {why}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(e)
    }
}

impl Error {
    /// True when the error is the distinct timeout status rather than a
    /// hard failure.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}
