// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Payload buffer pool shared by a history and its peers.
//!
//! Pool behaviour follows the endpoint's `memory_policy`; a history and the
//! proxies referencing its changes hold the pool through a reference-counted
//! handle, so the last releaser returns the buffer.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::qos::MemoryPolicy;
use crate::{Error, Result};

/// Reference-counted payload buffer pool.
pub struct PayloadPool {
    policy: MemoryPolicy,
    /// Slot capacity for the preallocated policies.
    slot_size: usize,
    /// Maximum buffers alive at once (taken + free).
    max_buffers: usize,
    free: Mutex<Vec<Vec<u8>>>,
    outstanding: AtomicUsize,
}

impl PayloadPool {
    /// Create a pool. `initial` buffers are allocated up front for the
    /// preallocated policies; the dynamic policies start empty.
    #[must_use]
    pub fn new(policy: MemoryPolicy, slot_size: usize, initial: usize, max_buffers: usize) -> Self {
        let free = match policy {
            MemoryPolicy::Preallocated | MemoryPolicy::PreallocatedWithRealloc => {
                (0..initial).map(|_| Vec::with_capacity(slot_size)).collect()
            }
            MemoryPolicy::DynamicReserve | MemoryPolicy::DynamicReusable => Vec::new(),
        };
        PayloadPool {
            policy,
            slot_size,
            max_buffers,
            free: Mutex::new(free),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Obtain a buffer able to hold `len` bytes.
    pub fn take(&self, len: usize) -> Result<Vec<u8>> {
        if self.policy == MemoryPolicy::Preallocated && len > self.slot_size {
            return Err(Error::ResourceLimit("payload exceeds preallocated slot"));
        }
        if self.outstanding.load(Ordering::Relaxed) >= self.max_buffers {
            return Err(Error::ResourceLimit("payload pool exhausted"));
        }

        let mut buf = {
            let mut free = self.free.lock();
            free.pop().unwrap_or_default()
        };
        if buf.capacity() < len {
            match self.policy {
                MemoryPolicy::Preallocated => {
                    // Capacity is fixed; the len check above already passed,
                    // so this buffer simply was never sized. Size it once.
                    buf.reserve_exact(self.slot_size - buf.capacity());
                }
                _ => buf.reserve_exact(len - buf.capacity()),
            }
        }
        buf.clear();
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Ok(buf)
    }

    /// Return a buffer to the pool.
    pub fn release(&self, buf: Vec<u8>) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        match self.policy {
            MemoryPolicy::DynamicReserve => drop(buf),
            _ => self.free.lock().push(buf),
        }
    }

    /// Buffers currently taken.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preallocated_rejects_oversize() {
        let pool = PayloadPool::new(MemoryPolicy::Preallocated, 64, 2, 8);
        assert!(pool.take(65).is_err());
        assert!(pool.take(64).is_ok());
    }

    #[test]
    fn test_realloc_grows_slot() {
        let pool = PayloadPool::new(MemoryPolicy::PreallocatedWithRealloc, 64, 1, 8);
        let buf = pool.take(1000).unwrap();
        assert!(buf.capacity() >= 1000);
        pool.release(buf);
    }

    #[test]
    fn test_max_buffers_enforced() {
        let pool = PayloadPool::new(MemoryPolicy::DynamicReusable, 0, 0, 2);
        let a = pool.take(10).unwrap();
        let _b = pool.take(10).unwrap();
        assert!(pool.take(10).is_err());
        pool.release(a);
        assert!(pool.take(10).is_ok());
    }

    #[test]
    fn test_dynamic_reusable_keeps_buffers() {
        let pool = PayloadPool::new(MemoryPolicy::DynamicReusable, 0, 0, 4);
        let mut buf = pool.take(128).unwrap();
        buf.extend_from_slice(&[1; 128]);
        let cap = buf.capacity();
        pool.release(buf);
        let again = pool.take(64).unwrap();
        assert!(again.capacity() >= cap.min(64));
        assert!(again.is_empty(), "released buffers come back cleared");
    }
}
