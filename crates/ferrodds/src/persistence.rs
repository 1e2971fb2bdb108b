// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ferrodds contributors

//! Durability persistence plugin interface.
//!
//! TRANSIENT/PERSISTENT endpoints route their history through an
//! implementation of [`PersistenceService`]: writers load and store their
//! changes under a persistence GUID that survives restarts, readers store
//! the last sequence consumed per remote writer so redelivery resumes where
//! it stopped. The core ships an in-memory implementation used by tests;
//! durable backends live outside this crate.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::core::cache_change::CacheChange;
use crate::core::guid::Guid;
use crate::core::sequence_number::SequenceNumber;
use crate::Result;

/// Storage backend enabling TRANSIENT/PERSISTENT durability.
pub trait PersistenceService: Send + Sync {
    /// Load every stored change of a writer, ascending by sequence.
    fn load_writer_from_storage(&self, persistence_guid: Guid) -> Result<Vec<CacheChange>>;

    /// Persist one change before it is published.
    fn add_writer_change_to_storage(
        &self,
        persistence_guid: Guid,
        change: &CacheChange,
    ) -> Result<()>;

    /// Remove one change (acknowledged by everyone or evicted).
    fn remove_writer_change_from_storage(
        &self,
        persistence_guid: Guid,
        seq: SequenceNumber,
    ) -> Result<()>;

    /// Load the last consumed sequence per remote writer for a reader.
    fn load_reader_from_storage(
        &self,
        persistence_guid: Guid,
    ) -> Result<HashMap<Guid, SequenceNumber>>;

    /// Record the reader's progress against one remote writer.
    fn update_writer_seq_on_storage(
        &self,
        reader_persistence_guid: Guid,
        writer_guid: Guid,
        seq: SequenceNumber,
    ) -> Result<()>;
}

/// Volatile reference implementation; state lives for the process only.
#[derive(Default)]
pub struct InMemoryPersistence {
    writers: Mutex<HashMap<Guid, Vec<CacheChange>>>,
    readers: Mutex<HashMap<Guid, HashMap<Guid, SequenceNumber>>>,
}

impl InMemoryPersistence {
    #[must_use]
    pub fn new() -> Self {
        InMemoryPersistence::default()
    }
}

impl PersistenceService for InMemoryPersistence {
    fn load_writer_from_storage(&self, persistence_guid: Guid) -> Result<Vec<CacheChange>> {
        let mut changes = self
            .writers
            .lock()
            .get(&persistence_guid)
            .cloned()
            .unwrap_or_default();
        changes.sort_by_key(|c| c.sequence_number);
        Ok(changes)
    }

    fn add_writer_change_to_storage(
        &self,
        persistence_guid: Guid,
        change: &CacheChange,
    ) -> Result<()> {
        self.writers
            .lock()
            .entry(persistence_guid)
            .or_default()
            .push(change.clone());
        Ok(())
    }

    fn remove_writer_change_from_storage(
        &self,
        persistence_guid: Guid,
        seq: SequenceNumber,
    ) -> Result<()> {
        if let Some(changes) = self.writers.lock().get_mut(&persistence_guid) {
            changes.retain(|c| c.sequence_number != seq);
        }
        Ok(())
    }

    fn load_reader_from_storage(
        &self,
        persistence_guid: Guid,
    ) -> Result<HashMap<Guid, SequenceNumber>> {
        Ok(self
            .readers
            .lock()
            .get(&persistence_guid)
            .cloned()
            .unwrap_or_default())
    }

    fn update_writer_seq_on_storage(
        &self,
        reader_persistence_guid: Guid,
        writer_guid: Guid,
        seq: SequenceNumber,
    ) -> Result<()> {
        let mut readers = self.readers.lock();
        let entry = readers.entry(reader_persistence_guid).or_default();
        let slot = entry.entry(writer_guid).or_insert(SequenceNumber(0));
        if seq.0 > slot.0 {
            *slot = seq;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache_change::{ChangeKind, InstanceHandle};
    use crate::core::guid::{EntityId, GuidPrefix};

    fn guid(n: u8) -> Guid {
        Guid::new(GuidPrefix([n; 12]), EntityId::user(1, 0x02))
    }

    fn change(seq: i64) -> CacheChange {
        let mut c = CacheChange::new(ChangeKind::Alive, guid(1), InstanceHandle::NIL);
        c.sequence_number = SequenceNumber(seq);
        c
    }

    #[test]
    fn test_writer_changes_roundtrip_sorted() {
        let store = InMemoryPersistence::new();
        store.add_writer_change_to_storage(guid(1), &change(2)).unwrap();
        store.add_writer_change_to_storage(guid(1), &change(1)).unwrap();
        let loaded = store.load_writer_from_storage(guid(1)).unwrap();
        let seqs: Vec<i64> = loaded.iter().map(|c| c.sequence_number.0).collect();
        assert_eq!(seqs, vec![1, 2]);

        store
            .remove_writer_change_from_storage(guid(1), SequenceNumber(1))
            .unwrap();
        assert_eq!(store.load_writer_from_storage(guid(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_reader_progress_monotonic() {
        let store = InMemoryPersistence::new();
        let reader = guid(9);
        store
            .update_writer_seq_on_storage(reader, guid(1), SequenceNumber(5))
            .unwrap();
        // A stale update must not regress the stored mark.
        store
            .update_writer_seq_on_storage(reader, guid(1), SequenceNumber(3))
            .unwrap();
        let map = store.load_reader_from_storage(reader).unwrap();
        assert_eq!(map.get(&guid(1)), Some(&SequenceNumber(5)));
    }

    #[test]
    fn test_unknown_guid_loads_empty() {
        let store = InMemoryPersistence::new();
        assert!(store.load_writer_from_storage(guid(7)).unwrap().is_empty());
        assert!(store.load_reader_from_storage(guid(7)).unwrap().is_empty());
    }
}
