//! In-Memory Store
//!
//! Lock-guarded key-value map with no eviction of its own. Used directly
//! for unbounded transient state, or as the per-partition substrate under
//! the partitioned in-memory store.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use hashbrown::HashMap as EntryMap;
use parking_lot::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::ordinal::{Ordinal, OrdinalClock};
use crate::store::ObjectStore;

/// Live entry: value plus its insertion ordinal
#[derive(Debug, Clone)]
pub(crate) struct MemEntry {
    pub(crate) value: Bytes,
    pub(crate) ordinal: Ordinal,
}

/// Thread-safe in-memory key-value store
#[derive(Debug)]
pub struct InMemoryStore {
    entries: RwLock<EntryMap<String, MemEntry>>,
    clock: OrdinalClock,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(EntryMap::new()),
            clock: OrdinalClock::new(),
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert with a caller-supplied ordinal; the partitioned owner issues
    /// ordinals from its shared clock so inserts across partitions stay
    /// totally ordered.
    pub(crate) fn insert_entry(&self, key: &str, value: Bytes, ordinal: Ordinal) -> StoreResult<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.to_owned()));
        }
        entries.insert(key.to_owned(), MemEntry { value, ordinal });
        Ok(())
    }

    /// One expiry pass against a `now` taken from the clock that issued
    /// the ordinals. Returns the number of entries removed.
    pub(crate) fn expire_entries(
        &self,
        now_nanos: u64,
        entry_ttl: Option<Duration>,
        max_entries: Option<usize>,
    ) -> usize {
        let mut entries = self.entries.write();
        let mut removed = 0;

        if let Some(ttl) = entry_ttl {
            let ttl_nanos = ttl.as_nanos() as u64;
            let before = entries.len();
            entries.retain(|_, entry| now_nanos.saturating_sub(entry.ordinal.at) < ttl_nanos);
            removed += before - entries.len();
        }

        if let Some(max) = max_entries {
            if entries.len() > max {
                let mut by_age: Vec<(Ordinal, String)> = entries
                    .iter()
                    .map(|(key, entry)| (entry.ordinal, key.clone()))
                    .collect();
                // Composite order: timestamp, then tie-break sequence
                by_age.sort_unstable();
                let surplus = entries.len() - max;
                for (_, key) in by_age.into_iter().take(surplus) {
                    entries.remove(&key);
                    removed += 1;
                }
            }
        }

        removed
    }
}

impl ObjectStore for InMemoryStore {
    fn store(&self, key: &str, value: Bytes) -> StoreResult<()> {
        self.insert_entry(key, value, self.clock.next())
    }

    fn retrieve(&self, key: &str) -> StoreResult<Bytes> {
        self.entries
            .read()
            .get(key)
            .map(|entry| entry.value.clone())
            .ok_or_else(|| StoreError::DoesNotExist(key.to_owned()))
    }

    fn remove(&self, key: &str) -> StoreResult<Bytes> {
        // The entry is moved out; nothing of the value stays behind
        self.entries
            .write()
            .remove(key)
            .map(|entry| entry.value)
            .ok_or_else(|| StoreError::DoesNotExist(key.to_owned()))
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    fn clear(&self) -> StoreResult<()> {
        self.entries.write().clear();
        Ok(())
    }

    fn all_keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn retrieve_all(&self) -> StoreResult<HashMap<String, Bytes>> {
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}
