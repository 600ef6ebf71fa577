//! Partitioned In-Memory Store
//!
//! Many named partitions multiplexed over one in-process structure. Each
//! partition behaves as a privately owned store; a shared clock issues
//! composite insertion ordinals so eviction stays deterministic even when
//! coarse timestamps collide.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::ordinal::OrdinalClock;
use crate::store::{InMemoryStore, ObjectStore, PartitionableStore};

/// Shard the partition directory by available parallelism
fn shard_amount() -> usize {
    (num_cpus::get() * 4).next_power_of_two()
}

/// In-memory base store multiplexing named partitions
///
/// Partition lookup goes through a sharded concurrent map, so operations
/// on different partitions do not contend on one lock; entries within a
/// partition are guarded by that partition's own lock.
pub struct PartitionedInMemoryStore {
    partitions: DashMap<String, Arc<InMemoryStore>>,
    clock: OrdinalClock,
}

impl Default for PartitionedInMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionedInMemoryStore {
    pub fn new() -> Self {
        Self {
            partitions: DashMap::with_shard_amount(shard_amount()),
            clock: OrdinalClock::new(),
        }
    }

    /// Number of open partitions
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn partition(&self, name: &str) -> Option<Arc<InMemoryStore>> {
        self.partitions.get(name).map(|entry| entry.value().clone())
    }

    fn partition_or_create(&self, name: &str) -> Arc<InMemoryStore> {
        self.partitions
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(InMemoryStore::new()))
            .value()
            .clone()
    }
}

impl PartitionableStore for PartitionedInMemoryStore {
    fn open_partition(&self, partition: &str) -> StoreResult<()> {
        self.partition_or_create(partition);
        Ok(())
    }

    fn close_partition(&self, _partition: &str) -> StoreResult<()> {
        Ok(())
    }

    fn store_in(&self, partition: &str, key: &str, value: Bytes) -> StoreResult<()> {
        self.partition_or_create(partition)
            .insert_entry(key, value, self.clock.next())
    }

    fn retrieve_from(&self, partition: &str, key: &str) -> StoreResult<Bytes> {
        self.partition(partition)
            .ok_or_else(|| StoreError::DoesNotExist(key.to_owned()))?
            .retrieve(key)
    }

    fn remove_from(&self, partition: &str, key: &str) -> StoreResult<Bytes> {
        self.partition(partition)
            .ok_or_else(|| StoreError::DoesNotExist(key.to_owned()))?
            .remove(key)
    }

    fn contains_in(&self, partition: &str, key: &str) -> bool {
        self.partition(partition)
            .map(|store| store.contains(key))
            .unwrap_or(false)
    }

    fn clear_partition(&self, partition: &str) -> StoreResult<()> {
        if let Some(store) = self.partition(partition) {
            store.clear()?;
        }
        Ok(())
    }

    fn keys_in(&self, partition: &str) -> StoreResult<Vec<String>> {
        match self.partition(partition) {
            Some(store) => store.all_keys(),
            None => Ok(Vec::new()),
        }
    }

    fn retrieve_all_in(&self, partition: &str) -> StoreResult<HashMap<String, Bytes>> {
        match self.partition(partition) {
            Some(store) => store.retrieve_all(),
            None => Ok(HashMap::new()),
        }
    }

    fn expire(
        &self,
        partition: &str,
        entry_ttl: Option<Duration>,
        max_entries: Option<usize>,
    ) -> StoreResult<usize> {
        let Some(store) = self.partition(partition) else {
            return Ok(0);
        };
        let removed = store.expire_entries(self.clock.now_nanos(), entry_ttl, max_entries);
        if removed > 0 {
            debug!(partition, removed, "expired entries");
        }
        Ok(removed)
    }

    fn dispose_partition(&self, partition: &str) -> StoreResult<()> {
        self.partitions.remove(partition);
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordinal::Ordinal;
    use crate::store::{ObjectStore, StorePartition};
    use std::thread;

    #[test]
    fn test_partition_isolation() {
        let store = PartitionedInMemoryStore::new();

        // Same key in two partitions of one backing structure
        store
            .store_in("dedup", "key", Bytes::from_static(b"first"))
            .unwrap();
        store
            .store_in("correlation", "key", Bytes::from_static(b"second"))
            .unwrap();

        assert_eq!(
            store.retrieve_from("dedup", "key").unwrap().as_ref(),
            b"first"
        );
        assert_eq!(
            store.retrieve_from("correlation", "key").unwrap().as_ref(),
            b"second"
        );

        // Removing from one partition leaves the other untouched
        store.remove_from("dedup", "key").unwrap();
        assert!(!store.contains_in("dedup", "key"));
        assert!(store.contains_in("correlation", "key"));
    }

    #[test]
    fn test_clear_is_scoped_to_one_partition() {
        let store = PartitionedInMemoryStore::new();
        store.store_in("a", "k1", Bytes::from_static(b"1")).unwrap();
        store.store_in("a", "k2", Bytes::from_static(b"2")).unwrap();
        store.store_in("b", "k1", Bytes::from_static(b"3")).unwrap();

        store.clear_partition("a").unwrap();
        assert!(store.keys_in("a").unwrap().is_empty());
        assert_eq!(store.keys_in("b").unwrap(), vec!["k1"]);
    }

    #[test]
    fn test_missing_partition_behaves_as_empty() {
        let store = PartitionedInMemoryStore::new();
        assert!(store
            .retrieve_from("ghost", "key")
            .unwrap_err()
            .is_does_not_exist());
        assert!(!store.contains_in("ghost", "key"));
        assert!(store.keys_in("ghost").unwrap().is_empty());
        assert_eq!(store.expire("ghost", None, Some(1)).unwrap(), 0);
    }

    #[test]
    fn test_expire_count_trim_keeps_most_recent() {
        let store = PartitionedInMemoryStore::new();
        for i in 0..10 {
            store
                .store_in("p", &format!("key{i}"), Bytes::from(vec![i as u8]))
                .unwrap();
        }

        let removed = store.expire("p", None, Some(4)).unwrap();
        assert_eq!(removed, 6);

        let mut keys = store.keys_in("p").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["key6", "key7", "key8", "key9"]);
    }

    #[test]
    fn test_tie_break_evicts_one_of_colliding_pair() {
        let store = PartitionedInMemoryStore::new();
        let partition = store.partition_or_create("p");

        // A and B share one coarse timestamp; C is strictly later
        partition
            .insert_entry("a", Bytes::from_static(b"a"), Ordinal::new(500, 0))
            .unwrap();
        partition
            .insert_entry("b", Bytes::from_static(b"b"), Ordinal::new(500, 1))
            .unwrap();
        partition
            .insert_entry("c", Bytes::from_static(b"c"), Ordinal::new(900, 2))
            .unwrap();

        // Trimming to two entries must evict exactly the lowest sequence
        // of the colliding pair, never C
        let removed = store.expire("p", None, Some(2)).unwrap();
        assert_eq!(removed, 1);
        assert!(!store.contains_in("p", "a"));
        assert!(store.contains_in("p", "b"));
        assert!(store.contains_in("p", "c"));
    }

    #[test]
    fn test_ttl_and_count_both_bounded() {
        let store = PartitionedInMemoryStore::new();
        let partition = store.partition_or_create("p");

        partition
            .insert_entry("stale", Bytes::from_static(b"s"), Ordinal::new(0, 0))
            .unwrap();
        for i in 0..4 {
            let at = 1_800_000_000 + i;
            partition
                .insert_entry(
                    &format!("fresh{i}"),
                    Bytes::from_static(b"f"),
                    Ordinal::new(at, 1 + i),
                )
                .unwrap();
        }

        // TTL drops the stale entry first, then the count pass trims the
        // oldest survivors down to the bound
        let now = 2_000_000_000;
        let removed =
            partition.expire_entries(now, Some(Duration::from_millis(500)), Some(2));
        assert_eq!(removed, 3);
        assert!(!partition.contains("stale"));
        assert!(!partition.contains("fresh0"));
        assert!(!partition.contains("fresh1"));
        assert!(partition.contains("fresh2"));
        assert!(partition.contains("fresh3"));
    }

    #[test]
    fn test_dispose_partition_forgets_entries() {
        let store = Arc::new(PartitionedInMemoryStore::new());
        store.store_in("p", "key", Bytes::from_static(b"v")).unwrap();

        store.dispose_partition("p").unwrap();
        assert!(!store.contains_in("p", "key"));

        // Reopening yields a fresh partition
        store.open_partition("p").unwrap();
        assert!(store.keys_in("p").unwrap().is_empty());
    }

    #[test]
    fn test_partition_handle_delegates() {
        let base: Arc<PartitionedInMemoryStore> = Arc::new(PartitionedInMemoryStore::new());
        let handle = StorePartition::new("events", base.clone());

        handle.open().unwrap();
        handle.store("key", Bytes::from_static(b"v")).unwrap();
        assert!(handle.contains("key"));
        assert!(!handle.is_persistent());
        assert!(base.contains_in("events", "key"));

        handle.clear().unwrap();
        assert!(!base.contains_in("events", "key"));
    }

    #[test]
    fn test_concurrent_partitions() {
        let store = Arc::new(PartitionedInMemoryStore::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    let partition = format!("partition-{i}");
                    for j in 0..200 {
                        store
                            .store_in(&partition, &format!("key{j}"), Bytes::from(vec![j as u8]))
                            .unwrap();
                    }
                    assert_eq!(store.keys_in(&partition).unwrap().len(), 200);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.partition_count(), 8);
    }
}
