//! Store Backends
//!
//! The base store contract, the in-memory and persistent backends, the
//! partition multiplexers, and the bounding decorator.

mod evicting;
mod in_memory;
mod partitioned;
mod persistent;

pub use evicting::EvictingStoreWrapper;
pub use in_memory::InMemoryStore;
pub use partitioned::PartitionedInMemoryStore;
pub use persistent::PersistentPartitionStore;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::StoreResult;

/// Minimal keyed-store contract
///
/// Keys are strings, values are opaque byte payloads. `store` fails if
/// the key is present, `retrieve`/`remove` fail if it is absent;
/// `contains` never fails. `all_keys` and `retrieve_all` are
/// point-in-time snapshots.
pub trait ObjectStore: Send + Sync {
    /// Acquire backing resources; idempotent
    fn open(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Release backing resources; idempotent, safe on all exit paths
    fn close(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Insert a new entry; fails `AlreadyExists` if the key is present
    fn store(&self, key: &str, value: Bytes) -> StoreResult<()>;

    /// Read an entry; fails `DoesNotExist` if the key is absent
    fn retrieve(&self, key: &str) -> StoreResult<Bytes>;

    /// Remove an entry and return its value; fails `DoesNotExist` if absent
    fn remove(&self, key: &str) -> StoreResult<Bytes>;

    /// Whether the key is currently present
    fn contains(&self, key: &str) -> bool;

    /// Drop every entry
    fn clear(&self) -> StoreResult<()>;

    /// Snapshot of all live keys
    fn all_keys(&self) -> StoreResult<Vec<String>>;

    /// Snapshot of all live entries
    fn retrieve_all(&self) -> StoreResult<HashMap<String, Bytes>>;

    /// Whether entries survive a process restart
    fn is_persistent(&self) -> bool;
}

/// A base store multiplexing many named partitions over one backing
/// structure
///
/// Operations on one partition never observe another partition sharing
/// the structure; different partitions do not contend on one lock.
pub trait PartitionableStore: Send + Sync {
    /// Create the partition if needed; idempotent
    fn open_partition(&self, partition: &str) -> StoreResult<()>;

    /// Release per-partition resources without touching stored entries
    fn close_partition(&self, partition: &str) -> StoreResult<()>;

    fn store_in(&self, partition: &str, key: &str, value: Bytes) -> StoreResult<()>;

    fn retrieve_from(&self, partition: &str, key: &str) -> StoreResult<Bytes>;

    fn remove_from(&self, partition: &str, key: &str) -> StoreResult<Bytes>;

    fn contains_in(&self, partition: &str, key: &str) -> bool;

    /// Drop every entry in the partition, keeping the partition usable
    fn clear_partition(&self, partition: &str) -> StoreResult<()>;

    fn keys_in(&self, partition: &str) -> StoreResult<Vec<String>>;

    fn retrieve_all_in(&self, partition: &str) -> StoreResult<HashMap<String, Bytes>>;

    /// Run one expiry pass over the partition and return the number of
    /// entries removed
    ///
    /// Drops entries older than `entry_ttl` when bounded, then trims the
    /// oldest surplus beyond `max_entries` when bounded; both passes walk
    /// entries in composite insertion order.
    fn expire(
        &self,
        partition: &str,
        entry_ttl: Option<Duration>,
        max_entries: Option<usize>,
    ) -> StoreResult<usize>;

    /// Delete the partition and everything in it
    fn dispose_partition(&self, partition: &str) -> StoreResult<()>;

    fn is_persistent(&self) -> bool;
}

/// Handle binding one partition name to a shared partitionable base
///
/// Implements the plain store contract by delegating every call with the
/// partition name attached, so callers hold an ordinary store and never
/// see the multiplexing.
pub struct StorePartition {
    partition: String,
    base: Arc<dyn PartitionableStore>,
}

impl StorePartition {
    pub fn new(partition: impl Into<String>, base: Arc<dyn PartitionableStore>) -> Self {
        Self {
            partition: partition.into(),
            base,
        }
    }

    pub fn partition_name(&self) -> &str {
        &self.partition
    }
}

impl ObjectStore for StorePartition {
    fn open(&self) -> StoreResult<()> {
        self.base.open_partition(&self.partition)
    }

    fn close(&self) -> StoreResult<()> {
        self.base.close_partition(&self.partition)
    }

    fn store(&self, key: &str, value: Bytes) -> StoreResult<()> {
        self.base.store_in(&self.partition, key, value)
    }

    fn retrieve(&self, key: &str) -> StoreResult<Bytes> {
        self.base.retrieve_from(&self.partition, key)
    }

    fn remove(&self, key: &str) -> StoreResult<Bytes> {
        self.base.remove_from(&self.partition, key)
    }

    fn contains(&self, key: &str) -> bool {
        self.base.contains_in(&self.partition, key)
    }

    fn clear(&self) -> StoreResult<()> {
        self.base.clear_partition(&self.partition)
    }

    fn all_keys(&self) -> StoreResult<Vec<String>> {
        self.base.keys_in(&self.partition)
    }

    fn retrieve_all(&self) -> StoreResult<HashMap<String, Bytes>> {
        self.base.retrieve_all_in(&self.partition)
    }

    fn is_persistent(&self) -> bool {
        self.base.is_persistent()
    }
}
