//! OBSTOR - Pluggable Object Store Runtime
//!
//! Keyed storage for integration-runtime state (dedup markers,
//! correlation state, idempotent-receive records) with partition
//! isolation, bounded eviction, and crash-tolerant persistence.
//!
//! Callers obtain named stores from a [`StoreManager`] and use the plain
//! [`ObjectStore`] contract; expiration runs in the background on a
//! shared runtime, so nobody re-implements eviction logic.

pub mod error;
pub mod manager;
pub mod ordinal;
pub mod serializer;
pub mod settings;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use manager::{StoreManager, DEFAULT_IN_MEMORY_STORE_NAME, DEFAULT_PERSISTENT_STORE_NAME};
pub use ordinal::{Ordinal, OrdinalClock};
pub use serializer::{BinaryRecordSerializer, PersistedRecord, Serializer};
pub use settings::StoreSettings;
pub use store::{
    EvictingStoreWrapper, InMemoryStore, ObjectStore, PartitionableStore,
    PartitionedInMemoryStore, PersistentPartitionStore, StorePartition,
};
