//! Store Manager
//!
//! Name-to-store registry over two shared base stores, with background
//! expiry scheduling for bounded stores and symmetric disposal.

mod monitor;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::settings::StoreSettings;
use crate::store::{
    EvictingStoreWrapper, ObjectStore, PartitionableStore, PartitionedInMemoryStore,
    PersistentPartitionStore, StorePartition,
};
use monitor::{spawn_monitor, ExpiryMonitor, ExpiryTarget};

/// Registry name of the shared in-memory base store
pub const DEFAULT_IN_MEMORY_STORE_NAME: &str = "_defaultInMemoryObjectStore";

/// Registry name of the shared persistent base store
pub const DEFAULT_PERSISTENT_STORE_NAME: &str = "_defaultPersistentObjectStore";

/// How one managed store maps onto its backend; resolved once at creation
/// so disposal never type-cases
enum Backend {
    /// A partition on one of the shared base stores
    Partition {
        base: Arc<dyn PartitionableStore>,
        partition: String,
    },
    /// An adopted caller-provided store
    Standalone { store: Arc<dyn ObjectStore> },
}

struct ManagedStore {
    handle: Arc<dyn ObjectStore>,
    backend: Backend,
    monitor: Option<ExpiryMonitor>,
}

/// Creates, looks up, and destroys named stores
///
/// Owns one shared in-memory base and one shared persistent base;
/// `settings.persistent` picks between them. Bounded stores get a
/// periodic expiry task on the shared runtime, so creating one requires
/// running inside tokio.
pub struct StoreManager {
    in_memory: Arc<PartitionedInMemoryStore>,
    persistent: Arc<PersistentPartitionStore>,
    stores: DashMap<String, ManagedStore>,
    active_monitors: Arc<AtomicUsize>,
}

impl StoreManager {
    /// Create a manager persisting under `working_dir`
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            in_memory: Arc::new(PartitionedInMemoryStore::new()),
            persistent: Arc::new(PersistentPartitionStore::new(working_dir)),
            stores: DashMap::new(),
            active_monitors: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create or look up a named store
    ///
    /// Idempotent per name: a second call returns the already-registered
    /// handle and ignores the new settings.
    pub fn create_object_store(
        &self,
        name: &str,
        settings: StoreSettings,
    ) -> StoreResult<Arc<dyn ObjectStore>> {
        match self.stores.entry(name.to_owned()) {
            Entry::Occupied(existing) => Ok(existing.get().handle.clone()),
            Entry::Vacant(slot) => {
                let base: Arc<dyn PartitionableStore> = if settings.persistent {
                    self.persistent.clone()
                } else {
                    self.in_memory.clone()
                };
                base.open_partition(name).map_err(|err| {
                    StoreError::NotAvailable(format!("cannot open partition {name}: {err}"))
                })?;

                let handle: Arc<dyn ObjectStore> =
                    Arc::new(StorePartition::new(name, base.clone()));

                let monitor = settings.is_bounded().then(|| {
                    spawn_monitor(
                        name.to_owned(),
                        ExpiryTarget::Partition {
                            base: base.clone(),
                            partition: name.to_owned(),
                            entry_ttl: settings.entry_ttl,
                            max_entries: settings.max_entries,
                        },
                        settings.expiration_interval,
                        &self.active_monitors,
                    )
                });

                info!(
                    store = name,
                    persistent = settings.persistent,
                    bounded = settings.is_bounded(),
                    "created object store"
                );
                slot.insert(ManagedStore {
                    handle: handle.clone(),
                    backend: Backend::Partition {
                        base,
                        partition: name.to_owned(),
                    },
                    monitor,
                });
                Ok(handle)
            }
        }
    }

    /// Register a caller-provided standalone store under the manager's
    /// lifecycle
    ///
    /// When a bound is finite the store is decorated with
    /// [`EvictingStoreWrapper`] and the wrapper's own expiry is
    /// scheduled. Idempotent per name.
    pub fn adopt(
        &self,
        name: &str,
        store: Arc<dyn ObjectStore>,
        settings: StoreSettings,
    ) -> StoreResult<Arc<dyn ObjectStore>> {
        match self.stores.entry(name.to_owned()) {
            Entry::Occupied(existing) => Ok(existing.get().handle.clone()),
            Entry::Vacant(slot) => {
                store.open()?;

                let (handle, monitor) = if settings.is_bounded() {
                    let wrapper = Arc::new(EvictingStoreWrapper::new(
                        store.clone(),
                        settings.entry_ttl,
                        settings.max_entries,
                    ));
                    let monitor = spawn_monitor(
                        name.to_owned(),
                        ExpiryTarget::Wrapper(wrapper.clone()),
                        settings.expiration_interval,
                        &self.active_monitors,
                    );
                    (wrapper as Arc<dyn ObjectStore>, Some(monitor))
                } else {
                    (store.clone(), None)
                };

                info!(store = name, bounded = settings.is_bounded(), "adopted store");
                slot.insert(ManagedStore {
                    handle: handle.clone(),
                    backend: Backend::Standalone { store },
                    monitor,
                });
                Ok(handle)
            }
        }
    }

    /// Look up an already-registered store
    pub fn get_object_store(&self, name: &str) -> Option<Arc<dyn ObjectStore>> {
        self.stores.get(name).map(|entry| entry.handle.clone())
    }

    /// Destroy a named store: stop its expiry task, drop its data, and
    /// release its backend
    ///
    /// Returns promptly even while an expiry pass is running; the pass
    /// finishes on its own and its task then stops.
    pub fn dispose_store(&self, name: &str) -> StoreResult<()> {
        let Some((_, managed)) = self.stores.remove(name) else {
            return Err(StoreError::DoesNotExist(name.to_owned()));
        };

        if let Some(monitor) = &managed.monitor {
            monitor.cancel();
        }

        match managed.backend {
            Backend::Partition { base, partition } => {
                base.dispose_partition(&partition)?;
            }
            Backend::Standalone { store } => {
                match store.clear() {
                    Ok(()) => {}
                    Err(StoreError::Unsupported(op)) => {
                        debug!(store = name, operation = op, "clear unsupported, skipped");
                    }
                    Err(err) => {
                        let _ = store.close();
                        return Err(err);
                    }
                }
                store.close()?;
            }
        }

        info!(store = name, "disposed object store");
        Ok(())
    }

    /// Drop every cached handle and cancel its expiry task, leaving the
    /// stored data itself untouched
    pub fn clear_store_cache(&self) {
        // Dropping a managed store cancels its monitor
        self.stores.clear();
        info!("store cache cleared");
    }

    /// Number of expiry tasks currently alive
    ///
    /// Reaches zero, eventually, once every bounded store is disposed.
    pub fn monitors_count(&self) -> usize {
        self.active_monitors.load(Ordering::SeqCst)
    }

    /// Quarantine directory of the persistent base, for diagnostics
    pub fn quarantine_dir(&self) -> &std::path::Path {
        self.persistent.quarantine_dir()
    }
}
