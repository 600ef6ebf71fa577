//! Expiry Monitors
//!
//! Background periodic tasks invoking a store's expire logic. Tasks are
//! multiplexed over the shared runtime; cancellation is prompt and never
//! waits for an in-flight pass.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::store::{EvictingStoreWrapper, PartitionableStore};

/// What one monitor expires on each tick
pub(crate) enum ExpiryTarget {
    /// Native partition expiry on a partitionable base store
    Partition {
        base: Arc<dyn PartitionableStore>,
        partition: String,
        entry_ttl: Option<Duration>,
        max_entries: Option<usize>,
    },
    /// An adopted standalone store behind the bounding wrapper
    Wrapper(Arc<EvictingStoreWrapper>),
}

impl ExpiryTarget {
    fn run_pass(&self) -> StoreResult<usize> {
        match self {
            Self::Partition {
                base,
                partition,
                entry_ttl,
                max_entries,
            } => base.expire(partition, *entry_ttl, *max_entries),
            Self::Wrapper(wrapper) => wrapper.expire(),
        }
    }
}

/// Decrements the active-monitor count when the task future is torn down,
/// whatever path it exits through
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to one scheduled expiry task
pub(crate) struct ExpiryMonitor {
    cancel: CancellationToken,
}

impl ExpiryMonitor {
    /// Request the task to stop scheduling further passes
    ///
    /// Returns immediately; an in-flight pass finishes on its own and the
    /// task exits at its next await point.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ExpiryMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawn a periodic expiry task for one managed store
///
/// Must be called within a tokio runtime.
pub(crate) fn spawn_monitor(
    store_name: String,
    target: ExpiryTarget,
    every: Duration,
    active: &Arc<AtomicUsize>,
) -> ExpiryMonitor {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    active.fetch_add(1, Ordering::SeqCst);
    let guard = ActiveGuard(active.clone());

    tokio::spawn(async move {
        let _guard = guard;
        let mut ticker = interval(every);
        info!(store = %store_name, interval = ?every, "expiry monitor started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => match target.run_pass() {
                    Ok(removed) if removed > 0 => {
                        debug!(store = %store_name, removed, "expiry pass removed entries");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(store = %store_name, error = %err, "expiry pass failed");
                    }
                },
            }
        }

        info!(store = %store_name, "expiry monitor stopped");
    });

    ExpiryMonitor { cancel }
}
