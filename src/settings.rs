//! Store Settings

use std::time::Duration;

/// Configuration for one managed store
///
/// Unset bounds mean "unbounded": entries are kept until explicitly
/// removed.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Back the store with the persistent base store
    pub persistent: bool,

    /// Maximum number of live entries (`None` = unbounded)
    pub max_entries: Option<usize>,

    /// Maximum entry age before expiry (`None` = unbounded)
    pub entry_ttl: Option<Duration>,

    /// Interval between background expiry passes
    pub expiration_interval: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            persistent: false,
            max_entries: None,
            entry_ttl: None,
            expiration_interval: Duration::from_secs(10),
        }
    }
}

impl StoreSettings {
    /// Select the persistent base store
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Bound the store to at most `max` live entries
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Expire entries older than `ttl`
    pub fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = Some(ttl);
        self
    }

    /// Set the interval between expiry passes
    pub fn with_expiration_interval(mut self, interval: Duration) -> Self {
        self.expiration_interval = interval;
        self
    }

    /// True when either bound is finite and a background expiry task is
    /// required
    pub fn is_bounded(&self) -> bool {
        self.max_entries.is_some() || self.entry_ttl.is_some()
    }
}
