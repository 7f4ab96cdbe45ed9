//! Store configuration.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static ANONYMOUS_STORES: AtomicU64 = AtomicU64::new(1);

/// Configuration for opening a versioned store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path identifying the store. Handles opened with the same path share
    /// one store and one notifier coordinator.
    pub path: PathBuf,

    /// Maximum number of distinct versions that may be pinned at once.
    /// Pinning beyond this limit fails with a resource error.
    pub max_pinned_versions: usize,

    /// Number of change records kept behind the latest version even when
    /// no pin requires them.
    pub history_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let id = ANONYMOUS_STORES.fetch_add(1, Ordering::Relaxed);
        Self {
            path: PathBuf::from(format!("memory-{id}.livedb")),
            max_pinned_versions: 64,
            history_limit: 16,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration for the store at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Creates a configuration with a unique anonymous path.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Sets the pin limit.
    #[must_use]
    pub const fn max_pinned_versions(mut self, limit: usize) -> Self {
        self.max_pinned_versions = limit;
        self
    }

    /// Sets how many change records are kept behind the latest version.
    #[must_use]
    pub const fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }
}
