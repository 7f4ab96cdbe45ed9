//! Configuration for readers.

use crate::scheduler::{InlineScheduler, Scheduler};
use livedb_core::StoreConfig;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for opening a [`Reader`](crate::Reader).
#[derive(Clone)]
pub struct ReaderConfig {
    /// The store to open. Readers with the same path share one store and
    /// one coordinator.
    pub store: StoreConfig,
    /// Where notification deliveries run.
    pub scheduler: Arc<dyn Scheduler>,
    /// Whether the reader advances to new versions when the coordinator
    /// reports changes. A reader without auto-refresh only advances on
    /// explicit refresh or when a write begins.
    pub auto_refresh: bool,
}

impl ReaderConfig {
    /// Creates a configuration for the store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::from_store(StoreConfig::new(path))
    }

    /// Creates a configuration from a store configuration.
    pub fn from_store(store: StoreConfig) -> Self {
        Self {
            store,
            scheduler: Arc::new(InlineScheduler),
            auto_refresh: true,
        }
    }

    /// Creates a configuration for a new anonymous store.
    pub fn anonymous() -> Self {
        Self::from_store(StoreConfig::anonymous())
    }

    /// Sets the scheduler.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Enables or disables auto-refresh.
    #[must_use]
    pub fn with_auto_refresh(mut self, auto_refresh: bool) -> Self {
        self.auto_refresh = auto_refresh;
        self
    }

    /// Sets the store's pin limit.
    #[must_use]
    pub fn with_max_pinned_versions(mut self, limit: usize) -> Self {
        self.store = self.store.max_pinned_versions(limit);
        self
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl fmt::Debug for ReaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderConfig")
            .field("store", &self.store)
            .field("auto_refresh", &self.auto_refresh)
            .finish_non_exhaustive()
    }
}
