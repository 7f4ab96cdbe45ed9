//! Per-store notifier coordination.
//!
//! Every store path has exactly one [`NotifierCoordinator`], shared by all
//! readers of that store through the process-wide [`CoordinatorRegistry`].
//! The coordinator owns no thread; the host calls
//! [`NotifierCoordinator::on_change`] whenever it wants notifiers brought up
//! to date.

use crate::notifier::CollectionNotifier;
use crate::reader::ReaderShared;
use livedb_core::{StoreConfig, Version, VersionedStore};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Runs every notifier of one store against a single target version.
pub struct NotifierCoordinator {
    path: PathBuf,
    store: VersionedStore,
    notifiers: Mutex<Vec<Weak<CollectionNotifier>>>,
    readers: Mutex<Vec<Weak<ReaderShared>>>,
    run_lock: Mutex<()>,
    ready: Mutex<Version>,
    ready_changed: Condvar,
}

impl NotifierCoordinator {
    fn new(path: PathBuf, store: VersionedStore) -> Self {
        let ready = store.current_version();
        Self {
            path,
            store,
            notifiers: Mutex::new(Vec::new()),
            readers: Mutex::new(Vec::new()),
            run_lock: Mutex::new(()),
            ready: Mutex::new(ready),
            ready_changed: Condvar::new(),
        }
    }

    /// Canonical path of the store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The coordinated store.
    #[must_use]
    pub fn store(&self) -> &VersionedStore {
        &self.store
    }

    /// Latest version every notifier has been run against.
    #[must_use]
    pub fn ready_version(&self) -> Version {
        *self.ready.lock()
    }

    /// Number of live notifiers.
    #[must_use]
    pub fn notifier_count(&self) -> usize {
        let mut notifiers = self.notifiers.lock();
        notifiers.retain(|n| n.strong_count() > 0);
        notifiers.len()
    }

    pub(crate) fn register_notifier(&self, notifier: &Arc<CollectionNotifier>) {
        let mut notifiers = self.notifiers.lock();
        notifiers.retain(|n| n.strong_count() > 0);
        notifiers.push(Arc::downgrade(notifier));
    }

    pub(crate) fn register_reader(&self, reader: &Arc<ReaderShared>) {
        let mut readers = self.readers.lock();
        readers.retain(|r| r.strong_count() > 0);
        readers.push(Arc::downgrade(reader));
    }

    /// Runs every notifier against the latest committed version and
    /// returns that version.
    ///
    /// Commits landing while the notifiers run are left for the next call.
    /// Afterwards every auto-refreshing reader is asked, through its
    /// scheduler, to deliver.
    pub fn on_change(&self) -> Version {
        let target = {
            let _run = self.run_lock.lock();
            let target = self.store.current_version();
            let notifiers: Vec<Arc<CollectionNotifier>> = {
                let mut list = self.notifiers.lock();
                list.retain(|n| n.strong_count() > 0);
                list.iter().filter_map(Weak::upgrade).collect()
            };
            for notifier in &notifiers {
                notifier.run(target);
            }
            let mut ready = self.ready.lock();
            if target > *ready {
                *ready = target;
            }
            self.ready_changed.notify_all();
            debug!(
                path = %self.path.display(),
                version = %target,
                notifiers = notifiers.len(),
                "notifiers ran"
            );
            target
        };

        let readers: Vec<Arc<ReaderShared>> = {
            let mut list = self.readers.lock();
            list.retain(|r| r.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for reader in readers {
            if reader.wants_notify() {
                ReaderShared::schedule_notify(&reader);
            }
        }
        target
    }

    /// Blocks until notifiers have been run against `version`.
    ///
    /// Returns false if `timeout` elapses first.
    pub fn wait_until_ready(&self, version: Version, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut ready = self.ready.lock();
        while *ready < version {
            match deadline {
                Some(deadline) => {
                    if self.ready_changed.wait_until(&mut ready, deadline).timed_out() {
                        return *ready >= version;
                    }
                }
                None => self.ready_changed.wait(&mut ready),
            }
        }
        true
    }
}

impl fmt::Debug for NotifierCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierCoordinator")
            .field("path", &self.path)
            .field("ready", &self.ready_version())
            .field("notifiers", &self.notifier_count())
            .finish()
    }
}

struct RegistryEntry {
    coordinator: Arc<NotifierCoordinator>,
    refs: usize,
}

/// Process-wide map from store path to coordinator.
///
/// Entries are reference counted by [`CoordinatorLease`]s. The entry, and
/// with it the coordinator and the store, goes away when the last lease is
/// dropped.
pub struct CoordinatorRegistry {
    entries: Mutex<HashMap<PathBuf, RegistryEntry>>,
}

static REGISTRY: OnceLock<CoordinatorRegistry> = OnceLock::new();

impl CoordinatorRegistry {
    /// The registry shared by the whole process.
    pub fn global() -> &'static CoordinatorRegistry {
        REGISTRY.get_or_init(|| CoordinatorRegistry {
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Normalizes a store path so that different spellings of one file map
    /// to one entry.
    #[must_use]
    pub fn canonical_path(path: &Path) -> PathBuf {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return path.to_path_buf();
        };
        if parent.as_os_str().is_empty() {
            return path.to_path_buf();
        }
        match parent.canonicalize() {
            Ok(parent) => parent.join(name),
            Err(_) => path.to_path_buf(),
        }
    }

    /// Returns the coordinator for `config.path`, opening the store if no
    /// coordinator exists yet.
    pub fn acquire(&self, config: &StoreConfig) -> CoordinatorLease {
        let key = Self::canonical_path(&config.path);
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.clone()).or_insert_with(|| {
            debug!(path = %key.display(), "coordinator created");
            let mut store_config = config.clone();
            store_config.path = key.clone();
            RegistryEntry {
                coordinator: Arc::new(NotifierCoordinator::new(
                    key.clone(),
                    VersionedStore::open(store_config),
                )),
                refs: 0,
            }
        });
        entry.refs += 1;
        trace!(path = %key.display(), refs = entry.refs, "coordinator acquired");
        CoordinatorLease {
            coordinator: Arc::clone(&entry.coordinator),
            key,
        }
    }

    fn retain(&self, key: &Path) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.refs += 1;
        }
    }

    fn release(&self, key: &Path) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            entries.remove(key);
            debug!(path = %key.display(), "coordinator released");
        }
    }

    /// Returns true if a coordinator for `path` is alive.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.lock().contains_key(&Self::canonical_path(path))
    }

    /// Number of live coordinators.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }

    /// The coordinator for `path`, if one is alive.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<Arc<NotifierCoordinator>> {
        self.entries
            .lock()
            .get(&Self::canonical_path(path))
            .map(|e| Arc::clone(&e.coordinator))
    }
}

impl fmt::Debug for CoordinatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorRegistry")
            .field("coordinators", &self.count())
            .finish()
    }
}

/// Keeps a registry entry alive.
pub struct CoordinatorLease {
    coordinator: Arc<NotifierCoordinator>,
    key: PathBuf,
}

impl CoordinatorLease {
    /// The leased coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<NotifierCoordinator> {
        &self.coordinator
    }

    /// The coordinated store.
    #[must_use]
    pub fn store(&self) -> &VersionedStore {
        self.coordinator.store()
    }

    /// Canonical store path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.key
    }
}

impl Clone for CoordinatorLease {
    fn clone(&self) -> Self {
        CoordinatorRegistry::global().retain(&self.key);
        Self {
            coordinator: Arc::clone(&self.coordinator),
            key: self.key.clone(),
        }
    }
}

impl Drop for CoordinatorLease {
    fn drop(&mut self) {
        CoordinatorRegistry::global().release(&self.key);
    }
}

impl fmt::Debug for CoordinatorLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CoordinatorLease").field(&self.key).finish()
    }
}
