//! The versioned store.
//!
//! The store keeps the latest snapshot, every pinned snapshot and the change
//! records needed to diff from the oldest pinned version to the latest.
//! Everything else is reclaimed as soon as the last pin on it is released.
//!
//! ## Single-Writer Guarantee
//!
//! Only one write transaction can be active at a time. `begin_write()`
//! blocks until the previous writer commits, cancels or is dropped.

use crate::change_info::ChangeInfo;
use crate::commit_feed::{CommitEvent, CommitFeed};
use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::snapshot::Snapshot;
use crate::transaction::{ReadTransaction, WriteTransaction};
use crate::types::Version;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

pub(crate) struct StoreInner {
    config: StoreConfig,
    state: Mutex<StoreState>,
    version_changed: Condvar,
    writer: Mutex<bool>,
    writer_released: Condvar,
    feed: CommitFeed,
}

struct StoreState {
    latest: Version,
    snapshots: BTreeMap<Version, Arc<Snapshot>>,
    /// Change record of the commit that produced each version.
    changes: BTreeMap<Version, Arc<ChangeInfo>>,
    pins: BTreeMap<Version, usize>,
    closed: bool,
}

impl StoreState {
    fn collect_garbage(&mut self, history_limit: usize) {
        let latest = self.latest;
        let pins = &self.pins;
        self.snapshots
            .retain(|v, _| *v == latest || pins.contains_key(v));

        let history_floor = Version::new(latest.as_u64().saturating_sub(history_limit as u64));
        let pin_floor = pins.keys().next().copied().unwrap_or(latest);
        let floor = history_floor.min(pin_floor);
        self.changes.retain(|v, _| *v > floor);
    }
}

/// A multi-version object store.
///
/// Cloning a store yields another handle to the same versions.
#[derive(Clone)]
pub struct VersionedStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for VersionedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedStore")
            .field("path", &self.inner.config.path)
            .field("version", &self.current_version())
            .finish()
    }
}

impl VersionedStore {
    /// Opens an empty store.
    pub fn open(config: StoreConfig) -> Self {
        let mut snapshots = BTreeMap::new();
        snapshots.insert(Version::INITIAL, Arc::new(Snapshot::default()));
        let feed = CommitFeed::new();
        debug!(path = %config.path.display(), "opened store");
        Self {
            inner: Arc::new(StoreInner {
                config,
                state: Mutex::new(StoreState {
                    latest: Version::INITIAL,
                    snapshots,
                    changes: BTreeMap::new(),
                    pins: BTreeMap::new(),
                    closed: false,
                }),
                version_changed: Condvar::new(),
                writer: Mutex::new(false),
                writer_released: Condvar::new(),
                feed,
            }),
        }
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Returns the path identifying this store.
    pub fn path(&self) -> &Path {
        &self.inner.config.path
    }

    /// Returns true if both handles refer to the same store.
    pub fn same_store(&self, other: &VersionedStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns the latest committed version.
    pub fn current_version(&self) -> Version {
        self.inner.state.lock().latest
    }

    /// Returns the latest snapshot.
    pub fn latest_snapshot(&self) -> Arc<Snapshot> {
        let state = self.inner.state.lock();
        Arc::clone(&state.snapshots[&state.latest])
    }

    /// Returns the snapshot at `version`, if it is still retained.
    pub fn snapshot(&self, version: Version) -> CoreResult<Arc<Snapshot>> {
        self.inner
            .state
            .lock()
            .snapshots
            .get(&version)
            .cloned()
            .ok_or(CoreError::VersionUnavailable { version })
    }

    /// Pins a version so it is not reclaimed while the pin lives.
    ///
    /// Fails with [`CoreError::PinLimitExceeded`] when the configured number
    /// of distinct pinned versions is reached.
    pub fn pin(&self, version: Version) -> CoreResult<VersionPin> {
        self.inner.pin(version)?;
        Ok(VersionPin {
            inner: Arc::clone(&self.inner),
            version,
        })
    }

    /// Pins the latest version.
    pub fn pin_latest(&self) -> CoreResult<VersionPin> {
        let version = {
            let mut state = self.inner.state.lock();
            let version = state.latest;
            self.inner.pin_locked(&mut state, version)?;
            version
        };
        Ok(VersionPin {
            inner: Arc::clone(&self.inner),
            version,
        })
    }

    /// Number of distinct pinned versions.
    pub fn pinned_versions(&self) -> usize {
        self.inner.state.lock().pins.len()
    }

    /// Versions whose snapshots are currently retained.
    pub fn retained_versions(&self) -> Vec<Version> {
        self.inner.state.lock().snapshots.keys().copied().collect()
    }

    /// Opens a read transaction at `version`.
    pub fn open_at(&self, version: Version) -> CoreResult<ReadTransaction> {
        let pin = self.pin(version)?;
        let snapshot = self.snapshot(version)?;
        Ok(ReadTransaction::new(snapshot, pin))
    }

    /// Opens a read transaction at the latest version.
    pub fn open_latest(&self) -> CoreResult<ReadTransaction> {
        let pin = self.pin_latest()?;
        let snapshot = self.snapshot(pin.version())?;
        Ok(ReadTransaction::new(snapshot, pin))
    }

    /// Moves a read transaction to a newer version.
    pub fn advance(&self, txn: &mut ReadTransaction, version: Version) -> CoreResult<()> {
        if version < txn.version() {
            return Err(CoreError::invalid_operation(format!(
                "cannot advance from {} back to {version}",
                txn.version()
            )));
        }
        if version != txn.version() {
            *txn = self.open_at(version)?;
        }
        Ok(())
    }

    /// Computes the changes between two versions.
    ///
    /// Requires the change records of every commit in `(from, to]`, which
    /// are retained as long as `from` is pinned.
    pub fn diff(&self, from: Version, to: Version) -> CoreResult<ChangeInfo> {
        if from > to {
            return Err(CoreError::invalid_operation(format!(
                "cannot diff from {from} back to {to}"
            )));
        }
        let mut info = ChangeInfo::new();
        if from == to {
            return Ok(info);
        }
        let state = self.inner.state.lock();
        let mut expected = from.next();
        for (version, record) in state.changes.range(expected..=to) {
            if *version != expected {
                break;
            }
            info.merge(record);
            expected = expected.next();
        }
        if expected <= to {
            return Err(CoreError::VersionUnavailable { version: from });
        }
        Ok(info)
    }

    /// Begins a write transaction on the latest version.
    ///
    /// Blocks while another write transaction is active.
    pub fn begin_write(&self) -> CoreResult<WriteTransaction> {
        {
            let mut active = self.inner.writer.lock();
            while *active {
                self.inner.writer_released.wait(&mut active);
            }
            *active = true;
        }

        let base = {
            let state = self.inner.state.lock();
            if state.closed {
                drop(state);
                self.inner.release_writer();
                return Err(CoreError::StoreClosed);
            }
            Snapshot::clone(&state.snapshots[&state.latest])
        };
        trace!(version = %base.version(), "begin write");
        Ok(WriteTransaction::new(Arc::clone(&self.inner), base))
    }

    /// Blocks until a version newer than `after` exists, the store is
    /// closed, or `timeout` elapses. Returns the latest version.
    pub fn wait_for_change(&self, after: Version, timeout: Option<Duration>) -> Version {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.state.lock();
        while state.latest <= after && !state.closed {
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .version_changed
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
                None => self.inner.version_changed.wait(&mut state),
            }
        }
        state.latest
    }

    /// Subscribes to commit events.
    pub fn subscribe(&self) -> Receiver<CommitEvent> {
        self.inner.feed.subscribe()
    }

    /// Closes the store. Pending waits return and new writes fail.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
        self.inner.version_changed.notify_all();
    }

    /// Returns true if the store was closed.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

impl StoreInner {
    fn pin(&self, version: Version) -> CoreResult<()> {
        let mut state = self.state.lock();
        self.pin_locked(&mut state, version)
    }

    fn pin_locked(&self, state: &mut StoreState, version: Version) -> CoreResult<()> {
        if !state.snapshots.contains_key(&version) {
            return Err(CoreError::VersionUnavailable { version });
        }
        if let Some(count) = state.pins.get_mut(&version) {
            *count += 1;
            return Ok(());
        }
        let limit = self.config.max_pinned_versions;
        if state.pins.len() >= limit {
            warn!(%version, limit, "pin limit reached");
            return Err(CoreError::PinLimitExceeded { version, limit });
        }
        state.pins.insert(version, 1);
        Ok(())
    }

    fn add_pin(&self, version: Version) {
        *self.state.lock().pins.entry(version).or_insert(0) += 1;
    }

    fn unpin(&self, version: Version) {
        let mut state = self.state.lock();
        if let Some(count) = state.pins.get_mut(&version) {
            *count -= 1;
            if *count == 0 {
                state.pins.remove(&version);
                state.collect_garbage(self.config.history_limit);
            }
        }
    }

    pub(crate) fn release_writer(&self) {
        *self.writer.lock() = false;
        self.writer_released.notify_one();
    }

    pub(crate) fn commit(&self, mut graph: Snapshot, changes: ChangeInfo) -> CoreResult<Version> {
        let event = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(CoreError::StoreClosed);
            }
            let version = state.latest.next();
            graph.version = version;
            let event = CommitEvent {
                version,
                tables: changes.tables().map(|(t, _)| t).collect(),
                schema_changed: changes.schema_changed(),
            };
            state.snapshots.insert(version, Arc::new(graph));
            state.changes.insert(version, Arc::new(changes));
            state.latest = version;
            state.collect_garbage(self.config.history_limit);
            event
        };
        debug!(version = %event.version, tables = event.tables.len(), "commit");
        self.version_changed.notify_all();
        let version = event.version;
        self.feed.emit(event);
        Ok(version)
    }
}

/// Keeps one version from being reclaimed.
///
/// Pins are reference counted per version; cloning a pin adds a reference
/// and dropping it releases one.
pub struct VersionPin {
    inner: Arc<StoreInner>,
    version: Version,
}

impl VersionPin {
    /// The pinned version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }
}

impl Clone for VersionPin {
    fn clone(&self) -> Self {
        self.inner.add_pin(self.version);
        Self {
            inner: Arc::clone(&self.inner),
            version: self.version,
        }
    }
}

impl Drop for VersionPin {
    fn drop(&mut self) {
        self.inner.unpin(self.version);
    }
}

impl std::fmt::Debug for VersionPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("VersionPin").field(&self.version).finish()
    }
}
