//! Reader handles: one logical thread's view of a store.
//!
//! A [`Reader`] reads one version at a time. It advances when it is
//! refreshed, when the coordinator asks it to deliver notifications, or
//! when it begins a write. Delivery follows a fixed order: every callback's
//! `before` runs at the old version, the reader advances, then every
//! callback's `after` runs at the new version.

use crate::binding::CollectionBinding;
use crate::config::ReaderConfig;
use crate::coordinator::{CoordinatorLease, CoordinatorRegistry, NotifierCoordinator};
use crate::error::{NotifyError, NotifyResult};
use crate::notifier::CollectionNotifier;
use crate::scheduler::Scheduler;
use livedb_core::{ReadTransaction, Snapshot, Version, VersionedStore, WriteTransaction};
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace};

struct ReaderState {
    read: Option<ReadTransaction>,
    write: Option<WriteTransaction>,
    /// The write transaction's graph while the transaction itself is lent
    /// to a [`Reader::with_write_transaction`] closure.
    lent: Option<Arc<Snapshot>>,
    version: Version,
    notifiers: Vec<Weak<CollectionNotifier>>,
    closed: bool,
}

pub(crate) struct ReaderShared {
    lease: CoordinatorLease,
    scheduler: Arc<dyn Scheduler>,
    auto_refresh: bool,
    frozen: bool,
    state: Mutex<ReaderState>,
    delivering: AtomicBool,
    notify_scheduled: AtomicBool,
    notify_again: AtomicBool,
}

impl ReaderShared {
    pub(crate) fn is_in_write(&self) -> bool {
        let state = self.state.lock();
        state.write.is_some() || state.lent.is_some()
    }

    pub(crate) fn wants_notify(&self) -> bool {
        self.auto_refresh && !self.frozen
    }

    /// Asks the scheduler to deliver on this reader. Requests made while one
    /// is queued are merged.
    pub(crate) fn schedule_notify(this: &Arc<Self>) {
        if this.notify_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let weak = Arc::downgrade(this);
        this.scheduler.schedule(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.notify_scheduled.store(false, Ordering::Release);
                Reader { shared }.notify();
            }
        }));
    }
}

/// Resets the delivering flag when a delivery ends.
struct DeliveryGuard<'a>(&'a AtomicBool);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Puts a lent write transaction back when the borrowing closure returns.
struct LentWrite<'a> {
    state: &'a Mutex<ReaderState>,
    txn: Option<WriteTransaction>,
}

impl Drop for LentWrite<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.lent = None;
        if !state.closed {
            state.write = self.txn.take();
        }
    }
}

/// A handle reading one version of a store at a time.
///
/// Clones share the same view. A reader is meant to be driven from one
/// thread or queue at a time; use
/// [`ThreadSafeReference`](crate::ThreadSafeReference) to move collections
/// between readers.
#[derive(Clone)]
pub struct Reader {
    shared: Arc<ReaderShared>,
}

impl Reader {
    /// Opens a reader at the latest version of the configured store.
    pub fn open(config: ReaderConfig) -> NotifyResult<Self> {
        let lease = CoordinatorRegistry::global().acquire(&config.store);
        let read = lease.store().open_latest()?;
        let version = read.version();
        let shared = Arc::new(ReaderShared {
            lease,
            scheduler: config.scheduler,
            auto_refresh: config.auto_refresh,
            frozen: false,
            state: Mutex::new(ReaderState {
                read: Some(read),
                write: None,
                lent: None,
                version,
                notifiers: Vec::new(),
                closed: false,
            }),
            delivering: AtomicBool::new(false),
            notify_scheduled: AtomicBool::new(false),
            notify_again: AtomicBool::new(false),
        });
        shared.lease.coordinator().register_reader(&shared);
        debug!(path = %shared.lease.path().display(), %version, "reader opened");
        Ok(Self { shared })
    }

    /// Canonical path of the store.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.shared.lease.path()
    }

    /// The version currently read.
    #[must_use]
    pub fn version(&self) -> Version {
        self.shared.state.lock().version
    }

    /// The snapshot currently read. Uncommitted writes are not included.
    pub fn snapshot(&self) -> NotifyResult<Arc<Snapshot>> {
        let state = self.shared.state.lock();
        state
            .read
            .as_ref()
            .map(|read| Arc::clone(read.snapshot()))
            .ok_or(NotifyError::InvalidatedCollection { kind: "reader" })
    }

    /// The coordinator of this reader's store.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<NotifierCoordinator> {
        self.shared.lease.coordinator()
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &VersionedStore {
        self.shared.lease.store()
    }

    pub(crate) fn lease(&self) -> &CoordinatorLease {
        &self.shared.lease
    }

    /// Returns true if this reader is pinned to one version.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.shared.frozen
    }

    /// Returns true once the reader was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Returns true while a write transaction is open.
    #[must_use]
    pub fn is_in_write(&self) -> bool {
        self.shared.is_in_write()
    }

    /// Returns true if both handles share one view.
    #[must_use]
    pub fn same_reader(&self, other: &Reader) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn downgrade(&self) -> Weak<ReaderShared> {
        Arc::downgrade(&self.shared)
    }

    fn ensure_open(&self, operation: &'static str) -> NotifyResult<()> {
        if self.is_closed() {
            return Err(NotifyError::InvalidatedCollection { kind: "reader" });
        }
        if self.shared.frozen {
            return Err(NotifyError::Frozen { operation });
        }
        Ok(())
    }

    /// Brings every notifier up to date and advances to the latest version,
    /// delivering notifications.
    ///
    /// Blocks while another thread runs the coordinator. Returns true if the
    /// reader advanced. Does nothing when called from inside a callback.
    pub fn refresh(&self) -> NotifyResult<bool> {
        self.ensure_open("refresh")?;
        if self.is_in_write() {
            return Err(NotifyError::InWriteTransaction { operation: "refresh" });
        }
        if self.shared.delivering.load(Ordering::Acquire) {
            return Ok(false);
        }
        let before = self.version();
        self.coordinator().on_change();
        self.deliver(true)?;
        Ok(self.version() > before)
    }

    /// Delivers whatever the coordinator has already computed. Never blocks
    /// on notifier work.
    ///
    /// Nothing is delivered unless every notifier of this reader is ready.
    /// A reader without notifiers simply advances, if it auto-refreshes.
    pub fn notify(&self) {
        if self.shared.frozen || self.is_closed() || self.is_in_write() {
            return;
        }
        if self.shared.delivering.load(Ordering::Acquire) {
            self.shared.notify_again.store(true, Ordering::Release);
            return;
        }
        if let Err(err) = self.deliver(false) {
            debug!(path = %self.path().display(), error = %err, "notify failed");
        }
    }

    fn live_notifiers(&self) -> Vec<Arc<CollectionNotifier>> {
        let mut state = self.shared.state.lock();
        state.notifiers.retain(|n| n.strong_count() > 0);
        state.notifiers.iter().filter_map(Weak::upgrade).collect()
    }

    fn deliver(&self, advance: bool) -> NotifyResult<bool> {
        if self.shared.delivering.swap(true, Ordering::AcqRel) {
            self.shared.notify_again.store(true, Ordering::Release);
            return Ok(false);
        }
        let delivered = {
            let _guard = DeliveryGuard(&self.shared.delivering);
            let current = self.version();
            let ready = self.coordinator().ready_version();
            let target = if advance || self.shared.auto_refresh {
                ready.max(current)
            } else {
                current
            };
            let notifiers = self.live_notifiers();
            if notifiers.iter().all(|n| n.is_ready(target)) {
                let packages: Vec<_> = notifiers
                    .iter()
                    .filter_map(|n| n.package(target).map(|p| (n, p)))
                    .collect();
                for (notifier, package) in &packages {
                    notifier.deliver_before(package);
                }
                if target > current {
                    self.advance_read(target)?;
                }
                for (notifier, package) in &packages {
                    notifier.deliver_after(package);
                }
                trace!(
                    path = %self.path().display(),
                    from = %current,
                    to = %target,
                    notifiers = packages.len(),
                    "delivered"
                );
                true
            } else {
                trace!(path = %self.path().display(), version = %target, "notifiers not ready");
                false
            }
        };
        if self.shared.notify_again.swap(false, Ordering::AcqRel) {
            self.notify();
        }
        Ok(delivered)
    }

    fn advance_read(&self, target: Version) -> NotifyResult<()> {
        let mut state = self.shared.state.lock();
        let Some(read) = state.read.as_mut() else {
            return Err(NotifyError::InvalidatedCollection { kind: "reader" });
        };
        self.shared.lease.store().advance(read, target)?;
        state.version = target;
        Ok(())
    }

    /// Moves to `version` without delivering notifications.
    pub(crate) fn advance_to(&self, version: Version) -> NotifyResult<()> {
        if version <= self.version() {
            return Ok(());
        }
        self.ensure_open("advance")?;
        if self.is_in_write() {
            return Err(NotifyError::InWriteTransaction { operation: "advance" });
        }
        self.advance_read(version)
    }

    /// Opens a write transaction on the latest version.
    ///
    /// Refreshes first, delivering pending notifications, unless called
    /// from inside a callback.
    pub fn begin_write(&self) -> NotifyResult<()> {
        self.ensure_open("begin a write transaction")?;
        if self.is_in_write() {
            return Err(NotifyError::InWriteTransaction {
                operation: "begin a write transaction",
            });
        }
        if !self.shared.delivering.load(Ordering::Acquire) {
            self.refresh()?;
        }
        let txn = self.store().begin_write()?;
        let base = txn.base_version();
        if base > self.version() {
            self.advance_read(base)?;
        }
        self.shared.state.lock().write = Some(txn);
        trace!(path = %self.path().display(), version = %base, "write started");
        Ok(())
    }

    /// Commits the open write transaction and returns the new version.
    ///
    /// The reader moves to the new version; callbacks hear about the write
    /// once the coordinator has run.
    pub fn commit(&self) -> NotifyResult<Version> {
        let txn = self
            .shared
            .state
            .lock()
            .write
            .take()
            .ok_or(NotifyError::NotInWriteTransaction { operation: "commit" })?;
        let version = txn.commit()?;
        self.advance_read(version)?;
        for notifier in self.live_notifiers() {
            notifier.commit_skips(version);
        }
        trace!(path = %self.path().display(), %version, "write committed");
        Ok(version)
    }

    /// Discards the open write transaction.
    pub fn cancel(&self) -> NotifyResult<()> {
        let txn = self
            .shared
            .state
            .lock()
            .write
            .take()
            .ok_or(NotifyError::NotInWriteTransaction { operation: "cancel" })?;
        txn.cancel();
        for notifier in self.live_notifiers() {
            notifier.cancel_skips();
        }
        trace!(path = %self.path().display(), "write cancelled");
        Ok(())
    }

    /// Runs `f` inside a write transaction.
    ///
    /// Commits if `f` succeeds and cancels if it fails. Handles of this
    /// reader can write from inside `f`.
    pub fn write<R>(&self, f: impl FnOnce(&Reader) -> NotifyResult<R>) -> NotifyResult<R> {
        self.begin_write()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                if self.is_in_write() {
                    self.cancel()?;
                }
                Err(err)
            }
        }
    }

    /// Gives `f` the open write transaction.
    ///
    /// The reader is not locked while `f` runs. Handles of this reader read
    /// the transaction as it stood when `f` was called; `f` itself sees its
    /// own writes through `txn`. Nested calls fail.
    pub fn with_write_transaction<R>(
        &self,
        f: impl FnOnce(&mut WriteTransaction) -> NotifyResult<R>,
    ) -> NotifyResult<R> {
        let txn = {
            let mut state = self.shared.state.lock();
            if state.lent.is_some() {
                return Err(NotifyError::InWriteTransaction {
                    operation: "reenter the write transaction",
                });
            }
            let txn = state.write.take().ok_or(NotifyError::NotInWriteTransaction {
                operation: "modify the store",
            })?;
            state.lent = Some(Arc::new(Snapshot::clone(&txn)));
            txn
        };
        let mut lent = LentWrite {
            state: &self.shared.state,
            txn: Some(txn),
        };
        let txn = lent.txn.as_mut().ok_or(NotifyError::NotInWriteTransaction {
            operation: "modify the store",
        })?;
        f(txn)
    }

    /// Runs `f` against what this reader sees, including its own
    /// uncommitted writes.
    pub(crate) fn read_with<R>(&self, f: impl FnOnce(&Snapshot) -> NotifyResult<R>) -> NotifyResult<R> {
        let state = self.shared.state.lock();
        if let Some(txn) = state.write.as_ref() {
            return f(txn);
        }
        let snapshot = state
            .lent
            .clone()
            .or_else(|| state.read.as_ref().map(|read| Arc::clone(read.snapshot())))
            .ok_or(NotifyError::InvalidatedCollection { kind: "reader" })?;
        drop(state);
        f(&snapshot)
    }

    /// Creates a notifier attached at the current version.
    pub(crate) fn register_notifier(
        &self,
        binding: CollectionBinding,
    ) -> NotifyResult<Arc<CollectionNotifier>> {
        self.ensure_open("register a notification callback")?;
        if self.is_in_write() {
            return Err(NotifyError::InWriteTransaction {
                operation: "register a notification callback",
            });
        }
        let snapshot = self.snapshot()?;
        let notifier = CollectionNotifier::new(
            binding,
            self.store().clone(),
            self.downgrade(),
            &snapshot,
        );
        {
            let mut state = self.shared.state.lock();
            state.notifiers.retain(|n| n.strong_count() > 0);
            state.notifiers.push(Arc::downgrade(&notifier));
        }
        self.coordinator().register_notifier(&notifier);
        Ok(notifier)
    }

    /// Returns a reader pinned to the current version.
    pub fn freeze(&self) -> NotifyResult<Reader> {
        if self.shared.frozen {
            return Ok(self.clone());
        }
        self.ensure_open("freeze")?;
        if self.is_in_write() {
            return Err(NotifyError::InWriteTransaction { operation: "freeze" });
        }
        let version = self.version();
        let read = self.store().open_at(version)?;
        let shared = Arc::new(ReaderShared {
            lease: self.shared.lease.clone(),
            scheduler: Arc::clone(&self.shared.scheduler),
            auto_refresh: false,
            frozen: true,
            state: Mutex::new(ReaderState {
                read: Some(read),
                write: None,
                lent: None,
                version,
                notifiers: Vec::new(),
                closed: false,
            }),
            delivering: AtomicBool::new(false),
            notify_scheduled: AtomicBool::new(false),
            notify_again: AtomicBool::new(false),
        });
        trace!(path = %self.path().display(), %version, "reader frozen");
        Ok(Reader { shared })
    }

    /// Blocks until a version newer than the current one is committed.
    ///
    /// Returns false if `timeout` elapses or the store closes first. The
    /// reader does not advance; call [`Reader::refresh`] for that.
    pub fn wait_for_change(&self, timeout: Option<Duration>) -> bool {
        let current = self.version();
        self.store().wait_for_change(current, timeout) > current
    }

    /// Releases the reader's version and write transaction. Handles of a
    /// closed reader become invalid.
    pub fn close(&self) {
        let (write, read) = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.notifiers.clear();
            (state.write.take(), state.read.take())
        };
        drop(write);
        drop(read);
        debug!(path = %self.path().display(), "reader closed");
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("path", &self.path())
            .field("version", &self.version())
            .field("frozen", &self.shared.frozen)
            .field("auto_refresh", &self.shared.auto_refresh)
            .finish()
    }
}
