//! Per-collection change computation and callback delivery.
//!
//! A notifier remembers the membership it last delivered, pinned at that
//! version. Each run computes the change from there to the coordinator's
//! target version; delivery then makes the target the new baseline. If the
//! notifier cannot pin or diff, it records the error, hands it once to each
//! callback and stops.

use crate::binding::{compute_change, CollectionBinding, Membership};
use crate::change_set::{CollectionChange, DictionaryChangeSet};
use crate::checker::ModificationChecker;
use crate::error::{NotifyError, NotifyResult};
use crate::key_path::KeyPathArray;
use crate::reader::{Reader, ReaderShared};
use livedb_core::{CoreResult, Snapshot, Version, VersionPin, VersionedStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

static NEXT_NOTIFIER: AtomicU64 = AtomicU64::new(1);

/// Receives the changes of one collection.
///
/// `before` runs while the reader still shows the old version, `after`
/// once it shows the new one. Closures taking
/// `(&CollectionChange, Option<&NotifyError>)` implement this trait.
pub trait ChangeCallback: Send {
    /// Called before the reader advances, only for non-empty changes.
    fn before(&mut self, _change: &CollectionChange) {}

    /// Called after the reader advances.
    fn after(&mut self, change: &CollectionChange);

    /// Called once if the notifier fails. No further calls follow.
    fn error(&mut self, error: &NotifyError);
}

impl<F> ChangeCallback for F
where
    F: FnMut(&CollectionChange, Option<&NotifyError>) + Send,
{
    fn after(&mut self, change: &CollectionChange) {
        self(change, None);
    }

    fn error(&mut self, error: &NotifyError) {
        self(&CollectionChange::default(), Some(error));
    }
}

type SharedCallback = Arc<Mutex<Box<dyn ChangeCallback>>>;

struct Registration {
    token: u64,
    callback: SharedCallback,
    key_paths: Option<KeyPathArray>,
    removed: Arc<AtomicBool>,
    initial_delivered: bool,
    skip_requested: bool,
    skip_through: Option<Version>,
}

struct Baseline {
    pin: VersionPin,
    membership: Membership,
}

struct Pending {
    pin: VersionPin,
    membership: Membership,
    change: Arc<CollectionChange>,
    /// Changes after a suppressed commit, for callbacks that suppressed it.
    after_skip: HashMap<Version, Arc<CollectionChange>>,
}

#[derive(Default)]
struct NotifierState {
    delivered: Option<Baseline>,
    pending: Option<Pending>,
    error: Option<NotifyError>,
}

pub(crate) enum Delivery {
    Change(Arc<CollectionChange>),
    Error(NotifyError),
}

pub(crate) struct Entry {
    callback: SharedCallback,
    removed: Arc<AtomicBool>,
    delivery: Delivery,
}

/// The callbacks to run for one delivery, fixed when the delivery starts.
pub(crate) struct Package {
    entries: Vec<Entry>,
}

/// Computes and delivers changes for one collection.
pub struct CollectionNotifier {
    id: u64,
    binding: CollectionBinding,
    store: VersionedStore,
    reader: Weak<ReaderShared>,
    state: Mutex<NotifierState>,
    callbacks: Mutex<Vec<Registration>>,
    next_token: AtomicU64,
}

impl CollectionNotifier {
    /// Creates a notifier whose baseline is `snapshot`.
    pub(crate) fn new(
        binding: CollectionBinding,
        store: VersionedStore,
        reader: Weak<ReaderShared>,
        snapshot: &Snapshot,
    ) -> Arc<Self> {
        let id = NEXT_NOTIFIER.fetch_add(1, Ordering::Relaxed);
        let mut state = NotifierState::default();
        let baseline = store.pin(snapshot.version()).and_then(|pin| {
            Ok(Baseline {
                membership: binding.evaluate(snapshot)?,
                pin,
            })
        });
        match baseline {
            Ok(baseline) => state.delivered = Some(baseline),
            Err(err) => {
                warn!(notifier = id, error = %err, "notifier could not attach");
                state.error = Some(NotifyError::resource(err.to_string()));
            }
        }
        trace!(notifier = id, version = %snapshot.version(), kind = binding.kind_name(), "notifier attached");
        Arc::new(Self {
            id,
            binding,
            store,
            reader,
            state: Mutex::new(state),
            callbacks: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
        })
    }

    /// Identifier used in logs.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The watched collection.
    #[must_use]
    pub fn binding(&self) -> &CollectionBinding {
        &self.binding
    }

    /// Version of the last delivered membership.
    #[must_use]
    pub fn version(&self) -> Option<Version> {
        self.state.lock().delivered.as_ref().map(|b| b.pin.version())
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Returns true if at least one callback is registered.
    #[must_use]
    pub fn has_callbacks(&self) -> bool {
        !self.callbacks.lock().is_empty()
    }

    /// Returns true if the notifier failed and stopped.
    #[must_use]
    pub fn is_errored(&self) -> bool {
        self.state.lock().error.is_some()
    }

    /// Registers a callback and returns its token.
    pub fn add_callback(&self, callback: Box<dyn ChangeCallback>, key_paths: Option<KeyPathArray>) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.callbacks.lock().push(Registration {
            token,
            callback: Arc::new(Mutex::new(callback)),
            key_paths,
            removed: Arc::new(AtomicBool::new(false)),
            initial_delivered: false,
            skip_requested: false,
            skip_through: None,
        });
        trace!(notifier = self.id, token, "callback added");
        token
    }

    /// Removes a callback. A delivery in progress skips it from now on.
    pub fn remove_callback(&self, token: u64) {
        let mut callbacks = self.callbacks.lock();
        if let Some(pos) = callbacks.iter().position(|r| r.token == token) {
            let registration = callbacks.remove(pos);
            registration.removed.store(true, Ordering::Release);
            trace!(notifier = self.id, token, "callback removed");
        }
    }

    /// Marks the callback to skip the changes of the write transaction
    /// currently open on the owning reader.
    pub fn suppress_next(&self, token: u64) -> NotifyResult<()> {
        let in_write = self
            .reader
            .upgrade()
            .is_some_and(|reader| reader.is_in_write());
        if !in_write {
            return Err(NotifyError::NotInWriteTransaction {
                operation: "suppress the next notification",
            });
        }
        if let Some(registration) = self.callbacks.lock().iter_mut().find(|r| r.token == token) {
            registration.skip_requested = true;
        }
        Ok(())
    }

    /// Binds pending suppressions to the commit that produced `version`.
    pub(crate) fn commit_skips(&self, version: Version) {
        for registration in self.callbacks.lock().iter_mut() {
            if std::mem::take(&mut registration.skip_requested) {
                registration.skip_through = Some(version);
            }
        }
    }

    /// Drops pending suppressions of a cancelled write.
    pub(crate) fn cancel_skips(&self) {
        for registration in self.callbacks.lock().iter_mut() {
            registration.skip_requested = false;
        }
    }

    /// Computes the change from the delivered baseline to `target`.
    ///
    /// Does nothing if the notifier has no callbacks, already computed
    /// `target`, or failed earlier.
    pub fn run(&self, target: Version) {
        let (filters, skips): (Vec<Option<KeyPathArray>>, Vec<Version>) = {
            let callbacks = self.callbacks.lock();
            if callbacks.is_empty() {
                return;
            }
            (
                callbacks.iter().map(|r| r.key_paths.clone()).collect(),
                callbacks.iter().filter_map(|r| r.skip_through).collect(),
            )
        };

        let mut state = self.state.lock();
        if state.error.is_some() {
            return;
        }
        let Some(delivered) = state.delivered.as_ref() else {
            return;
        };
        let from = delivered.pin.version();
        if from >= target || state.pending.as_ref().is_some_and(|p| p.pin.version() == target) {
            return;
        }
        match self.compute(delivered, target, &filters, &skips) {
            Ok(pending) => {
                debug!(
                    notifier = self.id,
                    from = %from,
                    to = %target,
                    empty = pending.change.is_empty(),
                    "notifier ran"
                );
                state.pending = Some(pending);
            }
            Err(err) => {
                warn!(notifier = self.id, from = %from, to = %target, error = %err, "notifier failed");
                state.pending = None;
                state.error = Some(NotifyError::resource(err.to_string()));
            }
        }
    }

    fn compute(
        &self,
        delivered: &Baseline,
        target: Version,
        filters: &[Option<KeyPathArray>],
        skips: &[Version],
    ) -> CoreResult<Pending> {
        let from = delivered.pin.version();
        let pin = self.store.pin(target)?;
        let snapshot = self.store.snapshot(target)?;
        let (membership, change) = self.change_between(&delivered.membership, from, &snapshot, filters)?;

        let mut after_skip = HashMap::new();
        for skip in skips {
            if *skip <= from || *skip >= target || after_skip.contains_key(skip) {
                continue;
            }
            // Without the suppressed commit's snapshot the callback gets the
            // whole interval instead.
            let Ok(base) = self.store.snapshot(*skip) else {
                continue;
            };
            let base_membership = self.evaluate_after(&delivered.membership, &base)?;
            let (_, rest) = self.change_between(&base_membership, *skip, &snapshot, filters)?;
            after_skip.insert(*skip, Arc::new(rest));
        }

        Ok(Pending {
            pin,
            membership,
            change: Arc::new(change),
            after_skip,
        })
    }

    fn change_between(
        &self,
        prev: &Membership,
        from: Version,
        snapshot: &Snapshot,
        filters: &[Option<KeyPathArray>],
    ) -> CoreResult<(Membership, CollectionChange)> {
        let info = self.store.diff(from, snapshot.version())?;
        if info.is_empty() {
            return Ok((prev.clone(), self.empty_change()));
        }
        let next = self.evaluate_after(prev, snapshot)?;
        let mut checker = ModificationChecker::for_filters(&info, snapshot, filters);
        let change = compute_change(&self.binding, prev, &next, &mut checker);
        Ok((next, change))
    }

    fn evaluate_after(&self, prev: &Membership, snapshot: &Snapshot) -> CoreResult<Membership> {
        match prev {
            Membership::Gone { permanent: true } => Ok(Membership::Gone { permanent: true }),
            _ => self.binding.evaluate(snapshot),
        }
    }

    fn empty_change(&self) -> CollectionChange {
        CollectionChange {
            dictionary: self
                .binding
                .is_dictionary()
                .then(DictionaryChangeSet::default),
            ..CollectionChange::default()
        }
    }

    /// Returns true if the notifier can deliver for `target` without
    /// further computation.
    pub(crate) fn is_ready(&self, target: Version) -> bool {
        if !self.has_callbacks() {
            return true;
        }
        let state = self.state.lock();
        state.error.is_some()
            || state.pending.as_ref().is_some_and(|p| p.pin.version() == target)
            || state
                .delivered
                .as_ref()
                .is_some_and(|b| b.pin.version() >= target)
    }

    /// Makes `target` the delivered version and decides what each callback
    /// receives.
    pub(crate) fn package(&self, target: Version) -> Option<Package> {
        enum Payload {
            Error(NotifyError),
            Changes {
                change: Arc<CollectionChange>,
                after_skip: HashMap<Version, Arc<CollectionChange>>,
                from: Option<Version>,
            },
        }

        let payload = {
            let mut state = self.state.lock();
            if let Some(err) = state.error.clone() {
                // A failed notifier never computes again; release its versions.
                state.delivered = None;
                state.pending = None;
                Payload::Error(err)
            } else if state.pending.as_ref().is_some_and(|p| p.pin.version() == target) {
                let pending = state.pending.take()?;
                let previous = state.delivered.replace(Baseline {
                    pin: pending.pin,
                    membership: pending.membership,
                });
                Payload::Changes {
                    change: pending.change,
                    after_skip: pending.after_skip,
                    from: previous.map(|b| b.pin.version()),
                }
            } else if state
                .delivered
                .as_ref()
                .is_some_and(|b| b.pin.version() == target)
            {
                Payload::Changes {
                    change: Arc::new(self.empty_change()),
                    after_skip: HashMap::new(),
                    from: Some(target),
                }
            } else {
                return None;
            }
        };

        let mut callbacks = self.callbacks.lock();
        let mut entries = Vec::with_capacity(callbacks.len());
        for registration in callbacks.iter_mut() {
            let delivery = match &payload {
                Payload::Error(err) => Delivery::Error(err.clone()),
                Payload::Changes {
                    change,
                    after_skip,
                    from,
                } => {
                    let mut change = Arc::clone(change);
                    if let Some(skip) = registration.skip_through.take() {
                        if skip >= target {
                            registration.initial_delivered = true;
                            continue;
                        }
                        if from.map_or(true, |f| skip > f) {
                            if let Some(rest) = after_skip.get(&skip) {
                                change = Arc::clone(rest);
                            }
                        }
                    }
                    if change.is_empty() && registration.initial_delivered {
                        continue;
                    }
                    registration.initial_delivered = true;
                    Delivery::Change(change)
                }
            };
            entries.push(Entry {
                callback: Arc::clone(&registration.callback),
                removed: Arc::clone(&registration.removed),
                delivery,
            });
        }
        if matches!(payload, Payload::Error(_)) {
            // Every current callback hears about the error exactly once.
            callbacks.clear();
        }
        Some(Package { entries })
    }

    /// Runs `before` for callbacks with changes.
    pub(crate) fn deliver_before(&self, package: &Package) {
        for entry in &package.entries {
            if entry.removed.load(Ordering::Acquire) {
                continue;
            }
            if let Delivery::Change(change) = &entry.delivery {
                if !change.is_empty() {
                    entry.callback.lock().before(change);
                }
            }
        }
    }

    /// Runs `after` (or `error`) for every callback of the package.
    pub(crate) fn deliver_after(&self, package: &Package) {
        for entry in &package.entries {
            if entry.removed.load(Ordering::Acquire) {
                continue;
            }
            match &entry.delivery {
                Delivery::Change(change) => entry.callback.lock().after(change),
                Delivery::Error(err) => entry.callback.lock().error(err),
            }
        }
        trace!(notifier = self.id, callbacks = package.entries.len(), "delivered");
    }
}

impl fmt::Debug for CollectionNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionNotifier")
            .field("id", &self.id)
            .field("binding", &self.binding)
            .field("version", &self.version())
            .field("callbacks", &self.callback_count())
            .finish()
    }
}

/// The notifier shared by clones of one collection handle.
///
/// A notifier whose callbacks were all removed is replaced on the next
/// registration, so a new callback never starts from a stale baseline.
#[derive(Clone, Default)]
pub(crate) struct NotifierSlot(Arc<Mutex<Option<Arc<CollectionNotifier>>>>);

impl NotifierSlot {
    pub(crate) fn register(
        &self,
        reader: &Reader,
        binding: impl FnOnce() -> NotifyResult<CollectionBinding>,
        callback: Box<dyn ChangeCallback>,
        key_paths: Option<KeyPathArray>,
    ) -> NotifyResult<NotificationToken> {
        if reader.is_in_write() {
            return Err(NotifyError::InWriteTransaction {
                operation: "register a notification callback",
            });
        }
        let mut slot = self.0.lock();
        let notifier = match slot.as_ref() {
            Some(existing) if existing.has_callbacks() => Arc::clone(existing),
            _ => {
                let created = reader.register_notifier(binding()?)?;
                *slot = Some(Arc::clone(&created));
                created
            }
        };
        let token = notifier.add_callback(callback, key_paths);
        Ok(NotificationToken::new(notifier, token))
    }

    /// Registers on a notifier of its own, never shared with other callbacks.
    pub(crate) fn register_detached(
        reader: &Reader,
        binding: CollectionBinding,
        callback: Box<dyn ChangeCallback>,
        key_paths: Option<KeyPathArray>,
    ) -> NotifyResult<NotificationToken> {
        let notifier = reader.register_notifier(binding)?;
        let token = notifier.add_callback(callback, key_paths);
        Ok(NotificationToken::new(notifier, token))
    }
}

/// Keeps one callback registered. Dropping the token unregisters it.
#[must_use = "dropping a token unregisters its callback"]
pub struct NotificationToken {
    notifier: Option<Arc<CollectionNotifier>>,
    token: u64,
}

impl NotificationToken {
    pub(crate) fn new(notifier: Arc<CollectionNotifier>, token: u64) -> Self {
        Self {
            notifier: Some(notifier),
            token,
        }
    }

    /// Skips this callback's notification for the write transaction open
    /// on the owning reader. Other callbacks are unaffected.
    pub fn suppress_next(&self) -> NotifyResult<()> {
        match &self.notifier {
            Some(notifier) => notifier.suppress_next(self.token),
            None => Ok(()),
        }
    }

    /// Unregisters the callback now.
    pub fn unregister(mut self) {
        self.release();
    }

    /// The notifier this token belongs to.
    #[must_use]
    pub fn notifier(&self) -> Option<&Arc<CollectionNotifier>> {
        self.notifier.as_ref()
    }

    fn release(&mut self) {
        if let Some(notifier) = self.notifier.take() {
            notifier.remove_callback(self.token);
        }
    }
}

impl Drop for NotificationToken {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for NotificationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationToken")
            .field("notifier", &self.notifier.as_ref().map(|n| n.id()))
            .field("token", &self.token)
            .finish()
    }
}
