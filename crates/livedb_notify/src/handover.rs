//! Passing live handles between readers.
//!
//! Handles are tied to the reader that created them. A
//! [`ThreadSafeReference`] captures what is needed to rebuild a handle on
//! another reader of the same store, possibly on another thread.
//!
//! Results pin the version they were captured at: a destination reader
//! that is behind moves forward to it before the results are rebuilt.
//! Objects and collections pin nothing. They re-resolve at whatever
//! version the destination reader is on, following the primary key if the
//! object was recreated, and come back invalid if it is gone.

use crate::binding::CollectionRoot;
use crate::coordinator::CoordinatorLease;
use crate::dictionary::Dictionary;
use crate::error::{NotifyError, NotifyResult};
use crate::list::{CollectionCore, List, Set};
use crate::object::Object;
use crate::reader::Reader;
use crate::results::{Results, ResultsMode};
use livedb_core::{ObjLink, Snapshot, Value, Version, VersionPin};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// A handle that can be captured in a [`ThreadSafeReference`].
pub trait Handover: Sized {
    /// What travels between threads.
    type Payload: Send + 'static;

    /// The reader the handle belongs to.
    fn reader(&self) -> &Reader;

    /// Captures the handle.
    fn export(&self) -> NotifyResult<Self::Payload>;

    /// Rebuilds the handle on `reader`. `source` is the version the
    /// handle was captured at.
    fn import(payload: Self::Payload, source: Version, reader: &Reader) -> NotifyResult<Self>;
}

/// A handle captured for use on another reader.
///
/// Holding a reference keeps the store's coordinator alive.
pub struct ThreadSafeReference<T: Handover> {
    payload: T::Payload,
    lease: CoordinatorLease,
    source_version: Version,
}

impl<T: Handover> ThreadSafeReference<T> {
    /// Captures `handle`.
    pub fn new(handle: &T) -> NotifyResult<Self> {
        let reader = handle.reader();
        let payload = handle.export()?;
        Ok(Self {
            payload,
            lease: reader.lease().clone(),
            source_version: reader.version(),
        })
    }

    /// The version the handle was captured at.
    #[must_use]
    pub fn source_version(&self) -> Version {
        self.source_version
    }

    /// Rebuilds the handle on `reader`, which must read the same store.
    pub fn resolve(self, reader: &Reader) -> NotifyResult<T> {
        if !Arc::ptr_eq(self.lease.coordinator(), reader.coordinator()) {
            return Err(NotifyError::unsupported(format!(
                "Cannot resolve a reference to '{}' on a reader of '{}'",
                self.lease.path().display(),
                reader.path().display()
            )));
        }
        trace!(
            path = %reader.path().display(),
            source = %self.source_version,
            destination = %reader.version(),
            "resolving reference"
        );
        T::import(self.payload, self.source_version, reader)
    }
}

impl<T: Handover> fmt::Debug for ThreadSafeReference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSafeReference")
            .field("path", &self.lease.path())
            .field("source_version", &self.source_version)
            .finish()
    }
}

/// Captured results.
#[doc(hidden)]
pub struct ResultsPayload {
    mode: ResultsMode,
    pin: VersionPin,
}

impl Handover for Results {
    type Payload = ResultsPayload;

    fn reader(&self) -> &Reader {
        Results::reader(self)
    }

    fn export(&self) -> NotifyResult<ResultsPayload> {
        let reader = Results::reader(self);
        if reader.is_in_write() {
            return Err(NotifyError::InWriteTransaction {
                operation: "capture results for another thread",
            });
        }
        let pin = reader.store().pin(reader.version())?;
        Ok(ResultsPayload {
            mode: self.mode().clone(),
            pin,
        })
    }

    fn import(payload: ResultsPayload, source: Version, reader: &Reader) -> NotifyResult<Self> {
        if reader.version() < source {
            reader.advance_to(source)?;
        }
        drop(payload.pin);
        Ok(Results::with_mode(reader.clone(), payload.mode))
    }
}

/// Captured object identity.
#[doc(hidden)]
pub struct ObjectPayload {
    link: ObjLink,
    incarnation: Version,
    primary_key: Option<Value>,
}

fn primary_key_of(snapshot: &Snapshot, link: ObjLink) -> NotifyResult<Option<Value>> {
    let schema = snapshot.schema(link.table)?;
    let Some(column) = schema.primary_key_column() else {
        return Ok(None);
    };
    Ok(Some(snapshot.get(link.table, link.key, column.key)?.clone()))
}

/// Finds the current life of an object: the same one if it survived,
/// otherwise whichever object now holds its primary key.
fn relocate(snapshot: &Snapshot, link: ObjLink, incarnation: Version, primary_key: Option<&Value>) -> Option<(ObjLink, Version)> {
    if snapshot.incarnation(link.table, link.key) == Some(incarnation) {
        return Some((link, incarnation));
    }
    let key = snapshot.find_by_primary_key(link.table, primary_key?)?;
    let incarnation = snapshot.incarnation(link.table, key)?;
    Some((ObjLink::new(link.table, key), incarnation))
}

impl Handover for Object {
    type Payload = ObjectPayload;

    fn reader(&self) -> &Reader {
        Object::reader(self)
    }

    fn export(&self) -> NotifyResult<ObjectPayload> {
        let link = self.link();
        let primary_key = Object::reader(self).read_with(|s| {
            if s.incarnation(link.table, link.key) != Some(self.incarnation()) {
                return Ok(None);
            }
            primary_key_of(s, link)
        })?;
        Ok(ObjectPayload {
            link,
            incarnation: self.incarnation(),
            primary_key,
        })
    }

    fn import(payload: ObjectPayload, _source: Version, reader: &Reader) -> NotifyResult<Self> {
        let found = reader.read_with(|s| {
            Ok(relocate(s, payload.link, payload.incarnation, payload.primary_key.as_ref()))
        })?;
        Ok(match found {
            Some((link, incarnation)) => Object::bound(reader.clone(), link, incarnation),
            None => Object::bound(reader.clone(), payload.link, payload.incarnation),
        })
    }
}

/// Captured collection location.
#[doc(hidden)]
pub struct CollectionPayload {
    root: CollectionRoot,
    owner_primary_key: Option<Value>,
}

fn export_collection(core: &CollectionCore) -> NotifyResult<CollectionPayload> {
    let root = core.root().clone();
    let owner = ObjLink::new(root.path.table, root.path.object);
    let owner_primary_key = core.reader().read_with(|s| {
        if !root.owner_alive(s) {
            return Ok(None);
        }
        primary_key_of(s, owner)
    })?;
    Ok(CollectionPayload {
        root,
        owner_primary_key,
    })
}

fn import_collection(payload: CollectionPayload, reader: &Reader, kind: &'static str) -> NotifyResult<CollectionCore> {
    let CollectionPayload {
        root,
        owner_primary_key,
    } = payload;
    let owner = ObjLink::new(root.path.table, root.path.object);
    let root = reader.read_with(|s| {
        Ok(
            match relocate(s, owner, root.incarnation, owner_primary_key.as_ref()) {
                Some((link, incarnation)) => {
                    let mut path = root.path.clone();
                    path.object = link.key;
                    CollectionRoot { path, incarnation }
                }
                None => root,
            },
        )
    })?;
    Ok(CollectionCore::bound(reader.clone(), root, kind))
}

impl Handover for List {
    type Payload = CollectionPayload;

    fn reader(&self) -> &Reader {
        self.core().reader()
    }

    fn export(&self) -> NotifyResult<CollectionPayload> {
        export_collection(self.core())
    }

    fn import(payload: CollectionPayload, _source: Version, reader: &Reader) -> NotifyResult<Self> {
        Ok(List::from_core(import_collection(payload, reader, "list")?))
    }
}

impl Handover for Set {
    type Payload = CollectionPayload;

    fn reader(&self) -> &Reader {
        self.core().reader()
    }

    fn export(&self) -> NotifyResult<CollectionPayload> {
        export_collection(self.core())
    }

    fn import(payload: CollectionPayload, _source: Version, reader: &Reader) -> NotifyResult<Self> {
        Ok(Set::from_core(import_collection(payload, reader, "set")?))
    }
}

impl Handover for Dictionary {
    type Payload = CollectionPayload;

    fn reader(&self) -> &Reader {
        self.core().reader()
    }

    fn export(&self) -> NotifyResult<CollectionPayload> {
        export_collection(self.core())
    }

    fn import(payload: CollectionPayload, _source: Version, reader: &Reader) -> NotifyResult<Self> {
        Ok(Dictionary::from_core(import_collection(payload, reader, "dictionary")?))
    }
}
