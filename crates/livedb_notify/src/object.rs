//! Object handles.

use crate::dictionary::Dictionary;
use crate::error::{NotifyError, NotifyResult};
use crate::list::{List, Set};
use crate::reader::Reader;
use livedb_core::{ColKey, CollectionPath, ObjKey, ObjLink, Snapshot, TableKey, Value, Version};
use std::fmt;

/// One object as seen by a reader.
///
/// The handle is bound to one life of the object: if the object is removed
/// and an object with the same primary key is created later, this handle
/// stays invalid.
#[derive(Clone)]
pub struct Object {
    reader: Reader,
    link: ObjLink,
    incarnation: Version,
}

impl Object {
    /// Binds to the object at `link` as the reader currently sees it.
    pub fn attach(reader: &Reader, link: ObjLink) -> NotifyResult<Self> {
        let incarnation = reader.read_with(|s| {
            s.incarnation(link.table, link.key)
                .ok_or(NotifyError::InvalidatedCollection { kind: "object" })
        })?;
        Ok(Self::bound(reader.clone(), link, incarnation))
    }

    /// Finds an object by primary key.
    pub fn find(reader: &Reader, table: &str, primary_key: impl Into<Value>) -> NotifyResult<Option<Self>> {
        let primary_key = primary_key.into();
        let found = reader.read_with(|s| {
            let table = s.table_key(table)?;
            Ok(s.find_by_primary_key(table, &primary_key).map(|key| {
                let incarnation = s.incarnation(table, key).unwrap_or_default();
                (ObjLink::new(table, key), incarnation)
            }))
        })?;
        Ok(found.map(|(link, incarnation)| Self::bound(reader.clone(), link, incarnation)))
    }

    pub(crate) fn bound(reader: Reader, link: ObjLink, incarnation: Version) -> Self {
        Self {
            reader,
            link,
            incarnation,
        }
    }

    /// The object as a link value.
    #[must_use]
    pub fn link(&self) -> ObjLink {
        self.link
    }

    /// The object key.
    #[must_use]
    pub fn key(&self) -> ObjKey {
        self.link.key
    }

    /// The object's table.
    #[must_use]
    pub fn table(&self) -> TableKey {
        self.link.table
    }

    /// The reader this handle reads through.
    #[must_use]
    pub fn reader(&self) -> &Reader {
        &self.reader
    }

    pub(crate) fn incarnation(&self) -> Version {
        self.incarnation
    }

    /// Returns true if the object still exists in the same life.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.reader
            .read_with(|s| Ok(self.alive_in(s)))
            .unwrap_or(false)
    }

    fn alive_in(&self, snapshot: &Snapshot) -> bool {
        snapshot.incarnation(self.link.table, self.link.key) == Some(self.incarnation)
    }

    fn check(&self, snapshot: &Snapshot) -> NotifyResult<()> {
        if self.alive_in(snapshot) {
            Ok(())
        } else {
            Err(NotifyError::InvalidatedCollection { kind: "object" })
        }
    }

    /// Reads a property.
    pub fn get(&self, column: &str) -> NotifyResult<Value> {
        self.reader.read_with(|s| {
            self.check(s)?;
            Ok(s.get_by_name(self.link.table, self.link.key, column)?.clone())
        })
    }

    /// Reads a property by column key.
    pub fn get_col(&self, column: ColKey) -> NotifyResult<Value> {
        self.reader.read_with(|s| {
            self.check(s)?;
            Ok(s.get(self.link.table, self.link.key, column)?.clone())
        })
    }

    /// Writes a property. Requires an open write transaction.
    pub fn set(&self, column: &str, value: impl Into<Value>) -> NotifyResult<()> {
        let value = value.into();
        self.reader.with_write_transaction(|txn| {
            self.check(txn)?;
            txn.set_by_name(self.link.table, self.link.key, column, value)?;
            Ok(())
        })
    }

    fn collection_path(&self, column: &str) -> NotifyResult<CollectionPath> {
        self.reader.read_with(|s| {
            self.check(s)?;
            let col = s.schema(self.link.table)?.column_key(column)?;
            Ok(CollectionPath::of(self.link, col))
        })
    }

    /// The list in `column`.
    pub fn list(&self, column: &str) -> NotifyResult<List> {
        List::attach(&self.reader, self.collection_path(column)?)
    }

    /// The set in `column`.
    pub fn set_collection(&self, column: &str) -> NotifyResult<Set> {
        Set::attach(&self.reader, self.collection_path(column)?)
    }

    /// The dictionary in `column`.
    pub fn dictionary(&self, column: &str) -> NotifyResult<Dictionary> {
        Dictionary::attach(&self.reader, self.collection_path(column)?)
    }

    /// The object a link property points to, if any.
    pub fn linked(&self, column: &str) -> NotifyResult<Option<Object>> {
        match self.get(column)? {
            Value::Link(link) => Object::attach(&self.reader, link).map(Some),
            _ => Ok(None),
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.link == other.link && self.incarnation == other.incarnation
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("link", &self.link)
            .field("incarnation", &self.incarnation)
            .finish()
    }
}
