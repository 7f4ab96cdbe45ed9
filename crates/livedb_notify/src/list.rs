//! List and set handles.

use crate::binding::{CollectionBinding, CollectionRoot};
use crate::change_set::{ChangeSet, CollectionChange};
use crate::dictionary::Dictionary;
use crate::error::{NotifyError, NotifyResult};
use crate::key_path::{KeyPath, KeyPathArray};
use crate::notifier::{ChangeCallback, NotificationToken, NotifierSlot};
use crate::object::Object;
use crate::reader::Reader;
use crate::results::Results;
use livedb_core::{CollectionPath, Predicate, Query, Snapshot, TableKey, Value, WriteTransaction};
use std::fmt;

/// State shared by list, set and dictionary handles.
#[derive(Clone)]
pub(crate) struct CollectionCore {
    reader: Reader,
    root: CollectionRoot,
    slot: NotifierSlot,
    kind: &'static str,
}

impl CollectionCore {
    pub(crate) fn attach(reader: &Reader, path: CollectionPath, kind: &'static str) -> NotifyResult<Self> {
        let root = reader.read_with(|s| {
            CollectionRoot::resolve(s, path).ok_or(NotifyError::InvalidatedCollection { kind })
        })?;
        Ok(Self::bound(reader.clone(), root, kind))
    }

    pub(crate) fn bound(reader: Reader, root: CollectionRoot, kind: &'static str) -> Self {
        Self {
            reader,
            root,
            slot: NotifierSlot::default(),
            kind,
        }
    }

    pub(crate) fn reader(&self) -> &Reader {
        &self.reader
    }

    pub(crate) fn root(&self) -> &CollectionRoot {
        &self.root
    }

    pub(crate) fn path(&self) -> &CollectionPath {
        &self.root.path
    }

    fn invalid(&self) -> NotifyError {
        NotifyError::InvalidatedCollection { kind: self.kind }
    }

    /// Runs `f` on the collection value as the reader sees it.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Value, &Snapshot) -> NotifyResult<R>) -> NotifyResult<R> {
        self.reader.read_with(|s| {
            let value = self.root.value(s).ok_or_else(|| self.invalid())?;
            f(value, s)
        })
    }

    /// Runs `f` in the open write transaction, passing the current size.
    pub(crate) fn write<R>(
        &self,
        f: impl FnOnce(&mut WriteTransaction, &CollectionPath, usize) -> NotifyResult<R>,
    ) -> NotifyResult<R> {
        self.reader.with_write_transaction(|txn| {
            let size = match self.root.value(txn) {
                Some(Value::List(items) | Value::Set(items)) => items.len(),
                Some(Value::Dictionary(map)) => map.len(),
                _ => return Err(self.invalid()),
            };
            f(txn, &self.root.path, size)
        })
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.reader
            .read_with(|s| Ok(self.root.value(s).is_some()))
            .unwrap_or(false)
    }

    /// Link target table of the column holding the collection.
    pub(crate) fn link_target(&self) -> NotifyResult<Option<TableKey>> {
        self.reader.read_with(|s| {
            let column = s.schema(self.root.path.table)?.require_column(self.root.path.column)?;
            Ok(column.data_type.link_target())
        })
    }

    pub(crate) fn key_paths(&self, paths: &[&str]) -> NotifyResult<KeyPathArray> {
        let target = self.link_target()?.ok_or_else(|| {
            NotifyError::unsupported(format!("Key paths require a {} of objects", self.kind))
        })?;
        self.reader
            .read_with(|s| Ok(KeyPath::parse_all(s, target, paths)?))
    }

    pub(crate) fn register(
        &self,
        binding: CollectionBinding,
        callback: Box<dyn ChangeCallback>,
        key_paths: Option<KeyPathArray>,
    ) -> NotifyResult<NotificationToken> {
        self.slot
            .register(&self.reader, || Ok(binding), callback, key_paths)
    }

    pub(crate) fn as_results(&self) -> NotifyResult<Results> {
        match self.link_target()? {
            Some(target) if self.root.path.is_top_level() => Ok(Results::from_query(
                &self.reader,
                Query::collection(self.root.path.clone(), target),
            )),
            _ => Err(NotifyError::unsupported(format!(
                "Only a {} of objects can be queried",
                self.kind
            ))),
        }
    }

    fn element(&self, items: &[Value], index: usize) -> NotifyResult<Value> {
        items
            .get(index)
            .cloned()
            .ok_or(NotifyError::IndexOutOfBounds {
                index,
                max: items.len(),
            })
    }
}

impl fmt::Debug for CollectionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.kind)
            .field("path", &self.root.path)
            .field("incarnation", &self.root.incarnation)
            .finish()
    }
}

fn sequence(value: &Value) -> &[Value] {
    value.as_sequence().unwrap_or_default()
}

fn check_index(index: usize, size: usize) -> NotifyResult<()> {
    if index < size {
        Ok(())
    } else {
        Err(NotifyError::IndexOutOfBounds { index, max: size })
    }
}

fn object_at(reader: &Reader, value: Value) -> NotifyResult<Object> {
    match value {
        Value::Link(link) => Object::attach(reader, link),
        other => Err(NotifyError::unsupported(format!(
            "Element is a {}, not an object",
            other.type_name()
        ))),
    }
}

fn forward_changes<F>(mut callback: F) -> impl ChangeCallback + 'static
where
    F: FnMut(&ChangeSet, Option<&NotifyError>) + Send + 'static,
{
    move |change: &CollectionChange, err: Option<&NotifyError>| callback(&change.changes, err)
}

/// An ordered list, either a list column or a list nested in a mixed value.
#[derive(Clone, Debug)]
pub struct List {
    core: CollectionCore,
}

impl List {
    /// Binds to the list at `path`.
    pub fn attach(reader: &Reader, path: CollectionPath) -> NotifyResult<Self> {
        Ok(Self {
            core: CollectionCore::attach(reader, path, "list")?,
        })
    }

    pub(crate) fn from_core(core: CollectionCore) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &CollectionCore {
        &self.core
    }

    /// Location of the list.
    #[must_use]
    pub fn path(&self) -> &CollectionPath {
        self.core.path()
    }

    /// Number of elements.
    pub fn size(&self) -> NotifyResult<usize> {
        self.core.read(|v, _| Ok(sequence(v).len()))
    }

    /// The element at `index`.
    pub fn get(&self, index: usize) -> NotifyResult<Value> {
        self.core.read(|v, _| self.core.element(sequence(v), index))
    }

    /// The object linked at `index`.
    pub fn get_object(&self, index: usize) -> NotifyResult<Object> {
        object_at(self.core.reader(), self.get(index)?)
    }

    /// First position of `value`.
    pub fn index_of(&self, value: &Value) -> NotifyResult<Option<usize>> {
        self.core
            .read(|v, _| Ok(sequence(v).iter().position(|e| e == value)))
    }

    /// All elements.
    pub fn values(&self) -> NotifyResult<Vec<Value>> {
        self.core.read(|v, _| Ok(sequence(v).to_vec()))
    }

    /// Returns true if the list can still be read.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    /// Appends a value and returns its position.
    pub fn push(&self, value: impl Into<Value>) -> NotifyResult<usize> {
        let value = value.into();
        self.core
            .write(|txn, path, _| Ok(txn.list_push(path, value)?))
    }

    /// Inserts a value at `index`, which may equal the size.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> NotifyResult<()> {
        let value = value.into();
        self.core.write(|txn, path, size| {
            check_index(index, size + 1)?;
            Ok(txn.list_insert(path, index, value)?)
        })
    }

    /// Replaces the value at `index`, returning the old one.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> NotifyResult<Value> {
        let value = value.into();
        self.core.write(|txn, path, size| {
            check_index(index, size)?;
            Ok(txn.list_set(path, index, value)?)
        })
    }

    /// Removes and returns the value at `index`.
    pub fn remove(&self, index: usize) -> NotifyResult<Value> {
        self.core.write(|txn, path, size| {
            check_index(index, size)?;
            Ok(txn.list_remove(path, index)?)
        })
    }

    /// Moves the element at `from` to `to`.
    pub fn move_element(&self, from: usize, to: usize) -> NotifyResult<()> {
        self.core.write(|txn, path, size| {
            check_index(from, size)?;
            check_index(to, size)?;
            Ok(txn.list_move(path, from, to)?)
        })
    }

    /// Swaps two elements.
    pub fn swap(&self, a: usize, b: usize) -> NotifyResult<()> {
        self.core.write(|txn, path, size| {
            check_index(a, size)?;
            check_index(b, size)?;
            Ok(txn.list_swap(path, a, b)?)
        })
    }

    /// Removes every element.
    pub fn clear(&self) -> NotifyResult<()> {
        self.core.write(|txn, path, _| Ok(txn.list_clear(path)?))
    }

    /// The list nested at `index` of a mixed list.
    pub fn nested_list(&self, index: usize) -> NotifyResult<List> {
        List::attach(self.core.reader(), self.path().child(index))
    }

    /// The dictionary nested at `index` of a mixed list.
    pub fn nested_dictionary(&self, index: usize) -> NotifyResult<Dictionary> {
        Dictionary::attach(self.core.reader(), self.path().child(index))
    }

    /// The linked objects as live results.
    pub fn as_results(&self) -> NotifyResult<Results> {
        self.core.as_results()
    }

    /// The linked objects matching `predicate`, as live results.
    pub fn filter(&self, predicate: Predicate) -> NotifyResult<Results> {
        self.as_results()?.filter(predicate)
    }

    /// Registers a callback receiving every change.
    pub fn add_notification_callback<F>(&self, callback: F) -> NotifyResult<NotificationToken>
    where
        F: FnMut(&ChangeSet, Option<&NotifyError>) + Send + 'static,
    {
        self.add_callback(forward_changes(callback), None)
    }

    /// Registers a callback filtered to property paths of the linked
    /// objects.
    pub fn add_notification_callback_with_key_paths<F>(
        &self,
        callback: F,
        paths: &[&str],
    ) -> NotifyResult<NotificationToken>
    where
        F: FnMut(&ChangeSet, Option<&NotifyError>) + Send + 'static,
    {
        let key_paths = self.core.key_paths(paths)?;
        self.add_callback(forward_changes(callback), Some(key_paths))
    }

    /// Registers a callback with `before` and `after` hooks.
    pub fn add_callback(
        &self,
        callback: impl ChangeCallback + 'static,
        key_paths: Option<KeyPathArray>,
    ) -> NotifyResult<NotificationToken> {
        self.core.register(
            CollectionBinding::List(self.core.root().clone()),
            Box::new(callback),
            key_paths,
        )
    }
}

/// An unordered collection of distinct values, kept in value order.
#[derive(Clone, Debug)]
pub struct Set {
    core: CollectionCore,
}

impl Set {
    /// Binds to the set at `path`.
    pub fn attach(reader: &Reader, path: CollectionPath) -> NotifyResult<Self> {
        Ok(Self {
            core: CollectionCore::attach(reader, path, "set")?,
        })
    }

    pub(crate) fn from_core(core: CollectionCore) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &CollectionCore {
        &self.core
    }

    /// Location of the set.
    #[must_use]
    pub fn path(&self) -> &CollectionPath {
        self.core.path()
    }

    /// Number of elements.
    pub fn size(&self) -> NotifyResult<usize> {
        self.core.read(|v, _| Ok(sequence(v).len()))
    }

    /// The element at `index` in value order.
    pub fn get(&self, index: usize) -> NotifyResult<Value> {
        self.core.read(|v, _| self.core.element(sequence(v), index))
    }

    /// Returns true if `value` is an element.
    pub fn contains(&self, value: &Value) -> NotifyResult<bool> {
        self.core
            .read(|v, _| Ok(sequence(v).binary_search(value).is_ok()))
    }

    /// All elements in value order.
    pub fn values(&self) -> NotifyResult<Vec<Value>> {
        self.core.read(|v, _| Ok(sequence(v).to_vec()))
    }

    /// Returns true if the set can still be read.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    /// Adds a value. Returns false if it was already present.
    pub fn insert(&self, value: impl Into<Value>) -> NotifyResult<bool> {
        let value = value.into();
        self.core
            .write(|txn, path, _| Ok(txn.set_insert(path, value)?))
    }

    /// Removes a value. Returns false if it was absent.
    pub fn remove(&self, value: &Value) -> NotifyResult<bool> {
        self.core
            .write(|txn, path, _| Ok(txn.set_remove(path, value)?))
    }

    /// Removes every element.
    pub fn clear(&self) -> NotifyResult<()> {
        self.core.write(|txn, path, _| Ok(txn.set_clear(path)?))
    }

    /// The linked objects as live results.
    pub fn as_results(&self) -> NotifyResult<Results> {
        self.core.as_results()
    }

    /// Registers a callback receiving every change.
    pub fn add_notification_callback<F>(&self, callback: F) -> NotifyResult<NotificationToken>
    where
        F: FnMut(&ChangeSet, Option<&NotifyError>) + Send + 'static,
    {
        self.add_callback(forward_changes(callback), None)
    }

    /// Registers a callback with `before` and `after` hooks.
    pub fn add_callback(
        &self,
        callback: impl ChangeCallback + 'static,
        key_paths: Option<KeyPathArray>,
    ) -> NotifyResult<NotificationToken> {
        self.core.register(
            CollectionBinding::Set(self.core.root().clone()),
            Box::new(callback),
            key_paths,
        )
    }
}
