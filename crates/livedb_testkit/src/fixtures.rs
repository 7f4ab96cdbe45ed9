//! Test fixtures and store helpers.
//!
//! Provides temporary stores, seeded tables and recorders that collect
//! what notification callbacks receive.

use livedb_core::{DataType, ObjKey, ObjLink, TableKey, TableSchema, WriteTransaction};
use livedb_notify::{NotifyError, NotifyResult, Reader, ReaderConfig};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A store in a temporary directory, removed on drop.
pub struct TestStore {
    config: ReaderConfig,
    _temp_dir: TempDir,
}

impl TestStore {
    /// Creates a store with default settings.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Creates a store, letting `configure` adjust the reader settings.
    pub fn with_config(configure: impl FnOnce(ReaderConfig) -> ReaderConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = configure(ReaderConfig::new(temp_dir.path().join("test.livedb")));
        Self {
            config,
            _temp_dir: temp_dir,
        }
    }

    /// Path of the store.
    pub fn path(&self) -> PathBuf {
        self._temp_dir.path().join("test.livedb")
    }

    /// The reader settings used by [`TestStore::open`].
    pub fn config(&self) -> ReaderConfig {
        self.config.clone()
    }

    /// Opens a new reader on the store.
    pub fn open(&self) -> Reader {
        Reader::open(self.config()).expect("Failed to open reader")
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `f` in a write transaction on `reader` and commits.
///
/// Panics if the transaction fails.
pub fn commit_write<R>(reader: &Reader, f: impl FnOnce(&mut WriteTransaction) -> NotifyResult<R>) -> R {
    try_commit_write(reader, f).expect("Write transaction failed")
}

/// Runs `f` in a write transaction on `reader`, committing on success.
pub fn try_commit_write<R>(
    reader: &Reader,
    f: impl FnOnce(&mut WriteTransaction) -> NotifyResult<R>,
) -> NotifyResult<R> {
    reader.write(|r| r.with_write_transaction(f))
}

/// What one callback invocation received.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification<C> {
    /// The change, default when an error was delivered.
    pub changes: C,
    /// The error, if the notifier failed.
    pub error: Option<NotifyError>,
}

/// Collects values across threads.
pub struct Recorder<T> {
    events: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> Recorder<T> {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one value.
    pub fn push(&self, event: T) {
        self.events.lock().push(event);
    }

    /// Number of recorded values.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Copies of every recorded value.
    pub fn events(&self) -> Vec<T> {
        self.events.lock().clone()
    }

    /// The most recent value.
    pub fn last(&self) -> Option<T> {
        self.events.lock().last().cloned()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl<C: Clone + Send + 'static> Recorder<Notification<C>> {
    /// A callback recording every invocation.
    pub fn sink(&self) -> impl FnMut(&C, Option<&NotifyError>) + Send + 'static {
        let recorder = self.clone();
        move |changes: &C, error: Option<&NotifyError>| {
            recorder.push(Notification {
                changes: changes.clone(),
                error: error.cloned(),
            });
        }
    }

    /// Recorded changes, including the ones delivered with errors.
    pub fn changes(&self) -> Vec<C> {
        self.events().into_iter().map(|n| n.changes).collect()
    }

    /// Recorded errors.
    pub fn errors(&self) -> Vec<NotifyError> {
        self.events().into_iter().filter_map(|n| n.error).collect()
    }
}

/// Common store layouts.
pub mod scenarios {
    use super::*;

    /// Table `item` with an int `value` and a string `name`, one object per
    /// value.
    pub fn items(reader: &Reader, values: &[i64]) -> (TableKey, Vec<ObjKey>) {
        commit_write(reader, |txn| {
            let table = txn.add_table(
                TableSchema::new("item")
                    .with_property("value", DataType::Int)
                    .with_property("name", DataType::String),
            )?;
            let mut keys = Vec::with_capacity(values.len());
            for value in values {
                let key = txn.create_object(table)?;
                txn.set_by_name(table, key, "value", *value)?;
                keys.push(key);
            }
            Ok((table, keys))
        })
    }

    /// An `origin` object whose `targets` list links to `count` objects of
    /// table `target`, each with an int `value` equal to its position.
    #[derive(Debug, Clone)]
    pub struct LinkedList {
        /// The owning object.
        pub origin: ObjLink,
        /// Table of the linked objects.
        pub target_table: TableKey,
        /// Linked objects in list order.
        pub targets: Vec<ObjKey>,
    }

    /// Creates a [`LinkedList`] layout.
    pub fn linked_list(reader: &Reader, count: usize) -> LinkedList {
        commit_write(reader, |txn| {
            let target_table = txn.add_table(
                TableSchema::new("target")
                    .with_property("value", DataType::Int)
                    .with_property("label", DataType::String),
            )?;
            let origin_table = txn.add_table(
                TableSchema::new("origin")
                    .with_list("targets", DataType::Link(target_table))
                    .with_property("value", DataType::Int),
            )?;
            let origin = ObjLink::new(origin_table, txn.create_object(origin_table)?);
            let column = txn.schema(origin_table)?.column_key("targets")?;
            let path = livedb_core::CollectionPath::of(origin, column);
            let mut targets = Vec::with_capacity(count);
            for i in 0..count {
                let key = txn.create_object(target_table)?;
                txn.set_by_name(target_table, key, "value", i as i64)?;
                txn.list_push(&path, ObjLink::new(target_table, key))?;
                targets.push(key);
            }
            Ok(LinkedList {
                origin,
                target_table,
                targets,
            })
        })
    }

    /// An `owner` object with an int list `values`, a dictionary `scores`
    /// and a mixed `any` property.
    pub fn owner(reader: &Reader, values: &[i64]) -> ObjLink {
        commit_write(reader, |txn| {
            let table = txn.add_table(
                TableSchema::new("owner")
                    .with_list("values", DataType::Int)
                    .with_set("tags", DataType::String)
                    .with_dictionary("scores", DataType::Int)
                    .with_property("any", DataType::Mixed),
            )?;
            let owner = ObjLink::new(table, txn.create_object(table)?);
            let column = txn.schema(table)?.column_key("values")?;
            let path = livedb_core::CollectionPath::of(owner, column);
            for value in values {
                txn.list_push(&path, *value)?;
            }
            Ok(owner)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_are_isolated() {
        let a = TestStore::new();
        let b = TestStore::new();
        assert_ne!(a.path(), b.path());
        let reader = a.open();
        let (_, keys) = scenarios::items(&reader, &[1, 2, 3]);
        assert_eq!(keys.len(), 3);
        assert!(b.open().snapshot().unwrap().find_table("item").is_none());
    }

    #[test]
    fn recorder_collects_notifications() {
        let recorder: Recorder<Notification<u32>> = Recorder::new();
        let mut sink = recorder.sink();
        sink(&1, None);
        sink(&0, Some(&NotifyError::resource("boom")));
        assert_eq!(recorder.changes(), vec![1, 0]);
        assert_eq!(recorder.errors().len(), 1);
    }
}
