//! Dictionary handles.

use crate::binding::CollectionBinding;
use crate::change_set::{CollectionChange, DictionaryChangeSet};
use crate::error::{NotifyError, NotifyResult};
use crate::key_path::KeyPathArray;
use crate::list::{CollectionCore, List};
use crate::notifier::{ChangeCallback, NotificationToken};
use crate::object::Object;
use crate::reader::Reader;
use livedb_core::{CollectionPath, Value};
use std::collections::BTreeMap;

fn entries(value: &Value) -> Option<&BTreeMap<String, Value>> {
    value.as_dictionary()
}

/// A string-keyed dictionary, either a dictionary column or one nested in
/// a mixed value. Keys iterate in sorted order.
#[derive(Clone, Debug)]
pub struct Dictionary {
    core: CollectionCore,
}

impl Dictionary {
    /// Binds to the dictionary at `path`.
    pub fn attach(reader: &Reader, path: CollectionPath) -> NotifyResult<Self> {
        Ok(Self {
            core: CollectionCore::attach(reader, path, "dictionary")?,
        })
    }

    pub(crate) fn from_core(core: CollectionCore) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &CollectionCore {
        &self.core
    }

    /// Location of the dictionary.
    #[must_use]
    pub fn path(&self) -> &CollectionPath {
        self.core.path()
    }

    /// Number of entries.
    pub fn size(&self) -> NotifyResult<usize> {
        self.core
            .read(|v, _| Ok(entries(v).map_or(0, BTreeMap::len)))
    }

    /// The value stored under `key`.
    pub fn get(&self, key: &str) -> NotifyResult<Value> {
        self.try_get(key)?
            .ok_or_else(|| NotifyError::dictionary_key_not_found(key))
    }

    /// The value stored under `key`, if any.
    pub fn try_get(&self, key: &str) -> NotifyResult<Option<Value>> {
        self.core
            .read(|v, _| Ok(entries(v).and_then(|m| m.get(key)).cloned()))
    }

    /// The object linked under `key`.
    pub fn get_object(&self, key: &str) -> NotifyResult<Object> {
        match self.get(key)? {
            Value::Link(link) => Object::attach(self.core.reader(), link),
            other => Err(NotifyError::unsupported(format!(
                "Value for key '{key}' is a {}, not an object",
                other.type_name()
            ))),
        }
    }

    /// Returns true if `key` has an entry.
    pub fn contains_key(&self, key: &str) -> NotifyResult<bool> {
        self.core
            .read(|v, _| Ok(entries(v).is_some_and(|m| m.contains_key(key))))
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> NotifyResult<Vec<String>> {
        self.core
            .read(|v, _| Ok(entries(v).map(|m| m.keys().cloned().collect()).unwrap_or_default()))
    }

    /// Entries in key order.
    pub fn values(&self) -> NotifyResult<Vec<(String, Value)>> {
        self.core.read(|v, _| {
            Ok(entries(v)
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default())
        })
    }

    /// Returns true if the dictionary can still be read.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.core.is_valid()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> NotifyResult<()> {
        let key = key.into();
        let value = value.into();
        self.core.write(|txn, path, _| {
            txn.dictionary_insert(path, key, value)?;
            Ok(())
        })
    }

    /// Removes the entry under `key` and returns its value.
    pub fn remove(&self, key: &str) -> NotifyResult<Value> {
        self.core.write(|txn, path, _| {
            txn.dictionary_remove(path, key)?
                .ok_or_else(|| NotifyError::dictionary_key_not_found(key))
        })
    }

    /// Removes every entry.
    pub fn clear(&self) -> NotifyResult<()> {
        self.core
            .write(|txn, path, _| Ok(txn.dictionary_clear(path)?))
    }

    /// The list nested under `key` of a mixed dictionary.
    pub fn nested_list(&self, key: &str) -> NotifyResult<List> {
        List::attach(self.core.reader(), self.path().child(key))
    }

    /// The dictionary nested under `key` of a mixed dictionary.
    pub fn nested_dictionary(&self, key: &str) -> NotifyResult<Dictionary> {
        Dictionary::attach(self.core.reader(), self.path().child(key))
    }

    /// Registers a callback receiving key-space changes.
    pub fn add_notification_callback<F>(&self, mut callback: F) -> NotifyResult<NotificationToken>
    where
        F: FnMut(&DictionaryChangeSet, Option<&NotifyError>) + Send + 'static,
    {
        self.add_callback(
            move |change: &CollectionChange, err: Option<&NotifyError>| {
                let keyed = change.dictionary.clone().unwrap_or_default();
                callback(&keyed, err);
            },
            None,
        )
    }

    /// Registers a callback filtered to property paths of the linked
    /// objects.
    pub fn add_notification_callback_with_key_paths<F>(
        &self,
        mut callback: F,
        paths: &[&str],
    ) -> NotifyResult<NotificationToken>
    where
        F: FnMut(&DictionaryChangeSet, Option<&NotifyError>) + Send + 'static,
    {
        let key_paths = self.core.key_paths(paths)?;
        self.add_callback(
            move |change: &CollectionChange, err: Option<&NotifyError>| {
                let keyed = change.dictionary.clone().unwrap_or_default();
                callback(&keyed, err);
            },
            Some(key_paths),
        )
    }

    /// Registers a callback with `before` and `after` hooks. The change
    /// carries both index-space and key-space changes.
    pub fn add_callback(
        &self,
        callback: impl ChangeCallback + 'static,
        key_paths: Option<KeyPathArray>,
    ) -> NotifyResult<NotificationToken> {
        self.core.register(
            CollectionBinding::Dictionary(self.core.root().clone()),
            Box::new(callback),
            key_paths,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReaderConfig;
    use livedb_core::{DataType, ObjLink, TableSchema};

    fn dictionary(reader: &Reader) -> Dictionary {
        reader
            .write(|r| {
                let link = r.with_write_transaction(|txn| {
                    let table = txn.add_table(
                        TableSchema::new("owner").with_dictionary("scores", DataType::Int),
                    )?;
                    Ok(ObjLink::new(table, txn.create_object(table)?))
                })?;
                Object::attach(r, link)?.dictionary("scores")
            })
            .unwrap()
    }

    #[test]
    fn missing_keys_raise() {
        let reader = Reader::open(ReaderConfig::anonymous()).unwrap();
        let dict = dictionary(&reader);
        reader
            .write(|_| {
                dict.insert("a", 1i64)?;
                dict.insert("b", 2i64)
            })
            .unwrap();
        assert_eq!(dict.get("a").unwrap(), Value::Int(1));
        assert_eq!(
            dict.get("foo").unwrap_err().to_string(),
            "Cannot get value for key 'foo': key not found"
        );
        assert_eq!(dict.try_get("foo").unwrap(), None);
        let err = reader.write(|_| dict.remove("foo")).unwrap_err();
        assert!(matches!(err, NotifyError::KeyNotFound { .. }));
        assert_eq!(dict.keys().unwrap(), vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn keyed_notifications() {
        let reader = Reader::open(ReaderConfig::anonymous()).unwrap();
        let dict = dictionary(&reader);
        reader.write(|_| dict.insert("a", 1i64)).unwrap();

        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = std::sync::Arc::clone(&seen);
        let _token = dict
            .add_notification_callback(move |changes, _| sink.lock().push(changes.clone()))
            .unwrap();
        reader.refresh().unwrap();

        reader
            .write(|_| {
                dict.insert("a", 5i64)?;
                dict.insert("b", 2i64)
            })
            .unwrap();
        reader.refresh().unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_empty());
        assert_eq!(seen[1].insertions, vec!["b".to_owned()]);
        assert_eq!(seen[1].modifications, vec!["a".to_owned()]);
        assert!(seen[1].deletions.is_empty());
    }
}
