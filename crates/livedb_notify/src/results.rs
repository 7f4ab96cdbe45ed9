//! Results: live, ordered query results.

use crate::binding::CollectionBinding;
use crate::change_set::{ChangeSet, CollectionChange};
use crate::error::{NotifyError, NotifyResult};
use crate::key_path::{KeyPath, KeyPathArray};
use crate::notifier::{ChangeCallback, NotificationToken, NotifierSlot};
use crate::object::Object;
use crate::reader::Reader;
use crate::sectioned::{SectionKeyFn, SectionedResults};
use livedb_core::{
    ColKey, CollectionKind, CoreError, DataType, ObjKey, ObjLink, Predicate, Query, QuerySource,
    Snapshot, SortDescriptor, TableKey, Value,
};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ResultsMode {
    /// Re-evaluated at every version.
    Live(Query),
    /// Fixed membership.
    Snapshot { table: TableKey, keys: Vec<ObjKey> },
}

/// Objects selected by a query, re-evaluated as the reader advances.
#[derive(Clone)]
pub struct Results {
    reader: Reader,
    mode: ResultsMode,
    slot: NotifierSlot,
}

impl Results {
    /// Every object of the named table.
    pub fn all(reader: &Reader, table: &str) -> NotifyResult<Self> {
        let table = reader.read_with(|s| Ok(s.table_key(table)?))?;
        Ok(Self::from_query(reader, Query::table(table)))
    }

    /// Results of `query`.
    #[must_use]
    pub fn from_query(reader: &Reader, query: Query) -> Self {
        Self::with_mode(reader.clone(), ResultsMode::Live(query))
    }

    pub(crate) fn with_mode(reader: Reader, mode: ResultsMode) -> Self {
        Self {
            reader,
            mode,
            slot: NotifierSlot::default(),
        }
    }

    pub(crate) fn mode(&self) -> &ResultsMode {
        &self.mode
    }

    /// The reader these results read through.
    #[must_use]
    pub fn reader(&self) -> &Reader {
        &self.reader
    }

    /// The table objects are selected from.
    #[must_use]
    pub fn table(&self) -> TableKey {
        match &self.mode {
            ResultsMode::Live(query) => query.target_table(),
            ResultsMode::Snapshot { table, .. } => *table,
        }
    }

    /// The query, for live results.
    #[must_use]
    pub fn query(&self) -> Option<&Query> {
        match &self.mode {
            ResultsMode::Live(query) => Some(query),
            ResultsMode::Snapshot { .. } => None,
        }
    }

    /// Returns true for snapshot results, whose membership never changes.
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        matches!(self.mode, ResultsMode::Snapshot { .. })
    }

    pub(crate) fn keys_in(&self, snapshot: &Snapshot) -> NotifyResult<Vec<ObjKey>> {
        match &self.mode {
            ResultsMode::Live(query) => Ok(query.run(snapshot)?),
            ResultsMode::Snapshot { keys, .. } => Ok(keys.clone()),
        }
    }

    /// Keys of the selected objects, in order.
    pub fn keys(&self) -> NotifyResult<Vec<ObjKey>> {
        self.reader.read_with(|s| self.keys_in(s))
    }

    /// Number of selected objects.
    pub fn size(&self) -> NotifyResult<usize> {
        self.keys().map(|keys| keys.len())
    }

    /// The object at `index`.
    pub fn get(&self, index: usize) -> NotifyResult<Object> {
        let table = self.table();
        let (key, incarnation) = self.reader.read_with(|s| {
            let keys = self.keys_in(s)?;
            let key = *keys.get(index).ok_or(NotifyError::IndexOutOfBounds {
                index,
                max: keys.len(),
            })?;
            Ok((key, s.incarnation(table, key).unwrap_or_default()))
        })?;
        Ok(Object::bound(
            self.reader.clone(),
            ObjLink::new(table, key),
            incarnation,
        ))
    }

    /// Position of `object`, if it is selected.
    pub fn index_of(&self, object: &Object) -> NotifyResult<Option<usize>> {
        if object.table() != self.table() {
            return Ok(None);
        }
        let keys = self.keys()?;
        Ok(keys.iter().position(|k| *k == object.key()))
    }

    /// Returns true if the results can still be read.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let table = self.table();
        self.reader
            .read_with(|s| {
                if !s.has_table(table) {
                    return Ok(false);
                }
                Ok(match self.query().map(Query::source) {
                    Some(QuerySource::Collection { path, .. }) => s.resolve_collection(path).is_some(),
                    _ => true,
                })
            })
            .unwrap_or(false)
    }

    /// Key of a column of the results' table.
    pub fn column_key(&self, column: &str) -> NotifyResult<ColKey> {
        let table = self.table();
        self.reader
            .read_with(|s| Ok(s.schema(table)?.column_key(column)?))
    }

    fn derive(&self, f: impl FnOnce(Query) -> Query) -> NotifyResult<Results> {
        match &self.mode {
            ResultsMode::Live(query) => Ok(Self::with_mode(
                self.reader.clone(),
                ResultsMode::Live(f(query.clone())),
            )),
            ResultsMode::Snapshot { .. } => Err(NotifyError::unsupported(
                "Cannot derive new results from a snapshot",
            )),
        }
    }

    /// Results further filtered by `predicate`.
    pub fn filter(&self, predicate: Predicate) -> NotifyResult<Results> {
        self.derive(|q| q.filter(predicate))
    }

    /// Results sorted by a column.
    pub fn sort(&self, column: &str, ascending: bool) -> NotifyResult<Results> {
        let column = self.column_key(column)?;
        self.derive(|q| q.sort(SortDescriptor::new(column, ascending)))
    }

    /// Results keeping the first object of each distinct combination of
    /// `columns`.
    pub fn distinct(&self, columns: &[&str]) -> NotifyResult<Results> {
        let columns = columns
            .iter()
            .map(|c| self.column_key(c))
            .collect::<NotifyResult<Vec<_>>>()?;
        self.derive(|q| q.distinct(columns))
    }

    /// Results keeping at most `limit` objects.
    pub fn limit(&self, limit: usize) -> NotifyResult<Results> {
        self.derive(|q| q.limit(limit))
    }

    fn numeric_values(&self, operation: &'static str, column: &str) -> NotifyResult<Vec<Value>> {
        let table = self.table();
        self.reader.read_with(|s| {
            let schema = s.schema(table)?;
            let col = schema
                .column_by_name(column)
                .ok_or_else(|| CoreError::no_such_column(&schema.name, column))?;
            let numeric = col.collection == CollectionKind::Single
                && matches!(col.data_type, DataType::Int | DataType::Double | DataType::Mixed);
            if !numeric {
                let data_type = match col.collection {
                    CollectionKind::Single => col.data_type.to_string(),
                    kind => format!("{kind}<{}>", col.data_type),
                };
                return Err(NotifyError::UnsupportedAggregate {
                    operation,
                    column: column.to_owned(),
                    data_type,
                });
            }
            let key = col.key;
            Ok(self
                .keys_in(s)?
                .into_iter()
                .filter_map(|k| s.get(table, k, key).ok())
                .filter(|v| v.as_f64().is_some())
                .cloned()
                .collect())
        })
    }

    fn extreme(&self, operation: &'static str, column: &str, wanted: Ordering) -> NotifyResult<Option<Value>> {
        let values = self.numeric_values(operation, column)?;
        Ok(values.into_iter().reduce(|best, v| {
            let ord = numeric(&v).total_cmp(&numeric(&best));
            if ord == wanted {
                v
            } else {
                best
            }
        }))
    }

    /// Smallest value of a numeric column, `None` if nothing is selected.
    pub fn min(&self, column: &str) -> NotifyResult<Option<Value>> {
        self.extreme("min", column, Ordering::Less)
    }

    /// Largest value of a numeric column, `None` if nothing is selected.
    pub fn max(&self, column: &str) -> NotifyResult<Option<Value>> {
        self.extreme("max", column, Ordering::Greater)
    }

    /// Sum of a numeric column. Integer columns sum to an integer.
    pub fn sum(&self, column: &str) -> NotifyResult<Value> {
        let values = self.numeric_values("sum", column)?;
        if values.iter().all(|v| matches!(v, Value::Int(_))) {
            let total = values.iter().filter_map(Value::as_int).fold(0i64, i64::wrapping_add);
            return Ok(Value::Int(total));
        }
        Ok(Value::Double(values.iter().map(numeric).sum()))
    }

    /// Mean of a numeric column, `None` if nothing is selected.
    pub fn average(&self, column: &str) -> NotifyResult<Option<f64>> {
        let values = self.numeric_values("average", column)?;
        if values.is_empty() {
            return Ok(None);
        }
        let total: f64 = values.iter().map(numeric).sum();
        Ok(Some(total / values.len() as f64))
    }

    /// Results fixed to the objects selected now.
    pub fn snapshot(&self) -> NotifyResult<Results> {
        let keys = self.keys()?;
        Ok(Self::with_mode(
            self.reader.clone(),
            ResultsMode::Snapshot {
                table: self.table(),
                keys,
            },
        ))
    }

    /// The same results on a reader pinned to the current version.
    pub fn freeze(&self) -> NotifyResult<Results> {
        Ok(Self::with_mode(self.reader.freeze()?, self.mode.clone()))
    }

    pub(crate) fn binding(&self) -> NotifyResult<CollectionBinding> {
        match &self.mode {
            ResultsMode::Live(query) => {
                let plain = matches!(query.source(), QuerySource::Table(_))
                    && matches!(query.predicate(), Predicate::True)
                    && query.ordering().is_empty();
                Ok(if plain {
                    CollectionBinding::Table(query.target_table())
                } else {
                    CollectionBinding::Query(query.clone())
                })
            }
            ResultsMode::Snapshot { .. } => Err(NotifyError::unsupported(
                "Cannot create notifications for a snapshot",
            )),
        }
    }

    /// Resolves property paths such as `"dog.name"` against the results'
    /// table.
    pub fn key_paths(&self, paths: &[&str]) -> NotifyResult<KeyPathArray> {
        let table = self.table();
        self.reader
            .read_with(|s| Ok(KeyPath::parse_all(s, table, paths)?))
    }

    /// Registers a callback receiving every change.
    pub fn add_notification_callback<F>(&self, mut callback: F) -> NotifyResult<NotificationToken>
    where
        F: FnMut(&ChangeSet, Option<&NotifyError>) + Send + 'static,
    {
        self.add_callback(
            move |change: &CollectionChange, err: Option<&NotifyError>| callback(&change.changes, err),
            None,
        )
    }

    /// Registers a callback that only hears about modifications on the
    /// given property paths. Insertions and deletions are always reported.
    pub fn add_notification_callback_with_key_paths<F>(
        &self,
        mut callback: F,
        paths: &[&str],
    ) -> NotifyResult<NotificationToken>
    where
        F: FnMut(&ChangeSet, Option<&NotifyError>) + Send + 'static,
    {
        let key_paths = self.key_paths(paths)?;
        self.add_callback(
            move |change: &CollectionChange, err: Option<&NotifyError>| callback(&change.changes, err),
            Some(key_paths),
        )
    }

    /// Registers a callback with `before` and `after` hooks.
    pub fn add_callback(
        &self,
        callback: impl ChangeCallback + 'static,
        key_paths: Option<KeyPathArray>,
    ) -> NotifyResult<NotificationToken> {
        self.slot
            .register(&self.reader, || self.binding(), Box::new(callback), key_paths)
    }

    /// Registers on a notifier used by no other callback.
    pub(crate) fn add_detached_callback(
        &self,
        callback: Box<dyn ChangeCallback>,
        key_paths: Option<KeyPathArray>,
    ) -> NotifyResult<NotificationToken> {
        if self.reader.is_in_write() {
            return Err(NotifyError::InWriteTransaction {
                operation: "register a notification callback",
            });
        }
        NotifierSlot::register_detached(&self.reader, self.binding()?, callback, key_paths)
    }

    /// Groups the results into sections by `key`.
    ///
    /// Sections appear in the order their first object appears in the
    /// results.
    pub fn sectioned_by<F>(&self, key: F) -> SectionedResults
    where
        F: Fn(&Snapshot, ObjLink) -> Value + Send + Sync + 'static,
    {
        SectionedResults::new(self.clone(), Arc::new(key))
    }

    /// Groups the results by the first character of a string property.
    /// Empty strings share the section keyed by the empty string.
    pub fn sectioned_by_first_letter(&self, column: &str) -> NotifyResult<SectionedResults> {
        let column = self.column_key(column)?;
        let key: SectionKeyFn = Arc::new(move |s: &Snapshot, link: ObjLink| {
            match s.get(link.table, link.key, column) {
                Ok(Value::String(text)) => {
                    Value::String(text.chars().next().map(String::from).unwrap_or_default())
                }
                Ok(other) => other.clone(),
                Err(_) => Value::Null,
            }
        });
        Ok(SectionedResults::new(self.clone(), key))
    }
}

fn numeric(value: &Value) -> f64 {
    value.as_f64().unwrap_or(f64::NAN)
}

impl fmt::Debug for Results {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Results")
            .field("reader", &self.reader)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReaderConfig;
    use livedb_core::TableSchema;
    use parking_lot::Mutex;

    fn seeded(values: &[i64]) -> (Reader, Results) {
        let reader = Reader::open(ReaderConfig::anonymous()).unwrap();
        reader
            .write(|r| {
                r.with_write_transaction(|txn| {
                    let table = txn.add_table(
                        TableSchema::new("item")
                            .with_property("value", DataType::Int)
                            .with_property("name", DataType::String)
                            .with_list("tags", DataType::String),
                    )?;
                    for v in values {
                        let key = txn.create_object(table)?;
                        txn.set_by_name(table, key, "value", *v)?;
                    }
                    Ok(())
                })
            })
            .unwrap();
        let results = Results::all(&reader, "item").unwrap();
        (reader, results)
    }

    #[test]
    fn aggregates_numeric_columns() {
        let (_reader, results) = seeded(&[4, 1, 7]);
        assert_eq!(results.min("value").unwrap(), Some(Value::Int(1)));
        assert_eq!(results.max("value").unwrap(), Some(Value::Int(7)));
        assert_eq!(results.sum("value").unwrap(), Value::Int(12));
        assert_eq!(results.average("value").unwrap(), Some(4.0));

        let empty = results.filter(Predicate::greater(results.column_key("value").unwrap(), 100i64)).unwrap();
        assert_eq!(empty.min("value").unwrap(), None);
        assert_eq!(empty.average("value").unwrap(), None);
    }

    #[test]
    fn aggregates_reject_other_types() {
        let (_reader, results) = seeded(&[1]);
        let err = results.sum("name").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot sum property 'name': operation not supported for 'string' properties"
        );
        assert!(matches!(
            results.min("tags"),
            Err(NotifyError::UnsupportedAggregate { operation: "min", .. })
        ));
    }

    #[test]
    fn sorting_and_limits() {
        let (_reader, results) = seeded(&[4, 1, 7]);
        let sorted = results.sort("value", false).unwrap().limit(2).unwrap();
        let values: Vec<Value> = (0..sorted.size().unwrap())
            .map(|i| sorted.get(i).unwrap().get("value").unwrap())
            .collect();
        assert_eq!(values, vec![Value::Int(7), Value::Int(4)]);
        assert!(matches!(
            sorted.get(2),
            Err(NotifyError::IndexOutOfBounds { index: 2, max: 2 })
        ));
    }

    #[test]
    fn snapshots_keep_their_membership() {
        let (reader, results) = seeded(&[1, 2]);
        let snapshot = results.snapshot().unwrap();
        reader
            .write(|r| {
                r.with_write_transaction(|txn| {
                    let table = txn.table_key("item")?;
                    txn.create_object(table)?;
                    Ok(())
                })
            })
            .unwrap();
        assert_eq!(results.size().unwrap(), 3);
        assert_eq!(snapshot.size().unwrap(), 2);
        assert!(snapshot.add_notification_callback(|_, _| {}).is_err());
        assert!(snapshot.filter(Predicate::True).is_err());
    }

    #[test]
    fn initial_notification_arrives_without_writes() {
        let (reader, results) = seeded(&[1, 2]);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let _token = results
            .add_notification_callback(move |changes, err| {
                assert!(err.is_none());
                seen.lock().push(changes.clone());
            })
            .unwrap();
        reader.refresh().unwrap();
        reader.refresh().unwrap();
        let calls = calls.lock();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].is_empty());
    }

    #[test]
    fn callbacks_cannot_be_added_inside_writes() {
        let (reader, results) = seeded(&[1]);
        reader.begin_write().unwrap();
        assert!(matches!(
            results.add_notification_callback(|_, _| {}),
            Err(NotifyError::InWriteTransaction { .. })
        ));
        reader.cancel().unwrap();
    }
}
