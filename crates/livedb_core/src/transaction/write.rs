//! Write transactions.

use crate::change_info::ChangeInfo;
use crate::error::{CoreError, CoreResult};
use crate::path::CollectionPath;
use crate::schema::{CollectionKind, Column, DataType, TableSchema};
use crate::snapshot::{step_into_mut, Object, Snapshot, TableData};
use crate::store::StoreInner;
use crate::types::{ColKey, ObjKey, ObjLink, TableKey, Version};
use crate::value::Value;
use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, trace};

/// State of a write transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been cancelled.
    Cancelled,
}

/// An exclusive write transaction.
///
/// Reads through the transaction (it dereferences to a [`Snapshot`]) see
/// its own uncommitted writes. Dropping an uncommitted transaction cancels
/// it and releases the writer slot.
pub struct WriteTransaction {
    store: Arc<StoreInner>,
    graph: Snapshot,
    base: Version,
    changes: ChangeInfo,
    state: TransactionState,
    writer_held: bool,
}

impl WriteTransaction {
    pub(crate) fn new(store: Arc<StoreInner>, graph: Snapshot) -> Self {
        let base = graph.version();
        Self {
            store,
            graph,
            base,
            changes: ChangeInfo::new(),
            state: TransactionState::Active,
            writer_held: true,
        }
    }

    /// Version the transaction started from.
    #[must_use]
    pub fn base_version(&self) -> Version {
        self.base
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Changes made so far.
    #[must_use]
    pub fn changes(&self) -> &ChangeInfo {
        &self.changes
    }

    /// Commits the transaction, returning the new version.
    pub fn commit(mut self) -> CoreResult<Version> {
        self.ensure_active()?;
        self.state = TransactionState::Committed;
        let graph = std::mem::take(&mut self.graph);
        let changes = std::mem::take(&mut self.changes);
        let result = self.store.commit(graph, changes);
        self.release();
        result
    }

    /// Discards all changes.
    pub fn cancel(mut self) {
        self.cancel_in_place();
    }

    fn cancel_in_place(&mut self) {
        if self.is_active() {
            trace!(version = %self.base, "cancel write");
            self.state = TransactionState::Cancelled;
        }
        self.release();
    }

    fn release(&mut self) {
        if self.writer_held {
            self.writer_held = false;
            self.store.release_writer();
        }
    }

    fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => {
                Err(CoreError::transaction_not_active("already committed"))
            }
            TransactionState::Cancelled => {
                Err(CoreError::transaction_not_active("already cancelled"))
            }
        }
    }

    fn incarnation(&self) -> Version {
        self.base.next()
    }

    fn table_mut(&mut self, table: TableKey) -> CoreResult<&mut TableData> {
        self.graph
            .tables
            .get_mut(&table)
            .map(Arc::make_mut)
            .ok_or_else(|| CoreError::no_such_table(table.to_string()))
    }

    fn value_mut(&mut self, table: TableKey, key: ObjKey, col: ColKey) -> CoreResult<&mut Value> {
        let data = self.table_mut(table)?;
        let name = data.schema.name.clone();
        data.objects
            .get_mut(&key)
            .ok_or(CoreError::ObjectNotFound { table, key })?
            .values
            .get_mut(&col)
            .ok_or_else(|| CoreError::no_such_column_key(name, col))
    }

    fn is_embedded(&self, table: TableKey) -> bool {
        self.graph
            .table(table)
            .is_ok_and(|t| t.schema.embedded)
    }

    // ---- schema ----

    /// Adds a table.
    pub fn add_table(&mut self, schema: TableSchema) -> CoreResult<TableKey> {
        self.ensure_active()?;
        if self.graph.names.contains_key(&schema.name) {
            return Err(CoreError::DuplicateName { name: schema.name });
        }
        if let Some(pk) = schema.primary_key_column() {
            if !matches!(pk.data_type, DataType::Int | DataType::String)
                || pk.collection != CollectionKind::Single
            {
                return Err(CoreError::invalid_operation(format!(
                    "primary key '{}' must be an int or string property",
                    pk.name
                )));
            }
            if schema.embedded {
                return Err(CoreError::invalid_operation(
                    "embedded tables cannot have a primary key",
                ));
            }
        }
        let key = TableKey::new(self.graph.next_table);
        self.graph.next_table += 1;
        debug!(table = %schema.name, %key, "add table");
        self.graph.names.insert(schema.name.clone(), key);
        self.graph
            .tables
            .insert(key, Arc::new(TableData::new(key, schema)));
        self.changes.record_schema_change();
        Ok(key)
    }

    /// Adds a column to an existing table. Existing objects get the
    /// column's default value.
    pub fn add_column(
        &mut self,
        table: TableKey,
        name: impl Into<String>,
        data_type: DataType,
        collection: CollectionKind,
        nullable: bool,
    ) -> CoreResult<ColKey> {
        self.ensure_active()?;
        let name = name.into();
        let data = self.table_mut(table)?;
        if data.schema.column_by_name(&name).is_some() {
            return Err(CoreError::DuplicateName { name });
        }
        let col = data.schema.push(name, data_type, collection, nullable);
        let default = data.schema.require_column(col)?.default_value();
        for object in data.objects.values_mut() {
            object.values.insert(col, default.clone());
        }
        self.changes.record_schema_change();
        Ok(col)
    }

    // ---- objects ----

    fn insert_object(&mut self, table: TableKey, key: ObjKey, values: BTreeMap<ColKey, Value>) -> CoreResult<()> {
        let incarnation = self.incarnation();
        let data = self.table_mut(table)?;
        let mut object = Object {
            key,
            incarnation,
            values: data
                .schema
                .columns
                .iter()
                .map(|c| (c.key, c.default_value()))
                .collect(),
        };
        object.values.extend(values);
        data.objects.insert(key, object);
        self.changes.record_insert(table, key);
        Ok(())
    }

    fn fresh_key(&mut self, table: TableKey) -> CoreResult<ObjKey> {
        let data = self.table_mut(table)?;
        let key = ObjKey::new(data.next_key);
        data.next_key += 1;
        Ok(key)
    }

    /// Creates an object in a table without a primary key.
    pub fn create_object(&mut self, table: TableKey) -> CoreResult<ObjKey> {
        self.ensure_active()?;
        let schema = self.graph.schema(table)?;
        if schema.primary_key.is_some() {
            return Err(CoreError::invalid_operation(format!(
                "table '{}' has a primary key",
                schema.name
            )));
        }
        if schema.embedded {
            return Err(CoreError::invalid_operation(format!(
                "objects of embedded table '{}' must be created through their parent",
                schema.name
            )));
        }
        let key = self.fresh_key(table)?;
        self.insert_object(table, key, BTreeMap::new())?;
        Ok(key)
    }

    /// Creates an object with the given primary key.
    ///
    /// Recreating an object whose primary key belonged to a removed object
    /// reuses that object's key with a new incarnation.
    pub fn create_object_with_primary_key(
        &mut self,
        table: TableKey,
        pk: impl Into<Value>,
    ) -> CoreResult<ObjKey> {
        self.ensure_active()?;
        let pk = pk.into();
        let schema = self.graph.schema(table)?;
        let column = schema.primary_key_column().ok_or_else(|| {
            CoreError::invalid_operation(format!("table '{}' has no primary key", schema.name))
        })?;
        column.validate(&pk)?;
        let pk_col = column.key;
        if self.graph.find_by_primary_key(table, &pk).is_some() {
            return Err(CoreError::DuplicatePrimaryKey {
                table: schema.name.clone(),
                value: pk.to_string(),
            });
        }

        let retired = self.table_mut(table)?.retired_keys.remove(&pk);
        let key = match retired {
            Some(key) => key,
            None => self.fresh_key(table)?,
        };
        let mut values = BTreeMap::new();
        values.insert(pk_col, pk.clone());
        self.insert_object(table, key, values)?;
        self.table_mut(table)?.primary_index.insert(pk, key);
        Ok(key)
    }

    /// Returns the object with this primary key, creating it if needed.
    pub fn find_or_create(&mut self, table: TableKey, pk: impl Into<Value>) -> CoreResult<ObjKey> {
        let pk = pk.into();
        match self.graph.find_by_primary_key(table, &pk) {
            Some(key) => Ok(key),
            None => self.create_object_with_primary_key(table, pk),
        }
    }

    fn check_links(&self, value: &Value) -> CoreResult<()> {
        let mut result = Ok(());
        value.for_each_link(&mut |link| {
            if result.is_err() {
                return;
            }
            if self.is_embedded(link.table) {
                result = Err(CoreError::invalid_operation(
                    "embedded objects can only be created through their parent",
                ));
            } else if !self.graph.object_exists(link.table, link.key) {
                result = Err(CoreError::ObjectNotFound {
                    table: link.table,
                    key: link.key,
                });
            }
        });
        result
    }

    /// Writes a column value.
    pub fn set(&mut self, table: TableKey, key: ObjKey, col: ColKey, value: impl Into<Value>) -> CoreResult<()> {
        self.ensure_active()?;
        let value = value.into();
        let schema = self.graph.schema(table)?;
        let column = schema.require_column(col)?;
        if schema.primary_key == Some(col) {
            let current = self.graph.get(table, key, col)?;
            if *current == value {
                return Ok(());
            }
            return Err(CoreError::invalid_operation(format!(
                "cannot change primary key '{}'",
                column.name
            )));
        }
        column.validate(&value)?;
        self.check_links(&value)?;

        let old = std::mem::replace(self.value_mut(table, key, col)?, value);
        self.changes.record_modify(table, key, col);
        self.release_embedded(&old)
    }

    /// Writes a column value by column name.
    pub fn set_by_name(&mut self, table: TableKey, key: ObjKey, column: &str, value: impl Into<Value>) -> CoreResult<()> {
        let col = self.graph.schema(table)?.column_key(column)?;
        self.set(table, key, col, value)
    }

    /// Creates an embedded object owned by a single link column, replacing
    /// (and removing) any previous one.
    pub fn create_embedded(&mut self, table: TableKey, key: ObjKey, col: ColKey) -> CoreResult<ObjKey> {
        self.ensure_active()?;
        let column = self.graph.schema(table)?.require_column(col)?.clone();
        let target = self.embedded_target(&column, CollectionKind::Single)?;
        self.graph.require_object(table, key)?;

        let child = self.fresh_key(target)?;
        self.insert_object(target, child, BTreeMap::new())?;
        let old = std::mem::replace(
            self.value_mut(table, key, col)?,
            Value::Link(ObjLink::new(target, child)),
        );
        self.changes.record_modify(table, key, col);
        self.release_embedded(&old)?;
        Ok(child)
    }

    fn embedded_target(&self, column: &Column, kind: CollectionKind) -> CoreResult<TableKey> {
        match column.data_type.link_target() {
            Some(target) if column.collection == kind && self.is_embedded(target) => Ok(target),
            _ => Err(CoreError::invalid_operation(format!(
                "column '{}' is not a {kind} of embedded objects",
                column.name
            ))),
        }
    }

    /// Removes an object.
    ///
    /// Embedded objects it owns are removed with it. Single links to it are
    /// nulled, list and set entries linking to it are removed and
    /// dictionary entries linking to it are set to null.
    pub fn remove_object(&mut self, table: TableKey, key: ObjKey) -> CoreResult<()> {
        self.ensure_active()?;
        self.graph.require_object(table, key)?;
        self.remove_object_inner(table, key)
    }

    fn remove_object_inner(&mut self, table: TableKey, key: ObjKey) -> CoreResult<()> {
        let object = {
            let data = self.table_mut(table)?;
            let object = data
                .objects
                .remove(&key)
                .ok_or(CoreError::ObjectNotFound { table, key })?;
            if let Some(pk) = data.schema.primary_key.and_then(|c| object.values.get(&c)) {
                data.primary_index.remove(pk);
                data.retired_keys.insert(pk.clone(), key);
            }
            object
        };
        self.changes.record_delete(table, key);

        let target = ObjLink::new(table, key);
        for (t, k, c) in self.graph.incoming_links(target) {
            let value = self.value_mut(t, k, c)?;
            if strip_link(value, target) {
                self.changes.record_modify(t, k, c);
            }
        }

        for value in object.values.values() {
            self.release_embedded(value)?;
        }
        Ok(())
    }

    fn release_embedded(&mut self, removed: &Value) -> CoreResult<()> {
        let mut owned = Vec::new();
        removed.for_each_link(&mut |link| owned.push(link));
        for link in owned {
            if self.is_embedded(link.table) && self.graph.object_exists(link.table, link.key) {
                self.remove_object_inner(link.table, link.key)?;
            }
        }
        Ok(())
    }

    /// Removes every object of a table.
    pub fn clear_table(&mut self, table: TableKey) -> CoreResult<()> {
        self.ensure_active()?;
        let keys: Vec<ObjKey> = self.graph.table(table)?.objects.keys().copied().collect();
        for key in keys {
            if self.graph.object_exists(table, key) {
                self.remove_object_inner(table, key)?;
            }
        }
        Ok(())
    }

    // ---- collections ----

    fn element_column(&self, path: &CollectionPath) -> CoreResult<Option<Column>> {
        let column = self.graph.schema(path.table)?.require_column(path.column)?;
        Ok(path.is_top_level().then(|| column.clone()))
    }

    fn check_element(&self, path: &CollectionPath, value: &Value) -> CoreResult<()> {
        if let Some(column) = self.element_column(path)? {
            column.validate_element(value)?;
        }
        self.check_links(value)
    }

    fn edit_collection<R>(
        &mut self,
        path: &CollectionPath,
        edit: impl FnOnce(&mut Value) -> CoreResult<R>,
    ) -> CoreResult<R> {
        self.ensure_active()?;
        let mut value = self.value_mut(path.table, path.object, path.column)?;
        for step in &path.nested {
            value = step_into_mut(value, step).ok_or_else(|| CoreError::invalid_path(path))?;
        }
        if !value.is_collection() {
            return Err(CoreError::invalid_path(path));
        }
        let result = edit(value)?;
        self.changes
            .record_modify(path.table, path.object, path.column);
        Ok(result)
    }

    /// Inserts into a list at `index`.
    pub fn list_insert(&mut self, path: &CollectionPath, index: usize, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        self.check_element(path, &value)?;
        self.edit_collection(path, |c| {
            let items = as_list(c, path)?;
            if index > items.len() {
                return Err(CoreError::IndexOutOfBounds {
                    index,
                    size: items.len(),
                });
            }
            items.insert(index, value);
            Ok(())
        })
    }

    /// Appends to a list, returning the new element's index.
    pub fn list_push(&mut self, path: &CollectionPath, value: impl Into<Value>) -> CoreResult<usize> {
        let value = value.into();
        self.check_element(path, &value)?;
        self.edit_collection(path, |c| {
            let items = as_list(c, path)?;
            items.push(value);
            Ok(items.len() - 1)
        })
    }

    /// Creates an embedded object and inserts a link to it at `index`.
    pub fn list_insert_embedded(&mut self, path: &CollectionPath, index: usize) -> CoreResult<ObjKey> {
        let column = self
            .element_column(path)?
            .ok_or_else(|| CoreError::invalid_operation("embedded objects cannot be nested in mixed values"))?;
        let target = self.embedded_target(&column, CollectionKind::List)?;
        let size = self
            .graph
            .resolve_collection(path)
            .and_then(Value::as_sequence)
            .map_or(0, <[Value]>::len);
        if index > size {
            return Err(CoreError::IndexOutOfBounds { index, size });
        }
        let child = self.fresh_key(target)?;
        self.insert_object(target, child, BTreeMap::new())?;
        self.edit_collection(path, |c| {
            as_list(c, path)?.insert(index, Value::Link(ObjLink::new(target, child)));
            Ok(child)
        })
    }

    /// Replaces the list element at `index`, returning the old value.
    pub fn list_set(&mut self, path: &CollectionPath, index: usize, value: impl Into<Value>) -> CoreResult<Value> {
        let value = value.into();
        self.check_element(path, &value)?;
        let old = self.edit_collection(path, |c| {
            let items = as_list(c, path)?;
            let size = items.len();
            let slot = items
                .get_mut(index)
                .ok_or(CoreError::IndexOutOfBounds { index, size })?;
            Ok(std::mem::replace(slot, value))
        })?;
        self.release_embedded(&old)?;
        Ok(old)
    }

    /// Removes the list element at `index`.
    pub fn list_remove(&mut self, path: &CollectionPath, index: usize) -> CoreResult<Value> {
        let old = self.edit_collection(path, |c| {
            let items = as_list(c, path)?;
            if index >= items.len() {
                return Err(CoreError::IndexOutOfBounds {
                    index,
                    size: items.len(),
                });
            }
            Ok(items.remove(index))
        })?;
        self.release_embedded(&old)?;
        Ok(old)
    }

    /// Moves the list element at `from` so that it ends up at `to`.
    pub fn list_move(&mut self, path: &CollectionPath, from: usize, to: usize) -> CoreResult<()> {
        self.edit_collection(path, |c| {
            let items = as_list(c, path)?;
            let size = items.len();
            for index in [from, to] {
                if index >= size {
                    return Err(CoreError::IndexOutOfBounds { index, size });
                }
            }
            let item = items.remove(from);
            items.insert(to, item);
            Ok(())
        })
    }

    /// Swaps two list elements.
    pub fn list_swap(&mut self, path: &CollectionPath, a: usize, b: usize) -> CoreResult<()> {
        self.edit_collection(path, |c| {
            let items = as_list(c, path)?;
            let size = items.len();
            for index in [a, b] {
                if index >= size {
                    return Err(CoreError::IndexOutOfBounds { index, size });
                }
            }
            items.swap(a, b);
            Ok(())
        })
    }

    /// Removes every list element.
    pub fn list_clear(&mut self, path: &CollectionPath) -> CoreResult<()> {
        let old = self.edit_collection(path, |c| Ok(std::mem::take(as_list(c, path)?)))?;
        self.release_embedded(&Value::List(old))
    }

    /// Adds a value to a set. Returns false if it was already present.
    pub fn set_insert(&mut self, path: &CollectionPath, value: impl Into<Value>) -> CoreResult<bool> {
        let value = value.into();
        self.check_element(path, &value)?;
        self.edit_collection(path, |c| {
            let items = as_set(c, path)?;
            match items.binary_search(&value) {
                Ok(_) => Ok(false),
                Err(pos) => {
                    items.insert(pos, value);
                    Ok(true)
                }
            }
        })
    }

    /// Removes a value from a set. Returns false if it was not present.
    pub fn set_remove(&mut self, path: &CollectionPath, value: &Value) -> CoreResult<bool> {
        self.edit_collection(path, |c| {
            let items = as_set(c, path)?;
            match items.binary_search(value) {
                Ok(pos) => {
                    items.remove(pos);
                    Ok(true)
                }
                Err(_) => Ok(false),
            }
        })
    }

    /// Removes every set element.
    pub fn set_clear(&mut self, path: &CollectionPath) -> CoreResult<()> {
        self.edit_collection(path, |c| {
            as_set(c, path)?.clear();
            Ok(())
        })
    }

    /// Inserts or replaces a dictionary entry, returning the previous value.
    pub fn dictionary_insert(
        &mut self,
        path: &CollectionPath,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> CoreResult<Option<Value>> {
        let value = value.into();
        self.check_element(path, &value)?;
        let key = key.into();
        let old = self.edit_collection(path, |c| Ok(as_dictionary(c, path)?.insert(key, value)))?;
        if let Some(old) = &old {
            self.release_embedded(old)?;
        }
        Ok(old)
    }

    /// Removes a dictionary entry, returning its value.
    pub fn dictionary_remove(&mut self, path: &CollectionPath, key: &str) -> CoreResult<Option<Value>> {
        let old = self.edit_collection(path, |c| Ok(as_dictionary(c, path)?.remove(key)))?;
        if let Some(old) = &old {
            self.release_embedded(old)?;
        }
        Ok(old)
    }

    /// Removes every dictionary entry.
    pub fn dictionary_clear(&mut self, path: &CollectionPath) -> CoreResult<()> {
        let old = self.edit_collection(path, |c| Ok(std::mem::take(as_dictionary(c, path)?)))?;
        self.release_embedded(&Value::Dictionary(old))
    }
}

impl Deref for WriteTransaction {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        &self.graph
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        self.cancel_in_place();
    }
}

impl std::fmt::Debug for WriteTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("base", &self.base)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn as_list<'a>(value: &'a mut Value, path: &CollectionPath) -> CoreResult<&'a mut Vec<Value>> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(CoreError::invalid_operation(format!(
            "collection at {path} is a {}, not a list",
            other.type_name()
        ))),
    }
}

fn as_set<'a>(value: &'a mut Value, path: &CollectionPath) -> CoreResult<&'a mut Vec<Value>> {
    match value {
        Value::Set(items) => Ok(items),
        other => Err(CoreError::invalid_operation(format!(
            "collection at {path} is a {}, not a set",
            other.type_name()
        ))),
    }
}

fn as_dictionary<'a>(
    value: &'a mut Value,
    path: &CollectionPath,
) -> CoreResult<&'a mut BTreeMap<String, Value>> {
    match value {
        Value::Dictionary(map) => Ok(map),
        other => Err(CoreError::invalid_operation(format!(
            "collection at {path} is a {}, not a dictionary",
            other.type_name()
        ))),
    }
}

/// Removes links to `target` from `value`. Returns true if anything changed.
fn strip_link(value: &mut Value, target: ObjLink) -> bool {
    match value {
        Value::Link(link) if *link == target => {
            *value = Value::Null;
            true
        }
        Value::List(items) | Value::Set(items) => {
            let before = items.len();
            items.retain(|v| v.as_link() != Some(target));
            let mut changed = items.len() != before;
            for item in items.iter_mut() {
                changed |= strip_link(item, target);
            }
            changed
        }
        Value::Dictionary(map) => {
            let mut changed = false;
            for item in map.values_mut() {
                changed |= strip_link(item, target);
            }
            changed
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::VersionedStore;

    struct Fixture {
        store: VersionedStore,
        origin: TableKey,
        target: TableKey,
        list: ColKey,
        link: ColKey,
        value: ColKey,
    }

    fn fixture() -> Fixture {
        let store = VersionedStore::open(StoreConfig::anonymous());
        let mut txn = store.begin_write().unwrap();
        let target = txn
            .add_table(
                TableSchema::new("target")
                    .with_primary_key("id", DataType::Int)
                    .with_property("value", DataType::Int),
            )
            .unwrap();
        let origin = txn
            .add_table(
                TableSchema::new("origin")
                    .with_list("list", DataType::Link(target))
                    .with_nullable("link", DataType::Link(target)),
            )
            .unwrap();
        txn.commit().unwrap();
        Fixture {
            store,
            origin,
            target,
            list: ColKey::new(0),
            link: ColKey::new(1),
            value: ColKey::new(1),
        }
    }

    #[test]
    fn removing_a_target_strips_incoming_links() {
        let f = fixture();
        let mut txn = f.store.begin_write().unwrap();
        let t0 = txn.create_object_with_primary_key(f.target, 0).unwrap();
        let t1 = txn.create_object_with_primary_key(f.target, 1).unwrap();
        let o = txn.create_object(f.origin).unwrap();
        let path = CollectionPath::new(f.origin, o, f.list);
        for t in [t0, t1, t0] {
            txn.list_push(&path, ObjLink::new(f.target, t)).unwrap();
        }
        txn.set(f.origin, o, f.link, ObjLink::new(f.target, t0)).unwrap();
        txn.commit().unwrap();

        let mut txn = f.store.begin_write().unwrap();
        txn.remove_object(f.target, t0).unwrap();
        assert_eq!(
            txn.resolve_collection(&path).unwrap().as_sequence().unwrap(),
            &[Value::Link(ObjLink::new(f.target, t1))]
        );
        assert!(txn.get(f.origin, o, f.link).unwrap().is_null());
        assert!(txn.changes().column_modified(f.origin, o, f.list));
        assert!(txn.changes().was_deleted(f.target, t0));
    }

    #[test]
    fn recreated_primary_key_gets_new_incarnation() {
        let f = fixture();
        let mut txn = f.store.begin_write().unwrap();
        let key = txn.create_object_with_primary_key(f.target, 7).unwrap();
        txn.commit().unwrap();
        let first = f.store.latest_snapshot().incarnation(f.target, key).unwrap();

        let mut txn = f.store.begin_write().unwrap();
        txn.remove_object(f.target, key).unwrap();
        let again = txn.create_object_with_primary_key(f.target, 7).unwrap();
        txn.commit().unwrap();

        assert_eq!(again, key);
        let second = f.store.latest_snapshot().incarnation(f.target, key).unwrap();
        assert!(second > first);
        let info = f.store.diff(Version::new(2), Version::new(3)).unwrap();
        assert!(info.was_deleted(f.target, key) && info.was_inserted(f.target, key));
    }

    #[test]
    fn duplicate_primary_key_is_rejected() {
        let f = fixture();
        let mut txn = f.store.begin_write().unwrap();
        txn.create_object_with_primary_key(f.target, 1).unwrap();
        let err = txn.create_object_with_primary_key(f.target, 1).unwrap_err();
        assert!(matches!(err, CoreError::DuplicatePrimaryKey { .. }));
        let err = txn.create_object(f.target).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn list_edits_check_bounds_and_types() {
        let f = fixture();
        let mut txn = f.store.begin_write().unwrap();
        let o = txn.create_object(f.origin).unwrap();
        let t = txn.create_object_with_primary_key(f.target, 1).unwrap();
        let path = CollectionPath::new(f.origin, o, f.list);

        let err = txn.list_insert(&path, 1, ObjLink::new(f.target, t)).unwrap_err();
        assert!(matches!(err, CoreError::IndexOutOfBounds { index: 1, size: 0 }));
        let err = txn.list_push(&path, 5).unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));
        let missing = ObjLink::new(f.target, ObjKey::new(99));
        assert!(matches!(
            txn.list_push(&path, missing),
            Err(CoreError::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn values_can_be_set_and_cancelled() {
        let f = fixture();
        let mut txn = f.store.begin_write().unwrap();
        let t = txn.create_object_with_primary_key(f.target, 1).unwrap();
        txn.commit().unwrap();

        let mut txn = f.store.begin_write().unwrap();
        txn.set(f.target, t, f.value, 10).unwrap();
        assert_eq!(txn.get(f.target, t, f.value).unwrap(), &Value::Int(10));
        txn.cancel();

        let snapshot = f.store.latest_snapshot();
        assert_eq!(snapshot.get(f.target, t, f.value).unwrap(), &Value::Int(0));
        assert!(f.store.begin_write().is_ok());
    }

    #[test]
    fn nested_mixed_collections_resolve_by_path() {
        let store = VersionedStore::open(StoreConfig::anonymous());
        let mut txn = store.begin_write().unwrap();
        let table = txn
            .add_table(TableSchema::new("holder").with_property("any", DataType::Mixed))
            .unwrap();
        let o = txn.create_object(table).unwrap();
        let col = ColKey::new(0);
        txn.set(table, o, col, Value::Dictionary(BTreeMap::new())).unwrap();
        let root = CollectionPath::new(table, o, col);
        txn.dictionary_insert(&root, "list", Value::List(Vec::new())).unwrap();
        txn.list_push(&root.child("list"), "a").unwrap();
        assert_eq!(txn.resolve_collection(&root.child("list")).unwrap().as_sequence().unwrap().len(), 1);

        txn.set(table, o, col, Value::List(Vec::new())).unwrap();
        assert!(txn.resolve_collection(&root.child("list")).is_none());
        assert!(matches!(
            txn.list_push(&root.child("list"), 1),
            Err(CoreError::InvalidPath { .. })
        ));
    }

    #[test]
    fn embedded_objects_cascade() {
        let store = VersionedStore::open(StoreConfig::anonymous());
        let mut txn = store.begin_write().unwrap();
        let address = txn
            .add_table(TableSchema::new("address").embedded().with_property("city", DataType::String))
            .unwrap();
        let person = txn
            .add_table(
                TableSchema::new("person")
                    .with_nullable("home", DataType::Link(address))
                    .with_list("others", DataType::Link(address)),
            )
            .unwrap();
        let p = txn.create_object(person).unwrap();
        let home = txn.create_embedded(person, p, ColKey::new(0)).unwrap();
        let others = CollectionPath::new(person, p, ColKey::new(1));
        let other = txn.list_insert_embedded(&others, 0).unwrap();
        assert!(txn.object_exists(address, home));

        let replacement = txn.create_embedded(person, p, ColKey::new(0)).unwrap();
        assert!(!txn.object_exists(address, home));
        txn.remove_object(person, p).unwrap();
        assert!(!txn.object_exists(address, replacement));
        assert!(!txn.object_exists(address, other));
    }
}
