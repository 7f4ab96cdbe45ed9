//! Immutable object graph snapshots.
//!
//! A [`Snapshot`] is the whole graph at one [`Version`]. Tables are shared
//! between snapshots through `Arc`, so a commit only copies the tables it
//! touched.

use crate::error::{CoreError, CoreResult};
use crate::path::{CollectionPath, PathElement};
use crate::schema::{DataType, TableSchema};
use crate::types::{ColKey, ObjKey, ObjLink, TableKey, Version};
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One row of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub(crate) key: ObjKey,
    pub(crate) incarnation: Version,
    pub(crate) values: BTreeMap<ColKey, Value>,
}

impl Object {
    /// The object's key.
    #[must_use]
    pub fn key(&self) -> ObjKey {
        self.key
    }

    /// Version at which this object was created.
    ///
    /// Together with the table and key this identifies one life of an
    /// object: recreating a deleted object with the same primary key yields
    /// a new incarnation.
    #[must_use]
    pub fn incarnation(&self) -> Version {
        self.incarnation
    }

    /// Value of a column.
    #[must_use]
    pub fn get(&self, col: ColKey) -> Option<&Value> {
        self.values.get(&col)
    }

    /// Iterates over all column values.
    pub fn values(&self) -> impl Iterator<Item = (ColKey, &Value)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }
}

/// Contents of one table at one version.
#[derive(Debug, Clone)]
pub struct TableData {
    pub(crate) key: TableKey,
    pub(crate) schema: TableSchema,
    pub(crate) objects: BTreeMap<ObjKey, Object>,
    pub(crate) primary_index: BTreeMap<Value, ObjKey>,
    /// Keys of removed objects by primary key, reused on recreation.
    pub(crate) retired_keys: BTreeMap<Value, ObjKey>,
    pub(crate) next_key: i64,
}

impl TableData {
    pub(crate) fn new(key: TableKey, schema: TableSchema) -> Self {
        Self {
            key,
            schema,
            objects: BTreeMap::new(),
            primary_index: BTreeMap::new(),
            retired_keys: BTreeMap::new(),
            next_key: 0,
        }
    }

    /// Table key.
    #[must_use]
    pub fn key(&self) -> TableKey {
        self.key
    }

    /// Table schema.
    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Number of objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if the table has no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Looks up an object.
    #[must_use]
    pub fn object(&self, key: ObjKey) -> Option<&Object> {
        self.objects.get(&key)
    }

    /// Objects in key order (table order).
    pub fn objects(&self) -> impl Iterator<Item = &Object> {
        self.objects.values()
    }

    /// Finds an object by primary key.
    #[must_use]
    pub fn find_by_primary_key(&self, pk: &Value) -> Option<ObjKey> {
        self.primary_index.get(pk).copied()
    }
}

/// The object graph at one version.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub(crate) version: Version,
    pub(crate) tables: BTreeMap<TableKey, Arc<TableData>>,
    pub(crate) names: BTreeMap<String, TableKey>,
    pub(crate) next_table: u32,
}

impl Snapshot {
    /// Version of this snapshot.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Keys of all tables.
    pub fn table_keys(&self) -> impl Iterator<Item = TableKey> + '_ {
        self.tables.keys().copied()
    }

    /// Finds a table by name.
    #[must_use]
    pub fn find_table(&self, name: &str) -> Option<TableKey> {
        self.names.get(name).copied()
    }

    /// Returns the key of the named table or an error.
    pub fn table_key(&self, name: &str) -> CoreResult<TableKey> {
        self.find_table(name)
            .ok_or_else(|| CoreError::no_such_table(name))
    }

    /// Returns a table.
    pub fn table(&self, key: TableKey) -> CoreResult<&TableData> {
        self.tables
            .get(&key)
            .map(Arc::as_ref)
            .ok_or_else(|| CoreError::no_such_table(key.to_string()))
    }

    /// Returns a table schema.
    pub fn schema(&self, key: TableKey) -> CoreResult<&TableSchema> {
        Ok(&self.table(key)?.schema)
    }

    /// Returns true if the table exists.
    #[must_use]
    pub fn has_table(&self, key: TableKey) -> bool {
        self.tables.contains_key(&key)
    }

    /// Looks up an object.
    #[must_use]
    pub fn object(&self, table: TableKey, key: ObjKey) -> Option<&Object> {
        self.tables.get(&table).and_then(|t| t.objects.get(&key))
    }

    /// Looks up a linked object.
    #[must_use]
    pub fn linked(&self, link: ObjLink) -> Option<&Object> {
        self.object(link.table, link.key)
    }

    /// Returns true if the object exists.
    #[must_use]
    pub fn object_exists(&self, table: TableKey, key: ObjKey) -> bool {
        self.object(table, key).is_some()
    }

    /// Returns an object or an error if it does not exist.
    pub fn require_object(&self, table: TableKey, key: ObjKey) -> CoreResult<&Object> {
        self.object(table, key)
            .ok_or(CoreError::ObjectNotFound { table, key })
    }

    /// Reads a column value.
    pub fn get(&self, table: TableKey, key: ObjKey, col: ColKey) -> CoreResult<&Value> {
        let data = self.table(table)?;
        let object = data
            .objects
            .get(&key)
            .ok_or(CoreError::ObjectNotFound { table, key })?;
        object
            .values
            .get(&col)
            .ok_or_else(|| CoreError::no_such_column_key(&data.schema.name, col))
    }

    /// Reads a column value by column name.
    pub fn get_by_name(&self, table: TableKey, key: ObjKey, column: &str) -> CoreResult<&Value> {
        let col = self.schema(table)?.column_key(column)?;
        self.get(table, key, col)
    }

    /// Objects of a table in key order.
    pub fn objects(&self, table: TableKey) -> CoreResult<impl Iterator<Item = &Object>> {
        Ok(self.table(table)?.objects())
    }

    /// Finds an object by primary key.
    #[must_use]
    pub fn find_by_primary_key(&self, table: TableKey, pk: &Value) -> Option<ObjKey> {
        self.tables
            .get(&table)
            .and_then(|t| t.find_by_primary_key(pk))
    }

    /// Incarnation of an object, if it exists.
    #[must_use]
    pub fn incarnation(&self, table: TableKey, key: ObjKey) -> Option<Version> {
        self.object(table, key).map(Object::incarnation)
    }

    /// Resolves a collection path to the collection value it addresses.
    ///
    /// Returns `None` when the owning object is gone, or when any nested
    /// step no longer leads to a collection.
    #[must_use]
    pub fn resolve_collection(&self, path: &CollectionPath) -> Option<&Value> {
        let mut current = self.object(path.table, path.object)?.get(path.column)?;
        for step in &path.nested {
            current = step_into(current, step)?;
        }
        current.is_collection().then_some(current)
    }

    /// Collects every `(table, key, column)` whose value links to `target`.
    #[must_use]
    pub fn incoming_links(&self, target: ObjLink) -> Vec<(TableKey, ObjKey, ColKey)> {
        let mut found = Vec::new();
        for (table_key, table) in &self.tables {
            let link_cols: Vec<ColKey> = table
                .schema
                .columns
                .iter()
                .filter(|c| {
                    c.data_type.link_target() == Some(target.table)
                        || c.data_type == DataType::Mixed
                })
                .map(|c| c.key)
                .collect();
            if link_cols.is_empty() {
                continue;
            }
            for object in table.objects.values() {
                for col in &link_cols {
                    if let Some(value) = object.values.get(col) {
                        let mut hit = false;
                        value.for_each_link(&mut |l| hit |= l == target);
                        if hit {
                            found.push((*table_key, object.key, *col));
                        }
                    }
                }
            }
        }
        found
    }
}

pub(crate) fn step_into<'a>(value: &'a Value, step: &PathElement) -> Option<&'a Value> {
    match (value, step) {
        (Value::List(items) | Value::Set(items), PathElement::Index(i)) => items.get(*i),
        (Value::Dictionary(map), PathElement::Key(k)) => map.get(k),
        _ => None,
    }
}

pub(crate) fn step_into_mut<'a>(value: &'a mut Value, step: &PathElement) -> Option<&'a mut Value> {
    match (value, step) {
        (Value::List(items) | Value::Set(items), PathElement::Index(i)) => items.get_mut(*i),
        (Value::Dictionary(map), PathElement::Key(k)) => map.get_mut(k),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with_object() -> (Snapshot, TableKey, ColKey) {
        let schema = TableSchema::new("holder").with_property("any", DataType::Mixed);
        let col = schema.column_key("any").unwrap();
        let table_key = TableKey::new(0);
        let mut table = TableData::new(table_key, schema);

        let mut inner = BTreeMap::new();
        inner.insert("list".to_owned(), Value::List(vec![Value::Int(1), Value::Int(2)]));
        let mut values = BTreeMap::new();
        values.insert(col, Value::Dictionary(inner));
        table.objects.insert(
            ObjKey::new(0),
            Object {
                key: ObjKey::new(0),
                incarnation: Version::new(1),
                values,
            },
        );

        let mut snapshot = Snapshot::default();
        snapshot.tables.insert(table_key, Arc::new(table));
        snapshot.names.insert("holder".into(), table_key);
        (snapshot, table_key, col)
    }

    #[test]
    fn resolves_nested_collections() {
        let (snapshot, table, col) = snapshot_with_object();
        let root = CollectionPath::new(table, ObjKey::new(0), col);

        assert!(snapshot.resolve_collection(&root).is_some());
        let list = snapshot.resolve_collection(&root.child("list")).unwrap();
        assert_eq!(list.as_sequence().unwrap().len(), 2);
    }

    #[test]
    fn stops_resolving_through_scalars() {
        let (snapshot, table, col) = snapshot_with_object();
        let root = CollectionPath::new(table, ObjKey::new(0), col);

        assert!(snapshot.resolve_collection(&root.child("list").child(0)).is_none());
        assert!(snapshot.resolve_collection(&root.child("missing")).is_none());
        let gone = CollectionPath::new(table, ObjKey::new(9), col);
        assert!(snapshot.resolve_collection(&gone).is_none());
    }
}
