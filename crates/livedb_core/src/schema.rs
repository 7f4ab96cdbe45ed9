//! Table schemas.

use crate::error::{CoreError, CoreResult};
use crate::types::{ColKey, TableKey};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 64-bit signed integer.
    Int,
    /// Boolean.
    Bool,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Any value, including nested collections.
    Mixed,
    /// Link to an object in the given table.
    Link(TableKey),
}

impl DataType {
    /// Returns the link target table for link columns.
    #[must_use]
    pub fn link_target(self) -> Option<TableKey> {
        match self {
            DataType::Link(target) => Some(target),
            _ => None,
        }
    }

    /// Returns true if `value` is an acceptable element for this type.
    #[must_use]
    pub fn accepts(self, value: &Value, nullable: bool) -> bool {
        match (self, value) {
            (_, Value::Null) => nullable || self == DataType::Mixed,
            (DataType::Mixed, _) => true,
            (DataType::Int, Value::Int(_)) => true,
            (DataType::Bool, Value::Bool(_)) => true,
            (DataType::Double, Value::Double(_)) => true,
            (DataType::String, Value::String(_)) => true,
            (DataType::Link(target), Value::Link(link)) => link.table == target,
            _ => false,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Int => write!(f, "int"),
            DataType::Bool => write!(f, "bool"),
            DataType::Double => write!(f, "double"),
            DataType::String => write!(f, "string"),
            DataType::Mixed => write!(f, "mixed"),
            DataType::Link(target) => write!(f, "link<{target}>"),
        }
    }
}

/// Shape of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    /// A single value.
    Single,
    /// An ordered list.
    List,
    /// A set (sorted, no duplicates).
    Set,
    /// A string-keyed dictionary.
    Dictionary,
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionKind::Single => write!(f, "single"),
            CollectionKind::List => write!(f, "list"),
            CollectionKind::Set => write!(f, "set"),
            CollectionKind::Dictionary => write!(f, "dictionary"),
        }
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column key, unique within the table.
    pub key: ColKey,
    /// Column name, unique within the table.
    pub name: String,
    /// Element type.
    pub data_type: DataType,
    /// Column shape.
    pub collection: CollectionKind,
    /// Whether elements may be null.
    pub nullable: bool,
}

impl Column {
    /// Returns true if this column holds links (directly or as collection
    /// elements).
    #[must_use]
    pub fn is_link(&self) -> bool {
        self.data_type.link_target().is_some()
    }

    /// The value a freshly created object holds in this column.
    #[must_use]
    pub fn default_value(&self) -> Value {
        match self.collection {
            CollectionKind::List => Value::List(Vec::new()),
            CollectionKind::Set => Value::Set(Vec::new()),
            CollectionKind::Dictionary => Value::Dictionary(Default::default()),
            CollectionKind::Single => {
                if self.nullable || self.is_link() || self.data_type == DataType::Mixed {
                    Value::Null
                } else {
                    match self.data_type {
                        DataType::Int => Value::Int(0),
                        DataType::Bool => Value::Bool(false),
                        DataType::Double => Value::Double(0.0),
                        DataType::String => Value::String(String::new()),
                        DataType::Mixed | DataType::Link(_) => Value::Null,
                    }
                }
            }
        }
    }

    /// Validates a value assigned to this column as a whole.
    pub fn validate(&self, value: &Value) -> CoreResult<()> {
        let ok = match (self.collection, value) {
            (CollectionKind::Single, v) => {
                self.data_type.accepts(v, self.nullable || self.is_link())
            }
            (CollectionKind::List, Value::List(items))
            | (CollectionKind::Set, Value::Set(items)) => {
                items.iter().all(|v| self.data_type.accepts(v, self.nullable))
            }
            (CollectionKind::Dictionary, Value::Dictionary(map)) => map
                .values()
                .all(|v| self.data_type.accepts(v, self.nullable || self.is_link())),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(CoreError::type_mismatch(
                &self.name,
                self.describe(),
                value.type_name(),
            ))
        }
    }

    /// Validates a single collection element.
    pub fn validate_element(&self, value: &Value) -> CoreResult<()> {
        let nullable = self.nullable
            || (self.collection == CollectionKind::Dictionary && self.is_link());
        if self.data_type.accepts(value, nullable) {
            Ok(())
        } else {
            Err(CoreError::type_mismatch(
                &self.name,
                self.data_type.to_string(),
                value.type_name(),
            ))
        }
    }

    fn describe(&self) -> String {
        match self.collection {
            CollectionKind::Single => self.data_type.to_string(),
            kind => format!("{kind}<{}>", self.data_type),
        }
    }
}

/// Schema of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<Column>,
    /// Primary key column, if any.
    pub primary_key: Option<ColKey>,
    /// Embedded tables hold objects owned by exactly one parent link.
    pub embedded: bool,
}

impl TableSchema {
    /// Creates an empty schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            embedded: false,
        }
    }

    /// Marks the table as embedded.
    #[must_use]
    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    /// Adds a primary key column.
    #[must_use]
    pub fn with_primary_key(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        let key = self.push(name.into(), data_type, CollectionKind::Single, false);
        self.primary_key = Some(key);
        self
    }

    /// Adds a non-nullable single-value column.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.push(name.into(), data_type, CollectionKind::Single, false);
        self
    }

    /// Adds a nullable single-value column.
    #[must_use]
    pub fn with_nullable(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.push(name.into(), data_type, CollectionKind::Single, true);
        self
    }

    /// Adds a list column.
    #[must_use]
    pub fn with_list(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.push(name.into(), data_type, CollectionKind::List, false);
        self
    }

    /// Adds a set column.
    #[must_use]
    pub fn with_set(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.push(name.into(), data_type, CollectionKind::Set, false);
        self
    }

    /// Adds a dictionary column.
    #[must_use]
    pub fn with_dictionary(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.push(name.into(), data_type, CollectionKind::Dictionary, false);
        self
    }

    pub(crate) fn push(
        &mut self,
        name: String,
        data_type: DataType,
        collection: CollectionKind,
        nullable: bool,
    ) -> ColKey {
        let key = ColKey::new(
            self.columns
                .iter()
                .map(|c| c.key.as_u32() + 1)
                .max()
                .unwrap_or(0),
        );
        self.columns.push(Column {
            key,
            name,
            data_type,
            collection,
            nullable,
        });
        key
    }

    /// Looks up a column by key.
    #[must_use]
    pub fn column(&self, key: ColKey) -> Option<&Column> {
        self.columns.iter().find(|c| c.key == key)
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns the key of the named column or a descriptive error.
    pub fn column_key(&self, name: &str) -> CoreResult<ColKey> {
        self.column_by_name(name)
            .map(|c| c.key)
            .ok_or_else(|| CoreError::no_such_column(&self.name, name))
    }

    /// Returns the column with this key or a descriptive error.
    pub fn require_column(&self, key: ColKey) -> CoreResult<&Column> {
        self.column(key)
            .ok_or_else(|| CoreError::no_such_column_key(&self.name, key))
    }

    /// Returns the primary key column definition.
    #[must_use]
    pub fn primary_key_column(&self) -> Option<&Column> {
        self.primary_key.and_then(|k| self.column(k))
    }

    /// Iterates over columns holding links.
    pub fn link_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_link())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjKey, ObjLink};

    fn person() -> TableSchema {
        TableSchema::new("person")
            .with_primary_key("id", DataType::Int)
            .with_property("name", DataType::String)
            .with_nullable("nickname", DataType::String)
            .with_list("scores", DataType::Int)
    }

    #[test]
    fn columns_get_sequential_keys() {
        let schema = person();
        assert_eq!(schema.column_key("id").unwrap(), ColKey::new(0));
        assert_eq!(schema.column_key("scores").unwrap(), ColKey::new(3));
        assert_eq!(schema.primary_key, Some(ColKey::new(0)));
    }

    #[test]
    fn default_values_follow_shape() {
        let schema = person();
        let name = schema.column_by_name("name").unwrap();
        let nickname = schema.column_by_name("nickname").unwrap();
        let scores = schema.column_by_name("scores").unwrap();
        assert_eq!(name.default_value(), Value::from(""));
        assert_eq!(nickname.default_value(), Value::Null);
        assert_eq!(scores.default_value(), Value::List(Vec::new()));
    }

    #[test]
    fn validation_rejects_wrong_types() {
        let schema = person();
        let name = schema.column_by_name("name").unwrap();
        assert!(name.validate(&Value::from("x")).is_ok());
        let err = name.validate(&Value::Int(1)).unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));

        let scores = schema.column_by_name("scores").unwrap();
        assert!(scores.validate(&Value::List(vec![Value::Int(1)])).is_ok());
        assert!(scores.validate(&Value::List(vec![Value::from("a")])).is_err());
    }

    #[test]
    fn link_columns_check_target_table() {
        let mut schema = TableSchema::new("origin");
        schema.push(
            "link".into(),
            DataType::Link(TableKey::new(4)),
            CollectionKind::Single,
            false,
        );
        let link = schema.column_by_name("link").unwrap();
        let good = Value::Link(ObjLink::new(TableKey::new(4), ObjKey::new(1)));
        let bad = Value::Link(ObjLink::new(TableKey::new(5), ObjKey::new(1)));
        assert!(link.validate(&good).is_ok());
        assert!(link.validate(&Value::Null).is_ok());
        assert!(link.validate(&bad).is_err());
    }
}
