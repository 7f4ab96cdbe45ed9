//! Key paths restricting which modifications a callback hears about.

use crate::error::NotifyResult;
use livedb_core::{ColKey, CoreError, Snapshot, TableKey};
use std::fmt;

/// A chain of columns, each but the last a link into the next table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPath {
    elements: Vec<(TableKey, ColKey)>,
}

/// The key paths of one callback.
pub type KeyPathArray = Vec<KeyPath>;

impl KeyPath {
    /// Creates a key path from resolved elements.
    #[must_use]
    pub fn new(elements: Vec<(TableKey, ColKey)>) -> Self {
        Self { elements }
    }

    /// Resolves a dotted property path such as `"dog.name"` starting at
    /// `table`.
    pub fn parse(snapshot: &Snapshot, table: TableKey, path: &str) -> NotifyResult<Self> {
        let mut elements = Vec::new();
        let mut current = table;
        let mut segments = path.split('.').peekable();
        while let Some(name) = segments.next() {
            let schema = snapshot.schema(current)?;
            let column = schema
                .column_by_name(name)
                .ok_or_else(|| CoreError::no_such_column(&schema.name, name))?;
            elements.push((current, column.key));
            if segments.peek().is_some() {
                current = column.data_type.link_target().ok_or_else(|| {
                    CoreError::invalid_operation(format!(
                        "property '{name}' of '{}' is not a link and cannot be followed in key path '{path}'",
                        schema.name
                    ))
                })?;
            }
        }
        Ok(Self { elements })
    }

    /// Resolves several dotted paths.
    pub fn parse_all(snapshot: &Snapshot, table: TableKey, paths: &[&str]) -> NotifyResult<KeyPathArray> {
        paths
            .iter()
            .map(|path| Self::parse(snapshot, table, path))
            .collect()
    }

    /// The resolved elements.
    #[must_use]
    pub fn elements(&self) -> &[(TableKey, ColKey)] {
        &self.elements
    }

    /// The table the path starts at.
    #[must_use]
    pub fn root_table(&self) -> Option<TableKey> {
        self.elements.first().map(|(t, _)| *t)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (table, col)) in self.elements.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{table}/{col}")?;
        }
        Ok(())
    }
}
