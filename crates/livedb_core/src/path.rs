//! Addressing of collections, including collections nested in `Mixed`
//! values.
//!
//! A collection is identified by the object and column that own it plus a
//! sequence of steps into nested collections. Ownership is expressed as a
//! path rather than a parent pointer: when a structural change replaces the
//! value at some step, the path simply stops resolving.

use crate::types::{ColKey, ObjKey, ObjLink, TableKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One step into a nested collection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PathElement {
    /// Position in a list or set.
    Index(usize),
    /// Key in a dictionary.
    Key(String),
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathElement::Index(i) => write!(f, "[{i}]"),
            PathElement::Key(k) => write!(f, "[{k:?}]"),
        }
    }
}

impl From<usize> for PathElement {
    fn from(i: usize) -> Self {
        PathElement::Index(i)
    }
}

impl From<&str> for PathElement {
    fn from(k: &str) -> Self {
        PathElement::Key(k.to_owned())
    }
}

/// Location of a collection inside the object graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionPath {
    /// Table of the owning object.
    pub table: TableKey,
    /// Owning object.
    pub object: ObjKey,
    /// Column of the owning object.
    pub column: ColKey,
    /// Steps into nested collections, empty for the column itself.
    pub nested: Vec<PathElement>,
}

impl CollectionPath {
    /// Path of a collection column.
    #[must_use]
    pub fn new(table: TableKey, object: ObjKey, column: ColKey) -> Self {
        Self {
            table,
            object,
            column,
            nested: Vec::new(),
        }
    }

    /// Path of a collection column of a linked object.
    #[must_use]
    pub fn of(owner: ObjLink, column: ColKey) -> Self {
        Self::new(owner.table, owner.key, column)
    }

    /// Returns a path one step deeper.
    #[must_use]
    pub fn child(&self, step: impl Into<PathElement>) -> Self {
        let mut nested = self.nested.clone();
        nested.push(step.into());
        Self {
            nested,
            ..self.clone()
        }
    }

    /// The owning object as a link.
    #[must_use]
    pub fn owner(&self) -> ObjLink {
        ObjLink::new(self.table, self.object)
    }

    /// Returns true if the path addresses a column directly.
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.nested.is_empty()
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}", self.table, self.object, self.column)?;
        for step in &self.nested {
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_paths_extend_nesting() {
        let root = CollectionPath::new(TableKey::new(1), ObjKey::new(2), ColKey::new(3));
        let nested = root.child("a").child(4);
        assert!(root.is_top_level());
        assert_eq!(nested.nested.len(), 2);
        assert_eq!(nested.to_string(), "table:1/obj:2.col:3[\"a\"][4]");
    }
}
