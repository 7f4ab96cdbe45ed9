//! Change sets delivered to collection callbacks.
//!
//! Deletions and `modifications` use indices from before the change;
//! insertions and `modifications_new` use indices from after it. Applying
//! deletions in descending order, then insertions in ascending order, then
//! `modifications_new` turns a copy of the old collection into the new one.

use crate::index_set::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Index-space changes to an ordered collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Removed indices, before the change.
    pub deletions: IndexSet,
    /// Added indices, after the change.
    pub insertions: IndexSet,
    /// Modified indices, before the change.
    pub modifications: IndexSet,
    /// Modified indices, after the change.
    pub modifications_new: IndexSet,
    /// Elements that kept their identity but changed position, as
    /// `(old, new)` pairs. Each source also appears in `deletions` and each
    /// destination in `insertions`.
    pub moves: Vec<(usize, usize)>,
    /// The container holding the collection was removed.
    pub collection_root_was_deleted: bool,
}

impl ChangeSet {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty()
            && self.insertions.is_empty()
            && self.modifications.is_empty()
            && self.modifications_new.is_empty()
            && self.moves.is_empty()
            && !self.collection_root_was_deleted
    }

    /// A change set deleting every index below `size`.
    #[must_use]
    pub fn delete_all(size: usize, root_deleted: bool) -> Self {
        let mut deletions = IndexSet::new();
        deletions.add_range(0, size);
        Self {
            deletions,
            collection_root_was_deleted: root_deleted,
            ..Self::default()
        }
    }
}

/// Key-space changes to a dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryChangeSet {
    /// Keys that were removed.
    pub deletions: Vec<String>,
    /// Keys that were added.
    pub insertions: Vec<String>,
    /// Keys whose value changed, or whose linked object was modified.
    pub modifications: Vec<String>,
    /// The container holding the dictionary was removed.
    pub collection_root_was_deleted: bool,
}

impl DictionaryChangeSet {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty()
            && self.insertions.is_empty()
            && self.modifications.is_empty()
            && !self.collection_root_was_deleted
    }
}

/// Section-space changes to a sectioned view.
///
/// Row indices are keyed by section index. Deletions use section and row
/// indices from before the change, insertions use indices from after it.
/// Modifications are only reported for sections that kept their index,
/// by row index after the change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionedChangeSet {
    /// Removed rows per old section.
    pub deletions: BTreeMap<usize, IndexSet>,
    /// Added rows per new section.
    pub insertions: BTreeMap<usize, IndexSet>,
    /// Modified rows per kept section.
    pub modifications: BTreeMap<usize, IndexSet>,
    /// Sections that appeared, by new index.
    pub sections_to_insert: IndexSet,
    /// Sections that disappeared, by old index.
    pub sections_to_delete: IndexSet,
}

impl SectionedChangeSet {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deletions.values().all(IndexSet::is_empty)
            && self.insertions.values().all(IndexSet::is_empty)
            && self.modifications.values().all(IndexSet::is_empty)
            && self.sections_to_insert.is_empty()
            && self.sections_to_delete.is_empty()
    }
}

/// What a notifier hands to its callbacks for one delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionChange {
    /// Index-space changes.
    pub changes: ChangeSet,
    /// Key-space changes, for dictionaries.
    pub dictionary: Option<DictionaryChangeSet>,
}

impl CollectionChange {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.dictionary.as_ref().map_or(true, DictionaryChangeSet::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_deletion_is_not_empty() {
        assert!(ChangeSet::default().is_empty());
        let gone = ChangeSet::delete_all(0, true);
        assert!(!gone.is_empty());
        assert_eq!(ChangeSet::delete_all(3, true).deletions.count(), 3);
    }

    #[test]
    fn sectioned_emptiness_ignores_empty_sections() {
        let mut changes = SectionedChangeSet::default();
        changes.insertions.insert(0, IndexSet::new());
        assert!(changes.is_empty());
        changes.sections_to_delete.add(1);
        assert!(!changes.is_empty());
    }
}
