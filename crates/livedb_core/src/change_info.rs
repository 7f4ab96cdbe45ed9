//! Per-commit change records.
//!
//! A [`ChangeInfo`] describes what happened to objects between two versions:
//! which objects were inserted or deleted and which columns of surviving
//! objects were written. Records for consecutive commits merge into one
//! record for the whole interval.

use crate::types::{ColKey, ObjKey, TableKey};
use std::collections::{BTreeMap, BTreeSet};

/// Changes to one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableChanges {
    /// Objects that did not exist at the start of the interval.
    pub insertions: BTreeSet<ObjKey>,
    /// Objects that existed at the start of the interval and were removed.
    ///
    /// A key can be both deleted and inserted when an object was removed and
    /// then recreated with the same primary key.
    pub deletions: BTreeSet<ObjKey>,
    /// Columns written on objects that existed at the start of the interval.
    pub modifications: BTreeMap<ObjKey, BTreeSet<ColKey>>,
}

impl TableChanges {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.deletions.is_empty() && self.modifications.is_empty()
    }

    /// Columns written on an object, if any.
    #[must_use]
    pub fn modified_columns(&self, key: ObjKey) -> Option<&BTreeSet<ColKey>> {
        self.modifications.get(&key)
    }

    /// Returns true if the object's column was written.
    #[must_use]
    pub fn column_modified(&self, key: ObjKey, col: ColKey) -> bool {
        self.modifications
            .get(&key)
            .is_some_and(|cols| cols.contains(&col))
    }

    pub(crate) fn record_insert(&mut self, key: ObjKey) {
        self.insertions.insert(key);
    }

    pub(crate) fn record_delete(&mut self, key: ObjKey) {
        self.modifications.remove(&key);
        // An object created and removed inside the interval leaves no trace
        // unless it replaced an object that existed at the start.
        if !self.insertions.remove(&key) {
            self.deletions.insert(key);
        }
    }

    pub(crate) fn record_modify(&mut self, key: ObjKey, col: ColKey) {
        if !self.insertions.contains(&key) {
            self.modifications.entry(key).or_default().insert(col);
        }
    }

    fn merge(&mut self, next: &TableChanges) {
        for key in &next.deletions {
            self.record_delete(*key);
        }
        for key in &next.insertions {
            self.record_insert(*key);
        }
        for (key, cols) in &next.modifications {
            for col in cols {
                self.record_modify(*key, *col);
            }
        }
    }
}

/// Changes between two versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeInfo {
    tables: BTreeMap<TableKey, TableChanges>,
    schema_changed: bool,
}

impl ChangeInfo {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.schema_changed && self.tables.values().all(TableChanges::is_empty)
    }

    /// Returns true if tables or columns were added.
    #[must_use]
    pub fn schema_changed(&self) -> bool {
        self.schema_changed
    }

    /// Changes to one table.
    #[must_use]
    pub fn table(&self, table: TableKey) -> Option<&TableChanges> {
        self.tables.get(&table)
    }

    /// Iterates over tables with changes.
    pub fn tables(&self) -> impl Iterator<Item = (TableKey, &TableChanges)> {
        self.tables
            .iter()
            .filter(|(_, c)| !c.is_empty())
            .map(|(k, c)| (*k, c))
    }

    /// Returns true if the object was deleted in the interval.
    #[must_use]
    pub fn was_deleted(&self, table: TableKey, key: ObjKey) -> bool {
        self.table(table).is_some_and(|t| t.deletions.contains(&key))
    }

    /// Returns true if the object was inserted in the interval.
    #[must_use]
    pub fn was_inserted(&self, table: TableKey, key: ObjKey) -> bool {
        self.table(table).is_some_and(|t| t.insertions.contains(&key))
    }

    /// Returns true if the object's column was written in the interval.
    #[must_use]
    pub fn column_modified(&self, table: TableKey, key: ObjKey, col: ColKey) -> bool {
        self.table(table).is_some_and(|t| t.column_modified(key, col))
    }

    /// Columns written on an object in the interval.
    #[must_use]
    pub fn modified_columns(&self, table: TableKey, key: ObjKey) -> Option<&BTreeSet<ColKey>> {
        self.table(table).and_then(|t| t.modified_columns(key))
    }

    pub(crate) fn record_insert(&mut self, table: TableKey, key: ObjKey) {
        self.tables.entry(table).or_default().record_insert(key);
    }

    pub(crate) fn record_delete(&mut self, table: TableKey, key: ObjKey) {
        self.tables.entry(table).or_default().record_delete(key);
    }

    pub(crate) fn record_modify(&mut self, table: TableKey, key: ObjKey, col: ColKey) {
        self.tables.entry(table).or_default().record_modify(key, col);
    }

    pub(crate) fn record_schema_change(&mut self) {
        self.schema_changed = true;
    }

    /// Folds the changes of a later interval into this one.
    pub fn merge(&mut self, next: &ChangeInfo) {
        self.schema_changed |= next.schema_changed;
        for (table, changes) in &next.tables {
            self.tables.entry(*table).or_default().merge(changes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const T: TableKey = TableKey::new(0);
    const C: ColKey = ColKey::new(1);

    fn key(k: i64) -> ObjKey {
        ObjKey::new(k)
    }

    #[test]
    fn insert_then_delete_is_net_zero() {
        let mut first = ChangeInfo::new();
        first.record_insert(T, key(1));
        let mut second = ChangeInfo::new();
        second.record_modify(T, key(1), C);
        second.record_delete(T, key(1));

        first.merge(&second);
        assert!(first.is_empty());
    }

    #[test]
    fn delete_then_recreate_keeps_both() {
        let mut info = ChangeInfo::new();
        info.record_modify(T, key(1), C);
        info.record_delete(T, key(1));
        info.record_insert(T, key(1));

        assert!(info.was_deleted(T, key(1)));
        assert!(info.was_inserted(T, key(1)));
        assert!(!info.column_modified(T, key(1), C));
    }

    #[test]
    fn modifications_of_new_objects_are_dropped() {
        let mut info = ChangeInfo::new();
        info.record_insert(T, key(2));
        info.record_modify(T, key(2), C);
        info.record_modify(T, key(3), C);

        assert!(info.modified_columns(T, key(2)).is_none());
        assert!(info.column_modified(T, key(3), C));
    }

    #[test]
    fn merge_accumulates_columns() {
        let mut a = ChangeInfo::new();
        a.record_modify(T, key(1), ColKey::new(0));
        let mut b = ChangeInfo::new();
        b.record_modify(T, key(1), ColKey::new(2));
        b.record_schema_change();

        a.merge(&b);
        assert_eq!(a.modified_columns(T, key(1)).map(BTreeSet::len), Some(2));
        assert!(a.schema_changed());
    }

    /// Applies only the operations that are valid for the live set.
    fn record(ops: &[(u8, i64)], alive: &mut BTreeSet<i64>) -> ChangeInfo {
        let mut info = ChangeInfo::new();
        for (kind, k) in ops {
            match kind {
                0 if !alive.contains(k) => {
                    alive.insert(*k);
                    info.record_insert(T, key(*k));
                }
                1 if alive.contains(k) => {
                    alive.remove(k);
                    info.record_delete(T, key(*k));
                }
                2 if alive.contains(k) => info.record_modify(T, key(*k), C),
                _ => {}
            }
        }
        info
    }

    proptest! {
        #[test]
        fn merged_records_match_one_record(
            ops in proptest::collection::vec((0u8..3, 0i64..4), 0..40),
            split in 0usize..40,
        ) {
            let split = split.min(ops.len());
            let initial: BTreeSet<i64> = [0, 1].into_iter().collect();

            let whole = record(&ops, &mut initial.clone());

            let mut alive = initial;
            let mut merged = record(&ops[..split], &mut alive);
            let rest = record(&ops[split..], &mut alive);
            merged.merge(&rest);

            prop_assert_eq!(whole.table(T).cloned().unwrap_or_default(), merged.table(T).cloned().unwrap_or_default());
        }
    }
}
