//! Replays change sets onto copies of old collection contents.
//!
//! A change set is correct when replaying it on the old contents yields
//! the new contents. Deletions are applied in descending order, then
//! insertions in ascending order, then `modifications_new` overwrite.

use livedb_notify::{ChangeSet, DictionaryChangeSet};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Replays `changes` on `old`, taking inserted and modified values from
/// `new`.
///
/// Panics if an index is out of range.
pub fn apply_changes<T: Clone>(old: &[T], new: &[T], changes: &ChangeSet) -> Vec<T> {
    let mut out = old.to_vec();
    for i in changes.deletions.iter().rev() {
        out.remove(i);
    }
    for j in changes.insertions.iter() {
        out.insert(j, new[j].clone());
    }
    for j in changes.modifications_new.iter() {
        out[j] = new[j].clone();
    }
    out
}

/// Checks the structural invariants of a change set against the sizes of
/// the collections it connects.
pub fn check_invariants(changes: &ChangeSet, old_len: usize, new_len: usize) -> Result<(), String> {
    if changes.deletions.last().is_some_and(|i| i >= old_len) {
        return Err(format!("deletion out of range for {old_len} old elements"));
    }
    if changes.insertions.last().is_some_and(|i| i >= new_len) {
        return Err(format!("insertion out of range for {new_len} new elements"));
    }
    if old_len - changes.deletions.count() + changes.insertions.count() != new_len {
        return Err("deletions and insertions do not account for the size change".to_owned());
    }
    if changes.modifications.count() != changes.modifications_new.count() {
        return Err("modifications and modifications_new differ in size".to_owned());
    }
    for (from, to) in &changes.moves {
        if !changes.deletions.contains(*from) || !changes.insertions.contains(*to) {
            return Err(format!("move {from} -> {to} is not a deletion plus an insertion"));
        }
    }
    if changes.modifications.iter().any(|i| changes.deletions.contains(i)) {
        return Err("an index is both deleted and modified".to_owned());
    }
    Ok(())
}

/// Asserts that `changes` turns `old` into `new`.
pub fn assert_mirrors<T: Clone + PartialEq + Debug>(old: &[T], new: &[T], changes: &ChangeSet) {
    if let Err(problem) = check_invariants(changes, old.len(), new.len()) {
        panic!("invalid change set {changes:?} for {old:?} -> {new:?}: {problem}");
    }
    let replayed = apply_changes(old, new, changes);
    assert_eq!(
        replayed, new,
        "replaying {changes:?} on {old:?} did not produce the new contents"
    );
}

/// Replays keyed changes on `old`, taking inserted and modified values
/// from `new`.
pub fn apply_dictionary_changes<V: Clone>(
    old: &BTreeMap<String, V>,
    new: &BTreeMap<String, V>,
    changes: &DictionaryChangeSet,
) -> BTreeMap<String, V> {
    let mut out = old.clone();
    for key in &changes.deletions {
        out.remove(key);
    }
    for key in changes.insertions.iter().chain(&changes.modifications) {
        if let Some(value) = new.get(key) {
            out.insert(key.clone(), value.clone());
        }
    }
    out
}

/// Asserts that keyed `changes` turn `old` into `new`.
pub fn assert_dictionary_mirrors<V: Clone + PartialEq + Debug>(
    old: &BTreeMap<String, V>,
    new: &BTreeMap<String, V>,
    changes: &DictionaryChangeSet,
) {
    let replayed = apply_dictionary_changes(old, new, changes);
    assert_eq!(
        &replayed, new,
        "replaying {changes:?} on {old:?} did not produce the new contents"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedb_notify::{calculate, DiffMode};

    #[test]
    fn replays_a_move() {
        let old = vec![1, 2, 3, 4];
        let new = vec![2, 3, 1, 4];
        let changes = calculate(&old, &new, |_| false, DiffMode::Rows);
        assert_mirrors(&old, &new, &changes);
    }

    #[test]
    fn detects_bad_sizes() {
        let mut changes = ChangeSet::default();
        changes.insertions.add(0);
        assert!(check_invariants(&changes, 1, 1).is_err());
        assert!(check_invariants(&changes, 0, 1).is_ok());
    }
}
