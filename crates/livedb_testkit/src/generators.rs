//! Property-based test generators using proptest.
//!
//! Edits are generated with raw indices and resolved against the
//! collection's size when applied, so any script is valid for any
//! starting state.

use livedb_notify::{Dictionary, List, NotifyResult};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// One edit of an int list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEdit {
    /// Append a value.
    Push(i64),
    /// Insert a value at an index.
    Insert(usize, i64),
    /// Overwrite the value at an index.
    Set(usize, i64),
    /// Remove the value at an index.
    Remove(usize),
    /// Move a value from one index to another.
    Move(usize, usize),
    /// Exchange two values.
    Swap(usize, usize),
    /// Remove every value.
    Clear,
}

impl ListEdit {
    /// Maps raw indices onto a list of `len` values. Returns `None` if the
    /// edit needs an element and the list is empty.
    pub fn resolve(&self, len: usize) -> Option<ListEdit> {
        let at = |i: usize| if len == 0 { None } else { Some(i % len) };
        Some(match *self {
            ListEdit::Push(v) => ListEdit::Push(v),
            ListEdit::Insert(i, v) => ListEdit::Insert(i % (len + 1), v),
            ListEdit::Set(i, v) => ListEdit::Set(at(i)?, v),
            ListEdit::Remove(i) => ListEdit::Remove(at(i)?),
            ListEdit::Move(a, b) => ListEdit::Move(at(a)?, at(b)?),
            ListEdit::Swap(a, b) => ListEdit::Swap(at(a)?, at(b)?),
            ListEdit::Clear => ListEdit::Clear,
        })
    }

    /// Applies a resolved edit to a plain vector.
    pub fn apply_model(&self, model: &mut Vec<i64>) {
        match *self {
            ListEdit::Push(v) => model.push(v),
            ListEdit::Insert(i, v) => model.insert(i, v),
            ListEdit::Set(i, v) => model[i] = v,
            ListEdit::Remove(i) => {
                model.remove(i);
            }
            ListEdit::Move(from, to) => {
                let v = model.remove(from);
                model.insert(to, v);
            }
            ListEdit::Swap(a, b) => model.swap(a, b),
            ListEdit::Clear => model.clear(),
        }
    }

    /// Applies a resolved edit to a live list. Requires an open write
    /// transaction.
    pub fn apply_list(&self, list: &List) -> NotifyResult<()> {
        match *self {
            ListEdit::Push(v) => list.push(v).map(|_| ()),
            ListEdit::Insert(i, v) => list.insert(i, v),
            ListEdit::Set(i, v) => list.set(i, v).map(|_| ()),
            ListEdit::Remove(i) => list.remove(i).map(|_| ()),
            ListEdit::Move(from, to) => list.move_element(from, to),
            ListEdit::Swap(a, b) => list.swap(a, b),
            ListEdit::Clear => list.clear(),
        }
    }
}

/// Strategy for list values. A narrow range makes duplicates common.
pub fn list_value_strategy() -> impl Strategy<Value = i64> {
    0i64..8
}

/// Strategy for a single list edit.
pub fn list_edit_strategy() -> impl Strategy<Value = ListEdit> {
    let index = 0usize..64;
    prop_oneof![
        3 => list_value_strategy().prop_map(ListEdit::Push),
        3 => (index.clone(), list_value_strategy()).prop_map(|(i, v)| ListEdit::Insert(i, v)),
        2 => (index.clone(), list_value_strategy()).prop_map(|(i, v)| ListEdit::Set(i, v)),
        3 => index.clone().prop_map(ListEdit::Remove),
        2 => (index.clone(), index.clone()).prop_map(|(a, b)| ListEdit::Move(a, b)),
        1 => (index.clone(), index).prop_map(|(a, b)| ListEdit::Swap(a, b)),
        1 => Just(ListEdit::Clear),
    ]
}

/// Strategy for a sequence of up to `max_len` list edits.
pub fn list_script_strategy(max_len: usize) -> impl Strategy<Value = Vec<ListEdit>> {
    prop::collection::vec(list_edit_strategy(), 0..=max_len)
}

/// Strategy for the starting contents of a list.
pub fn initial_list_strategy(max_len: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(list_value_strategy(), 0..=max_len)
}

/// One edit of a string-keyed int dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictionaryEdit {
    /// Store a value under a key.
    Insert(String, i64),
    /// Remove a key if present.
    Remove(String),
    /// Remove every entry.
    Clear,
}

impl DictionaryEdit {
    /// Applies the edit to a plain map.
    pub fn apply_model(&self, model: &mut BTreeMap<String, i64>) {
        match self {
            DictionaryEdit::Insert(k, v) => {
                model.insert(k.clone(), *v);
            }
            DictionaryEdit::Remove(k) => {
                model.remove(k);
            }
            DictionaryEdit::Clear => model.clear(),
        }
    }

    /// Applies the edit to a live dictionary. Removing a missing key does
    /// nothing. Requires an open write transaction.
    pub fn apply_dictionary(&self, dictionary: &Dictionary) -> NotifyResult<()> {
        match self {
            DictionaryEdit::Insert(k, v) => dictionary.insert(k.clone(), *v),
            DictionaryEdit::Remove(k) => {
                if dictionary.contains_key(k)? {
                    dictionary.remove(k)?;
                }
                Ok(())
            }
            DictionaryEdit::Clear => dictionary.clear(),
        }
    }
}

/// Strategy for dictionary keys drawn from a small alphabet.
pub fn dictionary_key_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(('a'..='f').collect::<Vec<char>>()).prop_map(String::from)
}

/// Strategy for a single dictionary edit.
pub fn dictionary_edit_strategy() -> impl Strategy<Value = DictionaryEdit> {
    prop_oneof![
        4 => (dictionary_key_strategy(), 0i64..4).prop_map(|(k, v)| DictionaryEdit::Insert(k, v)),
        2 => dictionary_key_strategy().prop_map(DictionaryEdit::Remove),
        1 => Just(DictionaryEdit::Clear),
    ]
}

/// Strategy for a sequence of up to `max_len` dictionary edits.
pub fn dictionary_script_strategy(max_len: usize) -> impl Strategy<Value = Vec<DictionaryEdit>> {
    prop::collection::vec(dictionary_edit_strategy(), 0..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_wraps_indices() {
        assert_eq!(ListEdit::Remove(7).resolve(3), Some(ListEdit::Remove(1)));
        assert_eq!(ListEdit::Insert(3, 1).resolve(3), Some(ListEdit::Insert(3, 1)));
        assert_eq!(ListEdit::Swap(0, 1).resolve(0), None);
        assert_eq!(ListEdit::Push(2).resolve(0), Some(ListEdit::Push(2)));
    }

    proptest! {
        #[test]
        fn resolved_edits_apply_to_models(start in initial_list_strategy(8), script in list_script_strategy(16)) {
            let mut model = start;
            for edit in script {
                if let Some(edit) = edit.resolve(model.len()) {
                    edit.apply_model(&mut model);
                }
            }
            prop_assert!(model.len() <= 8 + 16);
        }
    }
}
