//! Computes index-space change sets from two memberships.
//!
//! Elements are matched by identity, pairing the n-th occurrence of an
//! element in the old collection with its n-th occurrence in the new one.
//! The longest run of matched elements that kept their relative order
//! stays in place; every other matched element is reported as a move.

use crate::change_set::{ChangeSet, DictionaryChangeSet};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// How elements that did not survive are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMode {
    /// Rows of a table or query: an element is either kept, removed or
    /// added.
    Rows,
    /// Positions of a list: an element replaced in place by a different one
    /// is reported as a modification of that position.
    Sequence,
}

/// Computes the change set turning `prev` into `next`.
///
/// `is_modified` is asked about elements present in both memberships and
/// decides whether the element itself changed in the interval. Every
/// occurrence of a modified element is reported.
pub fn calculate<T, F>(prev: &[T], next: &[T], is_modified: F, mode: DiffMode) -> ChangeSet
where
    T: Eq + Hash,
    F: FnMut(&T) -> bool,
{
    let in_place = mode == DiffMode::Sequence;
    calculate_sequence(prev, next, is_modified, |_, _| in_place)
}

/// Computes the change set of a list whose positions may be overwritten.
///
/// Within a run of positions that lost and gained elements, the n-th lost
/// element and the n-th gained one are offered to `replaces`. When it
/// accepts the pair the position is reported as modified, otherwise as a
/// deletion and an insertion.
pub fn calculate_sequence<T, F, R>(prev: &[T], next: &[T], mut is_modified: F, mut replaces: R) -> ChangeSet
where
    T: Eq + Hash,
    F: FnMut(&T) -> bool,
    R: FnMut(&T, &T) -> bool,
{
    let mut changes = ChangeSet::default();

    let mut positions: HashMap<&T, VecDeque<usize>> = HashMap::with_capacity(prev.len());
    for (i, element) in prev.iter().enumerate() {
        positions.entry(element).or_default().push_back(i);
    }
    let new_to_old: Vec<Option<usize>> = next
        .iter()
        .map(|element| positions.get_mut(element).and_then(VecDeque::pop_front))
        .collect();
    let mut old_matched = vec![false; prev.len()];
    for old in new_to_old.iter().flatten() {
        old_matched[*old] = true;
    }

    let anchors = stable_positions(&new_to_old);
    let mut is_anchor = vec![false; next.len()];
    for new in &anchors {
        is_anchor[*new] = true;
    }

    for (new, old) in new_to_old.iter().enumerate() {
        let Some(old) = *old else { continue };
        let modified = is_modified(&next[new]);
        if is_anchor[new] {
            if modified {
                changes.modifications.add(old);
                changes.modifications_new.add(new);
            }
        } else {
            changes.deletions.add(old);
            changes.insertions.add(new);
            // A moved element that also changed is reported as a plain
            // delete and insert.
            if !modified {
                changes.moves.push((old, new));
            }
        }
    }
    changes.moves.sort_unstable();

    // Walk the gaps between consecutive anchors.
    let mut bounds: Vec<(usize, usize)> = anchors
        .iter()
        .map(|new| (new_to_old[*new].unwrap_or_default(), *new))
        .collect();
    bounds.push((prev.len(), next.len()));
    let (mut old_start, mut new_start) = (0, 0);
    for (old_end, new_end) in bounds {
        let removed: Vec<usize> = (old_start..old_end).filter(|i| !old_matched[*i]).collect();
        let added: Vec<usize> = (new_start..new_end)
            .filter(|j| new_to_old[*j].is_none())
            .collect();
        let paired = removed.len().min(added.len());
        for (old, new) in removed.iter().zip(&added) {
            if replaces(&prev[*old], &next[*new]) {
                changes.modifications.add(*old);
                changes.modifications_new.add(*new);
            } else {
                changes.deletions.add(*old);
                changes.insertions.add(*new);
            }
        }
        for old in &removed[paired..] {
            changes.deletions.add(*old);
        }
        for new in &added[paired..] {
            changes.insertions.add(*new);
        }
        old_start = old_end + 1;
        new_start = new_end + 1;
    }

    changes
}

/// Computes both the keyed and the index-space changes of a dictionary.
///
/// Both memberships must be sorted by key. A key whose element changed
/// identity, or whose element was modified, is a modification.
pub fn calculate_dictionary<T, F>(
    prev: &[(String, T)],
    next: &[(String, T)],
    mut is_modified: F,
) -> (ChangeSet, DictionaryChangeSet)
where
    T: Eq,
    F: FnMut(&T) -> bool,
{
    let mut changes = ChangeSet::default();
    let mut keyed = DictionaryChangeSet::default();
    let (mut i, mut j) = (0, 0);
    while i < prev.len() || j < next.len() {
        let order = match (prev.get(i), next.get(j)) {
            (Some((a, _)), Some((b, _))) => a.cmp(b),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, _) => std::cmp::Ordering::Greater,
        };
        match order {
            std::cmp::Ordering::Less => {
                changes.deletions.add(i);
                keyed.deletions.push(prev[i].0.clone());
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                changes.insertions.add(j);
                keyed.insertions.push(next[j].0.clone());
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                if prev[i].1 != next[j].1 || is_modified(&next[j].1) {
                    changes.modifications.add(i);
                    changes.modifications_new.add(j);
                    keyed.modifications.push(next[j].0.clone());
                }
                i += 1;
                j += 1;
            }
        }
    }
    (changes, keyed)
}

/// New-side indices of the longest strictly increasing run of matched old
/// indices.
fn stable_positions(new_to_old: &[Option<usize>]) -> Vec<usize> {
    // tails[k] is the new index ending the best run of length k + 1.
    let mut tails: Vec<usize> = Vec::new();
    let mut predecessor: Vec<Option<usize>> = vec![None; new_to_old.len()];
    for (new, old) in new_to_old.iter().enumerate() {
        let Some(old) = *old else { continue };
        let len = tails.partition_point(|t| new_to_old[*t].unwrap_or_default() < old);
        predecessor[new] = len.checked_sub(1).map(|k| tails[k]);
        if len == tails.len() {
            tails.push(new);
        } else {
            tails[len] = new;
        }
    }
    let mut run = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(new) = cursor {
        run.push(new);
        cursor = predecessor[new];
    }
    run.reverse();
    run
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn indices(set: &crate::IndexSet) -> Vec<usize> {
        set.iter().collect()
    }

    fn unmodified<T>(_: &T) -> bool {
        false
    }

    /// Applies a change set to a copy of `prev`, taking new values from
    /// `next`.
    fn mirror(prev: &[i32], next: &[i32], changes: &ChangeSet) -> Vec<i32> {
        let mut out = prev.to_vec();
        for i in changes.deletions.iter().rev() {
            out.remove(i);
        }
        for i in changes.insertions.iter() {
            out.insert(i, next[i]);
        }
        for i in changes.modifications_new.iter() {
            out[i] = next[i];
        }
        out
    }

    #[test]
    fn identical_memberships_produce_nothing() {
        let rows = [1, 2, 3];
        assert!(calculate(&rows, &rows, unmodified, DiffMode::Rows).is_empty());
    }

    #[test]
    fn moving_one_element_is_a_single_move() {
        let prev: Vec<i32> = (0..10).collect();
        let next = vec![0, 1, 2, 3, 4, 6, 7, 8, 5, 9];
        let changes = calculate(&prev, &next, unmodified, DiffMode::Sequence);

        assert_eq!(changes.moves, vec![(5, 8)]);
        assert_eq!(indices(&changes.deletions), vec![5]);
        assert_eq!(indices(&changes.insertions), vec![8]);
        assert!(changes.modifications.is_empty());
    }

    #[test]
    fn moving_a_modified_element_is_delete_and_insert() {
        let prev: Vec<i32> = (0..10).collect();
        let next = vec![0, 1, 2, 3, 4, 6, 7, 8, 5, 9];
        let changes = calculate(&prev, &next, |e| *e == 5, DiffMode::Rows);

        assert!(changes.moves.is_empty());
        assert_eq!(indices(&changes.deletions), vec![5]);
        assert_eq!(indices(&changes.insertions), vec![8]);
        assert!(changes.modifications.is_empty());
    }

    #[test]
    fn every_occurrence_of_a_modified_element_is_reported() {
        let rows = [7, 1, 7, 2, 7];
        let changes = calculate(&rows, &rows, |e| *e == 7, DiffMode::Sequence);
        assert_eq!(indices(&changes.modifications), vec![0, 2, 4]);
        assert_eq!(indices(&changes.modifications_new), vec![0, 2, 4]);
    }

    #[test]
    fn replacing_in_place_is_a_modification_for_lists_only() {
        let prev = [1, 2, 3];
        let next = [1, 9, 3];

        let list = calculate(&prev, &next, unmodified, DiffMode::Sequence);
        assert_eq!(indices(&list.modifications), vec![1]);
        assert!(list.insertions.is_empty() && list.deletions.is_empty());

        let rows = calculate(&prev, &next, unmodified, DiffMode::Rows);
        assert_eq!(indices(&rows.deletions), vec![1]);
        assert_eq!(indices(&rows.insertions), vec![1]);
    }

    #[test]
    fn rejected_replacements_are_deletions_and_insertions() {
        let prev = [1, 2, 3, 4];
        let next = [1, 20, 30, 4];
        // Only 2 -> 20 counts as the same position changing.
        let changes = calculate_sequence(&prev, &next, unmodified, |old, new| (*old, *new) == (2, 20));
        assert_eq!(indices(&changes.modifications), vec![1]);
        assert_eq!(indices(&changes.modifications_new), vec![1]);
        assert_eq!(indices(&changes.deletions), vec![2]);
        assert_eq!(indices(&changes.insertions), vec![2]);
        assert_eq!(mirror(&prev, &next, &changes), next);
    }

    #[test]
    fn modified_rows_report_both_indices() {
        let prev = [1, 2, 3, 4];
        let next = [0, 1, 3, 4];
        let changes = calculate(&prev, &next, |e| *e == 3, DiffMode::Rows);
        assert_eq!(indices(&changes.deletions), vec![1]);
        assert_eq!(indices(&changes.insertions), vec![0]);
        assert_eq!(indices(&changes.modifications), vec![2]);
        assert_eq!(indices(&changes.modifications_new), vec![2]);
    }

    #[test]
    fn dictionary_changes_are_keyed() {
        let prev = vec![("a".to_owned(), 1), ("b".to_owned(), 2), ("c".to_owned(), 3)];
        let next = vec![("b".to_owned(), 5), ("c".to_owned(), 3), ("d".to_owned(), 4)];
        let (changes, keyed) = calculate_dictionary(&prev, &next, |v| *v == 3);

        assert_eq!(keyed.deletions, vec!["a"]);
        assert_eq!(keyed.insertions, vec!["d"]);
        assert_eq!(keyed.modifications, vec!["b", "c"]);
        assert_eq!(indices(&changes.deletions), vec![0]);
        assert_eq!(indices(&changes.insertions), vec![2]);
        assert_eq!(indices(&changes.modifications_new), vec![0, 1]);
    }

    proptest! {
        #[test]
        fn mirror_reproduces_the_new_membership(
            prev in proptest::collection::vec(0i32..6, 0..24),
            next in proptest::collection::vec(0i32..6, 0..24),
            sequence in any::<bool>(),
        ) {
            let mode = if sequence { DiffMode::Sequence } else { DiffMode::Rows };
            let changes = calculate(&prev, &next, unmodified, mode);
            prop_assert_eq!(mirror(&prev, &next, &changes), next);
        }

        #[test]
        fn partial_replacement_still_mirrors(
            prev in proptest::collection::vec(0i32..6, 0..24),
            next in proptest::collection::vec(0i32..6, 0..24),
        ) {
            let changes = calculate_sequence(&prev, &next, unmodified, |a, b| (a + b) % 2 == 0);
            prop_assert_eq!(mirror(&prev, &next, &changes), next);
        }

        #[test]
        fn moves_are_deletions_and_insertions(
            prev in proptest::collection::vec(0i32..20, 0..20),
            next in proptest::collection::vec(0i32..20, 0..20),
        ) {
            let changes = calculate(&prev, &next, unmodified, DiffMode::Rows);
            for (from, to) in &changes.moves {
                prop_assert!(changes.deletions.contains(*from));
                prop_assert!(changes.insertions.contains(*to));
                prop_assert_eq!(prev[*from], next[*to]);
            }
        }
    }
}
