//! Sets of collection indices stored as sorted ranges.

use serde::{Deserialize, Serialize};

/// A set of indices, stored as sorted, disjoint, non-adjacent half-open
/// ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSet {
    ranges: Vec<(usize, usize)>,
}

impl IndexSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the set has no indices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of indices in the set.
    #[must_use]
    pub fn count(&self) -> usize {
        self.ranges.iter().map(|(s, e)| e - s).sum()
    }

    /// The ranges making up the set.
    #[must_use]
    pub fn ranges(&self) -> &[(usize, usize)] {
        &self.ranges
    }

    /// Returns true if `index` is in the set.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        let pos = self.ranges.partition_point(|(_, end)| *end <= index);
        self.ranges
            .get(pos)
            .is_some_and(|(start, _)| *start <= index)
    }

    /// Adds one index.
    pub fn add(&mut self, index: usize) {
        self.add_range(index, index + 1);
    }

    /// Adds every index in `start..end`.
    pub fn add_range(&mut self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        // First range that touches or follows `start`.
        let first = self.ranges.partition_point(|(_, e)| *e < start);
        // One past the last range that touches `end`.
        let last = self.ranges.partition_point(|(s, _)| *s <= end);
        if first == last {
            self.ranges.insert(first, (start, end));
            return;
        }
        let merged = (
            start.min(self.ranges[first].0),
            end.max(self.ranges[last - 1].1),
        );
        self.ranges.splice(first..last, std::iter::once(merged));
    }

    /// Adds every index of another set.
    pub fn add_set(&mut self, other: &IndexSet) {
        for (start, end) in &other.ranges {
            self.add_range(*start, *end);
        }
    }

    /// Removes one index. Other indices keep their values.
    pub fn remove(&mut self, index: usize) {
        let pos = self.ranges.partition_point(|(_, end)| *end <= index);
        let Some(&(start, end)) = self.ranges.get(pos) else {
            return;
        };
        if start > index {
            return;
        }
        let mut replacement = Vec::with_capacity(2);
        if start < index {
            replacement.push((start, index));
        }
        if index + 1 < end {
            replacement.push((index + 1, end));
        }
        self.ranges.splice(pos..=pos, replacement);
    }

    /// Shifts every index at or after `index` up by one, leaving a gap at
    /// `index`.
    pub fn shift_for_insert(&mut self, index: usize) {
        let pos = self.ranges.partition_point(|(_, end)| *end <= index);
        if pos == self.ranges.len() {
            return;
        }
        let (start, end) = self.ranges[pos];
        let mut tail = pos;
        if start < index {
            self.ranges[pos] = (start, index);
            self.ranges.insert(pos + 1, (index + 1, end + 1));
            tail = pos + 2;
        }
        for range in &mut self.ranges[tail..] {
            range.0 += 1;
            range.1 += 1;
        }
    }

    /// Removes every index.
    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Smallest index.
    #[must_use]
    pub fn first(&self) -> Option<usize> {
        self.ranges.first().map(|(s, _)| *s)
    }

    /// Largest index.
    #[must_use]
    pub fn last(&self) -> Option<usize> {
        self.ranges.last().map(|(_, e)| e - 1)
    }

    /// Iterates over indices in ascending order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = usize> + '_ {
        self.ranges.iter().flat_map(|(s, e)| *s..*e)
    }
}

impl FromIterator<usize> for IndexSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = IndexSet::new();
        for index in iter {
            set.add(index);
        }
        set
    }
}

impl Extend<usize> for IndexSet {
    fn extend<I: IntoIterator<Item = usize>>(&mut self, iter: I) {
        for index in iter {
            self.add(index);
        }
    }
}
