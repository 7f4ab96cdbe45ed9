//! Decides whether an object counts as modified for a notifier.
//!
//! An object is modified when one of its own columns was written, or when
//! an object reachable through its links was. Unfiltered callbacks follow
//! every link up to [`DeepChangeChecker::MAX_DEPTH`]; filtered callbacks
//! only follow their key paths.

use crate::key_path::KeyPath;
use livedb_core::{ChangeInfo, DataType, ObjLink, Snapshot};
use std::collections::{HashMap, HashSet};

/// Follows every outgoing link of an object.
pub struct DeepChangeChecker<'a> {
    info: &'a ChangeInfo,
    snapshot: &'a Snapshot,
    known: HashMap<ObjLink, bool>,
    visiting: HashSet<ObjLink>,
}

impl<'a> DeepChangeChecker<'a> {
    /// How many links are followed from the collection's own objects.
    pub const MAX_DEPTH: usize = 4;

    /// Creates a checker for the changes in `info`, reading links from
    /// `snapshot` (the newer side of the interval).
    #[must_use]
    pub fn new(info: &'a ChangeInfo, snapshot: &'a Snapshot) -> Self {
        Self {
            info,
            snapshot,
            known: HashMap::new(),
            visiting: HashSet::new(),
        }
    }

    /// Returns true if the object or anything it links to changed.
    pub fn is_modified(&mut self, object: ObjLink) -> bool {
        self.check(object, 0)
    }

    fn check(&mut self, object: ObjLink, depth: usize) -> bool {
        if directly_modified(self.info, object) {
            return true;
        }
        // Only full-depth negative answers are remembered.
        if let Some(known) = self.known.get(&object) {
            return *known;
        }
        if depth >= Self::MAX_DEPTH || !self.visiting.insert(object) {
            return false;
        }
        let mut targets = Vec::new();
        if let (Some(found), Ok(schema)) = (
            self.snapshot.linked(object),
            self.snapshot.schema(object.table),
        ) {
            for column in &schema.columns {
                if column.is_link() || column.data_type == DataType::Mixed {
                    if let Some(value) = found.get(column.key) {
                        value.for_each_link(&mut |l| targets.push(l));
                    }
                }
            }
        }
        let modified = targets
            .into_iter()
            .any(|target| self.check(target, depth + 1));
        self.visiting.remove(&object);
        if modified || depth == 0 {
            self.known.insert(object, modified);
        }
        modified
    }
}

/// Follows only the given key paths.
pub struct KeyPathChangeChecker<'a> {
    info: &'a ChangeInfo,
    snapshot: &'a Snapshot,
    paths: Vec<KeyPath>,
    known: HashMap<ObjLink, bool>,
}

impl<'a> KeyPathChangeChecker<'a> {
    /// Creates a checker for the union of `paths`.
    #[must_use]
    pub fn new(info: &'a ChangeInfo, snapshot: &'a Snapshot, paths: Vec<KeyPath>) -> Self {
        Self {
            info,
            snapshot,
            paths,
            known: HashMap::new(),
        }
    }

    /// Returns true if a column on one of the key paths changed.
    pub fn is_modified(&mut self, object: ObjLink) -> bool {
        if let Some(known) = self.known.get(&object) {
            return *known;
        }
        let modified = self
            .paths
            .iter()
            .any(|path| path_modified(self.info, self.snapshot, object, path.elements()));
        self.known.insert(object, modified);
        modified
    }
}

fn path_modified(
    info: &ChangeInfo,
    snapshot: &Snapshot,
    object: ObjLink,
    elements: &[(livedb_core::TableKey, livedb_core::ColKey)],
) -> bool {
    let Some(((table, column), rest)) = elements.split_first() else {
        return false;
    };
    if *table != object.table {
        return false;
    }
    if info.column_modified(object.table, object.key, *column) {
        return true;
    }
    if rest.is_empty() {
        return false;
    }
    let Some(value) = snapshot.linked(object).and_then(|o| o.get(*column)) else {
        return false;
    };
    let mut targets = Vec::new();
    value.for_each_link(&mut |l| targets.push(l));
    targets
        .into_iter()
        .any(|target| path_modified(info, snapshot, target, rest))
}

fn directly_modified(info: &ChangeInfo, object: ObjLink) -> bool {
    info.modified_columns(object.table, object.key)
        .is_some_and(|cols| !cols.is_empty())
}

/// The checker used for one notifier run.
///
/// When every callback has a filter, the union of their key paths is used.
/// When only some do, filtered callbacks may hear about modifications
/// outside their paths, but never miss one on them.
pub enum ModificationChecker<'a> {
    /// No callback filters.
    Deep(DeepChangeChecker<'a>),
    /// Every callback filters.
    KeyPaths(KeyPathChangeChecker<'a>),
    /// Some callbacks filter.
    Mixed(KeyPathChangeChecker<'a>, DeepChangeChecker<'a>),
}

impl<'a> ModificationChecker<'a> {
    /// Chooses a checker for the filters of the registered callbacks.
    /// `None` marks an unfiltered callback.
    #[must_use]
    pub fn for_filters(
        info: &'a ChangeInfo,
        snapshot: &'a Snapshot,
        filters: &[Option<Vec<KeyPath>>],
    ) -> Self {
        let mut paths: Vec<KeyPath> = Vec::new();
        let mut unfiltered = filters.is_empty();
        for filter in filters {
            match filter {
                Some(list) if !list.is_empty() => {
                    for path in list {
                        if !paths.contains(path) {
                            paths.push(path.clone());
                        }
                    }
                }
                _ => unfiltered = true,
            }
        }
        match (paths.is_empty(), unfiltered) {
            (true, _) => Self::Deep(DeepChangeChecker::new(info, snapshot)),
            (false, false) => Self::KeyPaths(KeyPathChangeChecker::new(info, snapshot, paths)),
            (false, true) => Self::Mixed(
                KeyPathChangeChecker::new(info, snapshot, paths),
                DeepChangeChecker::new(info, snapshot),
            ),
        }
    }

    /// Returns true if the object counts as modified.
    pub fn is_modified(&mut self, object: ObjLink) -> bool {
        match self {
            Self::Deep(deep) => deep.is_modified(object),
            Self::KeyPaths(paths) => paths.is_modified(object),
            Self::Mixed(paths, deep) => paths.is_modified(object) || deep.is_modified(object),
        }
    }
}
