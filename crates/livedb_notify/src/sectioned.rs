//! Sectioned results.
//!
//! A [`SectionedResults`] groups the objects of a [`Results`] by a key
//! function. Sections are ordered by where their first object appears in
//! the results, and rows keep the results' order within each section.
//!
//! Every change to the underlying results re-partitions from scratch. The
//! index-space change of the results is then translated into row changes
//! per section. Section identity is the key, so a section whose index
//! shifts is reported as deleted at its old index and inserted at its new
//! one.

use crate::change_set::{ChangeSet, CollectionChange, SectionedChangeSet};
use crate::error::{NotifyError, NotifyResult};
use crate::key_path::KeyPathArray;
use crate::notifier::{ChangeCallback, NotificationToken};
use crate::object::Object;
use crate::results::Results;
use livedb_core::{ObjLink, Snapshot, Value, Version};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Computes the section key of one object.
pub type SectionKeyFn = Arc<dyn Fn(&Snapshot, ObjLink) -> Value + Send + Sync>;

#[derive(Debug)]
struct Section {
    key: Value,
    /// Indices into the results.
    rows: Vec<usize>,
}

/// One grouping of the results.
#[derive(Debug, Default)]
struct Partition {
    sections: Vec<Section>,
    lookup: HashMap<Value, usize>,
    /// `(section, row)` of every results index.
    row_paths: Vec<(usize, usize)>,
}

impl Partition {
    fn build(results: &Results, key_fn: &SectionKeyFn, snapshot: &Snapshot) -> NotifyResult<Self> {
        let table = results.table();
        let mut partition = Partition::default();
        for (index, key) in results.keys_in(snapshot)?.into_iter().enumerate() {
            let section_key = key_fn(snapshot, ObjLink::new(table, key));
            check_key(&section_key)?;
            let section = match partition.lookup.get(&section_key) {
                Some(&section) => section,
                None => {
                    let section = partition.sections.len();
                    partition.lookup.insert(section_key.clone(), section);
                    partition.sections.push(Section {
                        key: section_key,
                        rows: Vec::new(),
                    });
                    section
                }
            };
            let rows = &mut partition.sections[section].rows;
            partition.row_paths.push((section, rows.len()));
            rows.push(index);
        }
        Ok(partition)
    }

    fn keys(&self) -> Vec<Value> {
        self.sections.iter().map(|s| s.key.clone()).collect()
    }
}

fn check_key(key: &Value) -> NotifyResult<()> {
    match key {
        Value::Link(_) => Err(NotifyError::link_section_key()),
        other if other.is_collection() => Err(NotifyError::InvalidSectionKey {
            message: format!("Values of type '{}' are not supported as section keys.", other.type_name()),
        }),
        _ => Ok(()),
    }
}

/// Translates a results change into section space.
fn convert(old: &Partition, new: &Partition, changes: &ChangeSet) -> SectionedChangeSet {
    let consistent = old.row_paths.len() + changes.insertions.count()
        == new.row_paths.len() + changes.deletions.count()
        && changes.deletions.last().map_or(true, |i| i < old.row_paths.len())
        && changes.insertions.last().map_or(true, |i| i < new.row_paths.len());
    if !consistent {
        return rebuild(old, new);
    }

    let mut out = SectionedChangeSet::default();
    for (index, section) in old.sections.iter().enumerate() {
        if new.lookup.get(&section.key) != Some(&index) {
            out.sections_to_delete.add(index);
        }
    }
    for (index, section) in new.sections.iter().enumerate() {
        if old.lookup.get(&section.key) != Some(&index) {
            out.sections_to_insert.add(index);
            out.insertions
                .entry(index)
                .or_default()
                .add_range(0, section.rows.len());
        }
    }

    for i in changes.deletions.iter() {
        let (section, row) = old.row_paths[i];
        if !out.sections_to_delete.contains(section) {
            out.deletions.entry(section).or_default().add(row);
        }
    }
    for j in changes.insertions.iter() {
        let (section, row) = new.row_paths[j];
        if !out.sections_to_insert.contains(section) {
            out.insertions.entry(section).or_default().add(row);
        }
    }

    // Rows present on both sides pair up in order.
    let survivors = (0..old.row_paths.len()).filter(|i| !changes.deletions.contains(*i));
    let targets = (0..new.row_paths.len()).filter(|j| !changes.insertions.contains(*j));
    for (i, j) in survivors.zip(targets) {
        let (old_section, old_row) = old.row_paths[i];
        let (new_section, new_row) = new.row_paths[j];
        let dropped = out.sections_to_delete.contains(old_section);
        let added = out.sections_to_insert.contains(new_section);
        if old_section == new_section && !dropped {
            if changes.modifications.contains(i) {
                out.modifications.entry(new_section).or_default().add(new_row);
            }
            continue;
        }
        if !dropped {
            out.deletions.entry(old_section).or_default().add(old_row);
        }
        if !added {
            out.insertions.entry(new_section).or_default().add(new_row);
        }
    }
    out
}

/// Replaces every old section with every new one.
fn rebuild(old: &Partition, new: &Partition) -> SectionedChangeSet {
    let mut out = SectionedChangeSet::default();
    out.sections_to_delete.add_range(0, old.sections.len());
    out.sections_to_insert.add_range(0, new.sections.len());
    for (index, section) in new.sections.iter().enumerate() {
        out.insertions
            .entry(index)
            .or_default()
            .add_range(0, section.rows.len());
    }
    out
}

/// The part of `changes` that concerns one section.
fn restrict(changes: &SectionedChangeSet, old: Option<usize>, new: Option<usize>) -> SectionedChangeSet {
    let mut out = SectionedChangeSet::default();
    if let Some(section) = old {
        if let Some(rows) = changes.deletions.get(&section) {
            out.deletions.insert(section, rows.clone());
        }
        if changes.sections_to_delete.contains(section) {
            out.sections_to_delete.add(section);
        }
    }
    if let Some(section) = new {
        if let Some(rows) = changes.insertions.get(&section) {
            out.insertions.insert(section, rows.clone());
        }
        if let Some(rows) = changes.modifications.get(&section) {
            out.modifications.insert(section, rows.clone());
        }
        if changes.sections_to_insert.contains(section) {
            out.sections_to_insert.add(section);
        }
    }
    out
}

#[derive(Default)]
struct SectionedState {
    last: Arc<Partition>,
    cached_version: Option<Version>,
    /// Bumped each time a key's section disappears.
    generations: HashMap<Value, u64>,
    /// Keeps every delivered version observed once a section handle exists.
    tracker: Option<NotificationToken>,
}

impl SectionedState {
    fn observe(&mut self, next: Arc<Partition>, version: Version) {
        if self.cached_version.is_some_and(|cached| cached > version) {
            return;
        }
        for section in &self.last.sections {
            if !next.lookup.contains_key(&section.key) {
                *self.generations.entry(section.key.clone()).or_default() += 1;
            }
        }
        self.last = next;
        self.cached_version = Some(version);
    }

    fn generation(&self, key: &Value) -> u64 {
        self.generations.get(key).copied().unwrap_or(0)
    }
}

/// Results grouped into sections.
#[derive(Clone)]
pub struct SectionedResults {
    results: Results,
    key_fn: SectionKeyFn,
    state: Arc<Mutex<SectionedState>>,
}

impl SectionedResults {
    pub(crate) fn new(results: Results, key_fn: SectionKeyFn) -> Self {
        Self {
            results,
            key_fn,
            state: Arc::new(Mutex::new(SectionedState::default())),
        }
    }

    /// The underlying results.
    #[must_use]
    pub fn results(&self) -> &Results {
        &self.results
    }

    fn evaluate(&self) -> NotifyResult<(Partition, Version)> {
        self.results.reader().read_with(|s| {
            Ok((Partition::build(&self.results, &self.key_fn, s)?, s.version()))
        })
    }

    /// The current grouping. Cached per version; never cached inside a
    /// write transaction. A failed evaluation leaves the cache untouched.
    fn partition(&self) -> NotifyResult<Arc<Partition>> {
        let reader = self.results.reader();
        if reader.is_in_write() {
            return self.evaluate().map(|(p, _)| Arc::new(p));
        }
        {
            let state = self.state.lock();
            if state.cached_version == Some(reader.version()) {
                return Ok(Arc::clone(&state.last));
            }
        }
        let (partition, version) = self.evaluate()?;
        let partition = Arc::new(partition);
        self.state.lock().observe(Arc::clone(&partition), version);
        trace!(%version, sections = partition.sections.len(), "sections computed");
        Ok(partition)
    }

    fn generation(&self, key: &Value) -> u64 {
        self.state.lock().generation(key)
    }

    /// Observes every version this reader delivers from now on, so a
    /// section that vanishes between two reads still invalidates handles.
    fn track(&self) {
        let reader = self.results.reader();
        if self.results.is_snapshot() || reader.is_frozen() || reader.is_in_write() {
            return;
        }
        if self.state.lock().tracker.is_some() {
            return;
        }
        let tracker = SectionTracker {
            results: self.results.clone(),
            key_fn: Arc::clone(&self.key_fn),
            state: Arc::downgrade(&self.state),
        };
        let token = match self.results.add_detached_callback(Box::new(tracker), None) {
            Ok(token) => token,
            Err(err) => {
                trace!(error = %err, "sections not tracked");
                return;
            }
        };
        let duplicate = {
            let mut state = self.state.lock();
            match state.tracker {
                Some(_) => Some(token),
                None => {
                    state.tracker = Some(token);
                    None
                }
            }
        };
        drop(duplicate);
    }

    /// Number of sections.
    pub fn size(&self) -> NotifyResult<usize> {
        Ok(self.partition()?.sections.len())
    }

    /// Section keys in section order.
    pub fn section_keys(&self) -> NotifyResult<Vec<Value>> {
        Ok(self.partition()?.keys())
    }

    /// The section at `index`.
    pub fn section(&self, index: usize) -> NotifyResult<ResultsSection> {
        let partition = self.partition()?;
        let section = partition
            .sections
            .get(index)
            .ok_or(NotifyError::IndexOutOfBounds {
                index,
                max: partition.sections.len(),
            })?;
        self.track();
        Ok(ResultsSection {
            parent: self.clone(),
            generation: self.generation(&section.key),
            key: section.key.clone(),
        })
    }

    /// The section holding objects with section key `key`.
    pub fn section_by_key(&self, key: impl Into<Value>) -> NotifyResult<ResultsSection> {
        let key = key.into();
        let partition = self.partition()?;
        if !partition.lookup.contains_key(&key) {
            return Err(NotifyError::section_key_not_found());
        }
        self.track();
        Ok(ResultsSection {
            parent: self.clone(),
            generation: self.generation(&key),
            key,
        })
    }

    /// Sections over a snapshot of the results. They never change.
    pub fn snapshot(&self) -> NotifyResult<SectionedResults> {
        Ok(Self::new(self.results.snapshot()?, Arc::clone(&self.key_fn)))
    }

    /// Sections over results pinned at the current version.
    pub fn freeze(&self) -> NotifyResult<SectionedResults> {
        Ok(Self::new(self.results.freeze()?, Arc::clone(&self.key_fn)))
    }

    /// Registers a callback receiving section-space changes.
    ///
    /// The first delivery after registration is empty unless something
    /// changed in between.
    pub fn add_notification_callback<F>(&self, callback: F) -> NotifyResult<NotificationToken>
    where
        F: FnMut(&SectionedChangeSet, Option<&NotifyError>) + Send + 'static,
    {
        self.register(None, callback, None)
    }

    /// Registers a callback that only hears about modifications on the
    /// given property paths.
    pub fn add_notification_callback_with_key_paths<F>(
        &self,
        callback: F,
        paths: &[&str],
    ) -> NotifyResult<NotificationToken>
    where
        F: FnMut(&SectionedChangeSet, Option<&NotifyError>) + Send + 'static,
    {
        let key_paths = self.results.key_paths(paths)?;
        self.register(None, callback, Some(key_paths))
    }

    fn register<F>(
        &self,
        section: Option<Value>,
        callback: F,
        key_paths: Option<KeyPathArray>,
    ) -> NotifyResult<NotificationToken>
    where
        F: FnMut(&SectionedChangeSet, Option<&NotifyError>) + Send + 'static,
    {
        if self.results.reader().is_in_write() {
            return Err(NotifyError::InWriteTransaction {
                operation: "register a notification callback",
            });
        }
        let previous = self.partition()?;
        let adapter = SectionCallback {
            parent: self.clone(),
            previous,
            section,
            initial_sent: false,
            finished: false,
            callback,
        };
        self.results.add_detached_callback(Box::new(adapter), key_paths)
    }
}

impl fmt::Debug for SectionedResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionedResults")
            .field("results", &self.results)
            .finish_non_exhaustive()
    }
}

/// Records each delivered partition for section handles.
struct SectionTracker {
    results: Results,
    key_fn: SectionKeyFn,
    state: Weak<Mutex<SectionedState>>,
}

impl ChangeCallback for SectionTracker {
    fn after(&mut self, _change: &CollectionChange) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let evaluated = self.results.reader().read_with(|s| {
            Ok((Partition::build(&self.results, &self.key_fn, s)?, s.version()))
        });
        match evaluated {
            Ok((partition, version)) => state.lock().observe(Arc::new(partition), version),
            Err(err) => trace!(error = %err, "section tracking skipped a version"),
        }
    }

    fn error(&mut self, error: &NotifyError) {
        trace!(%error, "section tracking stopped");
    }
}

struct SectionCallback<F> {
    parent: SectionedResults,
    previous: Arc<Partition>,
    /// Only report changes to the section with this key.
    section: Option<Value>,
    initial_sent: bool,
    finished: bool,
    callback: F,
}

impl<F> SectionCallback<F>
where
    F: FnMut(&SectionedChangeSet, Option<&NotifyError>) + Send,
{
    fn fail(&mut self, error: &NotifyError) {
        if !self.finished {
            self.finished = true;
            (self.callback)(&SectionedChangeSet::default(), Some(error));
        }
    }
}

impl<F> ChangeCallback for SectionCallback<F>
where
    F: FnMut(&SectionedChangeSet, Option<&NotifyError>) + Send,
{
    fn after(&mut self, change: &CollectionChange) {
        if self.finished {
            return;
        }
        let (next, version) = match self.parent.evaluate() {
            Ok((partition, version)) => (Arc::new(partition), version),
            Err(err) => {
                self.fail(&err);
                return;
            }
        };
        self.parent.state.lock().observe(Arc::clone(&next), version);

        let changes = convert(&self.previous, &next, &change.changes);
        let previous = std::mem::replace(&mut self.previous, next);
        let changes = match &self.section {
            None => changes,
            Some(key) => {
                let old = previous.lookup.get(key).copied();
                let new = self.previous.lookup.get(key).copied();
                if new.is_none() {
                    // The section is gone for good, even if its key returns.
                    self.finished = true;
                }
                restrict(&changes, old, new)
            }
        };
        if changes.is_empty() && (self.initial_sent || self.section.is_some()) {
            return;
        }
        self.initial_sent = true;
        (self.callback)(&changes, None);
    }

    fn error(&mut self, error: &NotifyError) {
        self.fail(error);
    }
}

/// One section of a [`SectionedResults`].
///
/// A section handle is bound to its key. Once the section disappears the
/// handle stays invalid, even if a section with the same key comes back.
#[derive(Clone)]
pub struct ResultsSection {
    parent: SectionedResults,
    key: Value,
    generation: u64,
}

impl ResultsSection {
    /// The section key.
    #[must_use]
    pub fn key(&self) -> &Value {
        &self.key
    }

    fn current(&self) -> NotifyResult<(Arc<Partition>, usize)> {
        let partition = self.parent.partition()?;
        let index = partition.lookup.get(&self.key).copied();
        match index {
            Some(index) if self.parent.generation(&self.key) == self.generation => Ok((partition, index)),
            _ => Err(NotifyError::InvalidatedCollection { kind: "section" }),
        }
    }

    /// Position of the section among its siblings.
    pub fn index(&self) -> NotifyResult<usize> {
        self.current().map(|(_, index)| index)
    }

    /// Number of objects in the section.
    pub fn size(&self) -> NotifyResult<usize> {
        let (partition, index) = self.current()?;
        Ok(partition.sections[index].rows.len())
    }

    /// The object at row `index`.
    pub fn get(&self, index: usize) -> NotifyResult<Object> {
        let (partition, section) = self.current()?;
        let rows = &partition.sections[section].rows;
        let row = *rows.get(index).ok_or(NotifyError::IndexOutOfBounds {
            index,
            max: rows.len(),
        })?;
        self.parent.results.get(row)
    }

    /// Returns true while the section exists.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.current().is_ok()
    }

    /// Registers a callback that only hears about this section.
    ///
    /// No initial notification is delivered. The callback is told once
    /// when the section disappears and is never called again afterwards.
    pub fn add_notification_callback<F>(&self, callback: F) -> NotifyResult<NotificationToken>
    where
        F: FnMut(&SectionedChangeSet, Option<&NotifyError>) + Send + 'static,
    {
        self.current()?;
        self.parent.register(Some(self.key.clone()), callback, None)
    }
}

impl fmt::Debug for ResultsSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultsSection")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReaderConfig;
    use crate::index_set::IndexSet;
    use crate::reader::Reader;
    use livedb_core::{DataType, ObjKey, TableSchema};

    const FRUIT: [&str; 5] = ["apple", "apples", "apricot", "banana", "orange"];

    fn fruit() -> (Reader, Vec<ObjKey>, SectionedResults) {
        let reader = Reader::open(ReaderConfig::anonymous()).unwrap();
        let keys = reader
            .write(|r| {
                r.with_write_transaction(|txn| {
                    let table = txn.add_table(TableSchema::new("fruit").with_property("name", DataType::String))?;
                    let mut keys = Vec::new();
                    for name in FRUIT {
                        let key = txn.create_object(table)?;
                        txn.set_by_name(table, key, "name", name)?;
                        keys.push(key);
                    }
                    Ok(keys)
                })
            })
            .unwrap();
        let sections = Results::all(&reader, "fruit")
            .unwrap()
            .sectioned_by_first_letter("name")
            .unwrap();
        (reader, keys, sections)
    }

    fn add_fruit(reader: &Reader, name: &str) {
        reader
            .write(|r| {
                r.with_write_transaction(|txn| {
                    let table = txn.table_key("fruit")?;
                    let key = txn.create_object(table)?;
                    txn.set_by_name(table, key, "name", name)?;
                    Ok(())
                })
            })
            .unwrap();
    }

    fn remove_fruit(reader: &Reader, key: ObjKey) {
        reader
            .write(|r| {
                r.with_write_transaction(|txn| {
                    let table = txn.table_key("fruit")?;
                    txn.remove_object(table, key)?;
                    Ok(())
                })
            })
            .unwrap();
    }

    fn set(indices: &[usize]) -> IndexSet {
        let mut set = IndexSet::new();
        for i in indices {
            set.add(*i);
        }
        set
    }

    #[test]
    fn groups_by_first_letter() {
        let (_reader, _keys, sections) = fruit();
        assert_eq!(sections.size().unwrap(), 3);
        assert_eq!(
            sections.section_keys().unwrap(),
            vec![Value::from("a"), Value::from("b"), Value::from("o")]
        );
        let sizes: Vec<usize> = (0..3).map(|i| sections.section(i).unwrap().size().unwrap()).collect();
        assert_eq!(sizes, vec![3, 1, 1]);
        let b = sections.section_by_key("b").unwrap();
        assert_eq!(b.index().unwrap(), 1);
        assert_eq!(b.get(0).unwrap().get("name").unwrap(), Value::from("banana"));
        assert!(matches!(b.get(1), Err(NotifyError::IndexOutOfBounds { index: 1, max: 1 })));
    }

    #[test]
    fn unknown_keys_and_link_keys_fail() {
        let (_reader, _keys, sections) = fruit();
        let err = sections.section_by_key("z").unwrap_err();
        assert_eq!(err.to_string(), "Key does not exist for any sections.");

        let by_link = sections.results().sectioned_by(|_, link| Value::Link(link));
        let err = by_link.size().unwrap_err();
        assert_eq!(err.to_string(), "Links are not supported as section keys.");
        // Still usable afterwards.
        assert!(by_link.size().is_err());
        assert_eq!(sections.size().unwrap(), 3);
    }

    #[test]
    fn section_inserts_and_shifts() {
        let (reader, keys, sections) = fruit();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _token = sections
            .add_notification_callback(move |changes, err| {
                assert!(err.is_none());
                sink.lock().push(changes.clone());
            })
            .unwrap();
        reader.refresh().unwrap();

        add_fruit(&reader, "cherry");
        reader.refresh().unwrap();

        remove_fruit(&reader, keys[3]);
        reader.refresh().unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].is_empty());

        assert_eq!(seen[1].sections_to_insert, set(&[3]));
        assert!(seen[1].sections_to_delete.is_empty());
        assert_eq!(seen[1].insertions.get(&3), Some(&set(&[0])));

        // "b" disappears, "o" and "c" move up one place.
        assert_eq!(seen[2].sections_to_delete, set(&[1, 2, 3]));
        assert_eq!(seen[2].sections_to_insert, set(&[1, 2]));
        assert!(seen[2].deletions.is_empty());
    }

    #[test]
    fn section_callbacks_only_hear_their_section() {
        let (reader, keys, sections) = fruit();
        let a = sections.section_by_key("a").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _token = a
            .add_notification_callback(move |changes, _| sink.lock().push(changes.clone()))
            .unwrap();
        reader.refresh().unwrap();
        assert!(seen.lock().is_empty());

        add_fruit(&reader, "blueberry");
        reader.refresh().unwrap();
        assert!(seen.lock().is_empty());

        reader
            .write(|r| {
                r.with_write_transaction(|txn| {
                    let table = txn.table_key("fruit")?;
                    txn.set_by_name(table, keys[2], "name", "avocado")?;
                    Ok(())
                })
            })
            .unwrap();
        reader.refresh().unwrap();
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].modifications.get(&0), Some(&set(&[2])));
    }

    #[test]
    fn vanished_sections_stay_invalid() {
        let (reader, keys, sections) = fruit();
        let b = sections.section_by_key("b").unwrap();
        assert!(b.is_valid());

        remove_fruit(&reader, keys[3]);
        assert!(!b.is_valid());
        assert!(matches!(b.size(), Err(NotifyError::InvalidatedCollection { kind: "section" })));

        add_fruit(&reader, "berry");
        assert!(!b.is_valid());
        let again = sections.section_by_key("b").unwrap();
        assert!(again.is_valid());
        assert_eq!(again.size().unwrap(), 1);
    }

    #[test]
    fn snapshots_do_not_follow_writes() {
        let (reader, _keys, sections) = fruit();
        let fixed = sections.snapshot().unwrap();
        add_fruit(&reader, "cherry");
        assert_eq!(sections.size().unwrap(), 4);
        assert_eq!(fixed.size().unwrap(), 3);
        assert!(fixed.add_notification_callback(|_, _| {}).is_err());
    }
}
