//! What a live collection is bound to, and how its members are read.

use crate::change_builder::{self, DiffMode};
use crate::change_set::{ChangeSet, CollectionChange, DictionaryChangeSet};
use crate::checker::ModificationChecker;
use livedb_core::{
    CollectionPath, CoreResult, ObjLink, Query, Snapshot, TableKey, Value, Version,
};

/// Location of a list, set or dictionary, pinned to one life of its owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionRoot {
    /// Where the collection lives.
    pub path: CollectionPath,
    /// Incarnation of the owning object when the handle was created.
    pub incarnation: Version,
}

impl CollectionRoot {
    /// Binds to the collection at `path` as owned at `snapshot`.
    ///
    /// Returns `None` if the owner does not exist.
    #[must_use]
    pub fn resolve(snapshot: &Snapshot, path: CollectionPath) -> Option<Self> {
        let incarnation = snapshot.incarnation(path.table, path.object)?;
        Some(Self { path, incarnation })
    }

    /// Returns true if the owner still exists in the same life.
    #[must_use]
    pub fn owner_alive(&self, snapshot: &Snapshot) -> bool {
        snapshot.incarnation(self.path.table, self.path.object) == Some(self.incarnation)
    }

    /// The collection value, if the owner is alive and the path resolves.
    #[must_use]
    pub fn value<'s>(&self, snapshot: &'s Snapshot) -> Option<&'s Value> {
        if !self.owner_alive(snapshot) {
            return None;
        }
        snapshot.resolve_collection(&self.path)
    }
}

/// The collection definition a notifier watches.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionBinding {
    /// Every object of a table, in table order.
    Table(TableKey),
    /// A filtered, ordered query.
    Query(Query),
    /// A list.
    List(CollectionRoot),
    /// A set.
    Set(CollectionRoot),
    /// A dictionary.
    Dictionary(CollectionRoot),
}

/// Identity of one collection element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Element {
    /// An object in one of its lives.
    Object(ObjLink, Version),
    /// A plain value.
    Value(Value),
}

impl Element {
    fn from_value(snapshot: &Snapshot, value: &Value) -> Self {
        match value {
            Value::Link(link) => Element::Object(
                *link,
                snapshot.incarnation(link.table, link.key).unwrap_or_default(),
            ),
            other => Element::Value(other.clone()),
        }
    }
}

/// Members of a collection at one version.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Members {
    Ordered(Vec<Element>),
    Keyed(Vec<(String, Element)>),
}

impl Members {
    pub(crate) fn len(&self) -> usize {
        match self {
            Members::Ordered(items) => items.len(),
            Members::Keyed(items) => items.len(),
        }
    }

    fn keys(&self) -> Vec<String> {
        match self {
            Members::Ordered(_) => Vec::new(),
            Members::Keyed(items) => items.iter().map(|(k, _)| k.clone()).collect(),
        }
    }
}

/// Result of evaluating a binding.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Membership {
    Present(Members),
    /// The collection's container is gone. A removed owner never comes
    /// back; a nested path may resolve again later.
    Gone { permanent: bool },
}

impl CollectionBinding {
    pub(crate) fn is_dictionary(&self) -> bool {
        matches!(self, CollectionBinding::Dictionary(_))
    }

    /// Name used in error messages.
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            CollectionBinding::Table(_) | CollectionBinding::Query(_) => "results",
            CollectionBinding::List(_) => "list",
            CollectionBinding::Set(_) => "set",
            CollectionBinding::Dictionary(_) => "dictionary",
        }
    }

    /// Reads the members at `snapshot`.
    pub(crate) fn evaluate(&self, snapshot: &Snapshot) -> CoreResult<Membership> {
        let objects = |table: TableKey, keys: Vec<livedb_core::ObjKey>| -> Vec<Element> {
            keys.into_iter()
                .map(|key| {
                    Element::Object(
                        ObjLink::new(table, key),
                        snapshot.incarnation(table, key).unwrap_or_default(),
                    )
                })
                .collect()
        };
        match self {
            CollectionBinding::Table(table) => {
                let keys = snapshot.objects(*table)?.map(|o| o.key()).collect();
                Ok(Membership::Present(Members::Ordered(objects(*table, keys))))
            }
            CollectionBinding::Query(query) => {
                let keys = query.run(snapshot)?;
                Ok(Membership::Present(Members::Ordered(objects(
                    query.target_table(),
                    keys,
                ))))
            }
            CollectionBinding::List(root)
            | CollectionBinding::Set(root)
            | CollectionBinding::Dictionary(root) => {
                if !root.owner_alive(snapshot) {
                    return Ok(Membership::Gone { permanent: true });
                }
                let Some(value) = snapshot.resolve_collection(&root.path) else {
                    return Ok(Membership::Gone { permanent: false });
                };
                let members = match (self, value) {
                    (CollectionBinding::Dictionary(_), Value::Dictionary(map)) => Members::Keyed(
                        map.iter()
                            .map(|(k, v)| (k.clone(), Element::from_value(snapshot, v)))
                            .collect(),
                    ),
                    (CollectionBinding::List(_) | CollectionBinding::Set(_), Value::List(items) | Value::Set(items)) => {
                        Members::Ordered(items.iter().map(|v| Element::from_value(snapshot, v)).collect())
                    }
                    // The slot now holds a different kind of collection.
                    _ => return Ok(Membership::Gone { permanent: false }),
                };
                Ok(Membership::Present(members))
            }
        }
    }
}

/// Computes the change between two memberships.
pub(crate) fn compute_change(
    binding: &CollectionBinding,
    prev: &Membership,
    next: &Membership,
    checker: &mut ModificationChecker<'_>,
) -> CollectionChange {
    let mut is_modified = |element: &Element| match element {
        Element::Object(link, _) => checker.is_modified(*link),
        Element::Value(_) => false,
    };
    let dictionary = binding.is_dictionary();
    match (prev, next) {
        (Membership::Present(Members::Keyed(a)), Membership::Present(Members::Keyed(b))) => {
            let (changes, keyed) = change_builder::calculate_dictionary(a, b, &mut is_modified);
            CollectionChange {
                changes,
                dictionary: Some(keyed),
            }
        }
        (Membership::Present(Members::Ordered(a)), Membership::Present(Members::Ordered(b))) => {
            // A list slot overwritten with another value changed in place;
            // a different object at that slot is a removal and an insertion.
            let changes = match binding {
                CollectionBinding::List(_) => change_builder::calculate_sequence(a, b, &mut is_modified, |old, new| {
                    matches!((old, new), (Element::Value(_), Element::Value(_)))
                }),
                _ => change_builder::calculate(a, b, &mut is_modified, DiffMode::Rows),
            };
            CollectionChange {
                changes,
                dictionary: None,
            }
        }
        (Membership::Present(members), Membership::Gone { .. }) => CollectionChange {
            changes: ChangeSet::delete_all(members.len(), true),
            dictionary: dictionary.then(|| DictionaryChangeSet {
                deletions: members.keys(),
                collection_root_was_deleted: true,
                ..DictionaryChangeSet::default()
            }),
        },
        (Membership::Gone { .. }, Membership::Present(members)) => {
            let mut changes = ChangeSet::default();
            changes.insertions.add_range(0, members.len());
            CollectionChange {
                changes,
                dictionary: dictionary.then(|| DictionaryChangeSet {
                    insertions: members.keys(),
                    ..DictionaryChangeSet::default()
                }),
            }
        }
        _ => CollectionChange {
            changes: ChangeSet::default(),
            dictionary: dictionary.then(DictionaryChangeSet::default),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedb_core::{
        ChangeInfo, CollectionKind, DataType, StoreConfig, TableSchema, VersionedStore,
    };

    fn holder() -> (VersionedStore, CollectionRoot) {
        let store = VersionedStore::open(StoreConfig::anonymous());
        let mut txn = store.begin_write().unwrap();
        let table = txn
            .add_table(TableSchema::new("holder").with_primary_key("id", DataType::Int))
            .unwrap();
        let any = txn
            .add_column(table, "any", DataType::Mixed, CollectionKind::Single, true)
            .unwrap();
        let key = txn.create_object_with_primary_key(table, 1i64).unwrap();
        txn.set(table, key, any, Value::List(vec![Value::Int(1), Value::Int(2)]))
            .unwrap();
        txn.commit().unwrap();
        let path = CollectionPath::new(table, key, any);
        let root = CollectionRoot::resolve(&store.latest_snapshot(), path).unwrap();
        (store, root)
    }

    #[test]
    fn replaced_slot_is_not_permanent() {
        let (store, root) = holder();
        let binding = CollectionBinding::List(root.clone());
        assert!(matches!(
            binding.evaluate(&store.latest_snapshot()).unwrap(),
            Membership::Present(Members::Ordered(ref items)) if items.len() == 2
        ));

        let mut txn = store.begin_write().unwrap();
        txn.set(root.path.table, root.path.object, root.path.column, 5i64)
            .unwrap();
        txn.commit().unwrap();
        assert_eq!(
            binding.evaluate(&store.latest_snapshot()).unwrap(),
            Membership::Gone { permanent: false }
        );
    }

    #[test]
    fn recreated_owner_is_a_different_life() {
        let (store, root) = holder();
        let binding = CollectionBinding::List(root.clone());
        let mut txn = store.begin_write().unwrap();
        txn.remove_object(root.path.table, root.path.object).unwrap();
        let key = txn.create_object_with_primary_key(root.path.table, 1i64).unwrap();
        txn.set(root.path.table, key, root.path.column, Value::List(vec![]))
            .unwrap();
        txn.commit().unwrap();

        assert_eq!(key, root.path.object);
        assert_eq!(
            binding.evaluate(&store.latest_snapshot()).unwrap(),
            Membership::Gone { permanent: true }
        );
    }

    #[test]
    fn losing_the_root_deletes_every_member() {
        let (store, root) = holder();
        let binding = CollectionBinding::List(root);
        let snapshot = store.latest_snapshot();
        let before = binding.evaluate(&snapshot).unwrap();
        let info = ChangeInfo::new();
        let mut checker = ModificationChecker::for_filters(&info, &snapshot, &[]);

        let change = compute_change(
            &binding,
            &before,
            &Membership::Gone { permanent: true },
            &mut checker,
        );
        assert!(change.changes.collection_root_was_deleted);
        assert_eq!(change.changes.deletions.count(), 2);

        let nothing = compute_change(
            &binding,
            &Membership::Gone { permanent: true },
            &Membership::Gone { permanent: true },
            &mut checker,
        );
        assert!(nothing.is_empty());
    }
}
