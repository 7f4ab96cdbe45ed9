//! Query predicates and result ordering.
//!
//! A [`Query`] selects objects from a table, or from a collection of links,
//! and orders them with a [`DescriptorOrdering`]. Predicates that cannot be
//! evaluated (a broken link, a missing column) evaluate to false: the object
//! is treated as absent rather than raising.

use crate::error::{CoreError, CoreResult};
use crate::path::CollectionPath;
use crate::snapshot::{Object, Snapshot};
use crate::types::{ColKey, ObjKey, TableKey};
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
}

/// A filter over objects of one table.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches everything.
    True,
    /// Compares a column with a constant.
    Compare {
        /// Column to read.
        column: ColKey,
        /// Operator.
        op: CompareOp,
        /// Constant operand.
        value: Value,
    },
    /// String column starts with a prefix.
    BeginsWith {
        /// Column to read.
        column: ColKey,
        /// Required prefix.
        prefix: String,
    },
    /// String column contains a substring.
    Contains {
        /// Column to read.
        column: ColKey,
        /// Required substring.
        needle: String,
    },
    /// All sub-predicates match.
    And(Vec<Predicate>),
    /// Any sub-predicate matches.
    Or(Vec<Predicate>),
    /// The sub-predicate does not match.
    Not(Box<Predicate>),
    /// Any object linked from `column` matches the sub-predicate.
    Link {
        /// Link, link list, link set or link dictionary column.
        column: ColKey,
        /// Predicate evaluated on the link targets.
        predicate: Box<Predicate>,
    },
}

impl Predicate {
    fn compare(column: ColKey, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column,
            op,
            value: value.into(),
        }
    }

    /// `column == value`
    pub fn equal(column: ColKey, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Equal, value)
    }

    /// `column != value`
    pub fn not_equal(column: ColKey, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::NotEqual, value)
    }

    /// `column < value`
    pub fn less(column: ColKey, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Less, value)
    }

    /// `column <= value`
    pub fn less_equal(column: ColKey, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::LessEqual, value)
    }

    /// `column > value`
    pub fn greater(column: ColKey, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Greater, value)
    }

    /// `column >= value`
    pub fn greater_equal(column: ColKey, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::GreaterEqual, value)
    }

    /// String column starts with `prefix`.
    pub fn begins_with(column: ColKey, prefix: impl Into<String>) -> Self {
        Predicate::BeginsWith {
            column,
            prefix: prefix.into(),
        }
    }

    /// String column contains `needle`.
    pub fn contains(column: ColKey, needle: impl Into<String>) -> Self {
        Predicate::Contains {
            column,
            needle: needle.into(),
        }
    }

    /// Any object linked from `column` matches `predicate`.
    pub fn link(column: ColKey, predicate: Predicate) -> Self {
        Predicate::Link {
            column,
            predicate: Box::new(predicate),
        }
    }

    /// Conjunction.
    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::True => other,
            Predicate::And(mut all) => {
                all.push(other);
                Predicate::And(all)
            }
            this => Predicate::And(vec![this, other]),
        }
    }

    /// Disjunction.
    #[must_use]
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut any) => {
                any.push(other);
                Predicate::Or(any)
            }
            this => Predicate::Or(vec![this, other]),
        }
    }

    /// Negation.
    #[must_use]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluates the predicate on an object.
    pub fn matches(&self, snapshot: &Snapshot, object: &Object) -> bool {
        match self {
            Predicate::True => true,
            Predicate::Compare { column, op, value } => object
                .get(*column)
                .is_some_and(|actual| compare(actual, *op, value)),
            Predicate::BeginsWith { column, prefix } => object
                .get(*column)
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with(prefix.as_str())),
            Predicate::Contains { column, needle } => object
                .get(*column)
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains(needle.as_str())),
            Predicate::And(all) => all.iter().all(|p| p.matches(snapshot, object)),
            Predicate::Or(any) => any.iter().any(|p| p.matches(snapshot, object)),
            Predicate::Not(inner) => !inner.matches(snapshot, object),
            Predicate::Link { column, predicate } => {
                let Some(value) = object.get(*column) else {
                    return false;
                };
                let mut found = false;
                value.for_each_link(&mut |link| {
                    if !found {
                        found = snapshot
                            .linked(link)
                            .is_some_and(|target| predicate.matches(snapshot, target));
                    }
                });
                found
            }
        }
    }

    /// Columns read by the predicate, as `(table, column)` pairs, following
    /// link predicates into their target tables.
    pub fn columns(&self, snapshot: &Snapshot, table: TableKey, out: &mut BTreeSet<(TableKey, ColKey)>) {
        match self {
            Predicate::True => {}
            Predicate::Compare { column, .. }
            | Predicate::BeginsWith { column, .. }
            | Predicate::Contains { column, .. } => {
                out.insert((table, *column));
            }
            Predicate::And(list) | Predicate::Or(list) => {
                for p in list {
                    p.columns(snapshot, table, out);
                }
            }
            Predicate::Not(inner) => inner.columns(snapshot, table, out),
            Predicate::Link { column, predicate } => {
                out.insert((table, *column));
                let target = snapshot
                    .schema(table)
                    .ok()
                    .and_then(|s| s.column(*column))
                    .and_then(|c| c.data_type.link_target());
                if let Some(target) = target {
                    predicate.columns(snapshot, target, out);
                }
            }
        }
    }
}

fn compare(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    let ordering = match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ if std::mem::discriminant(actual) == std::mem::discriminant(expected) => {
            Some(actual.cmp(expected))
        }
        _ => None,
    };
    match (op, ordering) {
        (CompareOp::Equal, ord) => ord == Some(Ordering::Equal),
        (CompareOp::NotEqual, ord) => ord != Some(Ordering::Equal),
        (_, None) => false,
        (CompareOp::Less, Some(ord)) => ord == Ordering::Less,
        (CompareOp::LessEqual, Some(ord)) => ord != Ordering::Greater,
        (CompareOp::Greater, Some(ord)) => ord == Ordering::Greater,
        (CompareOp::GreaterEqual, Some(ord)) => ord != Ordering::Less,
    }
}

/// Sort keys: columns with a direction each.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SortDescriptor {
    /// `(column, ascending)` pairs, most significant first.
    pub keys: Vec<(ColKey, bool)>,
}

impl SortDescriptor {
    /// Sorts by one column.
    pub fn new(column: ColKey, ascending: bool) -> Self {
        Self {
            keys: vec![(column, ascending)],
        }
    }

    /// Adds a less significant sort key.
    #[must_use]
    pub fn then_by(mut self, column: ColKey, ascending: bool) -> Self {
        self.keys.push((column, ascending));
        self
    }

    fn compare(&self, a: &Object, b: &Object) -> Ordering {
        for (column, ascending) in &self.keys {
            let ord = a.get(*column).cmp(&b.get(*column));
            let ord = if *ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// One step of result ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    /// Stable sort.
    Sort(SortDescriptor),
    /// Keeps the first object of each distinct combination of columns.
    Distinct(Vec<ColKey>),
    /// Keeps at most this many objects.
    Limit(usize),
}

/// Ordering steps applied in the order they were added.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DescriptorOrdering {
    steps: Vec<Descriptor>,
}

impl DescriptorOrdering {
    /// No ordering: results stay in source order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sort.
    #[must_use]
    pub fn sort(mut self, sort: SortDescriptor) -> Self {
        self.steps.push(Descriptor::Sort(sort));
        self
    }

    /// Appends a distinct step.
    #[must_use]
    pub fn distinct(mut self, columns: Vec<ColKey>) -> Self {
        self.steps.push(Descriptor::Distinct(columns));
        self
    }

    /// Appends a limit.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.steps.push(Descriptor::Limit(limit));
        self
    }

    /// The ordering steps.
    pub fn steps(&self) -> &[Descriptor] {
        &self.steps
    }

    /// Returns true if there are no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns true if a sort step is present.
    pub fn will_sort(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, Descriptor::Sort(_)))
    }

    /// Columns that influence the ordering.
    pub fn columns(&self) -> impl Iterator<Item = ColKey> + '_ {
        self.steps.iter().flat_map(|s| match s {
            Descriptor::Sort(sort) => sort.keys.iter().map(|(c, _)| *c).collect::<Vec<_>>(),
            Descriptor::Distinct(cols) => cols.clone(),
            Descriptor::Limit(_) => Vec::new(),
        })
    }

    fn apply<'a>(&self, mut objects: Vec<&'a Object>) -> Vec<&'a Object> {
        for step in &self.steps {
            match step {
                Descriptor::Sort(sort) => objects.sort_by(|a, b| sort.compare(a, b)),
                Descriptor::Distinct(columns) => {
                    let mut seen = BTreeSet::new();
                    objects.retain(|o| {
                        let key: Vec<Option<&Value>> = columns.iter().map(|c| o.get(*c)).collect();
                        seen.insert(key)
                    });
                }
                Descriptor::Limit(limit) => objects.truncate(*limit),
            }
        }
        objects
    }
}

/// What a query selects from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    /// Every object of a table, in table order.
    Table(TableKey),
    /// The objects linked from a collection, in collection order.
    Collection {
        /// Location of the link collection.
        path: CollectionPath,
        /// Table the links point into.
        target: TableKey,
    },
}

/// A filtered, ordered selection of objects.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    source: QuerySource,
    predicate: Predicate,
    ordering: DescriptorOrdering,
}

impl Query {
    /// Selects every object of a table.
    pub fn table(table: TableKey) -> Self {
        Self {
            source: QuerySource::Table(table),
            predicate: Predicate::True,
            ordering: DescriptorOrdering::new(),
        }
    }

    /// Selects the objects linked from a collection.
    pub fn collection(path: CollectionPath, target: TableKey) -> Self {
        Self {
            source: QuerySource::Collection { path, target },
            predicate: Predicate::True,
            ordering: DescriptorOrdering::new(),
        }
    }

    /// Adds a filter.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = std::mem::replace(&mut self.predicate, Predicate::True).and(predicate);
        self
    }

    /// Appends a sort.
    #[must_use]
    pub fn sort(mut self, sort: SortDescriptor) -> Self {
        self.ordering = self.ordering.sort(sort);
        self
    }

    /// Appends a distinct step.
    #[must_use]
    pub fn distinct(mut self, columns: Vec<ColKey>) -> Self {
        self.ordering = self.ordering.distinct(columns);
        self
    }

    /// Appends a limit.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.ordering = self.ordering.limit(limit);
        self
    }

    /// The source of the query.
    pub fn source(&self) -> &QuerySource {
        &self.source
    }

    /// The table objects are selected from.
    pub fn target_table(&self) -> TableKey {
        match &self.source {
            QuerySource::Table(table) => *table,
            QuerySource::Collection { target, .. } => *target,
        }
    }

    /// The filter.
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// The ordering.
    pub fn ordering(&self) -> &DescriptorOrdering {
        &self.ordering
    }

    /// Evaluates the query.
    ///
    /// A collection source whose path no longer resolves yields nothing.
    pub fn run(&self, snapshot: &Snapshot) -> CoreResult<Vec<ObjKey>> {
        let candidates: Vec<&Object> = match &self.source {
            QuerySource::Table(table) => snapshot.objects(*table)?.collect(),
            QuerySource::Collection { path, target } => {
                snapshot.table(*target)?;
                match snapshot.resolve_collection(path) {
                    None => Vec::new(),
                    Some(value) => {
                        let mut links = Vec::new();
                        match value {
                            Value::List(items) | Value::Set(items) => {
                                links.extend(items.iter().filter_map(Value::as_link));
                            }
                            Value::Dictionary(map) => {
                                links.extend(map.values().filter_map(Value::as_link));
                            }
                            _ => return Err(CoreError::invalid_path(path)),
                        }
                        links
                            .into_iter()
                            .filter(|l| l.table == *target)
                            .filter_map(|l| snapshot.linked(l))
                            .collect()
                    }
                }
            }
        };
        let matching = candidates
            .into_iter()
            .filter(|o| self.predicate.matches(snapshot, o))
            .collect();
        Ok(self.ordering.apply(matching).into_iter().map(Object::key).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::schema::{DataType, TableSchema};
    use crate::store::VersionedStore;
    use crate::types::ObjLink;

    const NAME: ColKey = ColKey::new(0);
    const AGE: ColKey = ColKey::new(1);
    const DOG: ColKey = ColKey::new(2);

    fn people() -> (VersionedStore, TableKey, Vec<ObjKey>) {
        let store = VersionedStore::open(StoreConfig::anonymous());
        let mut txn = store.begin_write().unwrap();
        let dog = txn
            .add_table(TableSchema::new("dog").with_property("name", DataType::String))
            .unwrap();
        let person = txn
            .add_table(
                TableSchema::new("person")
                    .with_property("name", DataType::String)
                    .with_property("age", DataType::Int)
                    .with_nullable("dog", DataType::Link(dog)),
            )
            .unwrap();
        let rex = txn.create_object(dog).unwrap();
        txn.set(dog, rex, NAME, "rex").unwrap();

        let mut keys = Vec::new();
        for (name, age) in [("carol", 40), ("alice", 30), ("bob", 30), ("anne", 12)] {
            let key = txn.create_object(person).unwrap();
            txn.set(person, key, NAME, name).unwrap();
            txn.set(person, key, AGE, age).unwrap();
            keys.push(key);
        }
        txn.set(person, keys[2], DOG, ObjLink::new(dog, rex)).unwrap();
        txn.commit().unwrap();
        (store, person, keys)
    }

    #[test]
    fn filters_and_sorts() {
        let (store, person, keys) = people();
        let snapshot = store.latest_snapshot();

        let query = Query::table(person)
            .filter(Predicate::greater_equal(AGE, 18))
            .sort(SortDescriptor::new(NAME, true));
        assert_eq!(query.run(&snapshot).unwrap(), vec![keys[1], keys[2], keys[0]]);

        let query = Query::table(person).filter(Predicate::begins_with(NAME, "a"));
        assert_eq!(query.run(&snapshot).unwrap(), vec![keys[1], keys[3]]);
    }

    #[test]
    fn sort_is_stable_and_distinct_keeps_first() {
        let (store, person, keys) = people();
        let snapshot = store.latest_snapshot();

        let query = Query::table(person)
            .sort(SortDescriptor::new(AGE, false))
            .distinct(vec![AGE])
            .limit(2);
        assert_eq!(query.run(&snapshot).unwrap(), vec![keys[0], keys[1]]);
    }

    #[test]
    fn link_predicates_follow_links() {
        let (store, person, keys) = people();
        let snapshot = store.latest_snapshot();

        let query = Query::table(person).filter(Predicate::link(DOG, Predicate::equal(NAME, "rex")));
        assert_eq!(query.run(&snapshot).unwrap(), vec![keys[2]]);

        let mut cols = BTreeSet::new();
        query.predicate().columns(&snapshot, person, &mut cols);
        assert!(cols.contains(&(person, DOG)));
        assert_eq!(cols.len(), 2);
    }

    #[test]
    fn mismatched_types_never_match() {
        assert!(!compare(&Value::from("1"), CompareOp::Equal, &Value::Int(1)));
        assert!(compare(&Value::from("1"), CompareOp::NotEqual, &Value::Int(1)));
        assert!(!compare(&Value::Null, CompareOp::Less, &Value::Int(1)));
        assert!(compare(&Value::Int(2), CompareOp::Greater, &Value::Double(1.5)));
    }
}
