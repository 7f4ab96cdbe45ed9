//! Transfers a remote object graph onto a local one.
//!
//! Reconciliation runs inside one local write transaction:
//!
//! 1. **Schema**: remote tables and columns missing locally are added.
//!    Tables present on both sides must agree on embeddedness, primary key
//!    and the shape of every shared column.
//! 2. **Identity**: every remote object is matched to a local object, by
//!    primary key when the table has one and by object key otherwise.
//!    Unmatched remote objects are created. Unmatched local objects are
//!    removed unless recovery keeps them. Links that recovered local data
//!    held to removed objects are dropped and counted.
//! 3. **Properties**: remote values are copied onto their local matches,
//!    with links translated to local keys. Values that already agree are
//!    not written, so the commit only reports real differences.
//!
//! Embedded objects are matched through their owner rather than by key.

use crate::config::{ResetConfig, ResetPolicy};
use crate::error::{ResetError, ResetResult};
use crate::logger::ResetLogger;
use livedb_core::{
    ChangeInfo, CollectionKind, CollectionPath, ColKey, Column, CoreError, DataType, ObjKey, ObjLink, Snapshot,
    TableKey, TableSchema, Value, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, Level};

/// What a reconciliation did to the local graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetReport {
    /// Tables created from the remote schema.
    pub tables_created: Vec<String>,
    /// Columns added to tables that already existed, as `table.column`.
    pub columns_added: Vec<String>,
    /// Local-only tables that were cleared.
    pub tables_cleared: Vec<String>,
    /// Local objects created for remote objects.
    pub objects_created: usize,
    /// Local objects removed because the remote graph lacks them.
    pub objects_removed: usize,
    /// Local additions kept by recovery.
    pub objects_recovered: usize,
    /// Properties overwritten with the remote value.
    pub properties_updated: usize,
    /// Properties whose local edit was kept by recovery.
    pub local_edits_kept: usize,
    /// Links held by recovered local data whose target the reset removed,
    /// or remote links whose target has no local counterpart.
    pub links_dropped: usize,
    /// Whether local changes were recovered.
    pub recovered: bool,
}

impl ResetReport {
    /// Returns true if the local graph was left untouched.
    pub fn is_noop(&self) -> bool {
        self.tables_created.is_empty()
            && self.columns_added.is_empty()
            && self.tables_cleared.is_empty()
            && self.objects_created == 0
            && self.objects_removed == 0
            && self.properties_updated == 0
    }
}

/// Makes the local graph equal to the remote graph under `config`.
///
/// This is the one-shot form of [`Reconciler`]. It does not know which
/// local properties changed since divergence, so recovery keeps local
/// additions but never local edits.
pub fn transfer_group(
    remote: &Snapshot,
    local: &mut WriteTransaction,
    config: &ResetConfig,
    logger: &mut dyn ResetLogger,
) -> ResetResult<ResetReport> {
    Reconciler::new(config, logger).run(remote, local)
}

/// Reconciles one remote snapshot onto one local write transaction.
pub struct Reconciler<'a> {
    config: &'a ResetConfig,
    logger: &'a mut dyn ResetLogger,
    local_changes: Option<&'a ChangeInfo>,
    recover: bool,
    report: ResetReport,
    /// Remote table to local table.
    tables: BTreeMap<TableKey, TableKey>,
    /// Remote object to local object, for top-level tables.
    objects: HashMap<ObjLink, ObjLink>,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler.
    pub fn new(config: &'a ResetConfig, logger: &'a mut dyn ResetLogger) -> Self {
        Self {
            config,
            logger,
            local_changes: None,
            recover: false,
            report: ResetReport::default(),
            tables: BTreeMap::new(),
            objects: HashMap::new(),
        }
    }

    /// Local changes made since the divergence version. Properties they
    /// modified keep their local value when recovering.
    #[must_use]
    pub fn with_local_changes(mut self, changes: &'a ChangeInfo) -> Self {
        self.local_changes = Some(changes);
        self
    }

    /// Runs the reconciliation. On error the transaction is left
    /// half-written and must be cancelled by the caller.
    pub fn run(mut self, remote: &Snapshot, local: &mut WriteTransaction) -> ResetResult<ResetReport> {
        self.recover = self.resolve_policy()?;
        self.report.recovered = self.recover;

        self.reconcile_schema(remote, local)?;
        let pairs = self.match_objects(remote, local)?;
        for (remote_link, local_link) in pairs {
            self.copy_object(remote, local, remote_link, local_link)?;
        }

        debug!(
            created = self.report.objects_created,
            removed = self.report.objects_removed,
            recovered = self.report.objects_recovered,
            updated = self.report.properties_updated,
            "Reconciled remote graph"
        );
        Ok(self.report)
    }

    fn note(&mut self, level: Level, line: String) {
        self.logger.log(level, &line);
    }

    fn resolve_policy(&mut self) -> ResetResult<bool> {
        match (self.config.policy, self.config.divergence_version) {
            (ResetPolicy::DiscardLocal, _) => Ok(false),
            (_, Some(_)) => Ok(true),
            (ResetPolicy::RecoverLocal, None) => Err(ResetError::recovery_unavailable(
                "no divergence version is known",
            )),
            (ResetPolicy::RecoverOrDiscard, None) => {
                self.note(
                    Level::WARN,
                    "No divergence version is known, discarding local changes".to_owned(),
                );
                Ok(false)
            }
        }
    }

    // ---- schema ----

    fn reconcile_schema(&mut self, remote: &Snapshot, local: &mut WriteTransaction) -> ResetResult<()> {
        let mut created = BTreeSet::new();
        for remote_table in remote.table_keys() {
            let schema = remote.schema(remote_table)?;
            let local_table = match local.find_table(&schema.name) {
                Some(local_table) => {
                    check_table(remote, schema, local, local.schema(local_table)?)?;
                    local_table
                }
                None => {
                    let mut shell = TableSchema::new(&schema.name);
                    if schema.embedded {
                        shell = shell.embedded();
                    }
                    if let Some(pk) = schema.primary_key_column() {
                        shell = shell.with_primary_key(&pk.name, pk.data_type);
                    }
                    let local_table = local.add_table(shell)?;
                    created.insert(remote_table);
                    self.report.tables_created.push(schema.name.clone());
                    self.note(Level::INFO, format!("Created table '{}'", schema.name));
                    local_table
                }
            };
            self.tables.insert(remote_table, local_table);
        }

        // Columns go in once every table exists so links can be mapped.
        let tables: Vec<(TableKey, TableKey)> = self.tables.iter().map(|(r, l)| (*r, *l)).collect();
        for (remote_table, local_table) in tables {
            let schema = remote.schema(remote_table)?;
            for column in &schema.columns {
                if schema.primary_key == Some(column.key)
                    || local.schema(local_table)?.column_by_name(&column.name).is_some()
                {
                    continue;
                }
                let data_type = match column.data_type {
                    DataType::Link(target) => DataType::Link(self.local_table(remote, target)?),
                    other => other,
                };
                local.add_column(local_table, &column.name, data_type, column.collection, column.nullable)?;
                if !created.contains(&remote_table) {
                    self.report.columns_added.push(format!("{}.{}", schema.name, column.name));
                    self.note(
                        Level::INFO,
                        format!("Added column '{}' to table '{}'", column.name, schema.name),
                    );
                }
            }
        }

        let mapped: BTreeSet<TableKey> = self.tables.values().copied().collect();
        let local_only: Vec<TableKey> = local.table_keys().filter(|t| !mapped.contains(t)).collect();
        for table in local_only {
            let name = local.schema(table)?.name.clone();
            if self.config.remove_local_only_tables {
                local.clear_table(table)?;
                self.note(Level::INFO, format!("Cleared local-only table '{name}'"));
                self.report.tables_cleared.push(name);
            } else {
                self.note(Level::DEBUG, format!("Table '{name}' only exists locally and will remain"));
            }
        }
        Ok(())
    }

    fn local_table(&self, remote: &Snapshot, table: TableKey) -> ResetResult<TableKey> {
        self.tables.get(&table).copied().ok_or_else(|| {
            CoreError::no_such_table(
                remote
                    .schema(table)
                    .map_or_else(|_| table.to_string(), |s| s.name.clone()),
            )
            .into()
        })
    }

    // ---- identity ----

    fn match_objects(
        &mut self,
        remote: &Snapshot,
        local: &mut WriteTransaction,
    ) -> ResetResult<Vec<(ObjLink, ObjLink)>> {
        let mut pairs = Vec::new();
        let mut doomed: Vec<(TableKey, ObjKey, String)> = Vec::new();
        let mut recovered: HashSet<ObjLink> = HashSet::new();
        let tables: Vec<(TableKey, TableKey)> = self.tables.iter().map(|(r, l)| (*r, *l)).collect();
        for (remote_table, local_table) in tables {
            let data = remote.table(remote_table)?;
            if data.schema().embedded {
                continue;
            }
            let pk = data.schema().primary_key;
            let mut used = BTreeSet::new();
            for object in data.objects() {
                let local_key = match pk {
                    Some(pk) => {
                        let value = object.get(pk).cloned().unwrap_or(Value::Null);
                        match local.find_by_primary_key(local_table, &value) {
                            Some(key) => key,
                            None => {
                                let key = local.create_object_with_primary_key(local_table, value.clone())?;
                                self.report.objects_created += 1;
                                self.note(
                                    Level::INFO,
                                    format!("Created object {}[{value}]", data.schema().name),
                                );
                                key
                            }
                        }
                    }
                    None => {
                        let reusable = !used.contains(&object.key())
                            && local
                                .incarnation(local_table, object.key())
                                .is_some_and(|v| !(self.recover && self.config.is_local_addition(v)));
                        if reusable {
                            object.key()
                        } else {
                            let key = local.create_object(local_table)?;
                            self.report.objects_created += 1;
                            self.note(
                                Level::INFO,
                                format!("Created object {}[{key}] for remote {}", data.schema().name, object.key()),
                            );
                            key
                        }
                    }
                };
                used.insert(local_key);
                let pair = (
                    ObjLink::new(remote_table, object.key()),
                    ObjLink::new(local_table, local_key),
                );
                self.objects.insert(pair.0, pair.1);
                pairs.push(pair);
            }

            let unmatched: Vec<ObjKey> = local
                .objects(local_table)?
                .map(|o| o.key())
                .filter(|k| !used.contains(k))
                .collect();
            for key in unmatched {
                let Some(incarnation) = local.incarnation(local_table, key) else {
                    continue;
                };
                let label = describe(local, local_table, key);
                if self.recover && self.config.is_local_addition(incarnation) {
                    recovered.insert(ObjLink::new(local_table, key));
                    self.report.objects_recovered += 1;
                    self.note(Level::INFO, format!("Recovered local object {label}"));
                } else {
                    doomed.push((local_table, key, label));
                }
            }
        }

        // Removal strips every incoming link; only those in data the reset
        // keeps are lost.
        for (table, key, label) in doomed {
            let kept = local
                .incoming_links(ObjLink::new(table, key))
                .into_iter()
                .filter(|(t, k, c)| {
                    let source = ObjLink::new(*t, *k);
                    recovered.contains(&source) || self.keeps_local_edit(source, *c)
                })
                .count();
            if kept > 0 {
                self.report.links_dropped += kept;
                self.note(Level::INFO, format!("Dropped {kept} local link(s) to {label}"));
            }
            local.remove_object(table, key)?;
            self.report.objects_removed += 1;
            self.note(Level::INFO, format!("Removed object {label}"));
        }
        Ok(pairs)
    }

    // ---- properties ----

    fn copy_object(
        &mut self,
        remote: &Snapshot,
        local: &mut WriteTransaction,
        from: ObjLink,
        to: ObjLink,
    ) -> ResetResult<()> {
        let schema = remote.schema(from.table)?;
        let object = remote.require_object(from.table, from.key)?;
        for column in &schema.columns {
            if schema.primary_key == Some(column.key) {
                continue;
            }
            let col = local.schema(to.table)?.column_key(&column.name)?;
            let value = object.get(column.key).cloned().unwrap_or(Value::Null);
            if is_embedded_column(remote, column)? {
                self.copy_embedded(remote, local, &schema.name, column, &value, to, col)?;
                continue;
            }

            let value = self.translate(&value);
            if *local.get(to.table, to.key, col)? == value {
                continue;
            }
            let label = describe(local, to.table, to.key);
            if self.keeps_local_edit(to, col) {
                self.report.local_edits_kept += 1;
                self.note(Level::DEBUG, format!("Kept local value of {label}.{}", column.name));
                continue;
            }
            local.set(to.table, to.key, col, value)?;
            self.report.properties_updated += 1;
            self.note(Level::DEBUG, format!("Updated {label}.{}", column.name));
        }
        Ok(())
    }

    fn keeps_local_edit(&self, object: ObjLink, col: ColKey) -> bool {
        self.recover
            && self
                .local_changes
                .is_some_and(|changes| changes.column_modified(object.table, object.key, col))
    }

    fn copy_embedded(
        &mut self,
        remote: &Snapshot,
        local: &mut WriteTransaction,
        table_name: &str,
        column: &Column,
        value: &Value,
        owner: ObjLink,
        col: ColKey,
    ) -> ResetResult<()> {
        let current = local.get(owner.table, owner.key, col)?.clone();
        match column.collection {
            CollectionKind::Single => match value.as_link() {
                None => {
                    if !current.is_null() {
                        local.set(owner.table, owner.key, col, Value::Null)?;
                        self.report.properties_updated += 1;
                    }
                    Ok(())
                }
                Some(child) => {
                    let local_child = match current.as_link() {
                        Some(existing) => existing,
                        None => {
                            let key = local.create_embedded(owner.table, owner.key, col)?;
                            self.report.objects_created += 1;
                            ObjLink::new(self.local_table(remote, child.table)?, key)
                        }
                    };
                    self.copy_object(remote, local, child, local_child)
                }
            },
            CollectionKind::List => {
                let children: Vec<ObjLink> = value
                    .as_sequence()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(Value::as_link)
                    .collect();
                let path = CollectionPath::of(owner, col);
                let mut len = current.as_sequence().map_or(0, <[Value]>::len);
                while len > children.len() {
                    len -= 1;
                    local.list_remove(&path, len)?;
                    self.report.properties_updated += 1;
                }
                while len < children.len() {
                    local.list_insert_embedded(&path, len)?;
                    self.report.objects_created += 1;
                    len += 1;
                }
                let local_children: Vec<ObjLink> = local
                    .get(owner.table, owner.key, col)?
                    .as_sequence()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(Value::as_link)
                    .collect();
                for (child, local_child) in children.into_iter().zip(local_children) {
                    self.copy_object(remote, local, child, local_child)?;
                }
                Ok(())
            }
            CollectionKind::Set | CollectionKind::Dictionary => Err(ResetError::incompatible(
                table_name,
                format!(
                    "embedded objects in {} column '{}' cannot be reconciled",
                    column.collection, column.name
                ),
            )),
        }
    }

    /// Rewrites links to local keys. Links without a local counterpart
    /// become null, or disappear from lists and sets.
    fn translate(&mut self, value: &Value) -> Value {
        match value {
            Value::Link(link) => self.map_link(*link).map_or(Value::Null, Value::Link),
            Value::List(items) => Value::List(items.iter().filter_map(|v| self.translate_element(v)).collect()),
            Value::Set(items) => {
                let mut items: Vec<Value> = items.iter().filter_map(|v| self.translate_element(v)).collect();
                items.sort();
                items.dedup();
                Value::Set(items)
            }
            Value::Dictionary(entries) => Value::Dictionary(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.translate(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn translate_element(&mut self, value: &Value) -> Option<Value> {
        match value {
            Value::Link(link) => self.map_link(*link).map(Value::Link),
            other => Some(self.translate(other)),
        }
    }

    fn map_link(&mut self, link: ObjLink) -> Option<ObjLink> {
        let mapped = self.objects.get(&link).copied();
        if mapped.is_none() {
            self.report.links_dropped += 1;
        }
        mapped
    }
}

fn is_embedded_column(remote: &Snapshot, column: &Column) -> ResetResult<bool> {
    Ok(match column.data_type.link_target() {
        Some(target) => remote.schema(target)?.embedded,
        None => false,
    })
}

/// `table[pk]` for objects with a primary key, `table[key]` otherwise.
fn describe(snapshot: &Snapshot, table: TableKey, key: ObjKey) -> String {
    let Ok(schema) = snapshot.schema(table) else {
        return format!("{table}[{key}]");
    };
    let pk = schema
        .primary_key
        .and_then(|pk| snapshot.object(table, key)?.get(pk).cloned());
    match pk {
        Some(pk) => format!("{}[{pk}]", schema.name),
        None => format!("{}[{key}]", schema.name),
    }
}

/// Checks that a table present on both sides can be reconciled.
fn check_table(remote: &Snapshot, theirs: &TableSchema, local: &Snapshot, ours: &TableSchema) -> ResetResult<()> {
    if theirs.embedded != ours.embedded {
        return Err(ResetError::incompatible(
            &theirs.name,
            "table is embedded on one side only",
        ));
    }
    match (theirs.primary_key_column(), ours.primary_key_column()) {
        (None, None) => {}
        (Some(a), Some(b)) if a.name == b.name && a.data_type == b.data_type => {}
        _ => {
            return Err(ResetError::incompatible(&theirs.name, "primary key differs"));
        }
    }
    for column in &theirs.columns {
        let Some(mine) = ours.column_by_name(&column.name) else {
            continue;
        };
        let theirs_shape = shape(remote, column);
        let ours_shape = shape(local, mine);
        if theirs_shape != ours_shape {
            return Err(ResetError::incompatible(
                &theirs.name,
                format!(
                    "column '{}' is {ours_shape} locally and {theirs_shape} remotely",
                    column.name
                ),
            ));
        }
    }
    Ok(())
}

/// Column shape with link targets named, so keys from both sides compare.
fn shape(snapshot: &Snapshot, column: &Column) -> String {
    let element = match column.data_type {
        DataType::Link(target) => snapshot
            .schema(target)
            .map_or_else(|_| format!("link<{target}>"), |s| format!("link<{}>", s.name)),
        other => other.to_string(),
    };
    match column.collection {
        CollectionKind::Single => element,
        kind => format!("{kind}<{element}>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryResetLogger;
    use livedb_core::{StoreConfig, VersionedStore};

    fn store() -> VersionedStore {
        VersionedStore::open(StoreConfig::anonymous())
    }

    fn write<R>(store: &VersionedStore, f: impl FnOnce(&mut WriteTransaction) -> ResetResult<R>) -> R {
        let mut txn = store.begin_write().unwrap();
        let result = f(&mut txn).unwrap();
        txn.commit().unwrap();
        result
    }

    fn person_schema() -> TableSchema {
        TableSchema::new("person")
            .with_primary_key("id", DataType::Int)
            .with_property("value", DataType::Int)
    }

    fn people(store: &VersionedStore, rows: &[(i64, i64)]) -> TableKey {
        write(store, |txn| {
            let table = match txn.find_table("person") {
                Some(table) => table,
                None => txn.add_table(person_schema())?,
            };
            for (id, value) in rows {
                let key = txn.find_or_create(table, *id)?;
                txn.set_by_name(table, key, "value", *value)?;
            }
            Ok(table)
        })
    }

    fn reset(remote: &VersionedStore, local: &VersionedStore, config: &ResetConfig) -> ResetResult<(ResetReport, MemoryResetLogger)> {
        let logger = MemoryResetLogger::new();
        let mut sink = logger.clone();
        let snapshot = remote.latest_snapshot();
        let mut txn = local.begin_write()?;
        let report = transfer_group(&snapshot, &mut txn, config, &mut sink)?;
        txn.commit()?;
        Ok((report, logger))
    }

    fn value_of(store: &VersionedStore, id: i64) -> Option<i64> {
        let snapshot = store.latest_snapshot();
        let table = snapshot.find_table("person")?;
        let key = snapshot.find_by_primary_key(table, &Value::from(id))?;
        snapshot.get_by_name(table, key, "value").ok()?.as_int()
    }

    #[test]
    fn remote_value_wins() {
        let (remote, local) = (store(), store());
        people(&remote, &[(-42, 6)]);
        people(&local, &[(-42, 4)]);

        let (report, logger) = reset(&remote, &local, &ResetConfig::new()).unwrap();
        assert_eq!(value_of(&local, -42), Some(6));
        assert_eq!(report.properties_updated, 1);
        assert_eq!(report.objects_created, 0);
        assert!(logger.contains("person[-42]"));
    }

    #[test]
    fn identical_graphs_need_no_writes() {
        let (remote, local) = (store(), store());
        people(&remote, &[(1, 1), (2, 2)]);
        people(&local, &[(1, 1), (2, 2)]);

        let before = local.current_version();
        let (report, _) = reset(&remote, &local, &ResetConfig::new()).unwrap();
        assert!(report.is_noop());
        let changes = local.diff(before, local.current_version()).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn missing_objects_are_created_and_extra_ones_removed() {
        let (remote, local) = (store(), store());
        people(&remote, &[(1, 10), (2, 20)]);
        people(&local, &[(2, 0), (3, 30)]);

        let (report, _) = reset(&remote, &local, &ResetConfig::new()).unwrap();
        assert_eq!(value_of(&local, 1), Some(10));
        assert_eq!(value_of(&local, 2), Some(20));
        assert_eq!(value_of(&local, 3), None);
        assert_eq!(report.objects_created, 1);
        assert_eq!(report.objects_removed, 1);
    }

    #[test]
    fn recovery_keeps_local_additions() {
        let (remote, local) = (store(), store());
        people(&remote, &[(1, 10)]);
        people(&local, &[(1, 10)]);
        let divergence = local.current_version();
        people(&local, &[(7, 70)]);

        let config = ResetConfig::new()
            .with_policy(ResetPolicy::RecoverLocal)
            .with_divergence_version(divergence);
        let (report, logger) = reset(&remote, &local, &config).unwrap();
        assert_eq!(value_of(&local, 7), Some(70));
        assert_eq!(report.objects_recovered, 1);
        assert!(report.recovered);
        assert!(logger.contains("Recovered local object person[7]"));

        let (report, _) = reset(&remote, &local, &ResetConfig::new()).unwrap();
        assert_eq!(value_of(&local, 7), None);
        assert_eq!(report.objects_removed, 1);
    }

    #[test]
    fn recovery_keeps_local_edits_it_is_told_about() {
        let (remote, local) = (store(), store());
        people(&remote, &[(-42, 6)]);
        people(&local, &[(-42, 0)]);
        let divergence = local.current_version();
        people(&local, &[(-42, 4)]);
        let changes = local.diff(divergence, local.current_version()).unwrap();

        let config = ResetConfig::new()
            .with_policy(ResetPolicy::RecoverLocal)
            .with_divergence_version(divergence);
        let mut logger = MemoryResetLogger::new();
        let snapshot = remote.latest_snapshot();
        let mut txn = local.begin_write().unwrap();
        let report = Reconciler::new(&config, &mut logger)
            .with_local_changes(&changes)
            .run(&snapshot, &mut txn)
            .unwrap();
        txn.commit().unwrap();

        assert_eq!(value_of(&local, -42), Some(4));
        assert_eq!(report.local_edits_kept, 1);
        assert_eq!(report.properties_updated, 0);
    }

    #[test]
    fn recovery_needs_a_divergence_version() {
        let (remote, local) = (store(), store());
        people(&remote, &[(1, 1)]);
        people(&local, &[(2, 2)]);

        let config = ResetConfig::new().with_policy(ResetPolicy::RecoverLocal);
        let err = reset(&remote, &local, &config).unwrap_err();
        assert!(matches!(err, ResetError::RecoveryUnavailable { .. }));

        let config = ResetConfig::new().with_policy(ResetPolicy::RecoverOrDiscard);
        let (report, logger) = reset(&remote, &local, &config).unwrap();
        assert!(!report.recovered);
        assert_eq!(report.objects_removed, 1);
        assert_eq!(logger.lines_at(Level::WARN).len(), 1);
    }

    #[test]
    fn remote_schema_is_added() {
        let (remote, local) = (store(), store());
        write(&remote, |txn| {
            let dog = txn.add_table(TableSchema::new("dog").with_primary_key("name", DataType::String))?;
            let person = txn.add_table(person_schema())?;
            txn.add_column(person, "pet", DataType::Link(dog), CollectionKind::Single, true)?;
            let rex = txn.create_object_with_primary_key(dog, "rex")?;
            let owner = txn.create_object_with_primary_key(person, 1)?;
            txn.set_by_name(person, owner, "pet", ObjLink::new(dog, rex))?;
            Ok(())
        });
        people(&local, &[(1, 5)]);

        let (report, _) = reset(&remote, &local, &ResetConfig::new()).unwrap();
        assert_eq!(report.tables_created, vec!["dog".to_owned()]);
        assert_eq!(report.columns_added, vec!["person.pet".to_owned()]);

        let snapshot = local.latest_snapshot();
        let person = snapshot.table_key("person").unwrap();
        let dog = snapshot.table_key("dog").unwrap();
        let owner = snapshot.find_by_primary_key(person, &Value::from(1)).unwrap();
        let pet = snapshot.get_by_name(person, owner, "pet").unwrap().as_link().unwrap();
        assert_eq!(pet.table, dog);
        assert_eq!(
            snapshot.get_by_name(dog, pet.key, "name").unwrap(),
            &Value::from("rex")
        );
    }

    #[test]
    fn local_only_tables_remain_unless_configured() {
        let (remote, local) = (store(), store());
        people(&remote, &[(1, 1)]);
        write(&local, |txn| {
            let notes = txn.add_table(TableSchema::new("note").with_property("text", DataType::String))?;
            txn.create_object(notes)?;
            Ok(())
        });

        let (report, logger) = reset(&remote, &local, &ResetConfig::new()).unwrap();
        assert!(report.tables_cleared.is_empty());
        assert!(logger.contains("'note' only exists locally"));
        let snapshot = local.latest_snapshot();
        let notes = snapshot.table_key("note").unwrap();
        assert_eq!(snapshot.objects(notes).unwrap().count(), 1);

        let config = ResetConfig::new().with_remove_local_only_tables(true);
        let (report, _) = reset(&remote, &local, &config).unwrap();
        assert_eq!(report.tables_cleared, vec!["note".to_owned()]);
        let snapshot = local.latest_snapshot();
        assert_eq!(snapshot.objects(notes).unwrap().count(), 0);
    }

    #[test]
    fn mismatched_primary_key_is_incompatible() {
        let (remote, local) = (store(), store());
        write(&remote, |txn| {
            txn.add_table(TableSchema::new("person").with_primary_key("id", DataType::String))?;
            Ok(())
        });
        people(&local, &[(1, 1)]);

        let err = reset(&remote, &local, &ResetConfig::new()).unwrap_err();
        assert_eq!(err, ResetError::incompatible("person", "primary key differs"));
    }

    #[test]
    fn mismatched_column_type_is_incompatible() {
        let (remote, local) = (store(), store());
        write(&remote, |txn| {
            txn.add_table(
                TableSchema::new("person")
                    .with_primary_key("id", DataType::Int)
                    .with_property("value", DataType::String),
            )?;
            Ok(())
        });
        people(&local, &[(1, 1)]);

        let err = reset(&remote, &local, &ResetConfig::new()).unwrap_err();
        assert_eq!(
            err,
            ResetError::incompatible("person", "column 'value' is int locally and string remotely")
        );
    }

    #[test]
    fn list_links_point_at_local_objects() {
        let (remote, local) = (store(), store());
        write(&remote, |txn| {
            let person = txn.add_table(person_schema())?;
            txn.add_column(person, "friends", DataType::Link(person), CollectionKind::List, false)?;
            let a = txn.create_object_with_primary_key(person, 1)?;
            let b = txn.create_object_with_primary_key(person, 2)?;
            let path = CollectionPath::new(person, a, txn.schema(person)?.column_key("friends")?);
            txn.list_push(&path, ObjLink::new(person, b))?;
            txn.list_push(&path, ObjLink::new(person, a))?;
            Ok(())
        });

        let (report, _) = reset(&remote, &local, &ResetConfig::new()).unwrap();
        assert_eq!(report.links_dropped, 0);
        let snapshot = local.latest_snapshot();
        let person = snapshot.table_key("person").unwrap();
        let a = snapshot.find_by_primary_key(person, &Value::from(1)).unwrap();
        let b = snapshot.find_by_primary_key(person, &Value::from(2)).unwrap();
        assert_eq!(
            snapshot.get_by_name(person, a, "friends").unwrap(),
            &Value::List(vec![
                Value::Link(ObjLink::new(person, b)),
                Value::Link(ObjLink::new(person, a)),
            ])
        );
    }

    #[test]
    fn recovered_links_to_removed_objects_are_counted() {
        let (remote, local) = (store(), store());
        for side in [&remote, &local] {
            write(side, |txn| {
                let person = txn.add_table(person_schema())?;
                txn.add_column(person, "friend", DataType::Link(person), CollectionKind::Single, true)?;
                Ok(())
            });
        }
        people(&remote, &[(1, 1)]);
        let person = people(&local, &[(1, 1), (2, 2)]);
        let divergence = local.current_version();
        write(&local, |txn| {
            let two = txn.find_by_primary_key(person, &Value::from(2)).unwrap();
            let nine = txn.create_object_with_primary_key(person, 9)?;
            txn.set_by_name(person, nine, "friend", ObjLink::new(person, two))?;
            Ok(())
        });

        let config = ResetConfig::new()
            .with_policy(ResetPolicy::RecoverLocal)
            .with_divergence_version(divergence);
        let (report, logger) = reset(&remote, &local, &config).unwrap();
        assert_eq!(report.objects_recovered, 1);
        assert_eq!(report.objects_removed, 1);
        assert_eq!(report.links_dropped, 1);
        assert!(logger.contains("Dropped 1 local link(s) to person[2]"));

        let snapshot = local.latest_snapshot();
        let nine = snapshot.find_by_primary_key(person, &Value::from(9)).unwrap();
        assert_eq!(snapshot.get_by_name(person, nine, "friend").unwrap(), &Value::Null);
    }

    #[test]
    fn discarded_links_are_not_counted() {
        let (remote, local) = (store(), store());
        for side in [&remote, &local] {
            write(side, |txn| {
                let person = txn.add_table(person_schema())?;
                txn.add_column(person, "friend", DataType::Link(person), CollectionKind::Single, true)?;
                Ok(())
            });
        }
        people(&remote, &[(1, 1)]);
        let person = people(&local, &[(1, 1), (2, 2)]);
        write(&local, |txn| {
            let one = txn.find_by_primary_key(person, &Value::from(1)).unwrap();
            let two = txn.find_by_primary_key(person, &Value::from(2)).unwrap();
            txn.set_by_name(person, one, "friend", ObjLink::new(person, two))?;
            Ok(())
        });

        let (report, _) = reset(&remote, &local, &ResetConfig::new()).unwrap();
        assert_eq!(report.objects_removed, 1);
        assert_eq!(report.links_dropped, 0);
    }

    #[test]
    fn tables_without_primary_key_match_by_object_key() {
        let (remote, local) = (store(), store());
        let schema = || TableSchema::new("log").with_property("line", DataType::String);
        write(&remote, |txn| {
            let table = txn.add_table(schema())?;
            for line in ["a", "b"] {
                let key = txn.create_object(table)?;
                txn.set_by_name(table, key, "line", line)?;
            }
            Ok(())
        });
        write(&local, |txn| {
            let table = txn.add_table(schema())?;
            let key = txn.create_object(table)?;
            txn.set_by_name(table, key, "line", "local")?;
            Ok(())
        });

        let (report, _) = reset(&remote, &local, &ResetConfig::new()).unwrap();
        assert_eq!(report.objects_created, 1);
        assert_eq!(report.objects_removed, 0);
        let snapshot = local.latest_snapshot();
        let table = snapshot.table_key("log").unwrap();
        let lines: Vec<Value> = snapshot
            .objects(table)
            .unwrap()
            .map(|o| snapshot.get_by_name(table, o.key(), "line").unwrap().clone())
            .collect();
        assert_eq!(lines, vec![Value::from("a"), Value::from("b")]);
    }

    #[test]
    fn embedded_objects_follow_their_owner() {
        let (remote, local) = (store(), store());
        let setup = |store: &VersionedStore, street: &str, phones: &[&str]| {
            let street = street.to_owned();
            let phones: Vec<String> = phones.iter().map(|p| (*p).to_owned()).collect();
            write(store, move |txn| {
                let address = txn.add_table(
                    TableSchema::new("address")
                        .embedded()
                        .with_property("street", DataType::String),
                )?;
                let phone = txn.add_table(TableSchema::new("phone").embedded().with_property("number", DataType::String))?;
                let person = txn.add_table(person_schema())?;
                let address_col = txn.add_column(person, "address", DataType::Link(address), CollectionKind::Single, true)?;
                let phones_col = txn.add_column(person, "phones", DataType::Link(phone), CollectionKind::List, false)?;
                let owner = txn.create_object_with_primary_key(person, 1)?;
                let home = txn.create_embedded(person, owner, address_col)?;
                txn.set_by_name(address, home, "street", street.as_str())?;
                let path = CollectionPath::new(person, owner, phones_col);
                for (i, number) in phones.iter().enumerate() {
                    let key = txn.list_insert_embedded(&path, i)?;
                    txn.set_by_name(phone, key, "number", number.as_str())?;
                }
                Ok(())
            })
        };
        setup(&remote, "main st", &["1", "2"]);
        setup(&local, "side st", &["3", "4", "5"]);

        let (report, _) = reset(&remote, &local, &ResetConfig::new()).unwrap();
        assert_eq!(report.objects_created, 0);

        let snapshot = local.latest_snapshot();
        let person = snapshot.table_key("person").unwrap();
        let phone = snapshot.table_key("phone").unwrap();
        let address = snapshot.table_key("address").unwrap();
        let owner = snapshot.find_by_primary_key(person, &Value::from(1)).unwrap();
        let home = snapshot.get_by_name(person, owner, "address").unwrap().as_link().unwrap();
        assert_eq!(
            snapshot.get_by_name(address, home.key, "street").unwrap(),
            &Value::from("main st")
        );
        let numbers: Vec<Value> = snapshot
            .get_by_name(person, owner, "phones")
            .unwrap()
            .as_sequence()
            .unwrap()
            .iter()
            .map(|v| {
                let link = v.as_link().unwrap();
                snapshot.get_by_name(phone, link.key, "number").unwrap().clone()
            })
            .collect();
        assert_eq!(numbers, vec![Value::from("1"), Value::from("2")]);
        assert_eq!(snapshot.objects(phone).unwrap().count(), 2);
    }
}
