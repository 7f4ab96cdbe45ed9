//! Sectioned results over sorted queries.

use livedb_core::{DataType, ObjKey, TableKey, TableSchema, Value};
use livedb_notify::{Reader, Results, SectionedChangeSet, SectionedResults};
use livedb_testkit::prelude::*;

const FRUIT: [&str; 5] = ["apple", "apples", "apricot", "banana", "orange"];

fn fruit(reader: &Reader) -> (TableKey, Vec<ObjKey>) {
    commit_write(reader, |txn| {
        let table = txn.add_table(TableSchema::new("fruit").with_property("name", DataType::String))?;
        let mut keys = Vec::new();
        for name in FRUIT {
            let key = txn.create_object(table)?;
            txn.set_by_name(table, key, "name", name)?;
            keys.push(key);
        }
        Ok((table, keys))
    })
}

fn sorted_sections(reader: &Reader) -> SectionedResults {
    Results::all(reader, "fruit")
        .unwrap()
        .sort("name", false)
        .unwrap()
        .sectioned_by_first_letter("name")
        .unwrap()
}

fn contents(sections: &SectionedResults) -> Vec<(Value, Vec<Value>)> {
    (0..sections.size().unwrap())
        .map(|i| {
            let section = sections.section(i).unwrap();
            let rows = (0..section.size().unwrap())
                .map(|j| section.get(j).unwrap().get("name").unwrap())
                .collect();
            (section.key().clone(), rows)
        })
        .collect()
}

/// Rebuilds the new sections from the old ones and the change set.
fn replay(
    old: &[(Value, Vec<Value>)],
    new: &[(Value, Vec<Value>)],
    changes: &SectionedChangeSet,
) -> Vec<(Value, Vec<Value>)> {
    let mut kept: Vec<(Value, Vec<Value>)> = old
        .iter()
        .enumerate()
        .filter(|(i, _)| !changes.sections_to_delete.contains(*i))
        .map(|(i, (key, rows))| {
            let mut rows = rows.clone();
            if let Some(deleted) = changes.deletions.get(&i) {
                for row in deleted.iter().rev() {
                    rows.remove(row);
                }
            }
            (key.clone(), rows)
        })
        .collect();
    for j in changes.sections_to_insert.iter() {
        kept.insert(j, (new[j].0.clone(), Vec::new()));
    }
    for (j, (_, rows)) in kept.iter_mut().enumerate() {
        if let Some(inserted) = changes.insertions.get(&j) {
            for row in inserted.iter() {
                rows.insert(row, new[j].1[row].clone());
            }
        }
    }
    kept
}

fn rename(reader: &Reader, table: TableKey, key: ObjKey, name: &str) {
    commit_write(reader, |txn| {
        txn.set_by_name(table, key, "name", name)?;
        Ok(())
    });
}

#[test]
fn sections_follow_the_sort_order() {
    let store = TestStore::new();
    let reader = store.open();
    fruit(&reader);
    let sections = sorted_sections(&reader);

    assert_eq!(
        sections.section_keys().unwrap(),
        vec![Value::from("o"), Value::from("b"), Value::from("a")]
    );
    let a = sections.section_by_key("a").unwrap();
    assert_eq!(a.index().unwrap(), 2);
    let names: Vec<Value> = (0..a.size().unwrap())
        .map(|i| a.get(i).unwrap().get("name").unwrap())
        .collect();
    assert_eq!(
        names,
        vec![Value::from("apricot"), Value::from("apples"), Value::from("apple")]
    );
}

#[test]
fn insertion_lands_in_its_section() {
    let store = TestStore::new();
    let reader = store.open();
    let (table, _) = fruit(&reader);
    let sections = sorted_sections(&reader);
    let log: Recorder<Notification<SectionedChangeSet>> = Recorder::new();
    let _token = sections.add_notification_callback(log.sink()).unwrap();
    reader.refresh().unwrap();

    commit_write(&reader, |txn| {
        let key = txn.create_object(table)?;
        txn.set_by_name(table, key, "name", "blueberry")?;
        Ok(())
    });
    reader.refresh().unwrap();

    assert_eq!(log.len(), 2);
    let changes = log.last().unwrap().changes;
    assert!(changes.sections_to_insert.is_empty());
    assert!(changes.sections_to_delete.is_empty());
    assert_eq!(changes.insertions.len(), 1);
    assert_eq!(changes.insertions[&1].iter().collect::<Vec<_>>(), vec![0]);
}

#[test]
fn section_handle_stays_dead_when_its_key_returns() {
    let store = TestStore::new();
    let reader = store.open();
    let (table, keys) = fruit(&reader);
    let sections = sorted_sections(&reader);
    let b = sections.section_by_key("b").unwrap();
    assert_eq!(b.size().unwrap(), 1);

    commit_write(&reader, |txn| {
        txn.remove_object(table, keys[3])?;
        Ok(())
    });
    commit_write(&reader, |txn| {
        let key = txn.create_object(table)?;
        txn.set_by_name(table, key, "name", "berry")?;
        Ok(())
    });
    reader.refresh().unwrap();

    assert!(!b.is_valid());
    assert!(b.size().is_err());
    let fresh = sections.section_by_key("b").unwrap();
    assert!(fresh.is_valid());
    assert_eq!(fresh.get(0).unwrap().get("name").unwrap(), Value::from("berry"));
}

#[test]
fn renamed_key_replaces_a_section() {
    let store = TestStore::new();
    let reader = store.open();
    let (table, keys) = fruit(&reader);
    let sections = sorted_sections(&reader);
    let log: Recorder<Notification<SectionedChangeSet>> = Recorder::new();
    let _token = sections.add_notification_callback(log.sink()).unwrap();
    reader.refresh().unwrap();

    let before = contents(&sections);
    rename(&reader, table, keys[4], "zucchini");
    reader.refresh().unwrap();
    let after = contents(&sections);

    let changes = log.last().unwrap().changes;
    assert_eq!(changes.sections_to_delete.iter().collect::<Vec<_>>(), vec![0]);
    assert_eq!(changes.sections_to_insert.iter().collect::<Vec<_>>(), vec![0]);
    assert_eq!(after[0].0, Value::from("z"));
    assert_eq!(replay(&before, &after, &changes), after);
}

#[test]
fn replayed_changes_match_each_write() {
    let store = TestStore::new();
    let reader = store.open();
    let (table, keys) = fruit(&reader);
    let sections = sorted_sections(&reader);
    let log: Recorder<Notification<SectionedChangeSet>> = Recorder::new();
    let _token = sections.add_notification_callback(log.sink()).unwrap();
    reader.refresh().unwrap();

    let (apple, banana, orange) = (keys[0], keys[3], keys[4]);
    let writes: Vec<Box<dyn Fn(&Reader)>> = vec![
        Box::new(move |r: &Reader| rename(r, table, banana, "avocado")),
        Box::new(move |r: &Reader| rename(r, table, apple, "cranberry")),
        Box::new(move |r: &Reader| {
            commit_write(r, |txn| {
                txn.remove_object(table, orange)?;
                Ok(())
            })
        }),
        Box::new(move |r: &Reader| {
            commit_write(r, |txn| {
                for name in ["banana", "cherry", "apple"] {
                    let key = txn.create_object(table)?;
                    txn.set_by_name(table, key, "name", name)?;
                }
                Ok(())
            })
        }),
    ];

    for write in writes {
        let before = contents(&sections);
        let delivered = log.len();
        write(&reader);
        reader.refresh().unwrap();
        let after = contents(&sections);
        assert_eq!(log.len(), delivered + 1);
        let changes = log.last().unwrap().changes;
        assert_eq!(replay(&before, &after, &changes), after, "changes: {changes:?}");
    }
}
