//! Property tests: delivered change sets replay old contents into new ones.

use livedb_core::{ObjLink, TableKey, Value};
use livedb_notify::{ChangeSet, DictionaryChangeSet, NotifyResult, Object, Reader};
use livedb_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn list_of(reader: &Reader, start: &[i64]) -> livedb_notify::List {
    let owner = scenarios::owner(reader, start);
    Object::attach(reader, owner).unwrap().list("values").unwrap()
}

fn fresh_target(reader: &Reader, table: TableKey) -> NotifyResult<ObjLink> {
    reader.with_write_transaction(|txn| Ok(ObjLink::new(table, txn.create_object(table)?)))
}

fn entries(dictionary: &livedb_notify::Dictionary) -> BTreeMap<String, Value> {
    dictionary.values().unwrap().into_iter().collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn list_changes_replay(start in initial_list_strategy(8), script in list_script_strategy(12)) {
        let store = TestStore::new();
        let reader = store.open();
        let list = list_of(&reader, &start);

        let log: Recorder<Notification<ChangeSet>> = Recorder::new();
        let _token = list.add_notification_callback(log.sink()).unwrap();
        reader.refresh().unwrap();

        let before = list.values().unwrap();
        let mut model = start.clone();
        reader.write(|_| {
            for edit in &script {
                if let Some(edit) = edit.resolve(list.size()?) {
                    edit.apply_list(&list)?;
                    edit.apply_model(&mut model);
                }
            }
            Ok(())
        }).unwrap();
        reader.refresh().unwrap();

        let after = list.values().unwrap();
        let expected: Vec<Value> = model.iter().copied().map(Value::from).collect();
        prop_assert_eq!(&after, &expected);

        match log.len() {
            1 => prop_assert_eq!(&before, &after),
            2 => {
                let changes = log.last().unwrap().changes;
                prop_assert!(check_invariants(&changes, before.len(), after.len()).is_ok());
                assert_mirrors(&before, &after, &changes);
            }
            n => prop_assert!(false, "{} deliveries for one write", n),
        }
    }

    #[test]
    fn object_list_changes_replay(count in 0usize..6, script in list_script_strategy(12)) {
        let store = TestStore::new();
        let reader = store.open();
        let layout = scenarios::linked_list(&reader, count);
        let list = Object::attach(&reader, layout.origin).unwrap().list("targets").unwrap();

        let log: Recorder<Notification<ChangeSet>> = Recorder::new();
        let _token = list.add_notification_callback(log.sink()).unwrap();
        reader.refresh().unwrap();

        let before = list.values().unwrap();
        reader.write(|r| {
            for edit in &script {
                // Value-carrying edits place a newly created object.
                match edit.resolve(list.size()?) {
                    Some(ListEdit::Push(_)) => {
                        list.push(fresh_target(r, layout.target_table)?)?;
                    }
                    Some(ListEdit::Insert(i, _)) => list.insert(i, fresh_target(r, layout.target_table)?)?,
                    Some(ListEdit::Set(i, _)) => {
                        list.set(i, fresh_target(r, layout.target_table)?)?;
                    }
                    Some(other) => other.apply_list(&list)?,
                    None => {}
                }
            }
            Ok(())
        }).unwrap();
        reader.refresh().unwrap();
        let after = list.values().unwrap();

        if log.len() == 2 {
            let changes = log.last().unwrap().changes;
            assert_mirrors(&before, &after, &changes);
            // Only objects that were already members can be modified.
            for j in changes.modifications_new.iter() {
                prop_assert!(before.contains(&after[j]));
            }
        } else {
            prop_assert_eq!(log.len(), 1);
            prop_assert_eq!(&before, &after);
        }
    }

    #[test]
    fn dictionary_changes_replay(setup in dictionary_script_strategy(6), script in dictionary_script_strategy(10)) {
        let store = TestStore::new();
        let reader = store.open();
        let owner = scenarios::owner(&reader, &[]);
        let scores = Object::attach(&reader, owner).unwrap().dictionary("scores").unwrap();
        reader.write(|_| {
            for edit in &setup {
                edit.apply_dictionary(&scores)?;
            }
            Ok(())
        }).unwrap();

        let log: Recorder<Notification<DictionaryChangeSet>> = Recorder::new();
        let _token = scores.add_notification_callback(log.sink()).unwrap();
        reader.refresh().unwrap();

        let before = entries(&scores);
        reader.write(|_| {
            for edit in &script {
                edit.apply_dictionary(&scores)?;
            }
            Ok(())
        }).unwrap();
        reader.refresh().unwrap();
        let after = entries(&scores);

        if log.len() == 2 {
            assert_dictionary_mirrors(&before, &after, &log.last().unwrap().changes);
        } else {
            prop_assert_eq!(log.len(), 1);
            prop_assert_eq!(&before, &after);
        }
    }
}
