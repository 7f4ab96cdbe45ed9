//! # livedb Notify
//!
//! Live collections and change notifications for livedb.
//!
//! This crate provides:
//! - Readers that each see one version of a store and advance on demand
//! - Live handles over results, lists, sets, dictionaries and objects
//! - Minimal change sets computed between any two versions
//! - Callbacks filtered by key paths, delivered in a consistent order
//! - Results grouped into sections with section-level changes
//! - Handles that can be passed to readers on other threads
//!
//! ## Example
//!
//! ```
//! use livedb_core::{DataType, TableSchema};
//! use livedb_notify::{Reader, ReaderConfig, Results};
//! use std::sync::{Arc, Mutex};
//!
//! let reader = Reader::open(ReaderConfig::anonymous()).unwrap();
//! reader
//!     .write(|r| {
//!         r.with_write_transaction(|txn| {
//!             txn.add_table(TableSchema::new("item").with_property("value", DataType::Int))?;
//!             Ok(())
//!         })
//!     })
//!     .unwrap();
//!
//! let results = Results::all(&reader, "item").unwrap();
//! let inserted = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&inserted);
//! let _token = results
//!     .add_notification_callback(move |changes, _| {
//!         sink.lock().unwrap().extend(changes.insertions.iter());
//!     })
//!     .unwrap();
//!
//! reader
//!     .write(|r| {
//!         r.with_write_transaction(|txn| {
//!             let table = txn.table_key("item")?;
//!             txn.create_object(table)?;
//!             Ok(())
//!         })
//!     })
//!     .unwrap();
//! reader.refresh().unwrap();
//! assert_eq!(*inserted.lock().unwrap(), vec![0]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod binding;
mod change_builder;
mod change_set;
mod checker;
mod config;
mod coordinator;
mod dictionary;
mod error;
mod handover;
mod index_set;
mod key_path;
mod list;
mod notifier;
mod object;
mod reader;
mod results;
mod scheduler;
mod sectioned;

pub use binding::{CollectionBinding, CollectionRoot};
pub use change_builder::{calculate, calculate_dictionary, calculate_sequence, DiffMode};
pub use change_set::{ChangeSet, CollectionChange, DictionaryChangeSet, SectionedChangeSet};
pub use checker::{DeepChangeChecker, KeyPathChangeChecker, ModificationChecker};
pub use config::ReaderConfig;
pub use coordinator::{CoordinatorLease, CoordinatorRegistry, NotifierCoordinator};
pub use dictionary::Dictionary;
pub use error::{NotifyError, NotifyResult};
pub use handover::{CollectionPayload, Handover, ObjectPayload, ResultsPayload, ThreadSafeReference};
pub use index_set::IndexSet;
pub use key_path::{KeyPath, KeyPathArray};
pub use list::{List, Set};
pub use notifier::{ChangeCallback, CollectionNotifier, NotificationToken};
pub use object::Object;
pub use reader::Reader;
pub use results::Results;
pub use scheduler::{InlineScheduler, QueueScheduler, Scheduler, Task};
pub use sectioned::{ResultsSection, SectionKeyFn, SectionedResults};
