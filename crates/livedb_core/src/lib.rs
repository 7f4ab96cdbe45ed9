//! # livedb Core
//!
//! Versioned object graph store for livedb.
//!
//! This crate provides:
//! - Immutable, totally ordered snapshots of an object graph
//! - Single-writer transactions with snapshot isolation for readers
//! - Per-commit change records that merge into interval diffs
//! - Reference-counted version pins with a resource limit
//! - Query predicates and result ordering
//!
//! ## Example
//!
//! ```
//! use livedb_core::{DataType, StoreConfig, TableSchema, VersionedStore};
//!
//! let store = VersionedStore::open(StoreConfig::anonymous());
//! let mut txn = store.begin_write().unwrap();
//! let table = txn
//!     .add_table(TableSchema::new("item").with_property("value", DataType::Int))
//!     .unwrap();
//! let key = txn.create_object(table).unwrap();
//! let v1 = txn.commit().unwrap();
//!
//! let changes = store.diff(livedb_core::Version::INITIAL, v1).unwrap();
//! assert!(changes.was_inserted(table, key));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_info;
mod commit_feed;
mod config;
mod error;
mod path;
mod query;
mod schema;
mod snapshot;
mod store;
mod transaction;
mod types;
mod value;

pub use change_info::{ChangeInfo, TableChanges};
pub use commit_feed::{CommitEvent, CommitFeed};
pub use config::StoreConfig;
pub use error::{CoreError, CoreResult};
pub use path::{CollectionPath, PathElement};
pub use query::{
    CompareOp, Descriptor, DescriptorOrdering, Predicate, Query, QuerySource, SortDescriptor,
};
pub use schema::{CollectionKind, Column, DataType, TableSchema};
pub use snapshot::{Object, Snapshot, TableData};
pub use store::{VersionPin, VersionedStore};
pub use transaction::{ReadTransaction, TransactionState, WriteTransaction};
pub use types::{ColKey, ObjKey, ObjLink, TableKey, Version};
pub use value::Value;
