//! Commit feed for observing new versions.
//!
//! The feed emits one event per commit, after the new version is visible,
//! in commit order. Subscribers that drop their receiver are pruned on the
//! next emit.

use crate::types::{TableKey, Version};
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Event emitted after a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEvent {
    /// The version created by the commit.
    pub version: Version,
    /// Tables whose objects changed.
    pub tables: Vec<TableKey>,
    /// Whether the commit changed the schema.
    pub schema_changed: bool,
}

/// Distributes commit events to subscribers.
#[derive(Default)]
pub struct CommitFeed {
    subscribers: RwLock<Vec<Sender<CommitEvent>>>,
}

impl CommitFeed {
    /// Creates a feed with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to all future commit events.
    pub fn subscribe(&self) -> Receiver<CommitEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event to all live subscribers.
    pub fn emit(&self, event: CommitEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
