//! # livedb Reset
//!
//! Client reset and sync progress for livedb.
//!
//! This crate provides:
//! - Reconciliation of a local store onto a remote one in a single commit
//! - Policies for discarding or recovering local changes since divergence
//! - A reset lifecycle with before and after hooks
//! - Decision logging through a pluggable logger
//! - Upload and download progress notifications
//!
//! ## Key Invariants
//!
//! - A reset commits everything or nothing
//! - Objects present on both sides keep their local identity
//! - Properties are only written where the graphs differ
//! - Progress callbacks never run under the notifier's lock

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod logger;
mod progress;
mod reconciler;
mod state;

pub use config::{ResetConfig, ResetPolicy};
pub use error::{ResetError, ResetResult};
pub use logger::{MemoryResetLogger, ResetLogger, TracingResetLogger};
pub use progress::{ProgressCallback, ProgressDirection, ProgressNotifier, SyncProgress};
pub use reconciler::{transfer_group, Reconciler, ResetReport};
pub use state::{ClientReset, ResetState};
