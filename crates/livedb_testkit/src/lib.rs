//! # livedb Testkit
//!
//! Test utilities for livedb.
//!
//! This crate provides:
//! - Temporary stores, seeded layouts and callback recorders
//! - Property-based edit scripts for lists and dictionaries
//! - Change set replay to check notifications against actual contents
//! - Golden JSON files for serialized formats
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use livedb_testkit::prelude::*;
//!
//! #[test]
//! fn inserts_are_reported() {
//!     let store = TestStore::new();
//!     let reader = store.open();
//!     let (_, keys) = scenarios::items(&reader, &[1, 2, 3]);
//!     // ... register callbacks and write
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod golden;
pub mod logging;
pub mod mirror;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::mirror::*;
}

pub use fixtures::*;
pub use generators::*;
pub use golden::*;
pub use logging::*;
pub use mirror::*;
