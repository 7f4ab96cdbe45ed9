//! Read and write transactions.
//!
//! A read transaction is a pinned view of one version. A write transaction
//! works on a private copy of the latest version; readers never observe its
//! changes until it commits.

mod read;
mod write;

pub use read::ReadTransaction;
pub use write::{TransactionState, WriteTransaction};
