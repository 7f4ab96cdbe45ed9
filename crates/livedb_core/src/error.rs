//! Error types for livedb core.

use crate::types::{ColKey, ObjKey, TableKey, Version};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in livedb core operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Table does not exist.
    #[error("no such table: {name}")]
    NoSuchTable {
        /// Name or key of the table.
        name: String,
    },

    /// Column does not exist.
    #[error("no such column '{column}' in table '{table}'")]
    NoSuchColumn {
        /// Table name.
        table: String,
        /// Column name or key.
        column: String,
    },

    /// Object does not exist at the version being read or written.
    #[error("object {key} not found in {table}")]
    ObjectNotFound {
        /// Table of the object.
        table: TableKey,
        /// Key of the object.
        key: ObjKey,
    },

    /// A table or column with this name already exists.
    #[error("duplicate name: {name}")]
    DuplicateName {
        /// The conflicting name.
        name: String,
    },

    /// An object with this primary key already exists.
    #[error("duplicate primary key {value} in table '{table}'")]
    DuplicatePrimaryKey {
        /// Table name.
        table: String,
        /// Rendered primary key.
        value: String,
    },

    /// Value type does not match the column type.
    #[error("type mismatch for column '{column}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// Column name.
        column: String,
        /// Expected type.
        expected: String,
        /// Actual type.
        actual: String,
    },

    /// Collection index out of range.
    #[error("index {index} out of bounds for collection of size {size}")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Collection size.
        size: usize,
    },

    /// Collection path does not resolve to a collection.
    #[error("collection path no longer resolves: {path}")]
    InvalidPath {
        /// Rendered path.
        path: String,
    },

    /// Requested version has been reclaimed or was never created.
    #[error("version {version} is not available")]
    VersionUnavailable {
        /// The requested version.
        version: Version,
    },

    /// Too many versions are pinned at once.
    #[error("cannot pin version {version}: {limit} versions already pinned")]
    PinLimitExceeded {
        /// The version that could not be pinned.
        version: Version,
        /// Configured pin limit.
        limit: usize,
    },

    /// Transaction is not active.
    #[error("transaction not active: {reason}")]
    TransactionNotActive {
        /// Why the transaction cannot be used.
        reason: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Store has been closed.
    #[error("store is closed")]
    StoreClosed,
}

impl CoreError {
    /// Creates a no-such-table error.
    pub fn no_such_table(name: impl Into<String>) -> Self {
        Self::NoSuchTable { name: name.into() }
    }

    /// Creates a no-such-column error.
    pub fn no_such_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::NoSuchColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Creates a no-such-column error from a column key.
    pub fn no_such_column_key(table: impl Into<String>, column: ColKey) -> Self {
        Self::no_such_column(table, column.to_string())
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(
        column: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            column: column.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates an invalid path error.
    pub fn invalid_path(path: impl ToString) -> Self {
        Self::InvalidPath {
            path: path.to_string(),
        }
    }

    /// Creates a transaction-not-active error.
    pub fn transaction_not_active(reason: impl Into<String>) -> Self {
        Self::TransactionNotActive {
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if the error is caused by resource exhaustion rather
    /// than by misuse.
    #[must_use]
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            CoreError::PinLimitExceeded { .. } | CoreError::VersionUnavailable { .. }
        )
    }
}
