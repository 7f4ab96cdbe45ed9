//! Error types for live collections.

use livedb_core::CoreError;
use thiserror::Error;

/// Result type for notification operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Errors raised by live collections and their notifiers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    /// A notifier could not compute its changes.
    ///
    /// Delivered once to every callback of the notifier, which then stops
    /// producing updates.
    #[error("notifier failed: {message}")]
    Resource {
        /// Error message.
        message: String,
    },

    /// A write was attempted outside a write transaction.
    #[error("cannot {operation} outside a write transaction")]
    NotInWriteTransaction {
        /// The attempted operation.
        operation: &'static str,
    },

    /// A write or notification was attempted on a frozen reader.
    #[error("cannot {operation} on a frozen reader")]
    Frozen {
        /// The attempted operation.
        operation: &'static str,
    },

    /// The collection's owner was deleted or its reader closed.
    #[error("access to invalidated {kind}")]
    InvalidatedCollection {
        /// Kind of collection.
        kind: &'static str,
    },

    /// The operation is not allowed while a write transaction is open.
    #[error("cannot {operation} inside a write transaction")]
    InWriteTransaction {
        /// The attempted operation.
        operation: &'static str,
    },

    /// The operation is not supported by this kind of handle.
    #[error("{message}")]
    Unsupported {
        /// Error message.
        message: String,
    },

    /// Aggregate not supported for the column type.
    #[error("Cannot {operation} property '{column}': operation not supported for '{data_type}' properties")]
    UnsupportedAggregate {
        /// Aggregate name.
        operation: &'static str,
        /// Column name.
        column: String,
        /// Column type name.
        data_type: String,
    },

    /// The section key function produced an unusable key.
    #[error("{message}")]
    InvalidSectionKey {
        /// Error message.
        message: String,
    },

    /// A dictionary or section key has no entry.
    #[error("{message}")]
    KeyNotFound {
        /// Error message.
        message: String,
    },

    /// Index out of range for a live collection.
    #[error("requested index {index} greater than max {max}")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Largest valid index plus one.
        max: usize,
    },

    /// Error from the versioned store.
    #[error("store error: {0}")]
    Core(#[from] CoreError),
}

impl NotifyError {
    /// Creates a resource error.
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    /// Creates a missing-key error for a dictionary lookup.
    pub fn dictionary_key_not_found(key: &str) -> Self {
        Self::KeyNotFound {
            message: format!("Cannot get value for key '{key}': key not found"),
        }
    }

    /// Creates a missing-key error for a section lookup.
    pub fn section_key_not_found() -> Self {
        Self::KeyNotFound {
            message: "Key does not exist for any sections.".to_owned(),
        }
    }

    /// Creates the error raised for link-valued section keys.
    pub fn link_section_key() -> Self {
        Self::InvalidSectionKey {
            message: "Links are not supported as section keys.".to_owned(),
        }
    }

    /// Creates an unsupported-operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Returns true if this error permanently disables a notifier.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NotifyError::Resource { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedb_core::Version;

    #[test]
    fn only_resource_errors_are_terminal() {
        assert!(NotifyError::resource("pin limit").is_terminal());
        assert!(!NotifyError::Frozen { operation: "write" }.is_terminal());
        assert!(!NotifyError::from(CoreError::VersionUnavailable {
            version: Version::new(3)
        })
        .is_terminal());
    }

    #[test]
    fn messages_name_the_offender() {
        let err = NotifyError::UnsupportedAggregate {
            operation: "sum",
            column: "name".into(),
            data_type: "string".into(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot sum property 'name': operation not supported for 'string' properties"
        );
        assert_eq!(
            NotifyError::dictionary_key_not_found("foo").to_string(),
            "Cannot get value for key 'foo': key not found"
        );
        assert_eq!(
            NotifyError::link_section_key().to_string(),
            "Links are not supported as section keys."
        );
    }
}
