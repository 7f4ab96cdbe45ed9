//! Error types for client reset.

use crate::state::ResetState;
use livedb_core::CoreError;
use thiserror::Error;

/// Result type for reset operations.
pub type ResetResult<T> = Result<T, ResetError>;

/// Errors that can occur while resetting a local store onto a remote one.
///
/// Ordinary divergence between the two graphs is never an error; it is
/// resolved by the configured policy and reported through the logger.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResetError {
    /// The two schemas cannot be reconciled.
    #[error("incompatible schema for table '{table}': {reason}")]
    IncompatibleSchema {
        /// Table name.
        table: String,
        /// What differs.
        reason: String,
    },

    /// Local changes were requested but cannot be recovered.
    #[error("local changes cannot be recovered: {reason}")]
    RecoveryUnavailable {
        /// Why recovery is impossible.
        reason: String,
    },

    /// A reset hook refused to continue.
    #[error("reset hook failed during {stage}: {message}")]
    HookFailed {
        /// Stage the hook ran in.
        stage: &'static str,
        /// Message from the hook.
        message: String,
    },

    /// The reset is not in a state that allows the operation.
    #[error("cannot {operation} a reset in state {state:?}")]
    InvalidState {
        /// Current state.
        state: ResetState,
        /// Attempted operation.
        operation: &'static str,
    },

    /// Storage error while reading or writing either graph.
    #[error("storage error: {0}")]
    Core(#[from] CoreError),
}

impl ResetError {
    /// Creates an incompatible-schema error.
    pub fn incompatible(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IncompatibleSchema {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Creates a recovery-unavailable error.
    pub fn recovery_unavailable(reason: impl Into<String>) -> Self {
        Self::RecoveryUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates a hook failure.
    pub fn hook_failed(stage: &'static str, message: impl Into<String>) -> Self {
        Self::HookFailed {
            stage,
            message: message.into(),
        }
    }

    /// Returns true if this error aborted a reset. Misuse errors leave the
    /// reset untouched and are not fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ResetError::InvalidState { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors() {
        assert!(ResetError::incompatible("person", "primary key differs").is_fatal());
        assert!(ResetError::recovery_unavailable("history reclaimed").is_fatal());
        assert!(ResetError::from(CoreError::StoreClosed).is_fatal());
        assert!(!ResetError::InvalidState {
            state: ResetState::Committed,
            operation: "run",
        }
        .is_fatal());
    }

    #[test]
    fn error_display() {
        let err = ResetError::incompatible("person", "column 'age' is int locally and string remotely");
        assert_eq!(
            err.to_string(),
            "incompatible schema for table 'person': column 'age' is int locally and string remotely"
        );
        let err = ResetError::hook_failed("before", "disk full");
        assert!(err.to_string().contains("before"));
    }
}
