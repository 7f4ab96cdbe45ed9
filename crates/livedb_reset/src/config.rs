//! Configuration for client reset.

use livedb_core::Version;
use serde::{Deserialize, Serialize};

/// What happens to local changes the remote graph does not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResetPolicy {
    /// The local graph becomes a copy of the remote graph.
    #[default]
    DiscardLocal,
    /// Objects created and properties edited locally after divergence
    /// survive. Fails if the local history since divergence is gone.
    RecoverLocal,
    /// Like [`ResetPolicy::RecoverLocal`], falling back to
    /// [`ResetPolicy::DiscardLocal`] when recovery is impossible.
    RecoverOrDiscard,
}

impl ResetPolicy {
    /// Returns true if the policy tries to keep local changes.
    pub fn recovers(&self) -> bool {
        matches!(self, ResetPolicy::RecoverLocal | ResetPolicy::RecoverOrDiscard)
    }
}

/// Configuration for a client reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetConfig {
    /// Policy for local changes.
    pub policy: ResetPolicy,
    /// Last local version known to be shared with the remote graph.
    pub divergence_version: Option<Version>,
    /// Clear tables that only exist locally instead of keeping them.
    pub remove_local_only_tables: bool,
}

impl ResetConfig {
    /// Creates a configuration that discards local changes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ResetPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the divergence version.
    #[must_use]
    pub fn with_divergence_version(mut self, version: Version) -> Self {
        self.divergence_version = Some(version);
        self
    }

    /// Sets whether local-only tables are cleared.
    #[must_use]
    pub fn with_remove_local_only_tables(mut self, remove: bool) -> Self {
        self.remove_local_only_tables = remove;
        self
    }

    /// Returns true if an object created at `incarnation` is a local
    /// addition that recovery keeps.
    pub(crate) fn is_local_addition(&self, incarnation: Version) -> bool {
        self.policy.recovers() && self.divergence_version.is_some_and(|v| incarnation > v)
    }
}
