//! Client reset lifecycle.

use crate::config::{ResetConfig, ResetPolicy};
use crate::error::{ResetError, ResetResult};
use crate::logger::ResetLogger;
use crate::reconciler::{Reconciler, ResetReport};
use livedb_core::{CoreError, Snapshot, VersionedStore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// State of a client reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetState {
    /// Not yet run.
    NotStarted,
    /// Computing local changes since divergence.
    Diffing,
    /// Reconciling inside the local write transaction.
    Applying,
    /// The reset committed.
    Committed,
    /// The reset failed or was abandoned; the local store is unchanged.
    Aborted,
}

impl ResetState {
    /// Returns true once the reset can no longer run.
    pub fn is_finished(&self) -> bool {
        matches!(self, ResetState::Committed | ResetState::Aborted)
    }
}

type BeforeHook = Box<dyn FnMut(&Snapshot) -> ResetResult<()> + Send>;
type AfterHook = Box<dyn FnMut(&Snapshot, &Snapshot) + Send>;

/// Replaces a local store's contents with a remote store's, once.
///
/// The whole reset is one local write transaction, so readers observing
/// the local store see a single commit in which objects that survive keep
/// their identity.
pub struct ClientReset {
    config: ResetConfig,
    state: ResetState,
    report: Option<ResetReport>,
    before: Option<BeforeHook>,
    after: Option<AfterHook>,
}

impl ClientReset {
    /// Creates a reset with the given configuration.
    pub fn new(config: ResetConfig) -> Self {
        Self {
            config,
            state: ResetState::NotStarted,
            report: None,
            before: None,
            after: None,
        }
    }

    /// Runs before anything is written, with the local graph the reset
    /// starts from. The local store's writer is held while the hook runs,
    /// so the hook must not write to it. Returning an error aborts the
    /// reset.
    #[must_use]
    pub fn with_before_hook(mut self, hook: impl FnMut(&Snapshot) -> ResetResult<()> + Send + 'static) -> Self {
        self.before = Some(Box::new(hook));
        self
    }

    /// Runs after the commit with the local graph before and after.
    #[must_use]
    pub fn with_after_hook(mut self, hook: impl FnMut(&Snapshot, &Snapshot) + Send + 'static) -> Self {
        self.after = Some(Box::new(hook));
        self
    }

    /// Current state.
    pub fn state(&self) -> ResetState {
        self.state
    }

    /// Configuration.
    pub fn config(&self) -> &ResetConfig {
        &self.config
    }

    /// Report of a committed reset.
    pub fn report(&self) -> Option<&ResetReport> {
        self.report.as_ref()
    }

    /// Abandons a reset that has not run.
    pub fn abort(&mut self) -> ResetResult<()> {
        self.require_not_started("abort")?;
        self.state = ResetState::Aborted;
        Ok(())
    }

    fn require_not_started(&self, operation: &'static str) -> ResetResult<()> {
        if self.state == ResetState::NotStarted {
            Ok(())
        } else {
            Err(ResetError::InvalidState {
                state: self.state,
                operation,
            })
        }
    }

    /// Makes `local` match the latest version of `remote`.
    ///
    /// Any failure aborts the reset and leaves `local` as it was.
    pub fn run(
        &mut self,
        remote: &VersionedStore,
        local: &VersionedStore,
        logger: &mut dyn ResetLogger,
    ) -> ResetResult<ResetReport> {
        self.require_not_started("run")?;
        let result = self.run_inner(remote, local, logger);
        match &result {
            Ok(report) => {
                info!(
                    created = report.objects_created,
                    removed = report.objects_removed,
                    recovered = report.recovered,
                    "Client reset committed"
                );
                self.report = Some(report.clone());
            }
            Err(err) => {
                warn!(error = %err, "Client reset aborted");
                self.state = ResetState::Aborted;
            }
        }
        result
    }

    fn run_inner(
        &mut self,
        remote: &VersionedStore,
        local: &VersionedStore,
        logger: &mut dyn ResetLogger,
    ) -> ResetResult<ResetReport> {
        // Holding the writer fixes the graph the hooks call "before".
        // Dropping the transaction on error cancels it.
        let mut txn = local.begin_write()?;
        let before = Snapshot::clone(&txn);
        if let Some(hook) = self.before.as_mut() {
            hook(&before)?;
        }

        self.state = ResetState::Diffing;
        let remote_txn = remote.open_latest()?;
        let mut config = self.config.clone();
        let local_changes = match config.divergence_version {
            Some(divergence) if config.policy.recovers() => {
                match local.diff(divergence, txn.base_version()) {
                    Ok(changes) => Some(changes),
                    Err(CoreError::VersionUnavailable { .. }) if config.policy == ResetPolicy::RecoverOrDiscard => {
                        logger.log(
                            tracing::Level::WARN,
                            &format!("Local history since {divergence} is gone, discarding local changes"),
                        );
                        config.policy = ResetPolicy::DiscardLocal;
                        None
                    }
                    Err(CoreError::VersionUnavailable { .. }) => {
                        return Err(ResetError::recovery_unavailable(format!(
                            "local history since {divergence} is no longer available"
                        )));
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            _ => None,
        };

        self.state = ResetState::Applying;
        let mut reconciler = Reconciler::new(&config, logger);
        if let Some(changes) = local_changes.as_ref() {
            reconciler = reconciler.with_local_changes(changes);
        }
        let report = reconciler.run(&remote_txn, &mut txn)?;
        txn.commit()?;
        self.state = ResetState::Committed;

        if let Some(hook) = self.after.as_mut() {
            hook(&before, &local.latest_snapshot());
        }
        Ok(report)
    }
}

impl std::fmt::Debug for ClientReset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientReset")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
