//! Read transactions.

use crate::snapshot::Snapshot;
use crate::store::VersionPin;
use crate::types::Version;
use std::ops::Deref;
use std::sync::Arc;

/// A read-only view of one version.
///
/// The version stays pinned for as long as the transaction lives.
#[derive(Debug, Clone)]
pub struct ReadTransaction {
    snapshot: Arc<Snapshot>,
    pin: VersionPin,
}

impl ReadTransaction {
    pub(crate) fn new(snapshot: Arc<Snapshot>, pin: VersionPin) -> Self {
        Self { snapshot, pin }
    }

    /// The version this transaction reads.
    #[must_use]
    pub fn version(&self) -> Version {
        self.pin.version()
    }

    /// The snapshot this transaction reads.
    #[must_use]
    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// The pin keeping the version alive.
    #[must_use]
    pub fn pin(&self) -> &VersionPin {
        &self.pin
    }
}

impl Deref for ReadTransaction {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        &self.snapshot
    }
}
