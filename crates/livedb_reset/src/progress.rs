//! Transfer progress notifications.
//!
//! A [`ProgressNotifier`] fans transfer progress out to registered
//! callbacks. Streaming callbacks hear about every update for as long as
//! they are registered. Non-streaming callbacks track one transfer: they
//! capture the amount that was transferable when they first ran and
//! expire once that much has been transferred.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgressDirection {
    /// Local changes going out.
    Upload,
    /// Remote changes coming in.
    Download,
}

/// One progress report from the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Bytes uploaded.
    pub uploaded: u64,
    /// Bytes that could be uploaded.
    pub uploadable: u64,
    /// Bytes downloaded.
    pub downloaded: u64,
    /// Bytes that could be downloaded.
    pub downloadable: u64,
    /// Latest local version the upload figures account for.
    pub snapshot_version: u64,
    /// Remote version of the last download; zero before the first one.
    pub download_version: u64,
}

/// Receives `(transferred, transferable)`.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

struct Package {
    callback: ProgressCallback,
    direction: ProgressDirection,
    streaming: bool,
    /// Local version at registration.
    snapshot_version: u64,
    captured_transferable: Option<u64>,
}

/// What running a package against one progress report yields.
struct Invocation {
    call: Option<(ProgressCallback, u64, u64)>,
    expired: bool,
}

impl Package {
    fn invocation(&mut self, progress: &SyncProgress) -> Invocation {
        let (transferred, mut transferable) = match self.direction {
            ProgressDirection::Upload => (progress.uploaded, progress.uploadable),
            ProgressDirection::Download => (progress.downloaded, progress.downloadable),
        };
        if !self.streaming {
            // Upload figures are stale until they cover our registration.
            if self.direction == ProgressDirection::Upload && self.snapshot_version > progress.snapshot_version {
                return Invocation {
                    call: None,
                    expired: false,
                };
            }
            // The transferable amount may shrink once the transfer is
            // compacted; it never grows for a non-streaming callback.
            let captured = match self.captured_transferable {
                Some(captured) if captured <= transferable => captured,
                _ => transferable,
            };
            self.captured_transferable = Some(captured);
            transferable = captured;
        }
        Invocation {
            call: Some((Arc::clone(&self.callback), transferred, transferable)),
            expired: !self.streaming && transferred >= transferable,
        }
    }
}

#[derive(Default)]
struct NotifierState {
    packages: BTreeMap<u64, Package>,
    next_token: u64,
    local_version: u64,
    current: Option<SyncProgress>,
}

/// Dispatches transfer progress to registered callbacks.
///
/// Callbacks run on the thread reporting progress (or registering), never
/// under the notifier's lock, so they may register and unregister freely.
pub struct ProgressNotifier {
    state: Mutex<NotifierState>,
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressNotifier {
    /// Creates a notifier with no progress yet.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NotifierState {
                next_token: 1,
                ..NotifierState::default()
            }),
        }
    }

    /// Registers a callback and returns its token.
    ///
    /// If progress is already known the callback runs immediately. A
    /// non-streaming callback whose transfer is already complete runs once
    /// and is not kept; its token is 0.
    pub fn register(
        &self,
        callback: impl Fn(u64, u64) + Send + Sync + 'static,
        direction: ProgressDirection,
        streaming: bool,
    ) -> u64 {
        let mut package = Package {
            callback: Arc::new(callback),
            direction,
            streaming,
            snapshot_version: 0,
            captured_transferable: None,
        };
        let (token, call) = {
            let mut state = self.state.lock();
            package.snapshot_version = state.local_version;
            let token = state.next_token;
            state.next_token += 1;
            match state.current {
                None => {
                    state.packages.insert(token, package);
                    return token;
                }
                Some(progress) => {
                    let invocation = package.invocation(&progress);
                    if invocation.expired {
                        (0, invocation.call)
                    } else {
                        state.packages.insert(token, package);
                        (token, invocation.call)
                    }
                }
            }
        };
        if let Some((callback, transferred, transferable)) = call {
            callback(transferred, transferable);
        }
        token
    }

    /// Removes a callback. Unknown tokens are ignored.
    pub fn unregister(&self, token: u64) {
        self.state.lock().packages.remove(&token);
    }

    /// Records the latest local version; upload callbacks registered after
    /// this wait for progress covering it.
    pub fn set_local_version(&self, version: u64) {
        self.state.lock().local_version = version;
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.state.lock().packages.len()
    }

    /// Returns true if no callback is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reports progress to every callback. Reports that precede the first
    /// download are ignored.
    pub fn update(&self, progress: SyncProgress) {
        if progress.download_version == 0 {
            return;
        }
        let calls: Vec<(ProgressCallback, u64, u64)> = {
            let mut state = self.state.lock();
            state.current = Some(progress);
            let mut calls = Vec::new();
            state.packages.retain(|token, package| {
                let invocation = package.invocation(&progress);
                calls.extend(invocation.call);
                if invocation.expired {
                    trace!(token, "Progress callback expired");
                }
                !invocation.expired
            });
            calls
        };
        for (callback, transferred, transferable) in calls {
            callback(transferred, transferable);
        }
    }
}

impl std::fmt::Debug for ProgressNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ProgressNotifier")
            .field("callbacks", &state.packages.len())
            .field("current", &state.current)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Calls = Arc<Mutex<Vec<(u64, u64)>>>;

    fn recorder() -> (Calls, impl Fn(u64, u64) + Send + Sync + 'static) {
        let calls: Calls = Arc::default();
        let sink = Arc::clone(&calls);
        (calls, move |t, total| sink.lock().push((t, total)))
    }

    fn download(downloaded: u64, downloadable: u64) -> SyncProgress {
        SyncProgress {
            downloaded,
            downloadable,
            download_version: 1,
            ..SyncProgress::default()
        }
    }

    fn upload(uploaded: u64, uploadable: u64, snapshot_version: u64) -> SyncProgress {
        SyncProgress {
            uploaded,
            uploadable,
            snapshot_version,
            download_version: 1,
            ..SyncProgress::default()
        }
    }

    #[test]
    fn registration_before_progress_waits() {
        let notifier = ProgressNotifier::new();
        let (calls, callback) = recorder();
        let token = notifier.register(callback, ProgressDirection::Download, true);
        assert_eq!(token, 1);
        assert!(calls.lock().is_empty());

        notifier.update(download(100, 200));
        assert_eq!(*calls.lock(), vec![(100, 200)]);
    }

    #[test]
    fn updates_before_first_download_are_ignored() {
        let notifier = ProgressNotifier::new();
        let (calls, callback) = recorder();
        notifier.register(callback, ProgressDirection::Download, true);
        notifier.update(SyncProgress {
            downloaded: 5,
            downloadable: 10,
            ..SyncProgress::default()
        });
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn streaming_follows_every_update() {
        let notifier = ProgressNotifier::new();
        let (calls, callback) = recorder();
        notifier.register(callback, ProgressDirection::Download, true);
        notifier.update(download(100, 100));
        notifier.update(download(150, 300));
        notifier.update(download(300, 300));
        assert_eq!(*calls.lock(), vec![(100, 100), (150, 300), (300, 300)]);
        assert_eq!(notifier.len(), 1);
    }

    #[test]
    fn non_streaming_captures_and_expires() {
        let notifier = ProgressNotifier::new();
        notifier.update(download(100, 200));
        let (calls, callback) = recorder();
        let token = notifier.register(callback, ProgressDirection::Download, false);
        assert_ne!(token, 0);

        notifier.update(download(150, 400));
        notifier.update(download(200, 400));
        notifier.update(download(250, 400));
        assert_eq!(*calls.lock(), vec![(100, 200), (150, 200), (200, 200)]);
        assert!(notifier.is_empty());
    }

    #[test]
    fn non_streaming_takes_a_smaller_total() {
        let notifier = ProgressNotifier::new();
        let (calls, callback) = recorder();
        notifier.register(callback, ProgressDirection::Download, false);
        notifier.update(download(100, 1000));
        notifier.update(download(500, 600));
        notifier.update(download(600, 600));
        assert_eq!(*calls.lock(), vec![(100, 1000), (500, 600), (600, 600)]);
        assert!(notifier.is_empty());
    }

    #[test]
    fn completed_transfer_returns_token_zero() {
        let notifier = ProgressNotifier::new();
        notifier.update(download(200, 200));
        let (calls, callback) = recorder();
        assert_eq!(notifier.register(callback, ProgressDirection::Download, false), 0);
        assert_eq!(*calls.lock(), vec![(200, 200)]);
        assert!(notifier.is_empty());
    }

    #[test]
    fn upload_waits_for_local_version() {
        let notifier = ProgressNotifier::new();
        notifier.update(upload(10, 100, 1));
        notifier.set_local_version(3);
        let (calls, callback) = recorder();
        notifier.register(callback, ProgressDirection::Upload, false);
        assert!(calls.lock().is_empty());

        notifier.update(upload(20, 100, 2));
        assert!(calls.lock().is_empty());
        notifier.update(upload(30, 120, 3));
        notifier.update(upload(120, 120, 4));
        assert_eq!(*calls.lock(), vec![(30, 120), (120, 120)]);
    }

    #[test]
    fn unregistered_callback_stops() {
        let notifier = ProgressNotifier::new();
        let (calls, callback) = recorder();
        let token = notifier.register(callback, ProgressDirection::Upload, true);
        notifier.update(upload(1, 10, 0));
        notifier.unregister(token);
        notifier.update(upload(2, 10, 0));
        notifier.unregister(token);
        assert_eq!(*calls.lock(), vec![(1, 10)]);
    }

    #[test]
    fn directions_are_independent() {
        let notifier = ProgressNotifier::new();
        let (ups, up) = recorder();
        let (downs, down) = recorder();
        notifier.register(up, ProgressDirection::Upload, true);
        notifier.register(down, ProgressDirection::Download, true);
        notifier.update(SyncProgress {
            uploaded: 1,
            uploadable: 2,
            downloaded: 3,
            downloadable: 4,
            snapshot_version: 0,
            download_version: 1,
        });
        assert_eq!(*ups.lock(), vec![(1, 2)]);
        assert_eq!(*downs.lock(), vec![(3, 4)]);
    }

    #[test]
    fn callback_may_register_another() {
        let notifier = Arc::new(ProgressNotifier::new());
        let (calls, inner) = recorder();
        let inner = Arc::new(inner);
        let registrar = Arc::clone(&notifier);
        let registered = Arc::new(Mutex::new(false));
        let once = Arc::clone(&registered);
        notifier.register(
            move |_, _| {
                let mut done = once.lock();
                if !*done {
                    *done = true;
                    let inner = Arc::clone(&inner);
                    registrar.register(move |t, total| inner(t, total), ProgressDirection::Download, true);
                }
            },
            ProgressDirection::Download,
            true,
        );
        notifier.update(download(1, 2));
        assert!(*registered.lock());
        assert_eq!(*calls.lock(), vec![(1, 2)]);
        assert_eq!(notifier.len(), 2);
    }
}
