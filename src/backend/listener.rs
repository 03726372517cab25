//! Sync listener and the per-folder sync state machine.
//!
//! A folder sync moves `NotStarted -> Started -> Finished | Failed`.
//! [`SyncSession`] is the only way backends talk to a listener during
//! `sync`, so a terminal event is sent exactly once and nothing is sent
//! after it.

use super::traits::BackendError;

/// Message reported when a session is dropped before it terminated.
pub const SYNC_ABORTED: &str = "Sync aborted";

/// Receives the events of one `Backend::sync` call.
pub trait SyncListener: Send {
    fn sync_started(&mut self, folder: &str);

    fn sync_headers_started(&mut self, _folder: &str) {}

    fn sync_headers_progress(&mut self, _folder: &str, _completed: usize, _total: usize) {}

    fn sync_headers_finished(&mut self, _folder: &str, _total: usize, _completed: usize) {}

    fn sync_progress(&mut self, _folder: &str, _completed: usize, _total: usize) {}

    /// A message was stored. `is_old_message` is set for messages older
    /// than the newest one already present.
    fn sync_new_message(&mut self, folder: &str, server_id: &str, is_old_message: bool);

    fn sync_removed_message(&mut self, _folder: &str, _server_id: &str) {}

    fn sync_flag_changed(&mut self, _folder: &str, _server_id: &str) {}

    fn sync_finished(&mut self, folder: &str);

    fn sync_failed(&mut self, folder: &str, message: &str, cause: Option<&BackendError>);

    fn folder_status_changed(&mut self, _folder: &str) {}
}

/// State of a folder sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncState {
    #[default]
    NotStarted,
    Started,
    Finished,
    Failed,
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Returns whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: SyncState) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Started)
                | (Self::Started, Self::Finished)
                | (Self::Started, Self::Failed)
        )
    }
}

/// One folder sync in progress.
///
/// Created in the `Started` state. [`finish`](Self::finish) and
/// [`fail`](Self::fail) consume the session. Dropping a session that was
/// neither finished nor failed reports [`SYNC_ABORTED`].
pub struct SyncSession<'a> {
    folder: String,
    listener: &'a mut dyn SyncListener,
    state: SyncState,
}

impl<'a> SyncSession<'a> {
    /// Emits `sync_started` and returns the running session.
    pub fn start(folder: &str, listener: &'a mut dyn SyncListener) -> Self {
        listener.sync_started(folder);
        Self {
            folder: folder.to_string(),
            listener,
            state: SyncState::Started,
        }
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn headers_started(&mut self) {
        self.listener.sync_headers_started(&self.folder);
    }

    pub fn headers_progress(&mut self, completed: usize, total: usize) {
        self.listener
            .sync_headers_progress(&self.folder, completed, total);
    }

    pub fn headers_finished(&mut self, total: usize, completed: usize) {
        self.listener
            .sync_headers_finished(&self.folder, total, completed);
    }

    pub fn progress(&mut self, completed: usize, total: usize) {
        self.listener.sync_progress(&self.folder, completed, total);
    }

    pub fn new_message(&mut self, server_id: &str, is_old_message: bool) {
        self.listener
            .sync_new_message(&self.folder, server_id, is_old_message);
    }

    pub fn removed_message(&mut self, server_id: &str) {
        self.listener.sync_removed_message(&self.folder, server_id);
    }

    pub fn flag_changed(&mut self, server_id: &str) {
        self.listener.sync_flag_changed(&self.folder, server_id);
    }

    pub fn folder_status_changed(&mut self) {
        self.listener.folder_status_changed(&self.folder);
    }

    pub fn finish(mut self) {
        self.state = SyncState::Finished;
        self.listener.sync_finished(&self.folder);
    }

    pub fn fail(mut self, message: &str, cause: Option<&BackendError>) {
        self.state = SyncState::Failed;
        self.listener.sync_failed(&self.folder, message, cause);
    }
}

impl Drop for SyncSession<'_> {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            self.state = SyncState::Failed;
            tracing::warn!(folder = %self.folder, "folder sync ended without a result");
            self.listener.sync_failed(&self.folder, SYNC_ABORTED, None);
        }
    }
}
