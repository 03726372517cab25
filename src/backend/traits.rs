//! Backend trait definition.
//!
//! This module defines the [`Backend`] trait every mail store adapter
//! implements. The sync engine only talks to mail stores through it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{Flag, Message, MessageParseError};
use crate::storage::StorageError;

use super::capabilities::Capabilities;
use super::config::SyncConfig;
use super::listener::SyncListener;

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur during backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend lacks the capability for this operation.
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// Name of the rejected operation.
        operation: &'static str,
    },

    /// A message does not exist.
    #[error("message not found: {0}")]
    NotFound(String),

    /// A folder does not exist on the remote side.
    #[error("folder not found: {0}")]
    FolderNotFound(String),

    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or server hiccup worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Remote and local state disagree, e.g. a listed message cannot be loaded.
    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    /// Failure that will not go away by retrying.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Local storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl BackendError {
    /// Returns whether a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Inconsistent(_) | Self::Storage(_)
        )
    }
}

impl From<MessageParseError> for BackendError {
    fn from(err: MessageParseError) -> Self {
        Self::Inconsistent(err.to_string())
    }
}

/// Receives push notifications from a [`BackendPusher`].
pub trait BackendPusherCallback: Send + Sync {
    /// New mail may be available in `folder`.
    fn on_push_event(&self, folder: &str);

    /// The push connection failed.
    fn on_push_error(&self, error: &BackendError);

    /// The server turned out not to support push after all.
    fn on_push_not_supported(&self);
}

/// Long-lived push connection watching a set of folders.
pub trait BackendPusher: Send {
    fn start(&mut self);

    /// Replaces the set of watched folders.
    fn update_folders(&mut self, folders: &[String]);

    fn stop(&mut self);
}

/// A mail store the engine can synchronize with.
///
/// Implementations must be shareable across tasks. Operations that need a
/// capability check it first and fail fast with
/// [`BackendError::NotSupported`] when it is missing.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the fixed capabilities of this backend.
    fn capabilities(&self) -> Capabilities;

    /// Brings the local folder list in line with the remote one.
    async fn refresh_folder_list(&self) -> Result<()>;

    /// Synchronizes the messages of one folder.
    ///
    /// Never returns an error. Every outcome is reported to `listener`,
    /// which sees `sync_started` first and exactly one of `sync_finished`
    /// or `sync_failed` last.
    async fn sync(&self, folder: &str, config: &SyncConfig, listener: &mut dyn SyncListener);

    /// Downloads a message according to the auto-download size limit.
    async fn download_message(&self, folder: &str, server_id: &str) -> Result<()>;

    /// Downloads the envelope and structure of a message without bodies.
    async fn download_message_structure(&self, folder: &str, server_id: &str) -> Result<()>;

    /// Downloads the complete message.
    async fn download_complete_message(&self, folder: &str, server_id: &str) -> Result<()>;

    async fn set_flag(
        &self,
        folder: &str,
        server_ids: &[String],
        flag: Flag,
        value: bool,
    ) -> Result<()>;

    async fn mark_all_as_read(&self, folder: &str) -> Result<()>;

    /// Permanently removes every message marked as deleted.
    async fn expunge(&self, folder: &str) -> Result<()>;

    async fn expunge_messages(&self, folder: &str, server_ids: &[String]) -> Result<()>;

    async fn delete_messages(&self, folder: &str, server_ids: &[String]) -> Result<()>;

    async fn delete_all_messages(&self, folder: &str) -> Result<()>;

    /// Moves messages, returning a map from old to new server id.
    async fn move_messages(
        &self,
        source: &str,
        destination: &str,
        server_ids: &[String],
    ) -> Result<HashMap<String, String>>;

    async fn move_messages_and_mark_as_read(
        &self,
        source: &str,
        destination: &str,
        server_ids: &[String],
    ) -> Result<HashMap<String, String>>;

    /// Copies messages, returning a map from old to new server id.
    async fn copy_messages(
        &self,
        source: &str,
        destination: &str,
        server_ids: &[String],
    ) -> Result<HashMap<String, String>>;

    /// Searches a folder on the server, returning matching server ids.
    async fn search(
        &self,
        folder: &str,
        query: Option<&str>,
        required_flags: &HashSet<Flag>,
        forbidden_flags: &HashSet<Flag>,
        full_text: bool,
    ) -> Result<Vec<String>>;

    /// Stores a message in a folder, returning its new server id if known.
    async fn upload_message(&self, folder: &str, message: &Message) -> Result<Option<String>>;

    async fn send_message(&self, message: &Message) -> Result<()>;

    /// Opens a push connection. Fails unless the backend is push capable.
    fn create_pusher(
        &self,
        callback: Arc<dyn BackendPusherCallback>,
    ) -> Result<Box<dyn BackendPusher>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(BackendError::Transient("timeout".into()).is_retryable());
        assert!(BackendError::Inconsistent("gone".into()).is_retryable());
        assert!(BackendError::Storage(StorageError::TaskFailed("x".into())).is_retryable());

        assert!(!BackendError::NotSupported { operation: "expunge" }.is_retryable());
        assert!(!BackendError::Authentication("bad password".into()).is_retryable());
        assert!(!BackendError::Permanent("quota".into()).is_retryable());
        assert!(!BackendError::FolderNotFound("Work".into()).is_retryable());
    }

    #[test]
    fn parse_errors_are_inconsistencies() {
        let err: BackendError = MessageParseError {
            server_id: "9".into(),
        }
        .into();
        assert!(matches!(err, BackendError::Inconsistent(_)));
    }

    #[test]
    fn error_messages() {
        let err = BackendError::NotSupported { operation: "search" };
        assert_eq!(err.to_string(), "operation not supported: search");
    }
}
