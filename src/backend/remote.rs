//! Backend for live remote mail stores.
//!
//! [`RemoteBackend`] holds the sync logic shared by every server-backed
//! protocol. The protocol itself sits behind [`RemoteStore`], which lists
//! folders and messages and carries out server-side operations.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{Flag, FolderInfo, FolderNode, Message};
use crate::services::{
    flatten_folder_tree, FolderReconciler, MessageSync, RemoteMessage, RemoteMessageSource,
    SyncStrategy,
};
use crate::storage::BackendStorage;

use super::capabilities::{Capabilities, Capability, Support};
use super::config::{ExpungePolicy, SyncConfig};
use super::listener::SyncListener;
use super::traits::{Backend, BackendError, BackendPusher, BackendPusherCallback, Result};

/// How much of a message to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPart {
    /// Headers only.
    Headers,
    /// At most this many bytes.
    UpTo(u64),
    /// The complete message.
    Full,
}

/// Raw message content returned by a [`RemoteStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Downloaded bytes, possibly truncated.
    pub raw: Vec<u8>,
    /// Full size on the server.
    pub size: u64,
    pub flags: HashSet<Flag>,
}

fn not_supported<T>(operation: &'static str) -> Result<T> {
    Err(BackendError::NotSupported { operation })
}

/// Protocol client for a server-backed store.
///
/// Only listing and fetching are required. Everything else defaults to
/// [`BackendError::NotSupported`] and should be overridden together with
/// the matching capability.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Separator between parent and child folder ids.
    fn path_delimiter(&self) -> &str {
        "/"
    }

    /// Folders that exist even when the listing leaves them out.
    fn protected_folders(&self) -> Vec<FolderInfo> {
        Vec::new()
    }

    async fn list_folders(&self) -> Result<Vec<FolderNode>>;

    /// Lists messages oldest first, `None` if the folder does not exist.
    async fn list_messages(&self, folder: &str) -> Result<Option<Vec<RemoteMessage>>>;

    async fn fetch_message(
        &self,
        folder: &str,
        server_id: &str,
        part: FetchPart,
    ) -> Result<FetchedMessage>;

    async fn set_flags(
        &self,
        _folder: &str,
        _server_ids: &[String],
        _flag: Flag,
        _value: bool,
    ) -> Result<()> {
        not_supported("set_flag")
    }

    /// Sets or clears a flag on every message of a folder.
    async fn flag_all(&self, _folder: &str, _flag: Flag, _value: bool) -> Result<()> {
        not_supported("mark_all_as_read")
    }

    /// Expunges the given messages, or all deleted messages for `None`.
    async fn expunge(&self, _folder: &str, _server_ids: Option<&[String]>) -> Result<()> {
        not_supported("expunge")
    }

    async fn delete(&self, _folder: &str, _server_ids: &[String]) -> Result<()> {
        not_supported("delete_messages")
    }

    async fn delete_all(&self, _folder: &str) -> Result<()> {
        not_supported("delete_all_messages")
    }

    async fn move_messages(
        &self,
        _source: &str,
        _destination: &str,
        _server_ids: &[String],
    ) -> Result<HashMap<String, String>> {
        not_supported("move_messages")
    }

    async fn copy_messages(
        &self,
        _source: &str,
        _destination: &str,
        _server_ids: &[String],
    ) -> Result<HashMap<String, String>> {
        not_supported("copy_messages")
    }

    async fn search(
        &self,
        _folder: &str,
        _query: Option<&str>,
        _required_flags: &HashSet<Flag>,
        _forbidden_flags: &HashSet<Flag>,
        _full_text: bool,
    ) -> Result<Vec<String>> {
        not_supported("search")
    }

    async fn append_message(
        &self,
        _folder: &str,
        _raw: &[u8],
        _flags: &HashSet<Flag>,
    ) -> Result<Option<String>> {
        not_supported("upload_message")
    }

    async fn send_message(&self, _raw: &[u8]) -> Result<()> {
        not_supported("send_message")
    }

    fn create_pusher(
        &self,
        _callback: Arc<dyn BackendPusherCallback>,
    ) -> Result<Box<dyn BackendPusher>> {
        not_supported("create_pusher")
    }
}

/// Backend over a [`RemoteStore`], syncing folders incrementally.
pub struct RemoteBackend<R> {
    store: Arc<R>,
    storage: Arc<dyn BackendStorage>,
    reconciler: FolderReconciler,
    message_sync: MessageSync,
    download_limit: u64,
}

impl<R: RemoteStore> RemoteBackend<R> {
    pub fn new(store: Arc<R>, storage: Arc<dyn BackendStorage>) -> Self {
        Self {
            store,
            reconciler: FolderReconciler::new(storage.clone()),
            message_sync: MessageSync::new(storage.clone(), SyncStrategy::Delta),
            storage,
            download_limit: SyncConfig::default().maximum_auto_download_message_size,
        }
    }

    /// Sets the size above which `download_message` fetches partially.
    pub fn with_download_limit(mut self, bytes: u64) -> Self {
        self.download_limit = bytes;
        self
    }

    fn part_for(size: u64, limit: u64) -> FetchPart {
        if limit > 0 && size > limit {
            FetchPart::UpTo(limit)
        } else {
            FetchPart::Full
        }
    }

    fn to_message(server_id: &str, fetched: FetchedMessage, part: FetchPart) -> Result<Message> {
        let mut message = Message::parse(server_id, fetched.raw)?;
        message.size = fetched.size.max(message.size);
        message.flags = fetched.flags;
        if part == FetchPart::Headers {
            message.body = None;
        }
        Ok(message)
    }

    async fn download(&self, folder: &str, server_id: &str, part: FetchPart) -> Result<()> {
        let fetched = self.store.fetch_message(folder, server_id, part).await?;
        let message = Self::to_message(server_id, fetched, part)?;
        let state = message.download_state();
        self.storage
            .folder(folder)
            .save_message(&message, state)
            .await?;
        debug!(folder = %folder, message = %server_id, state = state.as_str(), "message downloaded");
        Ok(())
    }

    /// Copies by downloading each message and uploading it to `destination`.
    async fn copy_by_upload(
        &self,
        source: &str,
        destination: &str,
        server_ids: &[String],
    ) -> Result<HashMap<String, String>> {
        debug!(source = %source, destination = %destination, count = server_ids.len(), "copying by upload");
        let mut mapping = HashMap::with_capacity(server_ids.len());
        for server_id in server_ids {
            let fetched = self
                .store
                .fetch_message(source, server_id, FetchPart::Full)
                .await?;
            let new_id = self
                .store
                .append_message(destination, &fetched.raw, &fetched.flags)
                .await?
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            mapping.insert(server_id.clone(), new_id);
        }
        Ok(mapping)
    }
}

#[async_trait]
impl<R: RemoteStore> RemoteMessageSource for RemoteBackend<R> {
    async fn remote_messages(&self, folder: &str) -> Result<Option<Vec<RemoteMessage>>> {
        self.store.list_messages(folder).await
    }

    async fn fetch_message(
        &self,
        folder: &str,
        remote: &RemoteMessage,
        config: &SyncConfig,
    ) -> Result<Message> {
        let part = Self::part_for(remote.size, config.maximum_auto_download_message_size);
        let fetched = self
            .store
            .fetch_message(folder, &remote.server_id, part)
            .await?;
        Self::to_message(&remote.server_id, fetched, part)
    }
}

#[async_trait]
impl<R: RemoteStore> Backend for RemoteBackend<R> {
    fn capabilities(&self) -> Capabilities {
        self.store.capabilities()
    }

    async fn refresh_folder_list(&self) -> Result<()> {
        let tree = self.store.list_folders().await?;

        let mut known: HashMap<String, FolderInfo> =
            flatten_folder_tree(&tree, self.store.path_delimiter())
                .into_iter()
                .map(|info| (info.server_id.clone(), info))
                .collect();
        let remote_ids: Vec<String> = known.keys().cloned().collect();

        let protected = self.store.protected_folders();
        let protected_ids: Vec<&str> = protected.iter().map(|f| f.server_id.as_str()).collect();
        for info in &protected {
            known
                .entry(info.server_id.clone())
                .or_insert_with(|| info.clone());
        }

        let changes = self
            .reconciler
            .reconcile(remote_ids, &protected_ids, |id| known.get(id).cloned())
            .await?;

        if !changes.is_empty() {
            info!(created = ?changes.created, removed = ?changes.removed, "remote folders changed");
        }
        Ok(())
    }

    async fn sync(&self, folder: &str, config: &SyncConfig, listener: &mut dyn SyncListener) {
        if config.expunge_policy == ExpungePolicy::OnPoll && self.capabilities().supports_expunge()
        {
            if let Err(e) = self.store.expunge(folder, None).await {
                warn!(folder = %folder, error = %e, "expunge before sync failed");
            }
        }

        self.message_sync.sync(self, folder, config, listener).await;
    }

    async fn download_message(&self, folder: &str, server_id: &str) -> Result<()> {
        let listing = self
            .store
            .list_messages(folder)
            .await?
            .ok_or_else(|| BackendError::FolderNotFound(folder.to_string()))?;
        let remote = listing
            .iter()
            .find(|m| m.server_id == server_id)
            .ok_or_else(|| BackendError::NotFound(server_id.to_string()))?;

        self.download(folder, server_id, Self::part_for(remote.size, self.download_limit))
            .await
    }

    async fn download_message_structure(&self, folder: &str, server_id: &str) -> Result<()> {
        self.download(folder, server_id, FetchPart::Headers).await
    }

    async fn download_complete_message(&self, folder: &str, server_id: &str) -> Result<()> {
        self.download(folder, server_id, FetchPart::Full).await
    }

    async fn set_flag(
        &self,
        folder: &str,
        server_ids: &[String],
        flag: Flag,
        value: bool,
    ) -> Result<()> {
        match self.capabilities().check(Capability::Flags, "set_flag")? {
            Support::Native => self.store.set_flags(folder, server_ids, flag, value).await,
            Support::Simulated => Ok(()),
        }
    }

    async fn mark_all_as_read(&self, folder: &str) -> Result<()> {
        match self
            .capabilities()
            .check(Capability::Flags, "mark_all_as_read")?
        {
            Support::Native => self.store.flag_all(folder, Flag::Seen, true).await,
            Support::Simulated => Ok(()),
        }
    }

    async fn expunge(&self, folder: &str) -> Result<()> {
        self.capabilities().check(Capability::Expunge, "expunge")?;
        self.store.expunge(folder, None).await
    }

    async fn expunge_messages(&self, folder: &str, server_ids: &[String]) -> Result<()> {
        self.capabilities()
            .check(Capability::Expunge, "expunge_messages")?;
        self.store.expunge(folder, Some(server_ids)).await
    }

    async fn delete_messages(&self, folder: &str, server_ids: &[String]) -> Result<()> {
        self.store.delete(folder, server_ids).await
    }

    async fn delete_all_messages(&self, folder: &str) -> Result<()> {
        self.store.delete_all(folder).await
    }

    async fn move_messages(
        &self,
        source: &str,
        destination: &str,
        server_ids: &[String],
    ) -> Result<HashMap<String, String>> {
        let capabilities = self.capabilities();
        if capabilities.supports_move() {
            return self
                .store
                .move_messages(source, destination, server_ids)
                .await;
        }

        capabilities.check(Capability::Copy, "move_messages")?;
        debug!(source = %source, destination = %destination, "moving by copy and delete");
        let mapping = self.copy_messages(source, destination, server_ids).await?;
        self.store.delete(source, server_ids).await?;
        Ok(mapping)
    }

    async fn move_messages_and_mark_as_read(
        &self,
        source: &str,
        destination: &str,
        server_ids: &[String],
    ) -> Result<HashMap<String, String>> {
        let mapping = self.move_messages(source, destination, server_ids).await?;

        if self.capabilities().supports_flags() && !mapping.is_empty() {
            let moved: Vec<String> = mapping.values().cloned().collect();
            self.store
                .set_flags(destination, &moved, Flag::Seen, true)
                .await?;
        }
        Ok(mapping)
    }

    async fn copy_messages(
        &self,
        source: &str,
        destination: &str,
        server_ids: &[String],
    ) -> Result<HashMap<String, String>> {
        match self.capabilities().check(Capability::Copy, "copy_messages")? {
            Support::Native => {
                self.store
                    .copy_messages(source, destination, server_ids)
                    .await
            }
            Support::Simulated => self.copy_by_upload(source, destination, server_ids).await,
        }
    }

    async fn search(
        &self,
        folder: &str,
        query: Option<&str>,
        required_flags: &HashSet<Flag>,
        forbidden_flags: &HashSet<Flag>,
        full_text: bool,
    ) -> Result<Vec<String>> {
        self.store
            .search(folder, query, required_flags, forbidden_flags, full_text)
            .await
    }

    async fn upload_message(&self, folder: &str, message: &Message) -> Result<Option<String>> {
        self.capabilities()
            .check(Capability::Upload, "upload_message")?;
        let raw = message.body.as_deref().ok_or_else(|| {
            BackendError::Permanent(format!("message {} has no content", message.server_id))
        })?;
        self.store.append_message(folder, raw, &message.flags).await
    }

    async fn send_message(&self, message: &Message) -> Result<()> {
        let raw = message.body.as_deref().ok_or_else(|| {
            BackendError::Permanent(format!("message {} has no content", message.server_id))
        })?;
        self.store.send_message(raw).await
    }

    fn create_pusher(
        &self,
        callback: Arc<dyn BackendPusherCallback>,
    ) -> Result<Box<dyn BackendPusher>> {
        self.capabilities().check(Capability::Push, "create_pusher")?;
        self.store.create_pusher(callback)
    }
}
