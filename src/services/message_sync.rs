//! Per-folder message synchronization.
//!
//! [`MessageSync`] runs one folder sync against a [`RemoteMessageSource`]
//! and writes the result through the storage facade. Every run emits
//! `sync_started` and then exactly one of `sync_finished` or `sync_failed`.
//!
//! Two strategies exist. Fixture backends populate a folder once and treat
//! it as synced after the first complete pass. Live backends fetch only messages
//! missing locally and, depending on [`SyncConfig`], prune messages that
//! disappeared remotely and copy flag changes onto stored messages.
//!
//! The first message that fails to load or save aborts the pass.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::backend::{BackendError, Result, SyncConfig, SyncListener, SyncSession};
use crate::domain::{Flag, Message, MoreMessages};
use crate::storage::{BackendFolder, BackendStorage};

/// Failure message reported for folders unknown to the remote side.
pub const FOLDER_DOES_NOT_EXIST: &str = "Folder doesn't exist";

/// A message as listed by the remote side, before it is downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    pub server_id: String,
    /// Remote flags, `None` when the source does not report flags.
    pub flags: Option<HashSet<Flag>>,
    pub date: Option<DateTime<Utc>>,
    pub size: u64,
}

impl RemoteMessage {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            flags: None,
            date: None,
            size: 0,
        }
    }
}

/// Where message listings and message contents come from.
#[async_trait]
pub trait RemoteMessageSource: Send + Sync {
    /// Lists the messages of a folder, oldest first.
    ///
    /// Returns `None` if the folder does not exist remotely.
    async fn remote_messages(&self, folder: &str) -> Result<Option<Vec<RemoteMessage>>>;

    /// Loads one listed message.
    async fn fetch_message(
        &self,
        folder: &str,
        remote: &RemoteMessage,
        config: &SyncConfig,
    ) -> Result<Message>;
}

/// How a folder is brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Populate a folder once, never touch it after a complete pass.
    PopulateOnce,
    /// Fetch what is missing locally and apply remote changes.
    Delta,
}

#[derive(Debug, Default)]
struct PassStats {
    new_messages: usize,
    removed: usize,
    flags_changed: usize,
}

/// Runs folder syncs for one account.
#[derive(Clone)]
pub struct MessageSync {
    storage: Arc<dyn BackendStorage>,
    strategy: SyncStrategy,
}

impl MessageSync {
    pub fn new(storage: Arc<dyn BackendStorage>, strategy: SyncStrategy) -> Self {
        Self { storage, strategy }
    }

    /// Synchronizes `folder`, reporting the outcome to `listener`.
    pub async fn sync(
        &self,
        source: &dyn RemoteMessageSource,
        folder: &str,
        config: &SyncConfig,
        listener: &mut dyn SyncListener,
    ) {
        info!(folder = %folder, strategy = ?self.strategy, "synchronizing folder");

        let backend_folder = self.storage.folder(folder);
        let mut session = SyncSession::start(folder, listener);

        match self
            .run(source, backend_folder.as_ref(), config, &mut session)
            .await
        {
            Ok(Some(stats)) => {
                if let Err(e) = backend_folder.set_last_checked(Utc::now()).await {
                    warn!(folder = %folder, error = %e, "failed to record last check");
                }
                if let Err(e) = backend_folder.set_status(None).await {
                    warn!(folder = %folder, error = %e, "failed to clear folder status");
                }
                session.folder_status_changed();
                info!(
                    folder = %folder,
                    new_messages = stats.new_messages,
                    removed = stats.removed,
                    flags_changed = stats.flags_changed,
                    "folder synchronized"
                );
                session.finish();
            }
            Ok(None) => {
                debug!(folder = %folder, "folder already populated");
                session.finish();
            }
            Err(err) => {
                let message = match &err {
                    BackendError::FolderNotFound(_) => FOLDER_DOES_NOT_EXIST.to_string(),
                    other => other.to_string(),
                };
                if matches!(err, BackendError::Inconsistent(_)) {
                    warn!(folder = %folder, error = %err, "inconsistent remote state");
                } else {
                    warn!(folder = %folder, error = %err, "folder sync failed");
                }
                if let Err(e) = backend_folder.set_status(Some(&message)).await {
                    warn!(folder = %folder, error = %e, "failed to record folder status");
                }
                if let Err(e) = backend_folder.set_last_checked(Utc::now()).await {
                    warn!(folder = %folder, error = %e, "failed to record last check");
                }
                session.fail(&message, Some(&err));
            }
        }
    }

    /// Returns `None` when a populate-once folder was already populated.
    async fn run(
        &self,
        source: &dyn RemoteMessageSource,
        folder: &dyn BackendFolder,
        config: &SyncConfig,
        session: &mut SyncSession<'_>,
    ) -> Result<Option<PassStats>> {
        let folder_id = folder.server_id().to_string();

        let remote = source
            .remote_messages(&folder_id)
            .await?
            .ok_or_else(|| BackendError::FolderNotFound(folder_id.clone()))?;

        let local = folder.message_server_ids().await?;

        let mut stats = PassStats::default();
        let (to_fetch, more_messages) = match self.strategy {
            SyncStrategy::PopulateOnce => {
                // Only a pass that got through every message marks the folder populated.
                if folder.more_messages().await? == MoreMessages::False {
                    return Ok(None);
                }
                let missing = remote
                    .into_iter()
                    .filter(|m| !local.contains(&m.server_id))
                    .collect();
                (missing, MoreMessages::False)
            }
            SyncStrategy::Delta => {
                self.apply_remote_changes(folder, remote, &local, config, session, &mut stats)
                    .await?
            }
        };

        let total = to_fetch.len();
        for (index, remote) in to_fetch.iter().enumerate() {
            let message = source.fetch_message(&folder_id, remote, config).await?;
            let state = message.download_state();
            folder.save_message(&message, state).await?;

            session.new_message(&remote.server_id, false);
            session.progress(index + 1, total);
            stats.new_messages += 1;
        }

        folder.set_more_messages(more_messages).await?;

        Ok(Some(stats))
    }

    /// Applies the listing policy, prunes and updates stored messages, and
    /// returns the messages still to download.
    async fn apply_remote_changes(
        &self,
        folder: &dyn BackendFolder,
        remote: Vec<RemoteMessage>,
        local: &HashSet<String>,
        config: &SyncConfig,
        session: &mut SyncSession<'_>,
        stats: &mut PassStats,
    ) -> Result<(Vec<RemoteMessage>, MoreMessages)> {
        session.headers_started();
        let listed = remote.len();

        let mut visible: Vec<RemoteMessage> = remote
            .into_iter()
            .filter(|m| match (config.earliest_poll_date, m.date) {
                (Some(earliest), Some(date)) => date >= earliest,
                _ => true,
            })
            .collect();

        let limit = config.default_visible_limit;
        let truncated = limit > 0 && visible.len() > limit;
        if truncated {
            visible = visible.split_off(visible.len() - limit);
        }

        session.headers_progress(visible.len(), listed);
        session.headers_finished(listed, visible.len());

        let remote_ids: HashSet<&str> = visible.iter().map(|m| m.server_id.as_str()).collect();

        if config.sync_remote_deletions {
            let mut gone: Vec<String> = local
                .iter()
                .filter(|id| !remote_ids.contains(id.as_str()))
                .cloned()
                .collect();
            gone.sort();

            if !gone.is_empty() {
                folder.destroy_messages(&gone).await?;
                for server_id in &gone {
                    session.removed_message(server_id);
                }
                stats.removed = gone.len();
            }
        }

        let mut to_fetch = Vec::new();
        for remote in visible {
            if !local.contains(&remote.server_id) {
                to_fetch.push(remote);
                continue;
            }

            let Some(remote_flags) = &remote.flags else {
                continue;
            };
            if self.sync_flags(folder, &remote.server_id, remote_flags, config).await? {
                session.flag_changed(&remote.server_id);
                stats.flags_changed += 1;
            }
        }

        let more_messages = if truncated {
            MoreMessages::True
        } else {
            MoreMessages::False
        };

        Ok((to_fetch, more_messages))
    }

    /// Copies the configured flags from the server. Returns whether any changed.
    async fn sync_flags(
        &self,
        folder: &dyn BackendFolder,
        server_id: &str,
        remote_flags: &HashSet<Flag>,
        config: &SyncConfig,
    ) -> Result<bool> {
        let Some(local_flags) = folder.message_flags(server_id).await? else {
            return Ok(false);
        };

        let mut changed = false;
        for flag in &config.sync_flags {
            let remote_set = remote_flags.contains(flag);
            if remote_set != local_flags.contains(flag) {
                folder.set_message_flag(server_id, *flag, remote_set).await?;
                changed = true;
            }
        }

        Ok(changed)
    }
}
