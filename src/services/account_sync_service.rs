//! Account-level sync driver.
//!
//! The [`AccountSyncService`] refreshes an account's folder list and then
//! syncs each tracked folder through the account's backend. Folder
//! failures are isolated: one failing folder does not stop the others,
//! it only marks the whole pass as failed.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::backend::{
    Backend, BackendError, BackendManager, SyncConfig, SyncListener, SYNC_ABORTED,
};
use crate::config::SyncSettings;
use crate::domain::AccountId;
use crate::storage::{BackendStorageFactory, StorageError};

use super::account_service::{AccountError, AccountService};
use super::folder_lock::FolderSyncLocks;

/// Errors returned by manual sync requests.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// The folder is already being synced.
    #[error("sync of {folder} for {account_id} already in progress")]
    AlreadyInProgress { account_id: AccountId, folder: String },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for sync requests.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Event emitted by the sync service.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Sync started for an account.
    Started(AccountId),
    FolderStarted {
        account_id: AccountId,
        folder: String,
    },
    NewMessage {
        account_id: AccountId,
        folder: String,
        server_id: String,
    },
    FolderFinished {
        account_id: AccountId,
        folder: String,
    },
    FolderFailed {
        account_id: AccountId,
        folder: String,
        message: String,
        retryable: bool,
    },
    /// Sync completed, possibly with failed folders.
    Completed(AccountId, SyncReport),
    /// Sync could not run at all.
    Failed(AccountId, String),
}

/// How one folder sync ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderOutcome {
    Finished { new_messages: usize },
    Failed { message: String, retryable: bool },
}

/// Result of syncing one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Folders that finished.
    pub folders_synced: Vec<String>,
    /// Folders that failed, with the failure message.
    pub folders_failed: Vec<(String, String)>,
    /// Folders skipped because a sync of them was already running.
    pub folders_skipped: Vec<String>,
    /// Number of new messages stored.
    pub new_messages: usize,
    /// Duration of the sync operation.
    pub duration_ms: u64,
}

impl SyncReport {
    /// Returns true if no folder failed.
    pub fn is_success(&self) -> bool {
        self.folders_failed.is_empty()
    }

    /// Whether the pass brought the account up to date: nothing failed and
    /// not every folder was skipped as busy.
    pub fn is_complete(&self) -> bool {
        self.is_success() && (self.folders_skipped.is_empty() || !self.folders_synced.is_empty())
    }
}

/// Forwards listener callbacks of one folder sync to the event channel.
struct EventListener<'a> {
    account_id: &'a AccountId,
    sender: &'a broadcast::Sender<SyncEvent>,
    new_messages: usize,
    outcome: Option<FolderOutcome>,
}

impl<'a> EventListener<'a> {
    fn new(account_id: &'a AccountId, sender: &'a broadcast::Sender<SyncEvent>) -> Self {
        Self {
            account_id,
            sender,
            new_messages: 0,
            outcome: None,
        }
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

impl SyncListener for EventListener<'_> {
    fn sync_started(&mut self, folder: &str) {
        self.emit(SyncEvent::FolderStarted {
            account_id: self.account_id.clone(),
            folder: folder.to_string(),
        });
    }

    fn sync_new_message(&mut self, folder: &str, server_id: &str, _is_old_message: bool) {
        self.new_messages += 1;
        self.emit(SyncEvent::NewMessage {
            account_id: self.account_id.clone(),
            folder: folder.to_string(),
            server_id: server_id.to_string(),
        });
    }

    fn sync_finished(&mut self, folder: &str) {
        self.outcome = Some(FolderOutcome::Finished {
            new_messages: self.new_messages,
        });
        self.emit(SyncEvent::FolderFinished {
            account_id: self.account_id.clone(),
            folder: folder.to_string(),
        });
    }

    fn sync_failed(&mut self, folder: &str, message: &str, cause: Option<&BackendError>) {
        let retryable = cause.map(BackendError::is_retryable).unwrap_or(false);
        self.outcome = Some(FolderOutcome::Failed {
            message: message.to_string(),
            retryable,
        });
        self.emit(SyncEvent::FolderFailed {
            account_id: self.account_id.clone(),
            folder: folder.to_string(),
            message: message.to_string(),
            retryable,
        });
    }
}

/// Drives refresh and per-folder sync for whole accounts.
pub struct AccountSyncService {
    accounts: AccountService,
    backends: Arc<BackendManager>,
    storage: Arc<dyn BackendStorageFactory>,
    locks: FolderSyncLocks,
    settings: SyncSettings,
    event_sender: broadcast::Sender<SyncEvent>,
}

impl AccountSyncService {
    pub fn new(
        accounts: AccountService,
        backends: Arc<BackendManager>,
        storage: Arc<dyn BackendStorageFactory>,
        settings: SyncSettings,
    ) -> Self {
        let (event_sender, _) = broadcast::channel(100);
        Self {
            accounts,
            backends,
            storage,
            locks: FolderSyncLocks::new(),
            settings,
            event_sender,
        }
    }

    /// Subscribes to sync events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_sender.subscribe()
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Sync policy for a pass starting at `now`. The earliest poll date
    /// moves with `now`, so every pass gets a fresh one.
    pub fn sync_config_at(&self, now: DateTime<Utc>) -> SyncConfig {
        self.settings.sync_config(now)
    }

    pub fn locks(&self) -> &FolderSyncLocks {
        &self.locks
    }

    /// Synchronizes every tracked folder of an account.
    ///
    /// Folders already being synced are skipped. The account's last sync
    /// time is only updated when no folder failed and at least one folder
    /// was not skipped.
    pub async fn sync_account(&self, account_id: &AccountId) -> Result<SyncReport> {
        let start = Instant::now();

        let _ = self
            .event_sender
            .send(SyncEvent::Started(account_id.clone()));

        match self.do_sync(account_id).await {
            Ok(mut report) => {
                report.duration_ms = start.elapsed().as_millis() as u64;
                info!(
                    account = %account_id,
                    synced = report.folders_synced.len(),
                    failed = report.folders_failed.len(),
                    skipped = report.folders_skipped.len(),
                    new_messages = report.new_messages,
                    "account sync completed"
                );
                let _ = self
                    .event_sender
                    .send(SyncEvent::Completed(account_id.clone(), report.clone()));
                Ok(report)
            }
            Err(e) => {
                warn!(account = %account_id, error = %e, "account sync failed");
                let _ = self
                    .event_sender
                    .send(SyncEvent::Failed(account_id.clone(), e.to_string()));
                Err(e)
            }
        }
    }

    async fn do_sync(&self, account_id: &AccountId) -> Result<SyncReport> {
        let account = self
            .accounts
            .find_account(account_id)
            .await?
            .ok_or_else(|| SyncError::AccountNotFound(account_id.clone()))?;

        let backend = self.backends.get_backend(&account).await?;
        backend.refresh_folder_list().await?;

        let mut folders: Vec<String> = self
            .storage
            .create_backend_storage(account_id)
            .synced_folder_server_ids()
            .await?
            .into_iter()
            .collect();
        folders.sort();

        let config = self.sync_config_at(Utc::now());
        let mut report = SyncReport::default();
        for folder in folders {
            let Some(_permit) = self.locks.try_acquire(account_id, &folder) else {
                debug!(account = %account_id, folder = %folder, "folder already syncing, skipped");
                report.folders_skipped.push(folder);
                continue;
            };

            match self
                .run_folder(account_id, &folder, backend.as_ref(), &config)
                .await
            {
                FolderOutcome::Finished { new_messages } => {
                    report.new_messages += new_messages;
                    report.folders_synced.push(folder);
                }
                FolderOutcome::Failed { message, .. } => {
                    report.folders_failed.push((folder, message));
                }
            }
        }

        if report.is_complete() {
            self.accounts.record_sync(account_id, Utc::now()).await?;
        }

        Ok(report)
    }

    /// Synchronizes a single folder on request.
    ///
    /// Fails with [`SyncError::AlreadyInProgress`] if the folder is being
    /// synced right now.
    pub async fn sync_folder(&self, account_id: &AccountId, folder: &str) -> Result<FolderOutcome> {
        let account = self
            .accounts
            .find_account(account_id)
            .await?
            .ok_or_else(|| SyncError::AccountNotFound(account_id.clone()))?;

        let _permit =
            self.locks
                .try_acquire(account_id, folder)
                .ok_or_else(|| SyncError::AlreadyInProgress {
                    account_id: account_id.clone(),
                    folder: folder.to_string(),
                })?;

        let backend = self.backends.get_backend(&account).await?;
        let config = self.sync_config_at(Utc::now());
        Ok(self
            .run_folder(account_id, folder, backend.as_ref(), &config)
            .await)
    }

    async fn run_folder(
        &self,
        account_id: &AccountId,
        folder: &str,
        backend: &dyn Backend,
        config: &SyncConfig,
    ) -> FolderOutcome {
        let mut listener = EventListener::new(account_id, &self.event_sender);
        backend.sync(folder, config, &mut listener).await;

        listener.outcome.unwrap_or_else(|| FolderOutcome::Failed {
            message: SYNC_ABORTED.to_string(),
            retryable: true,
        })
    }
}
