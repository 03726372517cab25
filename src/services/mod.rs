//! Sync services layer.
//!
//! This module contains the algorithms and drivers that keep local mailbox
//! storage in step with the remote side, coordinating between backends,
//! storage, and the job host.
//!
//! # Architecture
//!
//! ```text
//! Job host (TokioJobHost)
//!          |
//!          v
//!   MailSyncWorker -> AccountSyncService
//!          |
//!          v
//!   Backend (refresh_folder_list, sync)
//!          |
//!          v
//! FolderReconciler / MessageSync -> BackendStorage
//! ```
//!
//! # Services Overview
//!
//! - [`FolderReconciler`]: makes the local folder set match the remote one
//! - [`MessageSync`]: syncs the messages of one folder
//! - [`AccountSyncService`]: refreshes and syncs whole accounts
//! - [`AccountService`]: account CRUD and credentials
//! - [`MailSyncScheduler`]: registers periodic sync jobs
//! - [`TokioJobHost`]: runs periodic jobs on tokio tasks

mod account_service;
mod account_sync_service;
mod folder_lock;
mod folder_reconciler;
mod job_host;
mod message_sync;
mod sync_scheduler;
mod sync_worker;

pub use account_service::{
    AccountError, AccountResult, AccountService, AccountStorage, CreateAccountRequest,
    CredentialStore,
};
pub use account_sync_service::{
    AccountSyncService, FolderOutcome, Result, SyncError, SyncEvent, SyncReport,
};
pub use folder_lock::{FolderSyncLocks, FolderSyncPermit};
pub use folder_reconciler::{flatten_folder_tree, FolderChanges, FolderReconciler};
pub use job_host::TokioJobHost;
pub use message_sync::{
    MessageSync, RemoteMessage, RemoteMessageSource, SyncStrategy, FOLDER_DOES_NOT_EXIST,
};
pub use sync_scheduler::{
    compute_initial_delay, mail_sync_key, BackgroundSync, BackoffPolicy, Constraints, JobHandle,
    JobHost, MailSyncScheduler, PeriodicJobRequest, StaticEnvironment, SystemEnvironment,
    MAIL_SYNC_KEY_PREFIX,
};
pub use sync_worker::{JobOutcome, JobWorker, MailSyncWorker};
