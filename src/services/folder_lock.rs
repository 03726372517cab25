//! Per-folder mutual exclusion for sync runs.
//!
//! Different folders of an account may sync at the same time, the same
//! folder may not. A run holds a [`FolderSyncPermit`] for its whole
//! duration; the permit releases the folder when dropped.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::AccountId;

type FolderKey = (AccountId, String);

/// Tracks which folders are currently syncing.
#[derive(Debug, Clone, Default)]
pub struct FolderSyncLocks {
    active: Arc<Mutex<HashSet<FolderKey>>>,
}

impl FolderSyncLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> MutexGuard<'_, HashSet<FolderKey>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims a folder, or returns `None` if a sync of it is running.
    pub fn try_acquire(&self, account_id: &AccountId, folder: &str) -> Option<FolderSyncPermit> {
        let key = (account_id.clone(), folder.to_string());
        if !self.active().insert(key.clone()) {
            return None;
        }
        Some(FolderSyncPermit {
            active: self.active.clone(),
            key,
        })
    }

    pub fn is_locked(&self, account_id: &AccountId, folder: &str) -> bool {
        self.active()
            .contains(&(account_id.clone(), folder.to_string()))
    }
}

/// Exclusive claim on one folder. Released on drop.
#[derive(Debug)]
pub struct FolderSyncPermit {
    active: Arc<Mutex<HashSet<FolderKey>>>,
    key: FolderKey,
}

impl FolderSyncPermit {
    pub fn folder(&self) -> &str {
        &self.key.1
    }
}

impl Drop for FolderSyncPermit {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
