//! Sync policy handed to backends.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Flag;

/// When messages marked as deleted are permanently removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpungePolicy {
    /// Right after a message is deleted.
    #[default]
    Immediately,
    /// Whenever a folder is synced.
    OnPoll,
    /// Only when the user asks for it.
    Manually,
}

/// Read-only policy for one sync run. Backends never modify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub expunge_policy: ExpungePolicy,
    /// Messages older than this are not fetched.
    pub earliest_poll_date: Option<DateTime<Utc>>,
    /// Remove local messages that disappeared from the server.
    pub sync_remote_deletions: bool,
    /// Messages larger than this many bytes are downloaded partially.
    pub maximum_auto_download_message_size: u64,
    /// How many of the newest messages a folder sync fetches.
    pub default_visible_limit: usize,
    /// Flags copied from the server onto messages already stored.
    pub sync_flags: HashSet<Flag>,
}

impl SyncConfig {
    pub const DEFAULT_VISIBLE_LIMIT: usize = 25;

    pub fn syncs_flag(&self, flag: Flag) -> bool {
        self.sync_flags.contains(&flag)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            expunge_policy: ExpungePolicy::default(),
            earliest_poll_date: None,
            sync_remote_deletions: true,
            maximum_auto_download_message_size: 32 * 1024,
            default_visible_limit: Self::DEFAULT_VISIBLE_LIMIT,
            sync_flags: HashSet::from([Flag::Seen, Flag::Flagged, Flag::Answered, Flag::Forwarded]),
        }
    }
}
