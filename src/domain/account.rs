//! Account domain types.
//!
//! An account owns zero or more folders and carries the periodic sync
//! interval the scheduler works from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AccountId;

/// A mail account known to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier for this account.
    pub id: AccountId,
    /// Email address for this account.
    pub email: String,
    /// Display name shown by the UI.
    pub display_name: Option<String>,
    /// Which backend implementation serves this account.
    pub backend_kind: BackendKind,
    /// Incoming server settings, opaque to the engine.
    pub server: ServerSettings,
    /// Minutes between periodic syncs. Zero or negative means never.
    pub sync_interval_minutes: i32,
    /// Time of the last successful sync, if any.
    pub last_sync: Option<DateTime<Utc>>,
    /// Set when the user has to sign in again before syncing can resume.
    pub sign_in_required: bool,
}

impl Account {
    /// Returns whether periodic sync is enabled for this account.
    pub fn is_periodic_sync_enabled(&self) -> bool {
        self.sync_interval_minutes > 0
    }

    /// Returns whether this account needs a stored password to sync.
    pub fn requires_credentials(&self) -> bool {
        matches!(self.backend_kind, BackendKind::Remote)
    }
}

/// Type of backend serving an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Fixture-backed demo backend.
    Demo,
    /// Live remote mail store.
    Remote,
}

impl BackendKind {
    /// Returns the storage representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Demo => "demo",
            Self::Remote => "remote",
        }
    }

    /// Parses the storage representation of a backend kind.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "demo" => Some(Self::Demo),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }
}

/// Incoming server settings.
///
/// Passwords are stored in the system keychain, not here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login name.
    pub username: String,
    /// Whether to use TLS.
    pub use_tls: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(kind: BackendKind, interval: i32) -> Account {
        Account {
            id: AccountId::from("test-id"),
            email: "test@example.com".to_string(),
            display_name: Some("Test User".to_string()),
            backend_kind: kind,
            server: ServerSettings::default(),
            sync_interval_minutes: interval,
            last_sync: None,
            sign_in_required: false,
        }
    }

    #[test]
    fn account_serialization() {
        let account = account(BackendKind::Remote, 15);

        let json = serde_json::to_string(&account).unwrap();
        let deserialized: Account = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.email, "test@example.com");
        assert_eq!(deserialized.sync_interval_minutes, 15);
        assert_eq!(deserialized.backend_kind, BackendKind::Remote);
    }

    #[test]
    fn periodic_sync_enabled_only_for_positive_interval() {
        assert!(account(BackendKind::Demo, 15).is_periodic_sync_enabled());
        assert!(!account(BackendKind::Demo, 0).is_periodic_sync_enabled());
        assert!(!account(BackendKind::Demo, -1).is_periodic_sync_enabled());
    }

    #[test]
    fn only_remote_accounts_require_credentials() {
        assert!(account(BackendKind::Remote, 15).requires_credentials());
        assert!(!account(BackendKind::Demo, 15).requires_credentials());
    }

    #[test]
    fn backend_kind_round_trips_through_storage_form() {
        for kind in [BackendKind::Demo, BackendKind::Remote] {
            assert_eq!(BackendKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(BackendKind::parse("pop3"), None);
    }
}
