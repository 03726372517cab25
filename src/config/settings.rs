//! Engine settings and configuration types.
//!
//! Settings are persisted to `settings.json` in the platform config
//! directory (`~/.config/mailsync/` or equivalent) and loaded at startup.
//! Missing fields take their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{ExpungePolicy, SyncConfig};
use crate::services::{BackgroundSync, BackoffPolicy};

/// Errors that can occur while loading or saving settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),

    /// No home directory to derive the platform directories from.
    #[error("no configuration directory available")]
    NoConfigDir,
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

const SETTINGS_FILE: &str = "settings.json";
const DATABASE_FILE: &str = "mailsync.db";

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("org", "mailsync", "mailsync").ok_or(ConfigError::NoConfigDir)
}

/// Top-level engine settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Background sync settings.
    pub sync: SyncSettings,
    /// Local storage settings.
    pub storage: StorageSettings,
    /// Demo account settings.
    pub demo: DemoSettings,
}

impl Settings {
    /// Default location of the settings file.
    pub fn default_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join(SETTINGS_FILE))
    }

    /// Loads settings from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Loads settings, falling back to defaults if the file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes settings as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Background sync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// When periodic sync may run at all.
    pub background_sync: BackgroundSync,
    /// When deleted messages are expunged on the server.
    pub expunge_policy: ExpungePolicy,
    /// Only fetch messages from the last this many days.
    pub earliest_poll_days: Option<u32>,
    /// Whether local copies of remotely deleted messages are removed.
    pub sync_remote_deletions: bool,
    /// Messages larger than this are downloaded partially.
    pub maximum_auto_download_message_size: u64,
    /// Number of newest messages fetched per folder.
    pub default_visible_limit: usize,
    /// First retry delay after a failed sync, in seconds.
    pub retry_backoff_seconds: u64,
    /// How often unmet job constraints are re-checked, in seconds.
    pub constraint_poll_seconds: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let config = SyncConfig::default();
        Self {
            background_sync: BackgroundSync::default(),
            expunge_policy: config.expunge_policy,
            earliest_poll_days: None,
            sync_remote_deletions: config.sync_remote_deletions,
            maximum_auto_download_message_size: config.maximum_auto_download_message_size,
            default_visible_limit: config.default_visible_limit,
            retry_backoff_seconds: BackoffPolicy::DEFAULT_INITIAL.as_secs(),
            constraint_poll_seconds: 60,
        }
    }
}

impl SyncSettings {
    /// Builds the sync policy handed to backends.
    pub fn sync_config(&self, now: DateTime<Utc>) -> SyncConfig {
        SyncConfig {
            expunge_policy: self.expunge_policy,
            earliest_poll_date: self
                .earliest_poll_days
                .map(|days| now - chrono::Duration::days(i64::from(days))),
            sync_remote_deletions: self.sync_remote_deletions,
            maximum_auto_download_message_size: self.maximum_auto_download_message_size,
            default_visible_limit: self.default_visible_limit,
            ..SyncConfig::default()
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(Duration::from_secs(self.retry_backoff_seconds))
    }

    pub fn constraint_poll(&self) -> Duration {
        Duration::from_secs(self.constraint_poll_seconds.max(1))
    }
}

/// Local storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Database file, defaults to the platform data directory.
    pub database_path: Option<PathBuf>,
}

impl StorageSettings {
    /// Returns the configured database path or the platform default.
    pub fn resolve_database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join(DATABASE_FILE)),
        }
    }
}

/// Demo account configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// Whether a demo account is created when no account exists.
    pub enabled: bool,
    /// Directory holding `contents.json` and the message files.
    pub fixture_dir: Option<PathBuf>,
    /// Email address of the demo account.
    pub account_email: String,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            fixture_dir: None,
            account_email: "demo@mailsync.invalid".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_settings_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.sync.background_sync, BackgroundSync::Always);
        assert_eq!(settings.sync.default_visible_limit, 25);
        assert!(!settings.demo.enabled);
        assert!(settings.storage.database_path.is_none());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"sync": {"background_sync": "when_auto_sync_enabled"}}"#)
                .unwrap();

        assert_eq!(
            settings.sync.background_sync,
            BackgroundSync::WhenAutoSyncEnabled
        );
        assert_eq!(settings.sync.retry_backoff_seconds, 300);
        assert_eq!(settings.demo, DemoSettings::default());
    }

    #[test]
    fn sync_config_from_settings() {
        let now = DateTime::parse_from_rfc3339("2025-07-10T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let settings = SyncSettings {
            expunge_policy: ExpungePolicy::OnPoll,
            earliest_poll_days: Some(7),
            default_visible_limit: 50,
            ..SyncSettings::default()
        };

        let config = settings.sync_config(now);

        assert_eq!(config.expunge_policy, ExpungePolicy::OnPoll);
        assert_eq!(
            config.earliest_poll_date.unwrap().to_rfc3339(),
            "2025-07-03T00:00:00+00:00"
        );
        assert_eq!(config.default_visible_limit, 50);
        assert_eq!(config.sync_flags, SyncConfig::default().sync_flags);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.demo.enabled = true;
        settings.storage.database_path = Some(dir.path().join("mail.db"));
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let settings = Settings::load_or_default(dir.path().join("absent.json")).unwrap();

        assert_eq!(settings, Settings::default());
        assert!(matches!(
            Settings::load(dir.path().join("absent.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn invalid_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            Settings::load_or_default(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn backoff_and_poll_durations() {
        let settings = SyncSettings {
            retry_backoff_seconds: 60,
            constraint_poll_seconds: 0,
            ..SyncSettings::default()
        };

        assert_eq!(settings.backoff().initial, Duration::from_secs(60));
        assert_eq!(settings.constraint_poll(), Duration::from_secs(1));
    }
}
