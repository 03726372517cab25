//! Account service for managing mail accounts.
//!
//! Provides a service layer for account operations including:
//! - Account creation and validation
//! - Password storage in the keychain
//! - Sync bookkeeping (interval, last sync, pending sign-in)
//! - Account deletion, which removes folders, messages and credentials

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{Account, AccountId, BackendKind, ServerSettings};
use crate::storage::queries::accounts;
use crate::storage::{Database, KeychainAccess, KeychainError, StorageError};

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
    /// Account not found.
    #[error("account not found: {0}")]
    NotFound(String),

    /// Account already exists.
    #[error("account already exists: {0}")]
    AlreadyExists(String),

    /// Invalid account configuration.
    #[error("invalid account configuration: {0}")]
    InvalidConfig(String),

    /// Credential storage error.
    #[error("credential storage error: {0}")]
    CredentialError(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for AccountError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<KeychainError> for AccountError {
    fn from(err: KeychainError) -> Self {
        Self::CredentialError(err.to_string())
    }
}

/// Result type for account operations.
pub type AccountResult<T> = Result<T, AccountError>;

/// Storage abstraction for account operations.
#[async_trait]
pub trait AccountStorage: Send + Sync {
    /// Gets an account by ID.
    async fn get_account(&self, id: &AccountId) -> AccountResult<Option<Account>>;

    /// Gets an account by email.
    async fn get_by_email(&self, email: &str) -> AccountResult<Option<Account>>;

    /// Gets all accounts.
    async fn get_all_accounts(&self) -> AccountResult<Vec<Account>>;

    /// Inserts a new account.
    async fn insert_account(&self, account: &Account) -> AccountResult<()>;

    async fn set_sync_interval(&self, id: &AccountId, minutes: i32) -> AccountResult<()>;

    async fn set_last_sync(&self, id: &AccountId, at: DateTime<Utc>) -> AccountResult<()>;

    async fn set_sign_in_required(&self, id: &AccountId, required: bool) -> AccountResult<()>;

    /// Deletes an account together with its folders and messages.
    async fn delete_account(&self, id: &AccountId) -> AccountResult<()>;

    /// Counts total accounts.
    async fn count_accounts(&self) -> AccountResult<u32>;
}

#[async_trait]
impl AccountStorage for Database {
    async fn get_account(&self, id: &AccountId) -> AccountResult<Option<Account>> {
        Ok(accounts::get_by_id(self, id).await?)
    }

    async fn get_by_email(&self, email: &str) -> AccountResult<Option<Account>> {
        Ok(accounts::get_by_email(self, email).await?)
    }

    async fn get_all_accounts(&self) -> AccountResult<Vec<Account>> {
        Ok(accounts::get_all(self).await?)
    }

    async fn insert_account(&self, account: &Account) -> AccountResult<()> {
        Ok(accounts::insert(self, account).await?)
    }

    async fn set_sync_interval(&self, id: &AccountId, minutes: i32) -> AccountResult<()> {
        Ok(accounts::set_sync_interval(self, id, minutes).await?)
    }

    async fn set_last_sync(&self, id: &AccountId, at: DateTime<Utc>) -> AccountResult<()> {
        Ok(accounts::set_last_sync(self, id, at).await?)
    }

    async fn set_sign_in_required(&self, id: &AccountId, required: bool) -> AccountResult<()> {
        Ok(accounts::set_sign_in_required(self, id, required).await?)
    }

    async fn delete_account(&self, id: &AccountId) -> AccountResult<()> {
        Ok(accounts::delete(self, id).await?)
    }

    async fn count_accounts(&self) -> AccountResult<u32> {
        Ok(accounts::count(self).await?)
    }
}

/// Storage abstraction for credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Stores a credential.
    async fn store(&self, key: &str, value: &str) -> AccountResult<()>;

    /// Retrieves a credential.
    async fn retrieve(&self, key: &str) -> AccountResult<Option<String>>;

    /// Deletes a credential.
    async fn delete(&self, key: &str) -> AccountResult<()>;
}

#[async_trait]
impl CredentialStore for KeychainAccess {
    async fn store(&self, key: &str, value: &str) -> AccountResult<()> {
        Ok(KeychainAccess::store(self, key, value).await?)
    }

    async fn retrieve(&self, key: &str) -> AccountResult<Option<String>> {
        Ok(KeychainAccess::retrieve(self, key).await?)
    }

    async fn delete(&self, key: &str) -> AccountResult<()> {
        KeychainAccess::delete(self, key).await?;
        Ok(())
    }
}

/// Request to create a new account.
#[derive(Debug, Clone)]
pub struct CreateAccountRequest {
    /// Email address.
    pub email: String,
    /// Display name.
    pub display_name: Option<String>,
    /// Backend serving the account.
    pub backend_kind: BackendKind,
    /// Incoming server settings.
    pub server: ServerSettings,
    /// Minutes between periodic syncs, zero or negative for never.
    pub sync_interval_minutes: i32,
}

impl CreateAccountRequest {
    /// Default sync interval for new accounts.
    pub const DEFAULT_SYNC_INTERVAL_MINUTES: i32 = 15;

    /// Creates a demo account request.
    pub fn demo(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            display_name: None,
            backend_kind: BackendKind::Demo,
            server: ServerSettings::default(),
            sync_interval_minutes: Self::DEFAULT_SYNC_INTERVAL_MINUTES,
        }
    }

    /// Creates a remote account request.
    pub fn remote(email: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let email = email.into();
        Self {
            server: ServerSettings {
                host: host.into(),
                port,
                username: email.clone(),
                use_tls: true,
            },
            email,
            display_name: None,
            backend_kind: BackendKind::Remote,
            sync_interval_minutes: Self::DEFAULT_SYNC_INTERVAL_MINUTES,
        }
    }

    /// Sets the display name.
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the sync interval.
    pub fn sync_interval_minutes(mut self, minutes: i32) -> Self {
        self.sync_interval_minutes = minutes;
        self
    }
}

/// Service for managing mail accounts.
#[derive(Clone)]
pub struct AccountService {
    storage: Arc<dyn AccountStorage>,
    credentials: Arc<dyn CredentialStore>,
}

impl AccountService {
    /// Creates a new account service.
    pub fn new(storage: Arc<dyn AccountStorage>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            storage,
            credentials,
        }
    }

    /// Creates a new account.
    pub async fn create_account(&self, request: CreateAccountRequest) -> AccountResult<Account> {
        if !is_valid_email(&request.email) {
            return Err(AccountError::InvalidConfig(format!(
                "invalid email address: {}",
                request.email
            )));
        }

        if self.storage.get_by_email(&request.email).await?.is_some() {
            return Err(AccountError::AlreadyExists(request.email));
        }

        validate_server_settings(request.backend_kind, &request.server)?;

        let account = Account {
            id: AccountId::generate(),
            email: request.email,
            display_name: request.display_name,
            backend_kind: request.backend_kind,
            server: request.server,
            sync_interval_minutes: request.sync_interval_minutes,
            last_sync: None,
            sign_in_required: false,
        };

        self.storage.insert_account(&account).await?;
        info!(account = %account.id, kind = account.backend_kind.as_str(), "account created");

        Ok(account)
    }

    /// Gets an account by ID.
    pub async fn get_account(&self, id: &AccountId) -> AccountResult<Account> {
        self.storage
            .get_account(id)
            .await?
            .ok_or_else(|| AccountError::NotFound(id.to_string()))
    }

    /// Gets an account by ID, `None` if it was deleted.
    pub async fn find_account(&self, id: &AccountId) -> AccountResult<Option<Account>> {
        self.storage.get_account(id).await
    }

    /// Gets all accounts.
    pub async fn get_all_accounts(&self) -> AccountResult<Vec<Account>> {
        self.storage.get_all_accounts().await
    }

    /// Changes the periodic sync interval.
    pub async fn set_sync_interval(&self, id: &AccountId, minutes: i32) -> AccountResult<Account> {
        self.get_account(id).await?;
        self.storage.set_sync_interval(id, minutes).await?;
        self.get_account(id).await
    }

    /// Records a completed sync.
    pub async fn record_sync(&self, id: &AccountId, at: DateTime<Utc>) -> AccountResult<()> {
        self.storage.set_last_sync(id, at).await
    }

    /// Flags or clears a pending required sign-in.
    pub async fn set_sign_in_required(&self, id: &AccountId, required: bool) -> AccountResult<()> {
        self.storage.set_sign_in_required(id, required).await
    }

    /// Deletes an account, its local mail and its stored passwords.
    pub async fn delete_account(&self, id: &AccountId) -> AccountResult<()> {
        self.get_account(id).await?;

        for key in [
            KeychainAccess::incoming_password_key(id.as_str()),
            KeychainAccess::outgoing_password_key(id.as_str()),
        ] {
            if let Err(e) = self.credentials.delete(&key).await {
                warn!(account = %id, error = %e, "failed to remove stored password");
            }
        }

        self.storage.delete_account(id).await?;
        info!(account = %id, "account deleted");

        Ok(())
    }

    /// Stores the incoming server password for an account.
    pub async fn store_password(&self, account_id: &AccountId, password: &str) -> AccountResult<()> {
        let key = KeychainAccess::incoming_password_key(account_id.as_str());
        self.credentials.store(&key, password).await
    }

    /// Retrieves the incoming server password for an account.
    pub async fn get_password(&self, account_id: &AccountId) -> AccountResult<Option<String>> {
        let key = KeychainAccess::incoming_password_key(account_id.as_str());
        self.credentials.retrieve(&key).await
    }

    /// Returns whether the account has what it needs to sign in.
    pub async fn has_credentials(&self, account: &Account) -> AccountResult<bool> {
        if !account.requires_credentials() {
            return Ok(true);
        }
        Ok(self.get_password(&account.id).await?.is_some())
    }

    /// Counts total accounts.
    pub async fn count(&self) -> AccountResult<u32> {
        self.storage.count_accounts().await
    }
}

/// Validates an email address format.
fn is_valid_email(email: &str) -> bool {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }
    let local = parts[0];
    let domain = parts[1];

    !local.is_empty() && !domain.is_empty() && domain.contains('.')
}

/// Validates server settings for a backend kind.
fn validate_server_settings(kind: BackendKind, server: &ServerSettings) -> AccountResult<()> {
    match kind {
        BackendKind::Demo => Ok(()),
        BackendKind::Remote => {
            if server.host.is_empty() {
                return Err(AccountError::InvalidConfig("server host is required".into()));
            }
            if server.port == 0 {
                return Err(AccountError::InvalidConfig("server port is required".into()));
            }
            Ok(())
        }
    }
}
