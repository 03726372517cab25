//! Credential storage in the OS keychain.
//!
//! Account passwords never touch the database. The sync worker only asks
//! whether a password is present before it starts talking to a server.

use thiserror::Error;

/// Errors that can occur during keychain operations.
#[derive(Debug, Error)]
pub enum KeychainError {
    #[error("keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("keychain task failed: {0}")]
    TaskFailed(String),
}

/// Result type for keychain operations.
pub type Result<T> = std::result::Result<T, KeychainError>;

/// Handle on the OS keychain, namespaced by service name.
#[derive(Debug, Clone)]
pub struct KeychainAccess {
    service_name: String,
}

impl KeychainAccess {
    /// Service name used outside of tests.
    pub const DEFAULT_SERVICE: &'static str = "org.mailsync.engine";

    pub fn new() -> Self {
        Self::with_service(Self::DEFAULT_SERVICE)
    }

    /// Uses a custom service name so tests never see real credentials.
    pub fn with_service(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Stores a secret, replacing any previous value.
    pub async fn store(&self, key: &str, secret: &str) -> Result<()> {
        let secret = secret.to_string();
        self.run(key, move |entry| {
            entry.set_password(&secret)?;
            Ok(())
        })
        .await
    }

    /// Retrieves a secret, `None` when nothing is stored under `key`.
    pub async fn retrieve(&self, key: &str) -> Result<Option<String>> {
        self.run(key, |entry| match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        })
        .await
    }

    /// Removes a secret. Returns whether anything was removed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.run(key, |entry| match entry.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e.into()),
        })
        .await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.retrieve(key).await?.is_some())
    }

    async fn run<F, T>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce(&keyring::Entry) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let service = self.service_name.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &key)?;
            f(&entry)
        })
        .await
        .map_err(|e| KeychainError::TaskFailed(e.to_string()))?
    }

    /// Key of the incoming server password of an account.
    pub fn incoming_password_key(account_id: &str) -> String {
        format!("incoming.password.{account_id}")
    }

    /// Key of the outgoing server password of an account.
    pub fn outgoing_password_key(account_id: &str) -> String {
        format!("outgoing.password.{account_id}")
    }
}

impl Default for KeychainAccess {
    fn default() -> Self {
        Self::new()
    }
}
