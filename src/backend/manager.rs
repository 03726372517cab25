//! Backend lookup per account.
//!
//! [`BackendManager`] creates one backend per account through the factory
//! registered for the account's [`BackendKind`] and caches it until the
//! account is removed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::{Account, AccountId, BackendKind};
use crate::storage::BackendStorageFactory;

use super::demo::{DemoBackend, DemoContents, MessageLoader};
use super::traits::{Backend, BackendError, Result};

/// Creates backends for one kind of account.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn create_backend(&self, account: &Account) -> Result<Arc<dyn Backend>>;
}

/// Factory for fixture-backed demo accounts.
pub struct DemoBackendFactory {
    storage: Arc<dyn BackendStorageFactory>,
    contents: DemoContents,
    loader: Arc<dyn MessageLoader>,
}

impl DemoBackendFactory {
    pub fn new(
        storage: Arc<dyn BackendStorageFactory>,
        contents: DemoContents,
        loader: Arc<dyn MessageLoader>,
    ) -> Self {
        Self {
            storage,
            contents,
            loader,
        }
    }
}

#[async_trait]
impl BackendFactory for DemoBackendFactory {
    async fn create_backend(&self, account: &Account) -> Result<Arc<dyn Backend>> {
        let storage = self.storage.create_backend_storage(&account.id);
        Ok(Arc::new(DemoBackend::new(
            storage,
            &self.contents,
            self.loader.clone(),
        )))
    }
}

/// Caches one backend per account.
pub struct BackendManager {
    factories: HashMap<BackendKind, Arc<dyn BackendFactory>>,
    backends: RwLock<HashMap<AccountId, Arc<dyn Backend>>>,
}

impl Default for BackendManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendManager {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            backends: RwLock::new(HashMap::new()),
        }
    }

    /// Registers the factory used for accounts of `kind`.
    pub fn with_factory(mut self, kind: BackendKind, factory: Arc<dyn BackendFactory>) -> Self {
        self.factories.insert(kind, factory);
        self
    }

    /// Returns the backend for `account`, creating it on first use.
    pub async fn get_backend(&self, account: &Account) -> Result<Arc<dyn Backend>> {
        if let Some(backend) = self.backends.read().await.get(&account.id) {
            return Ok(backend.clone());
        }

        let mut backends = self.backends.write().await;
        // Another caller may have created it while we waited for the lock.
        if let Some(backend) = backends.get(&account.id) {
            return Ok(backend.clone());
        }

        let factory = self.factories.get(&account.backend_kind).ok_or_else(|| {
            BackendError::Permanent(format!(
                "no backend available for {} accounts",
                account.backend_kind.as_str()
            ))
        })?;

        let backend = factory.create_backend(account).await?;
        info!(account = %account.id, kind = account.backend_kind.as_str(), "backend created");
        backends.insert(account.id.clone(), backend.clone());
        Ok(backend)
    }

    /// Drops the cached backend of an account.
    ///
    /// Returns whether one was cached.
    pub async fn remove_backend(&self, account_id: &AccountId) -> bool {
        let removed = self.backends.write().await.remove(account_id).is_some();
        if removed {
            debug!(account = %account_id, "backend removed");
        }
        removed
    }
}
