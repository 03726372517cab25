//! The periodic mail sync job.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::AccountId;

use super::account_service::AccountService;
use super::account_sync_service::{AccountSyncService, SyncError};
use super::sync_scheduler::{BackgroundSync, SystemEnvironment};

/// How a job run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Done until the next period.
    Success,
    /// Run again after the backoff delay.
    Retry,
}

/// Work executed by a job host on every run of a job.
#[async_trait]
pub trait JobWorker: Send + Sync {
    async fn run(&self, account_id: &AccountId) -> JobOutcome;
}

/// Syncs one account per run.
///
/// Runs that have nothing to do (sync disabled, account deleted, missing
/// credentials, pending sign-in) succeed without touching the backend.
/// A sync that was attempted and failed asks for a retry.
pub struct MailSyncWorker {
    accounts: AccountService,
    sync: Arc<AccountSyncService>,
    environment: Arc<dyn SystemEnvironment>,
    policy: BackgroundSync,
}

impl MailSyncWorker {
    pub fn new(
        accounts: AccountService,
        sync: Arc<AccountSyncService>,
        environment: Arc<dyn SystemEnvironment>,
        policy: BackgroundSync,
    ) -> Self {
        Self {
            accounts,
            sync,
            environment,
            policy,
        }
    }
}

#[async_trait]
impl JobWorker for MailSyncWorker {
    async fn run(&self, account_id: &AccountId) -> JobOutcome {
        if !self.policy.allows_sync(self.environment.as_ref()) {
            debug!(account = %account_id, "background sync disabled, skipping run");
            return JobOutcome::Success;
        }

        let account = match self.accounts.find_account(account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                debug!(account = %account_id, "account no longer exists, skipping run");
                return JobOutcome::Success;
            }
            Err(e) => {
                warn!(account = %account_id, error = %e, "failed to load account");
                return JobOutcome::Retry;
            }
        };

        if !account.is_periodic_sync_enabled() {
            debug!(account = %account_id, "periodic sync disabled, skipping run");
            return JobOutcome::Success;
        }

        match self.accounts.has_credentials(&account).await {
            Ok(true) => {}
            Ok(false) => {
                info!(account = %account_id, "no stored password, skipping sync");
                return JobOutcome::Success;
            }
            Err(e) => {
                warn!(account = %account_id, error = %e, "failed to read credentials");
                return JobOutcome::Retry;
            }
        }

        if account.sign_in_required {
            info!(account = %account_id, "sign-in required, skipping sync");
            return JobOutcome::Success;
        }

        match self.sync.sync_account(account_id).await {
            Ok(report) if report.is_success() => JobOutcome::Success,
            Ok(report) => {
                warn!(
                    account = %account_id,
                    failed = ?report.folders_failed,
                    "folders failed to sync, will retry"
                );
                JobOutcome::Retry
            }
            Err(SyncError::AccountNotFound(_)) => {
                debug!(account = %account_id, "account deleted during run");
                JobOutcome::Success
            }
            Err(_) => JobOutcome::Retry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        Backend, BackendFactory, BackendManager, DemoBackendFactory, DemoContents, MessageLoader,
        Result as BackendResult,
    };
    use crate::config::SyncSettings;
    use crate::domain::{Account, BackendKind};
    use crate::services::account_service::{AccountResult, CredentialStore};
    use crate::services::sync_scheduler::StaticEnvironment;
    use crate::storage::queries::{accounts, tests_support::demo_account};
    use crate::storage::Database;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Fixture;

    #[async_trait]
    impl MessageLoader for Fixture {
        async fn load(&self, _folder: &str, server_id: &str) -> Option<Vec<u8>> {
            (server_id != "broken").then(|| format!("Subject: {server_id}\r\n\r\nhi\r\n").into_bytes())
        }
    }

    #[derive(Default)]
    struct Passwords(Mutex<HashMap<String, String>>);

    #[async_trait]
    impl CredentialStore for Passwords {
        async fn store(&self, key: &str, value: &str) -> AccountResult<()> {
            self.0.lock().unwrap().insert(key.into(), value.into());
            Ok(())
        }

        async fn retrieve(&self, key: &str) -> AccountResult<Option<String>> {
            Ok(self.0.lock().unwrap().get(key).cloned())
        }

        async fn delete(&self, key: &str) -> AccountResult<()> {
            self.0.lock().unwrap().remove(key);
            Ok(())
        }
    }

    /// Counts backend creations for remote accounts, serving demo content.
    struct CountingFactory {
        inner: DemoBackendFactory,
        created: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BackendFactory for CountingFactory {
        async fn create_backend(&self, account: &Account) -> BackendResult<Arc<dyn Backend>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            self.inner.create_backend(account).await
        }
    }

    struct Harness {
        db: Database,
        accounts: AccountService,
        worker: MailSyncWorker,
        remote_backends: Arc<AtomicUsize>,
    }

    async fn harness(contents: &str, policy: BackgroundSync) -> Harness {
        let db = Database::open_in_memory().await.unwrap();
        let contents: DemoContents = serde_json::from_str(contents).unwrap();
        let demo = || {
            DemoBackendFactory::new(Arc::new(db.clone()), contents.clone(), Arc::new(Fixture))
        };
        let remote_backends = Arc::new(AtomicUsize::new(0));
        let backends = BackendManager::new()
            .with_factory(BackendKind::Demo, Arc::new(demo()))
            .with_factory(
                BackendKind::Remote,
                Arc::new(CountingFactory {
                    inner: demo(),
                    created: remote_backends.clone(),
                }),
            );

        let accounts = AccountService::new(Arc::new(db.clone()), Arc::new(Passwords::default()));
        let sync = Arc::new(AccountSyncService::new(
            accounts.clone(),
            Arc::new(backends),
            Arc::new(db.clone()),
            SyncSettings::default(),
        ));
        let worker = MailSyncWorker::new(
            accounts.clone(),
            sync,
            Arc::new(StaticEnvironment {
                auto_sync_enabled: false,
                ..StaticEnvironment::default()
            }),
            policy,
        );

        Harness {
            db,
            accounts,
            worker,
            remote_backends,
        }
    }

    const GOOD: &str =
        r#"{"folders": {"INBOX": {"name": "Inbox", "type": "inbox", "message_server_ids": ["1"]}}}"#;
    const BROKEN: &str =
        r#"{"folders": {"INBOX": {"name": "Inbox", "type": "inbox", "message_server_ids": ["broken"]}}}"#;

    fn remote_account(id: &str) -> Account {
        let mut account = demo_account(id);
        account.backend_kind = BackendKind::Remote;
        account
    }

    #[tokio::test]
    async fn successful_sync_succeeds() {
        let h = harness(GOOD, BackgroundSync::Always).await;
        let account = demo_account("a");
        accounts::insert(&h.db, &account).await.unwrap();

        assert_eq!(h.worker.run(&account.id).await, JobOutcome::Success);

        let stored = accounts::get_by_id(&h.db, &account.id).await.unwrap().unwrap();
        assert!(stored.last_sync.is_some());
    }

    #[tokio::test]
    async fn failed_folder_asks_for_retry() {
        let h = harness(BROKEN, BackgroundSync::Always).await;
        let account = demo_account("a");
        accounts::insert(&h.db, &account).await.unwrap();

        assert_eq!(h.worker.run(&account.id).await, JobOutcome::Retry);
    }

    #[tokio::test]
    async fn missing_credentials_succeed_without_sync() {
        let h = harness(GOOD, BackgroundSync::Always).await;
        let account = remote_account("r");
        accounts::insert(&h.db, &account).await.unwrap();

        assert_eq!(h.worker.run(&account.id).await, JobOutcome::Success);
        assert_eq!(h.remote_backends.load(Ordering::SeqCst), 0);

        h.accounts.store_password(&account.id, "secret").await.unwrap();
        assert_eq!(h.worker.run(&account.id).await, JobOutcome::Success);
        assert_eq!(h.remote_backends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pending_sign_in_succeeds_without_sync() {
        let h = harness(GOOD, BackgroundSync::Always).await;
        let mut account = remote_account("r");
        account.sign_in_required = true;
        accounts::insert(&h.db, &account).await.unwrap();
        h.accounts.store_password(&account.id, "secret").await.unwrap();

        assert_eq!(h.worker.run(&account.id).await, JobOutcome::Success);
        assert_eq!(h.remote_backends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn nothing_to_do_succeeds() {
        let h = harness(BROKEN, BackgroundSync::Always).await;
        let mut account = demo_account("a");
        account.sync_interval_minutes = 0;
        accounts::insert(&h.db, &account).await.unwrap();

        assert_eq!(h.worker.run(&account.id).await, JobOutcome::Success);
        assert_eq!(
            h.worker.run(&AccountId::from("deleted")).await,
            JobOutcome::Success
        );
    }

    #[tokio::test]
    async fn disabled_background_sync_succeeds_without_sync() {
        let h = harness(BROKEN, BackgroundSync::WhenAutoSyncEnabled).await;
        let account = demo_account("a");
        accounts::insert(&h.db, &account).await.unwrap();

        // The broken fixture would fail if a sync were attempted.
        assert_eq!(h.worker.run(&account.id).await, JobOutcome::Success);
    }

    #[tokio::test]
    async fn account_deleted_before_sync_succeeds() {
        let h = harness(GOOD, BackgroundSync::Always).await;
        let account = demo_account("a");
        accounts::insert(&h.db, &account).await.unwrap();

        // The sync service sees a database where the account is already gone.
        let other_db = Database::open_in_memory().await.unwrap();
        let sync = Arc::new(AccountSyncService::new(
            AccountService::new(Arc::new(other_db.clone()), Arc::new(Passwords::default())),
            Arc::new(BackendManager::new()),
            Arc::new(other_db),
            SyncSettings::default(),
        ));
        let worker = MailSyncWorker::new(
            h.accounts.clone(),
            sync,
            Arc::new(StaticEnvironment::default()),
            BackgroundSync::Always,
        );

        assert_eq!(worker.run(&account.id).await, JobOutcome::Success);
    }
}
