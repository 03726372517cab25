//! Integration tests for the sync engine.
//!
//! These tests drive the public API end to end: a demo account backed by an
//! on-disk fixture directory, synced into a SQLite database through the
//! account sync service, the worker and the job host. Each module contains
//! its own unit tests for detailed logic testing.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use mailsync::backend::{BackendManager, DemoBackendFactory, DemoContents, FixtureDirLoader};
use mailsync::config::SyncSettings;
use mailsync::domain::{BackendKind, MessageDownloadState};
use mailsync::services::{
    AccountResult, AccountService, AccountSyncService, BackgroundSync, CreateAccountRequest,
    CredentialStore, JobOutcome, JobWorker, MailSyncScheduler, MailSyncWorker,
    StaticEnvironment, SyncEvent, SystemEnvironment, TokioJobHost,
};
use mailsync::storage::queries::{folders, messages};
use mailsync::storage::Database;

const CONTENTS: &str = r#"{
    "folders": {
        "INBOX": {
            "name": "Inbox",
            "type": "inbox",
            "message_server_ids": ["welcome", "intro"]
        },
        "Archive": {
            "name": "Archive",
            "type": "archive",
            "message_server_ids": ["old"],
            "sub_folders": {
                "2024": { "name": "2024", "message_server_ids": [] }
            }
        }
    }
}"#;

struct NoCredentials;

#[async_trait]
impl CredentialStore for NoCredentials {
    async fn store(&self, _key: &str, _value: &str) -> AccountResult<()> {
        Ok(())
    }

    async fn retrieve(&self, _key: &str) -> AccountResult<Option<String>> {
        Ok(None)
    }

    async fn delete(&self, _key: &str) -> AccountResult<()> {
        Ok(())
    }
}

fn write_message(dir: &Path, folder: &str, id: &str, subject: &str) {
    let folder_dir = dir.join(folder);
    std::fs::create_dir_all(&folder_dir).unwrap();
    let raw = format!(
        "From: demo@example.com\r\nTo: you@example.com\r\nSubject: {subject}\r\n\
         Message-ID: <{id}@example.com>\r\n\r\nHello from {id}.\r\n"
    );
    std::fs::write(folder_dir.join(format!("{id}.eml")), raw).unwrap();
}

fn fixture() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("contents.json"), CONTENTS).unwrap();
    write_message(dir.path(), "INBOX", "welcome", "Welcome aboard");
    write_message(dir.path(), "INBOX", "intro", "Getting started");
    write_message(dir.path(), "Archive", "old", "Last year");
    dir
}

struct Engine {
    _fixture: TempDir,
    _data: TempDir,
    db: Database,
    accounts: AccountService,
    sync: Arc<AccountSyncService>,
}

async fn engine() -> Engine {
    let fixture = fixture();
    let data = tempfile::tempdir().unwrap();
    let db = Database::open(data.path().join("mailsync.db")).await.unwrap();

    let contents = DemoContents::load(fixture.path()).await.unwrap();
    let factory = DemoBackendFactory::new(
        Arc::new(db.clone()),
        contents,
        Arc::new(FixtureDirLoader::new(fixture.path())),
    );
    let backends = BackendManager::new().with_factory(BackendKind::Demo, Arc::new(factory));
    let accounts = AccountService::new(Arc::new(db.clone()), Arc::new(NoCredentials));
    let sync = Arc::new(AccountSyncService::new(
        accounts.clone(),
        Arc::new(backends),
        Arc::new(db.clone()),
        SyncSettings::default(),
    ));

    Engine {
        _fixture: fixture,
        _data: data,
        db,
        accounts,
        sync,
    }
}

// ============================================================================
// Account Sync
// ============================================================================

#[tokio::test]
async fn demo_account_syncs_into_database() {
    let engine = engine().await;
    let account = engine
        .accounts
        .create_account(CreateAccountRequest::demo("demo@example.com"))
        .await
        .unwrap();

    let report = engine.sync.sync_account(&account.id).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.folders_synced, vec!["INBOX".to_string()]);
    assert_eq!(report.new_messages, 2);

    let local = folders::list(&engine.db, &account.id).await.unwrap();
    let mut ids: Vec<_> = local.iter().map(|f| f.server_id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["Archive", "Archive/2024", "INBOX"]);

    let welcome = messages::get(&engine.db, &account.id, "INBOX", "welcome")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(welcome.message.subject.as_deref(), Some("Welcome aboard"));
    assert_eq!(welcome.download_state, MessageDownloadState::Full);

    let stored = engine.accounts.get_account(&account.id).await.unwrap();
    assert!(stored.last_sync.is_some());
}

#[tokio::test]
async fn second_sync_finds_nothing_new() {
    let engine = engine().await;
    let account = engine
        .accounts
        .create_account(CreateAccountRequest::demo("demo@example.com"))
        .await
        .unwrap();

    engine.sync.sync_account(&account.id).await.unwrap();
    let report = engine.sync.sync_account(&account.id).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.new_messages, 0);
    assert_eq!(
        messages::count(&engine.db, &account.id, "INBOX").await.unwrap(),
        2
    );
}

#[tokio::test]
async fn enabled_folder_joins_the_next_pass() {
    let engine = engine().await;
    let account = engine
        .accounts
        .create_account(CreateAccountRequest::demo("demo@example.com"))
        .await
        .unwrap();
    engine.sync.sync_account(&account.id).await.unwrap();

    folders::set_sync_enabled(&engine.db, &account.id, "Archive", true)
        .await
        .unwrap();
    let report = engine.sync.sync_account(&account.id).await.unwrap();

    assert_eq!(
        report.folders_synced,
        vec!["Archive".to_string(), "INBOX".to_string()]
    );
    assert_eq!(report.new_messages, 1);
    assert!(messages::exists(&engine.db, &account.id, "Archive", "old")
        .await
        .unwrap());
}

#[tokio::test]
async fn deleting_account_removes_local_mail() {
    let engine = engine().await;
    let account = engine
        .accounts
        .create_account(CreateAccountRequest::demo("demo@example.com"))
        .await
        .unwrap();
    engine.sync.sync_account(&account.id).await.unwrap();

    engine.accounts.delete_account(&account.id).await.unwrap();

    assert!(folders::list(&engine.db, &account.id).await.unwrap().is_empty());
    assert_eq!(
        messages::count(&engine.db, &account.id, "INBOX").await.unwrap(),
        0
    );
}

// ============================================================================
// Background Sync
// ============================================================================

#[tokio::test]
async fn worker_syncs_demo_account() {
    let engine = engine().await;
    let account = engine
        .accounts
        .create_account(CreateAccountRequest::demo("demo@example.com"))
        .await
        .unwrap();
    let worker = MailSyncWorker::new(
        engine.accounts.clone(),
        engine.sync.clone(),
        Arc::new(StaticEnvironment::default()),
        BackgroundSync::Always,
    );

    assert_eq!(worker.run(&account.id).await, JobOutcome::Success);
    assert_eq!(
        messages::count(&engine.db, &account.id, "INBOX").await.unwrap(),
        2
    );
}

#[tokio::test]
async fn scheduled_job_runs_first_sync_immediately() {
    let engine = engine().await;
    let account = engine
        .accounts
        .create_account(CreateAccountRequest::demo("demo@example.com"))
        .await
        .unwrap();
    let environment: Arc<dyn SystemEnvironment> = Arc::new(StaticEnvironment::default());
    let worker = Arc::new(MailSyncWorker::new(
        engine.accounts.clone(),
        engine.sync.clone(),
        environment.clone(),
        BackgroundSync::Always,
    ));
    let host = Arc::new(TokioJobHost::new(worker, environment.clone()));
    let scheduler = MailSyncScheduler::new(host.clone(), environment, BackgroundSync::Always);
    let mut events = engine.sync.subscribe();

    assert_eq!(scheduler.schedule_all(&[account.clone()]), 1);
    assert!(scheduler.is_scheduled(&account.id));

    // Never synced, so the first run starts without delay.
    let report = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(SyncEvent::Completed(id, report)) = events.recv().await {
                if id == account.id {
                    return report;
                }
            }
        }
    })
    .await
    .unwrap();

    assert!(report.is_success());
    assert_eq!(report.new_messages, 2);

    scheduler.cancel_mail_sync(&account.id);
    assert!(!scheduler.is_scheduled(&account.id));
    assert_eq!(host.job_count(), 0);
}

#[tokio::test]
async fn disabled_background_sync_schedules_nothing() {
    let engine = engine().await;
    let account = engine
        .accounts
        .create_account(CreateAccountRequest::demo("demo@example.com"))
        .await
        .unwrap();
    let environment: Arc<dyn SystemEnvironment> = Arc::new(StaticEnvironment {
        auto_sync_enabled: false,
        ..StaticEnvironment::default()
    });
    let worker = Arc::new(MailSyncWorker::new(
        engine.accounts.clone(),
        engine.sync.clone(),
        environment.clone(),
        BackgroundSync::WhenAutoSyncEnabled,
    ));
    let host = Arc::new(TokioJobHost::new(worker, environment.clone()));
    let scheduler =
        MailSyncScheduler::new(host.clone(), environment, BackgroundSync::WhenAutoSyncEnabled);

    assert_eq!(scheduler.schedule_all(&[account]), 0);
    assert_eq!(host.job_count(), 0);
}
