//! mailsync - Entry point for the background sync daemon

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;

use mailsync::backend::{BackendManager, DemoBackendFactory, DemoContents, FixtureDirLoader};
use mailsync::config::Settings;
use mailsync::domain::BackendKind;
use mailsync::services::{
    AccountService, AccountSyncService, CreateAccountRequest, MailSyncScheduler, MailSyncWorker,
    StaticEnvironment, SystemEnvironment, TokioJobHost,
};
use mailsync::storage::{Database, KeychainAccess};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting mailsync");

    let settings_path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => Settings::default_path()?,
    };
    let settings = Settings::load_or_default(&settings_path)
        .with_context(|| format!("loading {}", settings_path.display()))?;

    let db_path = settings.storage.resolve_database_path()?;
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("opening {}", db_path.display()))?;

    let accounts = AccountService::new(Arc::new(db.clone()), Arc::new(KeychainAccess::new()));

    let mut backends = BackendManager::new();
    if let Some(dir) = &settings.demo.fixture_dir {
        let contents = DemoContents::load(dir).await?;
        backends = backends.with_factory(
            BackendKind::Demo,
            Arc::new(DemoBackendFactory::new(
                Arc::new(db.clone()),
                contents,
                Arc::new(FixtureDirLoader::new(dir.clone())),
            )),
        );

        if settings.demo.enabled && accounts.count().await? == 0 {
            let account = accounts
                .create_account(
                    CreateAccountRequest::demo(settings.demo.account_email.clone())
                        .display_name("Demo"),
                )
                .await?;
            tracing::info!(account = %account.id, "demo account created");
        }
    }

    let environment: Arc<dyn SystemEnvironment> = Arc::new(StaticEnvironment::default());
    let sync = Arc::new(AccountSyncService::new(
        accounts.clone(),
        Arc::new(backends),
        Arc::new(db.clone()),
        settings.sync.clone(),
    ));

    let mut events = sync.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!(?event, "sync event"),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "sync event log fell behind")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let worker = Arc::new(MailSyncWorker::new(
        accounts.clone(),
        sync,
        environment.clone(),
        settings.sync.background_sync,
    ));
    let host = Arc::new(
        TokioJobHost::new(worker, environment.clone())
            .with_constraint_poll(settings.sync.constraint_poll()),
    );
    let scheduler = MailSyncScheduler::new(host.clone(), environment, settings.sync.background_sync)
        .with_backoff(settings.sync.backoff());

    let all = accounts.get_all_accounts().await?;
    let scheduled = scheduler.schedule_all(&all);
    tracing::info!(
        accounts = all.len(),
        scheduled,
        "mailsync running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    host.shutdown();

    Ok(())
}
