//! Local storage facade used by backends.
//!
//! Backends never touch SQL directly. They see an account's folders through
//! [`BackendStorage`] and a single folder's messages through
//! [`BackendFolder`]. The SQLite implementation forwards to the query
//! modules.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{AccountId, Flag, FolderInfo, Message, MessageDownloadState, MoreMessages};

use super::database::{Database, Result};
use super::queries::{folders, messages};

/// Folder creations and deletions applied together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderUpdate {
    pub create: Vec<FolderInfo>,
    pub delete: Vec<String>,
}

impl FolderUpdate {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.delete.is_empty()
    }
}

/// Account-level view of local storage.
#[async_trait]
pub trait BackendStorage: Send + Sync {
    /// Server ids of every local folder.
    async fn folder_server_ids(&self) -> Result<HashSet<String>>;

    /// Server ids of folders included in periodic sync.
    async fn synced_folder_server_ids(&self) -> Result<HashSet<String>> {
        self.folder_server_ids().await
    }

    /// Applies folder creations and deletions atomically.
    async fn update_folders(&self, update: FolderUpdate) -> Result<()>;

    /// Returns a handle on one folder. The folder need not exist yet.
    fn folder(&self, server_id: &str) -> Box<dyn BackendFolder>;
}

/// Folder-level view of local storage.
#[async_trait]
pub trait BackendFolder: Send + Sync {
    fn server_id(&self) -> &str;

    async fn message_server_ids(&self) -> Result<HashSet<String>>;

    async fn is_message_present(&self, server_id: &str) -> Result<bool>;

    /// Flags of a stored message, `None` if the message is not stored.
    async fn message_flags(&self, server_id: &str) -> Result<Option<HashSet<Flag>>>;

    async fn set_message_flag(&self, server_id: &str, flag: Flag, value: bool) -> Result<()>;

    /// Stores a message. A fully downloaded message only has its flags updated.
    async fn save_message(&self, message: &Message, state: MessageDownloadState) -> Result<()>;

    async fn destroy_messages(&self, server_ids: &[String]) -> Result<()>;

    async fn more_messages(&self) -> Result<MoreMessages>;

    async fn set_more_messages(&self, more_messages: MoreMessages) -> Result<()>;

    async fn set_last_checked(&self, at: DateTime<Utc>) -> Result<()>;

    async fn set_status(&self, status: Option<&str>) -> Result<()>;
}

/// Creates the storage facade for an account.
pub trait BackendStorageFactory: Send + Sync {
    fn create_backend_storage(&self, account_id: &AccountId) -> Arc<dyn BackendStorage>;
}

impl BackendStorageFactory for Database {
    fn create_backend_storage(&self, account_id: &AccountId) -> Arc<dyn BackendStorage> {
        Arc::new(SqliteBackendStorage::new(self.clone(), account_id.clone()))
    }
}

/// [`BackendStorage`] backed by the SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteBackendStorage {
    db: Database,
    account_id: AccountId,
}

impl SqliteBackendStorage {
    pub fn new(db: Database, account_id: AccountId) -> Self {
        Self { db, account_id }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }
}

#[async_trait]
impl BackendStorage for SqliteBackendStorage {
    async fn folder_server_ids(&self) -> Result<HashSet<String>> {
        folders::server_ids(&self.db, &self.account_id).await
    }

    async fn synced_folder_server_ids(&self) -> Result<HashSet<String>> {
        folders::synced_server_ids(&self.db, &self.account_id).await
    }

    async fn update_folders(&self, update: FolderUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        folders::apply_changes(&self.db, &self.account_id, update.create, update.delete).await
    }

    fn folder(&self, server_id: &str) -> Box<dyn BackendFolder> {
        Box::new(SqliteBackendFolder {
            db: self.db.clone(),
            account_id: self.account_id.clone(),
            server_id: server_id.to_string(),
        })
    }
}

/// [`BackendFolder`] backed by the SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteBackendFolder {
    db: Database,
    account_id: AccountId,
    server_id: String,
}

#[async_trait]
impl BackendFolder for SqliteBackendFolder {
    fn server_id(&self) -> &str {
        &self.server_id
    }

    async fn message_server_ids(&self) -> Result<HashSet<String>> {
        messages::server_ids(&self.db, &self.account_id, &self.server_id).await
    }

    async fn is_message_present(&self, server_id: &str) -> Result<bool> {
        messages::exists(&self.db, &self.account_id, &self.server_id, server_id).await
    }

    async fn message_flags(&self, server_id: &str) -> Result<Option<HashSet<Flag>>> {
        messages::flags(&self.db, &self.account_id, &self.server_id, server_id).await
    }

    async fn set_message_flag(&self, server_id: &str, flag: Flag, value: bool) -> Result<()> {
        messages::set_flag(&self.db, &self.account_id, &self.server_id, server_id, flag, value)
            .await
    }

    async fn save_message(&self, message: &Message, state: MessageDownloadState) -> Result<()> {
        messages::save(&self.db, &self.account_id, &self.server_id, message, state).await
    }

    async fn destroy_messages(&self, server_ids: &[String]) -> Result<()> {
        if server_ids.is_empty() {
            return Ok(());
        }
        messages::destroy(&self.db, &self.account_id, &self.server_id, server_ids.to_vec()).await
    }

    async fn more_messages(&self) -> Result<MoreMessages> {
        Ok(folders::more_messages(&self.db, &self.account_id, &self.server_id)
            .await?
            .unwrap_or_default())
    }

    async fn set_more_messages(&self, more_messages: MoreMessages) -> Result<()> {
        folders::set_more_messages(&self.db, &self.account_id, &self.server_id, more_messages).await
    }

    async fn set_last_checked(&self, at: DateTime<Utc>) -> Result<()> {
        folders::set_last_checked(&self.db, &self.account_id, &self.server_id, at).await
    }

    async fn set_status(&self, status: Option<&str>) -> Result<()> {
        folders::set_status(
            &self.db,
            &self.account_id,
            &self.server_id,
            status.map(str::to_owned),
        )
        .await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FolderType;
    use crate::storage::queries::{accounts, tests_support::demo_account};
    use pretty_assertions::assert_eq;

    async fn setup() -> (Database, Arc<dyn BackendStorage>) {
        let db = Database::open_in_memory().await.unwrap();
        let account = demo_account("acc-1");
        accounts::insert(&db, &account).await.unwrap();
        let storage = db.create_backend_storage(&account.id);
        (db, storage)
    }

    #[tokio::test]
    async fn update_folders_applies_creates_and_deletes() {
        let (_db, storage) = setup().await;

        storage
            .update_folders(FolderUpdate {
                create: vec![
                    FolderInfo::inbox(),
                    FolderInfo::new("Trash", "Trash", FolderType::Trash),
                ],
                delete: vec![],
            })
            .await
            .unwrap();
        storage
            .update_folders(FolderUpdate {
                create: vec![FolderInfo::new("Sent", "Sent", FolderType::Sent)],
                delete: vec!["Trash".to_string()],
            })
            .await
            .unwrap();

        let mut ids: Vec<_> = storage.folder_server_ids().await.unwrap().into_iter().collect();
        ids.sort();
        assert_eq!(ids, vec!["INBOX".to_string(), "Sent".to_string()]);

        let synced = storage.synced_folder_server_ids().await.unwrap();
        assert_eq!(synced, HashSet::from(["INBOX".to_string()]));
    }

    #[tokio::test]
    async fn folder_handle_reads_and_writes_messages() {
        let (_db, storage) = setup().await;
        storage
            .update_folders(FolderUpdate {
                create: vec![FolderInfo::inbox()],
                delete: vec![],
            })
            .await
            .unwrap();

        let inbox = storage.folder("INBOX");
        assert_eq!(inbox.server_id(), "INBOX");
        assert_eq!(inbox.more_messages().await.unwrap(), MoreMessages::Unknown);

        let message = Message::envelope("42", 10).with_flags([Flag::Seen]);
        inbox
            .save_message(&message, MessageDownloadState::Envelope)
            .await
            .unwrap();
        inbox.set_message_flag("42", Flag::Flagged, true).await.unwrap();
        inbox.set_more_messages(MoreMessages::False).await.unwrap();

        assert!(inbox.is_message_present("42").await.unwrap());
        assert_eq!(
            inbox.message_flags("42").await.unwrap(),
            Some(HashSet::from([Flag::Seen, Flag::Flagged]))
        );
        assert_eq!(inbox.more_messages().await.unwrap(), MoreMessages::False);

        inbox.destroy_messages(&["42".to_string()]).await.unwrap();
        assert!(inbox.message_server_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_folder_drops_its_messages() {
        let (db, storage) = setup().await;
        storage
            .update_folders(FolderUpdate {
                create: vec![FolderInfo::new("Work", "Work", FolderType::Regular)],
                delete: vec![],
            })
            .await
            .unwrap();
        storage
            .folder("Work")
            .save_message(&Message::envelope("1", 0), MessageDownloadState::Envelope)
            .await
            .unwrap();

        storage
            .update_folders(FolderUpdate {
                create: vec![],
                delete: vec!["Work".to_string()],
            })
            .await
            .unwrap();

        let count = messages::count(&db, &AccountId::from("acc-1"), "Work")
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn empty_update() {
        assert!(FolderUpdate::default().is_empty());
        assert!(!FolderUpdate {
            create: vec![FolderInfo::inbox()],
            delete: vec![],
        }
        .is_empty());
    }
}
