//! Folder CRUD operations.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{AccountId, Folder, FolderInfo, FolderType, MoreMessages};
use crate::storage::database::{Database, Result};

/// Returns the server ids of all folders of an account.
pub async fn server_ids(db: &Database, account_id: &AccountId) -> Result<HashSet<String>> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare("SELECT server_id FROM folders WHERE account_id = ?1")?;
        let rows = stmt.query_map([&account_id.0], |row| row.get::<_, String>(0))?;
        let ids: std::result::Result<HashSet<_>, _> = rows.collect();
        Ok(ids?)
    })
    .await
}

/// Returns the server ids of folders included in periodic sync.
pub async fn synced_server_ids(db: &Database, account_id: &AccountId) -> Result<HashSet<String>> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT server_id FROM folders WHERE account_id = ?1 AND sync_enabled = 1",
        )?;
        let rows = stmt.query_map([&account_id.0], |row| row.get::<_, String>(0))?;
        let ids: std::result::Result<HashSet<_>, _> = rows.collect();
        Ok(ids?)
    })
    .await
}

/// Retrieves a folder by server id.
pub async fn get(db: &Database, account_id: &AccountId, server_id: &str) -> Result<Option<Folder>> {
    let account_id = account_id.clone();
    let server_id = server_id.to_string();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT server_id, name, folder_type, more_messages, sync_enabled, last_checked, status
            FROM folders
            WHERE account_id = ?1 AND server_id = ?2
            "#,
        )?;
        let folder = stmt
            .query_row(params![account_id.0, server_id], row_to_folder)
            .optional()?;
        Ok(folder)
    })
    .await
}

/// Retrieves all folders of an account ordered by name.
pub async fn list(db: &Database, account_id: &AccountId) -> Result<Vec<Folder>> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT server_id, name, folder_type, more_messages, sync_enabled, last_checked, status
            FROM folders
            WHERE account_id = ?1
            ORDER BY name
            "#,
        )?;
        let rows = stmt.query_map([&account_id.0], row_to_folder)?;
        let folders: std::result::Result<Vec<_>, _> = rows.collect();
        Ok(folders?)
    })
    .await
}

/// Creates and deletes folders in a single transaction.
///
/// Creating a folder that already exists leaves it untouched. Deleting a
/// folder removes its messages as well.
pub async fn apply_changes(
    db: &Database,
    account_id: &AccountId,
    create: Vec<FolderInfo>,
    delete: Vec<String>,
) -> Result<()> {
    let account_id = account_id.clone();

    db.transaction(move |tx| {
        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO folders (account_id, server_id, name, folder_type, sync_enabled)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(account_id, server_id) DO NOTHING
                "#,
            )?;
            for folder in &create {
                insert.execute(params![
                    account_id.0,
                    folder.server_id,
                    folder.name,
                    folder.folder_type.as_str(),
                    (folder.folder_type == FolderType::Inbox) as i32,
                ])?;
            }
        }

        {
            let mut remove =
                tx.prepare("DELETE FROM folders WHERE account_id = ?1 AND server_id = ?2")?;
            for server_id in &delete {
                remove.execute(params![account_id.0, server_id])?;
            }
        }

        Ok(())
    })
    .await
}

/// Reads the pagination state of a folder.
pub async fn more_messages(
    db: &Database,
    account_id: &AccountId,
    server_id: &str,
) -> Result<Option<MoreMessages>> {
    let account_id = account_id.clone();
    let server_id = server_id.to_string();

    db.with_conn(move |conn| {
        let value = conn
            .query_row(
                "SELECT more_messages FROM folders WHERE account_id = ?1 AND server_id = ?2",
                params![account_id.0, server_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value.map(|v| MoreMessages::parse(&v)))
    })
    .await
}

/// Updates the pagination state of a folder.
pub async fn set_more_messages(
    db: &Database,
    account_id: &AccountId,
    server_id: &str,
    more_messages: MoreMessages,
) -> Result<()> {
    set_column(db, account_id, server_id, "more_messages", Some(more_messages.as_str().to_string()))
        .await
}

/// Records when a folder was last synced successfully.
pub async fn set_last_checked(
    db: &Database,
    account_id: &AccountId,
    server_id: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    set_column(db, account_id, server_id, "last_checked", Some(at.to_rfc3339())).await
}

/// Records or clears the last sync error of a folder.
pub async fn set_status(
    db: &Database,
    account_id: &AccountId,
    server_id: &str,
    status: Option<String>,
) -> Result<()> {
    set_column(db, account_id, server_id, "status", status).await
}

/// Includes or excludes a folder from periodic sync.
pub async fn set_sync_enabled(
    db: &Database,
    account_id: &AccountId,
    server_id: &str,
    enabled: bool,
) -> Result<()> {
    let account_id = account_id.clone();
    let server_id = server_id.to_string();

    db.with_conn(move |conn| {
        conn.execute(
            "UPDATE folders SET sync_enabled = ?1 WHERE account_id = ?2 AND server_id = ?3",
            params![enabled as i32, account_id.0, server_id],
        )?;
        Ok(())
    })
    .await
}

async fn set_column(
    db: &Database,
    account_id: &AccountId,
    server_id: &str,
    column: &'static str,
    value: Option<String>,
) -> Result<()> {
    let account_id = account_id.clone();
    let server_id = server_id.to_string();

    db.with_conn(move |conn| {
        let sql = format!("UPDATE folders SET {column} = ?1 WHERE account_id = ?2 AND server_id = ?3");
        conn.execute(&sql, params![value, account_id.0, server_id])?;
        Ok(())
    })
    .await
}

fn row_to_folder(row: &Row<'_>) -> rusqlite::Result<Folder> {
    let folder_type: String = row.get(2)?;
    let more_messages: String = row.get(3)?;
    let sync_enabled: i32 = row.get(4)?;
    let last_checked: Option<String> = row.get(5)?;

    Ok(Folder {
        server_id: row.get(0)?,
        display_name: row.get(1)?,
        folder_type: FolderType::parse(&folder_type),
        more_messages: MoreMessages::parse(&more_messages),
        sync_enabled: sync_enabled != 0,
        last_checked: last_checked
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        status: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::queries::accounts;
    use crate::storage::queries::tests_support::demo_account;

    async fn setup() -> (Database, AccountId) {
        let db = Database::open_in_memory().await.unwrap();
        let account = demo_account("acc-1");
        accounts::insert(&db, &account).await.unwrap();
        (db, account.id)
    }

    #[tokio::test]
    async fn apply_changes_creates_and_deletes() {
        let (db, account_id) = setup().await;

        apply_changes(
            &db,
            &account_id,
            vec![FolderInfo::inbox(), FolderInfo::new("Sent", "Sent", FolderType::Sent)],
            vec![],
        )
        .await
        .unwrap();

        apply_changes(&db, &account_id, vec![], vec!["Sent".to_string()])
            .await
            .unwrap();

        let ids = server_ids(&db, &account_id).await.unwrap();
        assert_eq!(ids, HashSet::from(["INBOX".to_string()]));
    }

    #[tokio::test]
    async fn only_inbox_is_synced_by_default() {
        let (db, account_id) = setup().await;

        apply_changes(
            &db,
            &account_id,
            vec![FolderInfo::inbox(), FolderInfo::new("Work", "Work", FolderType::Regular)],
            vec![],
        )
        .await
        .unwrap();

        let synced = synced_server_ids(&db, &account_id).await.unwrap();
        assert_eq!(synced, HashSet::from(["INBOX".to_string()]));

        set_sync_enabled(&db, &account_id, "Work", true).await.unwrap();
        let synced = synced_server_ids(&db, &account_id).await.unwrap();
        assert_eq!(synced.len(), 2);
    }

    #[tokio::test]
    async fn folder_bookkeeping_columns() {
        let (db, account_id) = setup().await;
        apply_changes(&db, &account_id, vec![FolderInfo::inbox()], vec![])
            .await
            .unwrap();

        set_more_messages(&db, &account_id, "INBOX", MoreMessages::False)
            .await
            .unwrap();
        set_status(&db, &account_id, "INBOX", Some("boom".into()))
            .await
            .unwrap();
        set_last_checked(&db, &account_id, "INBOX", Utc::now())
            .await
            .unwrap();

        let folder = get(&db, &account_id, "INBOX").await.unwrap().unwrap();
        assert_eq!(folder.more_messages, MoreMessages::False);
        assert_eq!(folder.status.as_deref(), Some("boom"));
        assert!(folder.last_checked.is_some());
        assert_eq!(folder.folder_type, FolderType::Inbox);

        set_status(&db, &account_id, "INBOX", None).await.unwrap();
        let folder = get(&db, &account_id, "INBOX").await.unwrap().unwrap();
        assert!(folder.status.is_none());
    }

    #[tokio::test]
    async fn missing_folder_has_no_pagination_state() {
        let (db, account_id) = setup().await;
        let state = more_messages(&db, &account_id, "nope").await.unwrap();
        assert!(state.is_none());
    }
}
