//! Message CRUD operations.
//!
//! Messages are keyed by (account, folder, server id). Once a message is
//! stored as fully downloaded only its flags change.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{AccountId, Flag, Message, MessageDownloadState};
use crate::storage::database::{Database, Result};

/// A stored message together with its download state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message: Message,
    pub download_state: MessageDownloadState,
}

/// Returns the server ids of all messages in a folder.
pub async fn server_ids(
    db: &Database,
    account_id: &AccountId,
    folder: &str,
) -> Result<HashSet<String>> {
    let account_id = account_id.clone();
    let folder = folder.to_string();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT server_id FROM messages WHERE account_id = ?1 AND folder_server_id = ?2",
        )?;
        let rows = stmt.query_map(params![account_id.0, folder], |row| row.get::<_, String>(0))?;
        let ids: std::result::Result<HashSet<_>, _> = rows.collect();
        Ok(ids?)
    })
    .await
}

/// Returns whether a message is stored.
pub async fn exists(
    db: &Database,
    account_id: &AccountId,
    folder: &str,
    server_id: &str,
) -> Result<bool> {
    let account_id = account_id.clone();
    let folder = folder.to_string();
    let server_id = server_id.to_string();

    db.with_conn(move |conn| {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE account_id = ?1 AND folder_server_id = ?2 AND server_id = ?3",
            params![account_id.0, folder, server_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    })
    .await
}

/// Retrieves a stored message.
pub async fn get(
    db: &Database,
    account_id: &AccountId,
    folder: &str,
    server_id: &str,
) -> Result<Option<StoredMessage>> {
    let account_id = account_id.clone();
    let folder = folder.to_string();
    let server_id = server_id.to_string();

    db.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT server_id, download_state, flags, subject, message_id, date, size, body
            FROM messages
            WHERE account_id = ?1 AND folder_server_id = ?2 AND server_id = ?3
            "#,
        )?;
        let message = stmt
            .query_row(params![account_id.0, folder, server_id], row_to_stored)
            .optional()?;
        Ok(message)
    })
    .await
}

/// Returns the flags of a stored message, or `None` if it is not stored.
pub async fn flags(
    db: &Database,
    account_id: &AccountId,
    folder: &str,
    server_id: &str,
) -> Result<Option<HashSet<Flag>>> {
    let account_id = account_id.clone();
    let folder = folder.to_string();
    let server_id = server_id.to_string();

    db.with_conn(move |conn| {
        let flags = conn
            .query_row(
                "SELECT flags FROM messages WHERE account_id = ?1 AND folder_server_id = ?2 AND server_id = ?3",
                params![account_id.0, folder, server_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(flags.map(|f| decode_flags(&f)))
    })
    .await
}

/// Sets or clears a single flag on a stored message.
pub async fn set_flag(
    db: &Database,
    account_id: &AccountId,
    folder: &str,
    server_id: &str,
    flag: Flag,
    value: bool,
) -> Result<()> {
    let account_id = account_id.clone();
    let folder = folder.to_string();
    let server_id = server_id.to_string();

    db.transaction(move |tx| {
        let current = tx
            .query_row(
                "SELECT flags FROM messages WHERE account_id = ?1 AND folder_server_id = ?2 AND server_id = ?3",
                params![account_id.0, folder, server_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        let Some(current) = current else {
            return Ok(());
        };

        let mut flags = decode_flags(&current);
        if value {
            flags.insert(flag);
        } else {
            flags.remove(&flag);
        }

        tx.execute(
            "UPDATE messages SET flags = ?1, updated_at = ?2 WHERE account_id = ?3 AND folder_server_id = ?4 AND server_id = ?5",
            params![
                encode_flags(&flags),
                Utc::now().to_rfc3339(),
                account_id.0,
                folder,
                server_id
            ],
        )?;
        Ok(())
    })
    .await
}

/// Stores a message.
///
/// A message already stored as fully downloaded only has its flags
/// replaced. Otherwise the row is written, never lowering the download
/// state and keeping an existing body when the new one is absent.
pub async fn save(
    db: &Database,
    account_id: &AccountId,
    folder: &str,
    message: &Message,
    state: MessageDownloadState,
) -> Result<()> {
    let account_id = account_id.clone();
    let folder = folder.to_string();
    let message = message.clone();

    db.transaction(move |tx| {
        let now = Utc::now().to_rfc3339();
        let flags = encode_flags(&message.flags);

        let existing = tx
            .query_row(
                "SELECT download_state FROM messages WHERE account_id = ?1 AND folder_server_id = ?2 AND server_id = ?3",
                params![account_id.0, folder, message.server_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|s| MessageDownloadState::parse(&s));

        match existing {
            Some(MessageDownloadState::Full) => {
                tx.execute(
                    "UPDATE messages SET flags = ?1, updated_at = ?2 WHERE account_id = ?3 AND folder_server_id = ?4 AND server_id = ?5",
                    params![flags, now, account_id.0, folder, message.server_id],
                )?;
            }
            Some(previous) => {
                let state = previous.max(state);
                tx.execute(
                    r#"
                    UPDATE messages SET
                        download_state = ?1,
                        flags = ?2,
                        subject = COALESCE(?3, subject),
                        message_id = COALESCE(?4, message_id),
                        date = COALESCE(?5, date),
                        size = ?6,
                        body = COALESCE(?7, body),
                        updated_at = ?8
                    WHERE account_id = ?9 AND folder_server_id = ?10 AND server_id = ?11
                    "#,
                    params![
                        state.as_str(),
                        flags,
                        message.subject,
                        message.message_id,
                        message.date.map(|d| d.to_rfc3339()),
                        message.size as i64,
                        message.body,
                        now,
                        account_id.0,
                        folder,
                        message.server_id,
                    ],
                )?;
            }
            None => {
                tx.execute(
                    r#"
                    INSERT INTO messages (
                        account_id, folder_server_id, server_id, download_state, flags,
                        subject, message_id, date, size, body, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                    "#,
                    params![
                        account_id.0,
                        folder,
                        message.server_id,
                        state.as_str(),
                        flags,
                        message.subject,
                        message.message_id,
                        message.date.map(|d| d.to_rfc3339()),
                        message.size as i64,
                        message.body,
                        now,
                        now,
                    ],
                )?;
            }
        }

        Ok(())
    })
    .await
}

/// Deletes messages from a folder.
pub async fn destroy(
    db: &Database,
    account_id: &AccountId,
    folder: &str,
    server_ids: Vec<String>,
) -> Result<()> {
    let account_id = account_id.clone();
    let folder = folder.to_string();

    db.transaction(move |tx| {
        let mut stmt = tx.prepare(
            "DELETE FROM messages WHERE account_id = ?1 AND folder_server_id = ?2 AND server_id = ?3",
        )?;
        for server_id in &server_ids {
            stmt.execute(params![account_id.0, folder, server_id])?;
        }
        Ok(())
    })
    .await
}

/// Counts messages in a folder.
pub async fn count(db: &Database, account_id: &AccountId, folder: &str) -> Result<u32> {
    let account_id = account_id.clone();
    let folder = folder.to_string();

    db.with_conn(move |conn| {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE account_id = ?1 AND folder_server_id = ?2",
            params![account_id.0, folder],
            |row| row.get(0),
        )?;
        Ok(count)
    })
    .await
}

fn encode_flags(flags: &HashSet<Flag>) -> String {
    let mut names: Vec<&str> = flags.iter().map(Flag::as_str).collect();
    names.sort_unstable();
    names.join(",")
}

fn decode_flags(value: &str) -> HashSet<Flag> {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    let state: String = row.get(1)?;
    let flags: String = row.get(2)?;
    let date: Option<String> = row.get(5)?;
    let size: i64 = row.get(6)?;

    Ok(StoredMessage {
        message: Message {
            server_id: row.get(0)?,
            flags: decode_flags(&flags),
            subject: row.get(3)?,
            message_id: row.get(4)?,
            date: date
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            size: size.max(0) as u64,
            body: row.get(7)?,
        },
        download_state: MessageDownloadState::parse(&state),
    })
}
