//! Account CRUD operations.
//!
//! Provides database operations for account entities.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};

use crate::domain::{Account, AccountId, BackendKind, ServerSettings};
use crate::storage::database::{Database, Result, StorageError};

const SELECT_ACCOUNT: &str = r#"
    SELECT
        id, email, display_name, backend_kind, server_settings,
        sync_interval_minutes, last_sync, sign_in_required
    FROM accounts
"#;

/// Inserts a new account into the database.
pub async fn insert(db: &Database, account: &Account) -> Result<()> {
    let account = account.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        let server_settings = serde_json::to_string(&account.server)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO accounts (
                id, email, display_name, backend_kind, server_settings,
                sync_interval_minutes, last_sync, sign_in_required,
                created_at, updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10
            )
            "#,
            params![
                account.id.0,
                account.email,
                account.display_name,
                account.backend_kind.as_str(),
                server_settings,
                account.sync_interval_minutes,
                account.last_sync.map(|t| t.to_rfc3339()),
                account.sign_in_required as i32,
                now,
                now,
            ],
        )?;

        Ok(())
    })
    .await
}

/// Retrieves an account by its ID.
pub async fn get_by_id(db: &Database, account_id: &AccountId) -> Result<Option<Account>> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let sql = format!("{SELECT_ACCOUNT} WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let result = stmt.query_row([&account_id.0], row_to_account).optional()?;
        Ok(result)
    })
    .await
}

/// Retrieves an account by email address.
pub async fn get_by_email(db: &Database, email: &str) -> Result<Option<Account>> {
    let email = email.to_string();

    db.with_conn(move |conn| {
        let sql = format!("{SELECT_ACCOUNT} WHERE email = ?1 COLLATE NOCASE");
        let mut stmt = conn.prepare(&sql)?;
        let result = stmt.query_row([&email], row_to_account).optional()?;
        Ok(result)
    })
    .await
}

/// Retrieves all accounts.
pub async fn get_all(db: &Database) -> Result<Vec<Account>> {
    db.with_conn(|conn| {
        let sql = format!("{SELECT_ACCOUNT} ORDER BY email");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_account)?;
        let accounts: std::result::Result<Vec<_>, _> = rows.collect();
        Ok(accounts?)
    })
    .await
}

/// Updates an account's periodic sync interval.
pub async fn set_sync_interval(
    db: &Database,
    account_id: &AccountId,
    interval_minutes: i32,
) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE accounts SET sync_interval_minutes = ?1, updated_at = ?2 WHERE id = ?3",
            params![interval_minutes, now, account_id.0],
        )?;
        Ok(())
    })
    .await
}

/// Records the time of the last successful sync.
pub async fn set_last_sync(db: &Database, account_id: &AccountId, at: DateTime<Utc>) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE accounts SET last_sync = ?1, updated_at = ?2 WHERE id = ?3",
            params![at.to_rfc3339(), now, account_id.0],
        )?;
        Ok(())
    })
    .await
}

/// Marks whether the user must sign in again.
pub async fn set_sign_in_required(
    db: &Database,
    account_id: &AccountId,
    required: bool,
) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE accounts SET sign_in_required = ?1, updated_at = ?2 WHERE id = ?3",
            params![required as i32, now, account_id.0],
        )?;
        Ok(())
    })
    .await
}

/// Deletes an account. Folders and messages cascade.
pub async fn delete(db: &Database, account_id: &AccountId) -> Result<()> {
    let account_id = account_id.clone();

    db.with_conn(move |conn| {
        conn.execute("DELETE FROM accounts WHERE id = ?1", [&account_id.0])?;
        Ok(())
    })
    .await
}

/// Counts total accounts.
pub async fn count(db: &Database) -> Result<u32> {
    db.with_conn(|conn| {
        let count: u32 = conn.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        Ok(count)
    })
    .await
}

fn row_to_account(row: &Row<'_>) -> std::result::Result<Account, rusqlite::Error> {
    let backend_kind: String = row.get(3)?;
    let server_json: String = row.get(4)?;
    let last_sync: Option<String> = row.get(6)?;

    let backend_kind = BackendKind::parse(&backend_kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            Box::new(StorageError::Serialization(format!(
                "unknown backend kind: {backend_kind}"
            ))),
        )
    })?;

    let server: ServerSettings = serde_json::from_str(&server_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(Account {
        id: AccountId(row.get(0)?),
        email: row.get(1)?,
        display_name: row.get(2)?,
        backend_kind,
        server,
        sync_interval_minutes: row.get(5)?,
        last_sync: last_sync
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        sign_in_required: row.get::<_, i32>(7)? != 0,
    })
}
