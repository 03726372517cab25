//! SQL schema definitions as const strings.

/// SQL to create the accounts table.
pub const CREATE_ACCOUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL,
    display_name TEXT,
    backend_kind TEXT NOT NULL,
    server_settings TEXT NOT NULL,
    sync_interval_minutes INTEGER NOT NULL DEFAULT 15,
    last_sync TEXT,
    sign_in_required INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the folders table.
pub const CREATE_FOLDERS: &str = r#"
CREATE TABLE IF NOT EXISTS folders (
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    server_id TEXT NOT NULL,
    name TEXT NOT NULL,
    folder_type TEXT NOT NULL,
    more_messages TEXT NOT NULL DEFAULT 'unknown',
    sync_enabled INTEGER NOT NULL DEFAULT 0,
    last_checked TEXT,
    status TEXT,
    PRIMARY KEY (account_id, server_id)
)
"#;

/// SQL to create the messages table.
pub const CREATE_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    account_id TEXT NOT NULL,
    folder_server_id TEXT NOT NULL,
    server_id TEXT NOT NULL,
    download_state TEXT NOT NULL,
    flags TEXT NOT NULL DEFAULT '',
    subject TEXT,
    message_id TEXT,
    date TEXT,
    size INTEGER NOT NULL DEFAULT 0,
    body BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (account_id, folder_server_id, server_id),
    FOREIGN KEY (account_id, folder_server_id)
        REFERENCES folders(account_id, server_id) ON DELETE CASCADE
)
"#;

/// SQL to create message indexes.
pub const CREATE_MESSAGE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_messages_folder ON messages(account_id, folder_server_id);
CREATE INDEX IF NOT EXISTS idx_messages_date ON messages(date DESC)
"#;

/// Returns all migrations in the order they must be applied.
pub fn all_migrations() -> Vec<&'static str> {
    vec![
        CREATE_ACCOUNTS,
        CREATE_FOLDERS,
        CREATE_MESSAGES,
        CREATE_MESSAGE_INDEXES,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn migrations_apply_twice() {
        let conn = Connection::open_in_memory().unwrap();
        for _ in 0..2 {
            for migration in all_migrations() {
                conn.execute_batch(migration).unwrap();
            }
        }
    }

    #[test]
    fn deleting_folder_cascades_to_messages() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        for migration in all_migrations() {
            conn.execute_batch(migration).unwrap();
        }

        conn.execute_batch(
            r#"
            INSERT INTO accounts (id, email, backend_kind, server_settings, created_at, updated_at)
                VALUES ('a', 'a@example.com', 'demo', '{}', 'now', 'now');
            INSERT INTO folders (account_id, server_id, name, folder_type)
                VALUES ('a', 'INBOX', 'Inbox', 'inbox');
            INSERT INTO messages (account_id, folder_server_id, server_id, download_state, created_at, updated_at)
                VALUES ('a', 'INBOX', '1', 'full', 'now', 'now');
            DELETE FROM folders WHERE server_id = 'INBOX';
            "#,
        )
        .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
