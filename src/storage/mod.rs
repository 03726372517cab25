//! Database and credential storage.
//!
//! - SQLite database for accounts, folders and messages
//! - the facade backends use to read and write local mailbox state
//! - OS keychain integration for account passwords

mod backend_storage;
mod database;
mod keychain;
pub mod queries;
mod schema;

#[cfg(test)]
pub(crate) use backend_storage::memory;
pub use backend_storage::{
    BackendFolder, BackendStorage, BackendStorageFactory, FolderUpdate, SqliteBackendFolder,
    SqliteBackendStorage,
};
pub use database::{Database, Result, StorageError};
pub use keychain::{KeychainAccess, KeychainError};
