//! Database query modules for CRUD operations.
//!
//! Each module provides async functions that operate on the database.

pub mod accounts;
pub mod folders;
pub mod messages;

#[cfg(test)]
pub(crate) mod tests_support {
    use crate::domain::{Account, AccountId, BackendKind, ServerSettings};

    pub fn demo_account(id: &str) -> Account {
        Account {
            id: AccountId::from(id),
            email: format!("{id}@example.com"),
            display_name: Some("Demo".to_string()),
            backend_kind: BackendKind::Demo,
            server: ServerSettings::default(),
            sync_interval_minutes: 15,
            last_sync: None,
            sign_in_required: false,
        }
    }
}
