//! Domain layer types for the mail synchronization engine.
//!
//! Value types describing accounts, folders, and the sync projection of
//! messages. They carry invariants but no behavior beyond that.

mod account;
mod folder;
mod message;
mod types;

pub use account::{Account, BackendKind, ServerSettings};
pub use folder::{Folder, FolderInfo, FolderNode, FolderType, MoreMessages};
pub use message::{Flag, Message, MessageDownloadState, MessageParseError};
pub use types::AccountId;
