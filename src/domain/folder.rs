//! Folder domain types.
//!
//! A folder is identified by its server id, which is unique per account.
//! Stores without native nesting receive composite ids such as
//! `Parent/Child` produced by flattening the remote tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a folder within an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderType {
    Inbox,
    Sent,
    Drafts,
    Trash,
    Spam,
    Archive,
    Regular,
}

impl FolderType {
    /// Returns the storage representation of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Sent => "sent",
            Self::Drafts => "drafts",
            Self::Trash => "trash",
            Self::Spam => "spam",
            Self::Archive => "archive",
            Self::Regular => "regular",
        }
    }

    /// Parses the storage representation, falling back to `Regular`.
    pub fn parse(value: &str) -> Self {
        match value {
            "inbox" => Self::Inbox,
            "sent" => Self::Sent,
            "drafts" => Self::Drafts,
            "trash" => Self::Trash,
            "spam" => Self::Spam,
            "archive" => Self::Archive,
            _ => Self::Regular,
        }
    }
}

impl Default for FolderType {
    fn default() -> Self {
        Self::Regular
    }
}

/// Whether more messages are available on the server than were fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoreMessages {
    True,
    False,
    Unknown,
}

impl MoreMessages {
    /// Returns the storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::True => "true",
            Self::False => "false",
            Self::Unknown => "unknown",
        }
    }

    /// Parses the storage representation, falling back to `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value {
            "true" => Self::True,
            "false" => Self::False,
            _ => Self::Unknown,
        }
    }
}

impl Default for MoreMessages {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Identity and metadata needed to create a local folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderInfo {
    /// Server id, unique per account.
    pub server_id: String,
    /// Display name, possibly hierarchical.
    pub name: String,
    /// Folder role.
    pub folder_type: FolderType,
}

impl FolderInfo {
    /// Creates folder info.
    pub fn new(server_id: impl Into<String>, name: impl Into<String>, folder_type: FolderType) -> Self {
        Self {
            server_id: server_id.into(),
            name: name.into(),
            folder_type,
        }
    }

    /// Convenience constructor for the inbox.
    pub fn inbox() -> Self {
        Self::new("INBOX", "Inbox", FolderType::Inbox)
    }
}

/// A locally stored folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// Server id, unique per account.
    pub server_id: String,
    /// Display name.
    pub display_name: String,
    /// Folder role.
    pub folder_type: FolderType,
    /// Pagination state of the last sync.
    pub more_messages: MoreMessages,
    /// Whether periodic sync includes this folder.
    pub sync_enabled: bool,
    /// When the folder was last synced successfully.
    pub last_checked: Option<DateTime<Utc>>,
    /// Last sync error, cleared on success.
    pub status: Option<String>,
}

impl Folder {
    /// Returns whether the server reported more messages than fetched.
    pub fn more_messages_available(&self) -> bool {
        self.more_messages == MoreMessages::True
    }
}

/// A node of a nested remote folder tree.
///
/// `server_id` and `name` are relative to the parent node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderNode {
    pub server_id: String,
    pub name: String,
    #[serde(default)]
    pub folder_type: FolderType,
    #[serde(default)]
    pub children: Vec<FolderNode>,
}

impl FolderNode {
    /// Creates a leaf node.
    pub fn leaf(server_id: impl Into<String>, name: impl Into<String>, folder_type: FolderType) -> Self {
        Self {
            server_id: server_id.into(),
            name: name.into(),
            folder_type,
            children: Vec::new(),
        }
    }

    /// Adds a child node.
    pub fn with_child(mut self, child: FolderNode) -> Self {
        self.children.push(child);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_type_storage_form() {
        for ty in [
            FolderType::Inbox,
            FolderType::Sent,
            FolderType::Drafts,
            FolderType::Trash,
            FolderType::Spam,
            FolderType::Archive,
            FolderType::Regular,
        ] {
            assert_eq!(FolderType::parse(ty.as_str()), ty);
        }
        assert_eq!(FolderType::parse("something-else"), FolderType::Regular);
    }

    #[test]
    fn more_messages_defaults_to_unknown() {
        assert_eq!(MoreMessages::default(), MoreMessages::Unknown);
        assert_eq!(MoreMessages::parse("garbage"), MoreMessages::Unknown);
        assert_eq!(MoreMessages::parse("false"), MoreMessages::False);
    }

    #[test]
    fn more_messages_available_only_when_true() {
        let mut folder = Folder {
            server_id: "INBOX".into(),
            display_name: "Inbox".into(),
            folder_type: FolderType::Inbox,
            more_messages: MoreMessages::Unknown,
            sync_enabled: true,
            last_checked: None,
            status: None,
        };
        assert!(!folder.more_messages_available());

        folder.more_messages = MoreMessages::True;
        assert!(folder.more_messages_available());
    }

    #[test]
    fn folder_node_deserializes_without_children() {
        let node: FolderNode =
            serde_json::from_str(r#"{"server_id":"work","name":"Work"}"#).unwrap();
        assert_eq!(node.folder_type, FolderType::Regular);
        assert!(node.children.is_empty());
    }
}
