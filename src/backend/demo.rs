//! Fixture-backed demo backend.
//!
//! Serves a fixed folder tree and a fixed set of messages per folder.
//! Nothing is stored remotely, so flag changes and deletions succeed
//! without effect, and move, copy and upload hand out fresh ids.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Flag, FolderInfo, FolderNode, FolderType, Message};
use crate::services::{
    flatten_folder_tree, FolderReconciler, MessageSync, RemoteMessage, RemoteMessageSource,
    SyncStrategy,
};
use crate::storage::BackendStorage;

use super::capabilities::{Capabilities, Capability};
use super::config::SyncConfig;
use super::listener::SyncListener;
use super::traits::{Backend, BackendError, BackendPusher, BackendPusherCallback, Result};

/// Path delimiter of flattened demo folder ids.
pub const DEMO_DELIMITER: &str = "/";

/// One folder of the demo fixture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoFolder {
    pub name: String,
    #[serde(rename = "type", default)]
    pub folder_type: FolderType,
    #[serde(default)]
    pub message_server_ids: Vec<String>,
    #[serde(default)]
    pub sub_folders: BTreeMap<String, DemoFolder>,
}

/// The demo fixture: top-level folders keyed by server id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoContents {
    pub folders: BTreeMap<String, DemoFolder>,
}

impl DemoContents {
    /// Reads `contents.json` from a fixture directory.
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join("contents.json");
        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| BackendError::Permanent(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&json)
            .map_err(|e| BackendError::Permanent(format!("{}: {e}", path.display())))
    }

    /// The folder tree in the shape the reconciler flattens.
    pub fn folder_tree(&self) -> Vec<FolderNode> {
        fn to_nodes(folders: &BTreeMap<String, DemoFolder>) -> Vec<FolderNode> {
            folders
                .iter()
                .map(|(id, folder)| FolderNode {
                    server_id: id.clone(),
                    name: folder.name.clone(),
                    folder_type: folder.folder_type,
                    children: to_nodes(&folder.sub_folders),
                })
                .collect()
        }
        to_nodes(&self.folders)
    }

    /// Message ids keyed by flattened folder id.
    pub fn message_ids(&self) -> HashMap<String, Vec<String>> {
        fn collect(
            folders: &BTreeMap<String, DemoFolder>,
            prefix: Option<&str>,
            out: &mut HashMap<String, Vec<String>>,
        ) {
            for (id, folder) in folders {
                let server_id = match prefix {
                    Some(parent) => format!("{parent}{DEMO_DELIMITER}{id}"),
                    None => id.clone(),
                };
                out.insert(server_id.clone(), folder.message_server_ids.clone());
                collect(&folder.sub_folders, Some(&server_id), out);
            }
        }

        let mut out = HashMap::new();
        collect(&self.folders, None, &mut out);
        out
    }
}

/// Supplies the raw bytes of demo messages.
#[async_trait]
pub trait MessageLoader: Send + Sync {
    /// Returns the message bytes, `None` if the fixture has none.
    async fn load(&self, folder: &str, server_id: &str) -> Option<Vec<u8>>;
}

/// Loads `<dir>/<folder>/<id>.eml`.
#[derive(Debug, Clone)]
pub struct FixtureDirLoader {
    dir: PathBuf,
}

impl FixtureDirLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl MessageLoader for FixtureDirLoader {
    async fn load(&self, folder: &str, server_id: &str) -> Option<Vec<u8>> {
        let path = self.dir.join(folder).join(format!("{server_id}.eml"));
        match tokio::fs::read(&path).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "demo message unavailable");
                None
            }
        }
    }
}

/// Backend serving a [`DemoContents`] fixture.
pub struct DemoBackend {
    folders: HashMap<String, FolderInfo>,
    messages: HashMap<String, Vec<String>>,
    loader: Arc<dyn MessageLoader>,
    reconciler: FolderReconciler,
    message_sync: MessageSync,
}

impl DemoBackend {
    pub fn new(
        storage: Arc<dyn BackendStorage>,
        contents: &DemoContents,
        loader: Arc<dyn MessageLoader>,
    ) -> Self {
        let folders = flatten_folder_tree(&contents.folder_tree(), DEMO_DELIMITER)
            .into_iter()
            .map(|info| (info.server_id.clone(), info))
            .collect();

        Self {
            folders,
            messages: contents.message_ids(),
            loader,
            reconciler: FolderReconciler::new(storage.clone()),
            message_sync: MessageSync::new(storage, SyncStrategy::PopulateOnce),
        }
    }

    fn fresh_ids(server_ids: &[String]) -> HashMap<String, String> {
        server_ids
            .iter()
            .map(|id| (id.clone(), Uuid::new_v4().to_string()))
            .collect()
    }
}

#[async_trait]
impl RemoteMessageSource for DemoBackend {
    async fn remote_messages(&self, folder: &str) -> Result<Option<Vec<RemoteMessage>>> {
        Ok(self
            .messages
            .get(folder)
            .map(|ids| ids.iter().map(RemoteMessage::new).collect()))
    }

    async fn fetch_message(
        &self,
        folder: &str,
        remote: &RemoteMessage,
        _config: &SyncConfig,
    ) -> Result<Message> {
        let raw = self
            .loader
            .load(folder, &remote.server_id)
            .await
            .ok_or_else(|| {
                BackendError::Inconsistent(format!(
                    "no content for message {} in {folder}",
                    remote.server_id
                ))
            })?;
        Ok(Message::parse(remote.server_id.clone(), raw)?)
    }
}

#[async_trait]
impl Backend for DemoBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities::supporting([
            Capability::Move,
            Capability::Copy,
            Capability::Upload,
            Capability::TrashFolder,
        ])
        .simulating([Capability::Flags])
    }

    async fn refresh_folder_list(&self) -> Result<()> {
        self.reconciler
            .reconcile(self.folders.keys().cloned(), &[], |id| {
                self.folders.get(id).cloned()
            })
            .await?;
        Ok(())
    }

    async fn sync(&self, folder: &str, config: &SyncConfig, listener: &mut dyn SyncListener) {
        self.message_sync.sync(self, folder, config, listener).await;
    }

    async fn download_message(&self, _folder: &str, _server_id: &str) -> Result<()> {
        Err(BackendError::NotSupported {
            operation: "download_message",
        })
    }

    async fn download_message_structure(&self, _folder: &str, _server_id: &str) -> Result<()> {
        Err(BackendError::NotSupported {
            operation: "download_message_structure",
        })
    }

    async fn download_complete_message(&self, _folder: &str, _server_id: &str) -> Result<()> {
        Err(BackendError::NotSupported {
            operation: "download_complete_message",
        })
    }

    async fn set_flag(
        &self,
        folder: &str,
        server_ids: &[String],
        flag: Flag,
        value: bool,
    ) -> Result<()> {
        self.capabilities().check(Capability::Flags, "set_flag")?;
        debug!(folder = %folder, count = server_ids.len(), %flag, value, "simulated set_flag");
        Ok(())
    }

    async fn mark_all_as_read(&self, folder: &str) -> Result<()> {
        self.capabilities()
            .check(Capability::Flags, "mark_all_as_read")?;
        debug!(folder = %folder, "simulated mark_all_as_read");
        Ok(())
    }

    async fn expunge(&self, _folder: &str) -> Result<()> {
        self.capabilities().check(Capability::Expunge, "expunge")?;
        Ok(())
    }

    async fn expunge_messages(&self, _folder: &str, _server_ids: &[String]) -> Result<()> {
        self.capabilities()
            .check(Capability::Expunge, "expunge_messages")?;
        Ok(())
    }

    async fn delete_messages(&self, folder: &str, server_ids: &[String]) -> Result<()> {
        debug!(folder = %folder, count = server_ids.len(), "demo delete is a no-op");
        Ok(())
    }

    async fn delete_all_messages(&self, folder: &str) -> Result<()> {
        debug!(folder = %folder, "demo delete is a no-op");
        Ok(())
    }

    async fn move_messages(
        &self,
        _source: &str,
        _destination: &str,
        server_ids: &[String],
    ) -> Result<HashMap<String, String>> {
        self.capabilities().check(Capability::Move, "move_messages")?;
        Ok(Self::fresh_ids(server_ids))
    }

    async fn move_messages_and_mark_as_read(
        &self,
        source: &str,
        destination: &str,
        server_ids: &[String],
    ) -> Result<HashMap<String, String>> {
        self.move_messages(source, destination, server_ids).await
    }

    async fn copy_messages(
        &self,
        _source: &str,
        _destination: &str,
        server_ids: &[String],
    ) -> Result<HashMap<String, String>> {
        self.capabilities().check(Capability::Copy, "copy_messages")?;
        Ok(Self::fresh_ids(server_ids))
    }

    async fn search(
        &self,
        _folder: &str,
        _query: Option<&str>,
        _required_flags: &HashSet<Flag>,
        _forbidden_flags: &HashSet<Flag>,
        _full_text: bool,
    ) -> Result<Vec<String>> {
        Err(BackendError::NotSupported {
            operation: "search",
        })
    }

    async fn upload_message(&self, _folder: &str, _message: &Message) -> Result<Option<String>> {
        self.capabilities()
            .check(Capability::Upload, "upload_message")?;
        Ok(Some(Uuid::new_v4().to_string()))
    }

    async fn send_message(&self, _message: &Message) -> Result<()> {
        Err(BackendError::NotSupported {
            operation: "send_message",
        })
    }

    fn create_pusher(
        &self,
        _callback: Arc<dyn BackendPusherCallback>,
    ) -> Result<Box<dyn BackendPusher>> {
        self.capabilities().check(Capability::Push, "create_pusher")?;
        Err(BackendError::NotSupported {
            operation: "create_pusher",
        })
    }
}
