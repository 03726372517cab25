//! Folder list reconciliation.
//!
//! Makes the local folder set match the remote one: folders only present
//! remotely are created, folders only present locally are deleted along
//! with their messages. Running it twice against the same remote list
//! writes nothing the second time.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{FolderInfo, FolderNode};
use crate::storage::{self, BackendStorage, FolderUpdate};

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderChanges {
    /// Server ids of created folders.
    pub created: Vec<String>,
    /// Server ids of removed folders.
    pub removed: Vec<String>,
}

impl FolderChanges {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}

/// Diffs remote folder ids against local storage and applies the result.
#[derive(Clone)]
pub struct FolderReconciler {
    storage: Arc<dyn BackendStorage>,
}

impl FolderReconciler {
    pub fn new(storage: Arc<dyn BackendStorage>) -> Self {
        Self { storage }
    }

    /// Reconciles local folders with `remote_ids`.
    ///
    /// `protected` ids count as remote even when the listing omits them.
    /// New ids are turned into [`FolderInfo`] by `resolve`; ids it cannot
    /// resolve are skipped.
    pub async fn reconcile<I, F>(
        &self,
        remote_ids: I,
        protected: &[&str],
        resolve: F,
    ) -> storage::Result<FolderChanges>
    where
        I: IntoIterator<Item = String>,
        F: Fn(&str) -> Option<FolderInfo>,
    {
        let local = self.storage.folder_server_ids().await?;

        let mut remote: HashSet<String> = remote_ids.into_iter().collect();
        remote.extend(protected.iter().map(|id| id.to_string()));

        let mut created = Vec::new();
        let mut create = Vec::new();
        let mut to_create: Vec<&String> = remote.difference(&local).collect();
        to_create.sort();
        for server_id in to_create {
            match resolve(server_id) {
                Some(info) => {
                    created.push(info.server_id.clone());
                    create.push(info);
                }
                None => debug!(folder = %server_id, "skipping folder that cannot be resolved"),
            }
        }

        let mut removed: Vec<String> = local.difference(&remote).cloned().collect();
        removed.sort();

        let update = FolderUpdate {
            create,
            delete: removed.clone(),
        };
        if update.is_empty() {
            debug!("folder list unchanged");
            return Ok(FolderChanges::default());
        }

        self.storage.update_folders(update).await?;

        info!(
            created = created.len(),
            removed = removed.len(),
            "folder list reconciled"
        );

        Ok(FolderChanges { created, removed })
    }
}

/// Flattens a nested folder tree depth-first.
///
/// Child ids are joined to their parent's with `delimiter`; display names
/// are joined with `/`.
pub fn flatten_folder_tree(nodes: &[FolderNode], delimiter: &str) -> Vec<FolderInfo> {
    let mut folders = Vec::new();
    flatten_into(nodes, None, delimiter, &mut folders);
    folders
}

fn flatten_into(
    nodes: &[FolderNode],
    parent: Option<(&str, &str)>,
    delimiter: &str,
    out: &mut Vec<FolderInfo>,
) {
    for node in nodes {
        let (server_id, name) = match parent {
            Some((parent_id, parent_name)) => (
                format!("{parent_id}{delimiter}{}", node.server_id),
                format!("{parent_name}/{}", node.name),
            ),
            None => (node.server_id.clone(), node.name.clone()),
        };

        out.push(FolderInfo::new(server_id.clone(), name.clone(), node.folder_type));
        flatten_into(
            &node.children,
            Some((server_id.as_str(), name.as_str())),
            delimiter,
            out,
        );
    }
}
