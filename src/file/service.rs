//! Tree operations for Cumulus.
//!
//! Every mutation runs under the owner's [`UserLocks`] entry, writes the
//! physical change first and records it in one database transaction. If
//! the transaction fails the physical change is undone, so the tree never
//! records a file that was not stored.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::db::{Database, UserRepository};
use crate::{CumulusError, Result};

use super::lock::UserLocks;
use super::node::{post_order, NewNode, Node, SortKey};
use super::path::{join_logical, validate_name};
use super::quota::QuotaLedger;
use super::repository::NodeRepository;
use super::storage::{ByteStream, FileStorage};

/// Request data for a file upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Target directory; None (or an unusable ID) means the user's root.
    pub parent_id: Option<i64>,
    /// File name.
    pub name: String,
    /// File content.
    pub content: Vec<u8>,
}

impl UploadRequest {
    /// Create a new upload request targeting the user's root.
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            parent_id: None,
            name: name.into(),
            content,
        }
    }

    /// Set the target directory.
    pub fn with_parent(mut self, parent_id: Option<i64>) -> Self {
        self.parent_id = parent_id;
        self
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadResult {
    /// The new file node.
    pub node: Node,
    /// The owner's used space afterwards.
    pub used_space: i64,
}

/// Result of a successful delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResult {
    /// Bytes released from the owner's quota.
    pub freed: i64,
    /// The owner's used space afterwards.
    pub used_space: i64,
    /// Number of node rows removed.
    pub removed: usize,
}

/// Orchestrates tree mutations across the tree store, quota ledger and
/// physical storage.
#[derive(Clone)]
pub struct FileService {
    db: Database,
    storage: Arc<FileStorage>,
    locks: UserLocks,
}

impl FileService {
    /// Create a new FileService.
    pub fn new(db: Database, storage: Arc<FileStorage>) -> Self {
        Self {
            db,
            storage,
            locks: UserLocks::new(),
        }
    }

    /// Share a lock table with other services that mutate user state.
    pub fn with_locks(mut self, locks: UserLocks) -> Self {
        self.locks = locks;
        self
    }

    /// The lock table guarding per-user mutations.
    pub fn locks(&self) -> &UserLocks {
        &self.locks
    }

    /// Get the storage reference.
    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    /// Create a directory.
    ///
    /// A `parent_id` that is missing, owned by someone else or names a file
    /// silently places the directory at the user's root.
    pub async fn create_directory(
        &self,
        user_id: i64,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<Node> {
        validate_name(name)?;
        self.require_user(user_id).await?;
        let _guard = self.locks.acquire(user_id).await;

        let parent = self.resolve_parent(user_id, parent_id).await?;
        let logical = join_logical(parent.as_ref().map(|p| p.path.as_str()), name);
        let physical = self.physical_path(user_id, &logical);

        self.storage.ensure_user_root(user_id).await?;
        self.storage.create_directory(&physical).await?;

        let new_node =
            NewNode::directory(user_id, name, &logical).with_parent(parent.as_ref().map(|p| p.id));

        let recorded: Result<i64> = async {
            let mut tx = self.db.pool().begin().await?;
            let id = NodeRepository::insert(&mut tx, &new_node).await?;
            if let Some(parent_id) = new_node.parent_id {
                NodeRepository::append_child(&mut tx, parent_id, id).await?;
            }
            tx.commit().await?;
            Ok::<_, CumulusError>(id)
        }
        .await;

        let id = match recorded {
            Ok(id) => id,
            Err(e) => {
                self.undo_physical(&physical).await;
                return Err(e);
            }
        };

        info!(user_id, node_id = id, path = %logical, "directory created");
        self.load_node(id).await
    }

    /// Upload a file.
    ///
    /// Quota is checked before anything is written. The node, ancestor sizes
    /// and used space are recorded together once the bytes are on disk.
    pub async fn upload(&self, user_id: i64, request: UploadRequest) -> Result<UploadResult> {
        validate_name(&request.name)?;
        let size = request.content.len() as i64;
        let _guard = self.locks.acquire(user_id).await;

        let ledger = QuotaLedger::new(self.db.pool());
        ledger.check(user_id, size).await?;

        let parent = self.resolve_parent(user_id, request.parent_id).await?;
        let logical = join_logical(parent.as_ref().map(|p| p.path.as_str()), &request.name);
        let physical = self.physical_path(user_id, &logical);

        self.storage.ensure_user_root(user_id).await?;
        self.storage.write_file(&physical, &request.content).await?;

        let new_node = NewNode::file(user_id, &request.name, &logical, size)
            .with_parent(parent.as_ref().map(|p| p.id));

        let recorded: Result<(i64, i64)> = async {
            let mut tx = self.db.pool().begin().await?;
            let id = NodeRepository::insert(&mut tx, &new_node).await?;
            if let Some(parent_id) = new_node.parent_id {
                NodeRepository::append_child(&mut tx, parent_id, id).await?;
                QuotaLedger::propagate_in(&mut tx, parent_id, size).await?;
            }
            let used_space = QuotaLedger::apply_delta_in(&mut tx, user_id, size).await?;
            tx.commit().await?;
            Ok::<_, CumulusError>((id, used_space))
        }
        .await;

        let (id, used_space) = match recorded {
            Ok(recorded) => recorded,
            Err(e) => {
                self.undo_physical(&physical).await;
                return Err(e);
            }
        };

        info!(user_id, node_id = id, size, used_space, path = %logical, "file uploaded");
        let node = self.load_node(id).await?;
        Ok(UploadResult { node, used_space })
    }

    /// Delete a file, or a directory and everything beneath it.
    ///
    /// Rows are removed children first. A physical path that is already
    /// gone does not stop the delete.
    pub async fn delete(&self, user_id: i64, node_id: i64) -> Result<DeleteResult> {
        let _guard = self.locks.acquire(user_id).await;

        let nodes = NodeRepository::new(self.db.pool());
        let node = nodes
            .get_owned(user_id, node_id)
            .await?
            .ok_or_else(|| CumulusError::NotFound("node".to_string()))?;

        let freed = node.size;
        let arena = nodes.list_by_owner(user_id).await?;
        let order = post_order(node.id, &arena);
        let physical = self.physical_path(user_id, &node.path);

        let mut tx = self.db.pool().begin().await?;
        if let Some(parent_id) = node.parent_id {
            QuotaLedger::propagate_in(&mut tx, parent_id, -freed).await?;
        }
        let used_space = QuotaLedger::apply_delta_in(&mut tx, user_id, -freed).await?;

        if !self.storage.delete_recursive(&physical).await? {
            warn!(user_id, node_id, path = ?physical, "physical path already missing");
        }

        for id in &order {
            NodeRepository::delete_row(&mut tx, *id).await?;
        }
        tx.commit().await?;

        info!(
            user_id,
            node_id,
            freed,
            used_space,
            removed = order.len(),
            "node deleted"
        );
        Ok(DeleteResult {
            freed,
            used_space,
            removed: order.len(),
        })
    }

    /// List the immediate children of a directory, or of the root.
    pub async fn list_children(
        &self,
        user_id: i64,
        parent_id: Option<i64>,
        sort: SortKey,
    ) -> Result<Vec<Node>> {
        let nodes = NodeRepository::new(self.db.pool());
        if let Some(parent_id) = parent_id {
            match nodes.get_owned(user_id, parent_id).await? {
                Some(parent) if parent.is_directory() => {}
                Some(_) => {
                    return Err(CumulusError::Validation("not a directory".to_string()));
                }
                None => return Err(CumulusError::NotFound("directory".to_string())),
            }
        }

        nodes.list_children(user_id, parent_id, sort).await
    }

    /// Find every node the user owns whose name contains `query`.
    ///
    /// Matching is case-sensitive.
    pub async fn search(&self, user_id: i64, query: &str) -> Result<Vec<Node>> {
        let nodes = NodeRepository::new(self.db.pool())
            .list_by_owner(user_id)
            .await?;

        let matches: Vec<Node> = nodes
            .into_iter()
            .filter(|node| node.name.contains(query))
            .collect();

        debug!(user_id, query, found = matches.len(), "search");
        Ok(matches)
    }

    /// Stream an owned file's content.
    pub async fn download(&self, user_id: i64, node_id: i64) -> Result<(Node, ByteStream)> {
        let node = self.owned_file(user_id, node_id).await?;
        let stream = self
            .storage
            .open_stream(&self.physical_path(user_id, &node.path))
            .await?;
        Ok((node, stream))
    }

    /// Stream an owned file for inline preview.
    ///
    /// Only image, pdf, text and web video types may be previewed.
    pub async fn open_file(&self, user_id: i64, node_id: i64) -> Result<(Node, ByteStream)> {
        let node = self.owned_file(user_id, node_id).await?;
        if !node.is_previewable() {
            return Err(CumulusError::Forbidden(format!(
                "{} cannot be previewed",
                node.name
            )));
        }

        let stream = self
            .storage
            .open_stream(&self.physical_path(user_id, &node.path))
            .await?;
        Ok((node, stream))
    }

    /// Stream a zip archive of an owned directory.
    ///
    /// The archive reflects what is on disk, not the tree rows.
    pub async fn archive(&self, user_id: i64, node_id: i64) -> Result<(Node, ByteStream)> {
        let node = NodeRepository::new(self.db.pool())
            .get_owned(user_id, node_id)
            .await?
            .ok_or_else(|| CumulusError::NotFound("directory".to_string()))?;

        if !node.is_directory() {
            return Err(CumulusError::Validation(format!(
                "{} is not a directory",
                node.name
            )));
        }

        let stream = self
            .storage
            .archive_directory(&self.physical_path(user_id, &node.path))
            .await?;
        info!(user_id, node_id, "archive started");
        Ok((node, stream))
    }

    async fn require_user(&self, user_id: i64) -> Result<()> {
        UserRepository::new(self.db.pool())
            .get_by_id(user_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| CumulusError::NotFound("user".to_string()))
    }

    /// The parent to create under, or None for the root.
    async fn resolve_parent(&self, user_id: i64, parent_id: Option<i64>) -> Result<Option<Node>> {
        let Some(parent_id) = parent_id else {
            return Ok(None);
        };

        match NodeRepository::new(self.db.pool())
            .get_owned(user_id, parent_id)
            .await?
        {
            Some(parent) if parent.is_directory() => Ok(Some(parent)),
            Some(_) => {
                debug!(user_id, parent_id, "parent is a file, using root");
                Ok(None)
            }
            None => {
                debug!(user_id, parent_id, "parent not found, using root");
                Ok(None)
            }
        }
    }

    async fn owned_file(&self, user_id: i64, node_id: i64) -> Result<Node> {
        let node = NodeRepository::new(self.db.pool())
            .get_owned(user_id, node_id)
            .await?
            .ok_or_else(|| CumulusError::NotFound("file".to_string()))?;

        if node.is_directory() {
            return Err(CumulusError::Validation(format!(
                "{} is a directory",
                node.name
            )));
        }
        Ok(node)
    }

    async fn load_node(&self, id: i64) -> Result<Node> {
        NodeRepository::new(self.db.pool())
            .get_by_id(id)
            .await?
            .ok_or_else(|| CumulusError::NotFound("node".to_string()))
    }

    fn physical_path(&self, user_id: i64, logical: &str) -> PathBuf {
        self.storage.resolver().resolve(user_id, logical)
    }

    async fn undo_physical(&self, path: &std::path::Path) {
        if let Err(e) = self.storage.delete_recursive(path).await {
            warn!(path = ?path, "failed to undo physical change: {}", e);
        }
    }
}
