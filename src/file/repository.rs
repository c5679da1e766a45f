//! Tree store: persisted node records.
//!
//! Reads go through the pool. Writes are associated functions over a bare
//! connection so an operation can group them in one transaction.

use sqlx::SqliteConnection;

use super::node::{NewNode, Node, SortKey};
use crate::db::DbPool;
use crate::{CumulusError, Result};

const NODE_COLUMNS: &str = "id, owner_id, parent_id, name, kind, size, path, created_at";

/// Repository for node records.
pub struct NodeRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> NodeRepository<'a> {
    /// Create a new NodeRepository with the given database pool reference.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a node, registering it in its parent's child list.
    pub async fn create(&self, node: &NewNode) -> Result<Node> {
        let mut tx = self.pool.begin().await?;
        let id = Self::insert(&mut tx, node).await?;
        if let Some(parent_id) = node.parent_id {
            Self::append_child(&mut tx, parent_id, id).await?;
        }
        tx.commit().await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| CumulusError::NotFound("node".to_string()))
    }

    /// Get a node by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Node>> {
        let node = sqlx::query_as::<_, Node>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(node)
    }

    /// Get a node by ID only if `owner_id` owns it.
    pub async fn get_owned(&self, owner_id: i64, id: i64) -> Result<Option<Node>> {
        let node = sqlx::query_as::<_, Node>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE id = ? AND owner_id = ?"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(node)
    }

    /// List the immediate children of a directory, or of the root when
    /// `parent_id` is None.
    pub async fn list_children(
        &self,
        owner_id: i64,
        parent_id: Option<i64>,
        sort: SortKey,
    ) -> Result<Vec<Node>> {
        let nodes = sqlx::query_as::<_, Node>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE owner_id = ? AND parent_id IS ? ORDER BY {}",
            sort.order_by()
        ))
        .bind(owner_id)
        .bind(parent_id)
        .fetch_all(self.pool)
        .await?;

        Ok(nodes)
    }

    /// List every node a user owns.
    pub async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Node>> {
        let nodes = sqlx::query_as::<_, Node>(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE owner_id = ? ORDER BY id"
        ))
        .bind(owner_id)
        .fetch_all(self.pool)
        .await?;

        Ok(nodes)
    }

    /// The ordered child list of a directory.
    pub async fn children_of(&self, parent_id: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar(
            "SELECT child_id FROM node_children WHERE parent_id = ? ORDER BY position",
        )
        .bind(parent_id)
        .fetch_all(self.pool)
        .await?;

        Ok(ids)
    }

    /// Count nodes owned by a user.
    pub async fn count_by_owner(&self, owner_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM nodes WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_one(self.pool)
            .await?;

        Ok(count)
    }

    /// Delete a single node row.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        Self::delete_row(&mut conn, id).await
    }

    /// Insert a node row and return its ID.
    pub async fn insert(conn: &mut SqliteConnection, node: &NewNode) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO nodes (owner_id, parent_id, name, kind, size, path)
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(node.owner_id)
        .bind(node.parent_id)
        .bind(&node.name)
        .bind(node.kind.as_str())
        .bind(node.size)
        .bind(&node.path)
        .fetch_one(&mut *conn)
        .await?;

        Ok(id)
    }

    /// Append `child_id` to the parent's ordered child list.
    pub async fn append_child(
        conn: &mut SqliteConnection,
        parent_id: i64,
        child_id: i64,
    ) -> Result<()> {
        sqlx::query("INSERT INTO node_children (parent_id, child_id) VALUES (?, ?)")
            .bind(parent_id)
            .bind(child_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Add `delta` to a node's size in place.
    ///
    /// Returns the node's parent ID, or None if the node does not exist.
    pub async fn add_size(
        conn: &mut SqliteConnection,
        id: i64,
        delta: i64,
    ) -> Result<Option<Option<i64>>> {
        let parent = sqlx::query_scalar::<_, Option<i64>>(
            "UPDATE nodes SET size = size + ? WHERE id = ? RETURNING parent_id",
        )
        .bind(delta)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(parent)
    }

    /// Delete one node row. Fails while child rows still reference it.
    pub async fn delete_row(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM nodes WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
