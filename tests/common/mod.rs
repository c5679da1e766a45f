//! Test helpers for tree operation tests.
//!
//! Provides TestEnv plus consistency checks over a user's tree.

#![allow(dead_code)]

use std::sync::Arc;

use futures::StreamExt;
use tempfile::TempDir;

use cumulus::db::{NewUser, UserRepository};
use cumulus::file::{post_order, ByteStream, NodeRepository};
use cumulus::{Database, FileService, FileStorage, Node, NodeKind};

/// A file service over a temporary storage root and database.
pub struct TestEnv {
    pub temp: TempDir,
    pub db: Database,
    pub files: FileService,
}

impl TestEnv {
    /// In-memory database with a temporary storage root.
    pub async fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        Self::with_db(temp, db)
    }

    /// File-backed database, for tests that need more than one connection.
    pub async fn with_file_db() -> Self {
        let temp = TempDir::new().unwrap();
        let db = Database::open(temp.path().join("cumulus.db")).await.unwrap();
        Self::with_db(temp, db)
    }

    fn with_db(temp: TempDir, db: Database) -> Self {
        let storage = Arc::new(FileStorage::new(temp.path().join("files")).unwrap());
        let files = FileService::new(db.clone(), storage);
        Self { temp, db, files }
    }

    /// Create a user with the given capacity and return its ID.
    pub async fn create_user(&self, email: &str, capacity: i64) -> i64 {
        UserRepository::new(self.db.pool())
            .create(&NewUser::new(email, "hash", capacity))
            .await
            .unwrap()
            .id
    }

    pub async fn used_space(&self, user_id: i64) -> i64 {
        UserRepository::new(self.db.pool())
            .get_by_id(user_id)
            .await
            .unwrap()
            .unwrap()
            .used_space
    }

    pub async fn node(&self, id: i64) -> Option<Node> {
        NodeRepository::new(self.db.pool()).get_by_id(id).await.unwrap()
    }

    pub async fn node_count(&self, user_id: i64) -> i64 {
        NodeRepository::new(self.db.pool())
            .count_by_owner(user_id)
            .await
            .unwrap()
    }

    /// Physical location of a logical path.
    pub fn physical(&self, user_id: i64, logical: &str) -> std::path::PathBuf {
        self.files.storage().resolver().resolve(user_id, logical)
    }

    /// Check that used space and every directory size match the files
    /// actually recorded in the tree.
    pub async fn assert_consistent(&self, user_id: i64) {
        let nodes = NodeRepository::new(self.db.pool())
            .list_by_owner(user_id)
            .await
            .unwrap();

        let file_total: i64 = nodes
            .iter()
            .filter(|n| n.kind == NodeKind::File)
            .map(|n| n.size)
            .sum();
        assert_eq!(
            self.used_space(user_id).await,
            file_total,
            "used space differs from the sum of file sizes"
        );

        for dir in nodes.iter().filter(|n| n.is_directory()) {
            let expected: i64 = post_order(dir.id, &nodes)
                .into_iter()
                .filter_map(|id| nodes.iter().find(|n| n.id == id))
                .filter(|n| n.kind == NodeKind::File)
                .map(|n| n.size)
                .sum();
            assert_eq!(dir.size, expected, "size of directory {}", dir.path);
        }
    }
}

/// Drain a byte stream into memory.
pub async fn read_all(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}
