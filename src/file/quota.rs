//! Quota ledger: the user's used-space counter and cached directory sizes.
//!
//! Both counters are changed with relative SQL updates, never by writing
//! back a value read earlier, so concurrent deltas cannot overwrite each
//! other.

use std::collections::HashSet;

use sqlx::SqliteConnection;
use tracing::{debug, error, warn};

use super::repository::NodeRepository;
use crate::db::{DbPool, User, UserRepository};
use crate::{CumulusError, Result};

/// Keeps `used_space` and ancestor directory sizes in step with the tree.
pub struct QuotaLedger<'a> {
    pool: &'a DbPool,
}

impl<'a> QuotaLedger<'a> {
    /// Create a new QuotaLedger with the given database pool reference.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Fail with `QuotaExceeded` if `bytes` more would not fit.
    ///
    /// Read-only; used ahead of any physical write.
    pub async fn check(&self, user_id: i64, bytes: i64) -> Result<User> {
        let user = UserRepository::new(self.pool)
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| CumulusError::NotFound("user".to_string()))?;

        if !user.can_store(bytes) {
            return Err(CumulusError::QuotaExceeded {
                requested: bytes,
                available: user.available_space(),
            });
        }
        Ok(user)
    }

    /// Adjust a user's used space by `delta` bytes, returning the new total.
    pub async fn apply_delta(&self, user_id: i64, delta: i64) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        Self::apply_delta_in(&mut conn, user_id, delta).await
    }

    /// Add `delta` to a directory and every ancestor above it.
    ///
    /// Returns the number of directories updated.
    pub async fn propagate_size_delta(&self, directory_id: i64, delta: i64) -> Result<usize> {
        let mut conn = self.pool.acquire().await?;
        Self::propagate_in(&mut conn, directory_id, delta).await
    }

    /// [`apply_delta`](Self::apply_delta) on a caller-supplied connection.
    ///
    /// A positive delta only lands if files and avatar together stay within
    /// capacity. A negative delta that would take the counter below zero
    /// leaves it at zero.
    pub async fn apply_delta_in(
        conn: &mut SqliteConnection,
        user_id: i64,
        delta: i64,
    ) -> Result<i64> {
        let updated: Option<i64> = if delta > 0 {
            sqlx::query_scalar(
                "UPDATE users SET used_space = used_space + ?
                 WHERE id = ? AND used_space + avatar_size + ? <= disk_space
                 RETURNING used_space",
            )
            .bind(delta)
            .bind(user_id)
            .bind(delta)
            .fetch_optional(&mut *conn)
            .await?
        } else {
            sqlx::query_scalar(
                "UPDATE users SET used_space = used_space + ?
                 WHERE id = ? AND used_space + ? >= 0
                 RETURNING used_space",
            )
            .bind(delta)
            .bind(user_id)
            .bind(delta)
            .fetch_optional(&mut *conn)
            .await?
        };

        if let Some(used_space) = updated {
            debug!(user_id, delta, used_space, "used space adjusted");
            return Ok(used_space);
        }

        let counters: Option<(i64, i64, i64)> = sqlx::query_as(
            "SELECT disk_space, used_space, avatar_size FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        match counters {
            Some((_, used_space, _)) if delta <= 0 => {
                warn!(
                    user_id,
                    delta,
                    used_space,
                    "used space would go negative, clamping at zero"
                );
                sqlx::query("UPDATE users SET used_space = 0 WHERE id = ?")
                    .bind(user_id)
                    .execute(&mut *conn)
                    .await?;
                Ok(0)
            }
            Some((disk_space, used_space, avatar_size)) => Err(CumulusError::QuotaExceeded {
                requested: delta,
                available: (disk_space - used_space - avatar_size).max(0),
            }),
            None => Err(CumulusError::NotFound("user".to_string())),
        }
    }

    /// Record an avatar of `size` bytes for a user who has none.
    ///
    /// The bytes are held in `avatar_size`, outside `used_space`, and only
    /// land if files and avatar together stay within capacity.
    pub async fn charge_avatar_in(
        conn: &mut SqliteConnection,
        user_id: i64,
        stored: &str,
        size: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET avatar = ?, avatar_size = ?
             WHERE id = ? AND avatar IS NULL AND used_space + ? <= disk_space",
        )
        .bind(stored)
        .bind(size)
        .bind(user_id)
        .bind(size)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() > 0 {
            debug!(user_id, size, "avatar charged");
            return Ok(());
        }

        let current: Option<(i64, i64, Option<String>)> =
            sqlx::query_as("SELECT disk_space, used_space, avatar FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await?;

        match current {
            None => Err(CumulusError::NotFound("user".to_string())),
            Some((_, _, Some(_))) => Err(CumulusError::AlreadyExists("avatar".to_string())),
            Some((disk_space, used_space, None)) => Err(CumulusError::QuotaExceeded {
                requested: size,
                available: (disk_space - used_space).max(0),
            }),
        }
    }

    /// Clear the user's avatar, returning the bytes it held.
    pub async fn release_avatar_in(conn: &mut SqliteConnection, user_id: i64) -> Result<i64> {
        let size: Option<i64> = sqlx::query_scalar(
            "SELECT avatar_size FROM users WHERE id = ? AND avatar IS NOT NULL",
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
        let size = size.ok_or_else(|| CumulusError::NotFound("avatar".to_string()))?;

        sqlx::query("UPDATE users SET avatar = NULL, avatar_size = 0 WHERE id = ?")
            .bind(user_id)
            .execute(&mut *conn)
            .await?;

        debug!(user_id, size, "avatar released");
        Ok(size)
    }

    /// [`propagate_size_delta`](Self::propagate_size_delta) on a
    /// caller-supplied connection.
    ///
    /// Walks child-to-root. A missing ancestor ends the walk. A write
    /// failure after at least one ancestor was updated is reported as
    /// `PartialPropagation`.
    pub async fn propagate_in(
        conn: &mut SqliteConnection,
        directory_id: i64,
        delta: i64,
    ) -> Result<usize> {
        let mut applied = 0;
        let mut visited = HashSet::new();
        let mut current = Some(directory_id);

        while let Some(id) = current {
            if !visited.insert(id) {
                warn!(node_id = id, "cycle in parent chain, stopping size propagation");
                break;
            }

            match NodeRepository::add_size(conn, id, delta).await {
                Ok(Some(parent_id)) => {
                    applied += 1;
                    current = parent_id;
                }
                Ok(None) => {
                    warn!(node_id = id, "ancestor missing during size propagation");
                    break;
                }
                Err(e) if applied > 0 => {
                    error!(
                        node_id = directory_id,
                        failed_at = id,
                        applied,
                        delta,
                        "size propagation interrupted: {}",
                        e
                    );
                    return Err(CumulusError::PartialPropagation {
                        node_id: directory_id,
                        applied,
                        delta,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewUser};
    use crate::file::NewNode;

    async fn setup(capacity: i64) -> (Database, i64) {
        let db = Database::open_in_memory().await.unwrap();
        let user = UserRepository::new(db.pool())
            .create(&NewUser::new("quota@example.com", "hash", capacity))
            .await
            .unwrap();
        (db, user.id)
    }

    #[tokio::test]
    async fn test_check_within_capacity() {
        let (db, user_id) = setup(1000).await;
        let ledger = QuotaLedger::new(db.pool());

        assert!(ledger.check(user_id, 1000).await.is_ok());
        let err = ledger.check(user_id, 1001).await.unwrap_err();
        assert!(matches!(
            err,
            CumulusError::QuotaExceeded {
                requested: 1001,
                available: 1000
            }
        ));
    }

    #[tokio::test]
    async fn test_check_unknown_user() {
        let (db, _) = setup(1000).await;
        let ledger = QuotaLedger::new(db.pool());
        assert!(matches!(
            ledger.check(9999, 1).await,
            Err(CumulusError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_apply_delta_up_and_down() {
        let (db, user_id) = setup(1000).await;
        let ledger = QuotaLedger::new(db.pool());

        assert_eq!(ledger.apply_delta(user_id, 400).await.unwrap(), 400);
        assert_eq!(ledger.apply_delta(user_id, 600).await.unwrap(), 1000);
        assert_eq!(ledger.apply_delta(user_id, -250).await.unwrap(), 750);
    }

    #[tokio::test]
    async fn test_apply_delta_rejects_overflow() {
        let (db, user_id) = setup(1000).await;
        let ledger = QuotaLedger::new(db.pool());

        ledger.apply_delta(user_id, 400).await.unwrap();
        let err = ledger.apply_delta(user_id, 700).await.unwrap_err();
        assert!(matches!(
            err,
            CumulusError::QuotaExceeded {
                requested: 700,
                available: 600
            }
        ));

        let user = UserRepository::new(db.pool())
            .get_by_id(user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.used_space, 400);
    }

    #[tokio::test]
    async fn test_apply_delta_clamps_at_zero() {
        let (db, user_id) = setup(1000).await;
        let ledger = QuotaLedger::new(db.pool());

        ledger.apply_delta(user_id, 100).await.unwrap();
        assert_eq!(ledger.apply_delta(user_id, -500).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clamp_keeps_counter_usable() {
        let (db, user_id) = setup(1000).await;
        let ledger = QuotaLedger::new(db.pool());

        assert_eq!(ledger.apply_delta(user_id, -1).await.unwrap(), 0);
        assert_eq!(ledger.apply_delta(user_id, 1000).await.unwrap(), 1000);
        assert_eq!(ledger.apply_delta(user_id, -1000).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_avatar_reserves_capacity() {
        let (db, user_id) = setup(1000).await;
        let ledger = QuotaLedger::new(db.pool());
        ledger.apply_delta(user_id, 300).await.unwrap();

        {
            let mut conn = db.pool().acquire().await.unwrap();
            QuotaLedger::charge_avatar_in(&mut conn, user_id, "a.jpg", 500)
                .await
                .unwrap();
        }

        let user = UserRepository::new(db.pool())
            .get_by_id(user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.used_space, 300);
        assert_eq!(user.avatar_size, 500);

        let err = ledger.apply_delta(user_id, 201).await.unwrap_err();
        assert!(matches!(
            err,
            CumulusError::QuotaExceeded {
                requested: 201,
                available: 200
            }
        ));
        assert_eq!(ledger.apply_delta(user_id, 200).await.unwrap(), 500);

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(matches!(
            QuotaLedger::charge_avatar_in(&mut conn, user_id, "b.jpg", 1).await,
            Err(CumulusError::AlreadyExists(_))
        ));
        assert_eq!(
            QuotaLedger::release_avatar_in(&mut conn, user_id).await.unwrap(),
            500
        );
        assert!(matches!(
            QuotaLedger::release_avatar_in(&mut conn, user_id).await,
            Err(CumulusError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_avatar_over_capacity() {
        let (db, user_id) = setup(1000).await;
        QuotaLedger::new(db.pool())
            .apply_delta(user_id, 900)
            .await
            .unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let err = QuotaLedger::charge_avatar_in(&mut conn, user_id, "a.jpg", 101)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CumulusError::QuotaExceeded {
                requested: 101,
                available: 100
            }
        ));
    }

    #[tokio::test]
    async fn test_apply_delta_unknown_user() {
        let (db, _) = setup(1000).await;
        let ledger = QuotaLedger::new(db.pool());
        assert!(matches!(
            ledger.apply_delta(9999, -1).await,
            Err(CumulusError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_propagate_walks_to_root() {
        let (db, user_id) = setup(1000).await;
        let nodes = NodeRepository::new(db.pool());

        let a = nodes
            .create(&NewNode::directory(user_id, "a", "a"))
            .await
            .unwrap();
        let b = nodes
            .create(&NewNode::directory(user_id, "b", "a/b").with_parent(Some(a.id)))
            .await
            .unwrap();
        let c = nodes
            .create(&NewNode::directory(user_id, "c", "a/b/c").with_parent(Some(b.id)))
            .await
            .unwrap();
        let sibling = nodes
            .create(&NewNode::directory(user_id, "s", "a/s").with_parent(Some(a.id)))
            .await
            .unwrap();

        let ledger = QuotaLedger::new(db.pool());
        assert_eq!(ledger.propagate_size_delta(c.id, 30).await.unwrap(), 3);
        assert_eq!(ledger.propagate_size_delta(b.id, -10).await.unwrap(), 2);

        for (id, expected) in [(a.id, 20), (b.id, 20), (c.id, 30), (sibling.id, 0)] {
            let node = nodes.get_by_id(id).await.unwrap().unwrap();
            assert_eq!(node.size, expected, "size of {}", node.name);
        }
    }

    #[tokio::test]
    async fn test_propagate_missing_start() {
        let (db, _) = setup(1000).await;
        let ledger = QuotaLedger::new(db.pool());
        assert_eq!(ledger.propagate_size_delta(9999, 10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_propagate_rolls_back_inside_transaction() {
        let (db, user_id) = setup(1000).await;
        let nodes = NodeRepository::new(db.pool());
        let dir = nodes
            .create(&NewNode::directory(user_id, "d", "d"))
            .await
            .unwrap();

        {
            let mut tx = db.pool().begin().await.unwrap();
            QuotaLedger::propagate_in(&mut tx, dir.id, 99).await.unwrap();
            tx.rollback().await.unwrap();
        }

        assert_eq!(nodes.get_by_id(dir.id).await.unwrap().unwrap().size, 0);
    }
}
