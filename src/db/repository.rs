//! User repository for Cumulus.
//!
//! Quota counters and the avatar are not written here; see `file::quota`.

use super::user::{NewUser, User};
use super::DbPool;
use crate::{CumulusError, Result};

const USER_COLUMNS: &str =
    "id, email, password, name, surname, role, disk_space, used_space, avatar, avatar_size, created_at";

/// Repository for user CRUD operations.
pub struct UserRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> UserRepository<'a> {
    /// Create a new UserRepository with the given database pool reference.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a new user with `used_space = 0`.
    pub async fn create(&self, new_user: &NewUser) -> Result<User> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (email, password, name, surname, role, disk_space)
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&new_user.email)
        .bind(&new_user.password)
        .bind(&new_user.name)
        .bind(&new_user.surname)
        .bind(new_user.role.as_str())
        .bind(new_user.disk_space)
        .fetch_one(self.pool)
        .await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| CumulusError::NotFound("user".to_string()))
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(user)
    }

    /// Get a user by email.
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?"
        ))
        .bind(email)
        .fetch_optional(self.pool)
        .await?;

        Ok(user)
    }

    /// List the email of every account, in registration order.
    pub async fn list_emails(&self) -> Result<Vec<String>> {
        let emails = sqlx::query_scalar("SELECT email FROM users ORDER BY id")
            .fetch_all(self.pool)
            .await?;

        Ok(emails)
    }

    /// Count all users.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool)
            .await?;

        Ok(count)
    }

    /// Check if an email is already registered.
    pub async fn email_exists(&self, email: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)")
            .bind(email)
            .fetch_one(self.pool)
            .await?;

        Ok(exists)
    }

    /// Delete a user and every node they own.
    ///
    /// Node rows go in one statement, so the parent references among them
    /// are only checked once the whole set is gone.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM nodes WHERE owner_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Role};

    async fn setup_db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_create_user() {
        let db = setup_db().await;
        let repo = UserRepository::new(db.pool());

        let user = repo
            .create(&NewUser::new("ann@example.com", "hash", 1000).with_name("Ann", "Lee"))
            .await
            .unwrap();

        assert_eq!(user.email, "ann@example.com");
        assert_eq!(user.name, "Ann");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.disk_space, 1000);
        assert_eq!(user.used_space, 0);
        assert!(user.avatar.is_none());
        assert_eq!(user.avatar_size, 0);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let db = setup_db().await;
        let repo = UserRepository::new(db.pool());

        repo.create(&NewUser::new("dup@example.com", "hash", 1000))
            .await
            .unwrap();
        let result = repo.create(&NewUser::new("dup@example.com", "hash", 1000)).await;
        assert!(matches!(result, Err(CumulusError::Database(_))));
    }

    #[tokio::test]
    async fn test_get_by_email() {
        let db = setup_db().await;
        let repo = UserRepository::new(db.pool());

        let created = repo
            .create(&NewUser::new("find@example.com", "hash", 1000))
            .await
            .unwrap();

        let found = repo.get_by_email("find@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(repo.get_by_email("none@example.com").await.unwrap().is_none());
        assert!(repo.email_exists("find@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_and_count() {
        let db = setup_db().await;
        let repo = UserRepository::new(db.pool());

        repo.create(&NewUser::new("a@example.com", "h", 1)).await.unwrap();
        repo.create(&NewUser::new("b@example.com", "h", 1)).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 2);
        assert_eq!(
            repo.list_emails().await.unwrap(),
            vec!["a@example.com".to_string(), "b@example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete_user() {
        let db = setup_db().await;
        let repo = UserRepository::new(db.pool());
        let user = repo.create(&NewUser::new("a@example.com", "h", 1)).await.unwrap();

        assert!(repo.delete(user.id).await.unwrap());
        assert!(repo.get_by_id(user.id).await.unwrap().is_none());
        assert!(!repo.delete(user.id).await.unwrap());
    }
}
