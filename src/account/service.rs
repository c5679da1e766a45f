//! Account service.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::StorageConfig;
use crate::db::{Database, NewUser, User, UserRepository};
use crate::file::{FileStorage, QuotaLedger, UserLocks};
use crate::{CumulusError, Result};

/// Avatar upload extensions.
pub const AVATAR_EXTENSIONS: &[&str] = &["jpg", "png"];

/// Registration request data.
#[derive(Debug, Clone, Validate)]
pub struct NewAccount {
    #[validate(email(message = "invalid email address"))]
    pub email: String,
    /// Credential hash, produced by the caller.
    #[validate(custom(function = "not_empty_trimmed"))]
    pub password: String,
    #[validate(custom(function = "not_empty_trimmed"))]
    pub name: String,
    #[validate(custom(function = "not_empty_trimmed"))]
    pub surname: String,
}

impl NewAccount {
    /// Create a new registration request.
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        name: impl Into<String>,
        surname: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            name: name.into(),
            surname: surname.into(),
        }
    }
}

fn not_empty_trimmed(value: &str) -> std::result::Result<(), validator::ValidationError> {
    if value.trim().is_empty() {
        return Err(validator::ValidationError::new("not_empty_trimmed")
            .with_message("must not be empty".into()));
    }
    Ok(())
}

/// Registers, removes and decorates user accounts.
#[derive(Clone)]
pub struct AccountService {
    db: Database,
    storage: Arc<FileStorage>,
    locks: UserLocks,
    registration: Arc<Mutex<()>>,
    avatar_path: PathBuf,
    default_disk_space: i64,
    max_users: i64,
}

impl AccountService {
    /// Create a new AccountService.
    pub fn new(db: Database, storage: Arc<FileStorage>, config: &StorageConfig) -> Self {
        Self {
            db,
            storage,
            locks: UserLocks::new(),
            registration: Arc::new(Mutex::new(())),
            avatar_path: PathBuf::from(&config.avatar_path),
            default_disk_space: config.default_disk_space,
            max_users: config.max_users,
        }
    }

    /// Share a lock table with the file service.
    pub fn with_locks(mut self, locks: UserLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Register a new account and create its storage root.
    pub async fn register(&self, account: NewAccount) -> Result<User> {
        account
            .validate()
            .map_err(|e| CumulusError::Validation(e.to_string()))?;

        let _guard = self.registration.lock().await;
        let repo = UserRepository::new(self.db.pool());

        if repo.count().await? >= self.max_users {
            return Err(CumulusError::Forbidden(format!(
                "registration is limited to {} accounts",
                self.max_users
            )));
        }
        if repo.email_exists(&account.email).await? {
            return Err(CumulusError::AlreadyExists(format!(
                "account {}",
                account.email
            )));
        }

        let user = repo
            .create(
                &NewUser::new(&account.email, &account.password, self.default_disk_space)
                    .with_name(&account.name, &account.surname),
            )
            .await?;

        if let Err(e) = self.storage.ensure_user_root(user.id).await {
            warn!(user_id = user.id, "failed to create storage root: {}", e);
            repo.delete(user.id).await?;
            return Err(e);
        }

        info!(user_id = user.id, email = %user.email, "account registered");
        Ok(user)
    }

    /// Get an account by email.
    pub async fn get_by_email(&self, email: &str) -> Result<User> {
        UserRepository::new(self.db.pool())
            .get_by_email(email)
            .await?
            .ok_or_else(|| CumulusError::NotFound(format!("account {email}")))
    }

    /// Emails of every registered account.
    pub async fn list_emails(&self) -> Result<Vec<String>> {
        UserRepository::new(self.db.pool()).list_emails().await
    }

    /// Remove an account with all its files, nodes and avatar.
    pub async fn delete_account(&self, email: &str) -> Result<()> {
        let user = self.get_by_email(email).await?;
        let _guard = self.locks.acquire(user.id).await;

        let root = self.storage.resolver().user_root(user.id);
        self.storage.delete_recursive(&root).await?;
        if let Some(avatar) = &user.avatar {
            self.storage
                .delete_recursive(&self.avatar_path.join(avatar))
                .await?;
        }

        UserRepository::new(self.db.pool()).delete(user.id).await?;
        info!(user_id = user.id, email, "account deleted");
        Ok(())
    }

    /// Store an avatar image. Its bytes are held against the user's
    /// capacity next to `used_space`.
    ///
    /// Returns the stored file name.
    pub async fn upload_avatar(
        &self,
        user_id: i64,
        filename: &str,
        content: &[u8],
    ) -> Result<String> {
        let extension = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();
        if !AVATAR_EXTENSIONS.contains(&extension.as_str()) {
            return Err(CumulusError::Validation(
                "avatar must be a .jpg or .png image".to_string(),
            ));
        }

        let _guard = self.locks.acquire(user_id).await;
        let size = content.len() as i64;
        let user = QuotaLedger::new(self.db.pool()).check(user_id, size).await?;
        if user.avatar.is_some() {
            return Err(CumulusError::AlreadyExists("avatar".to_string()));
        }

        tokio::fs::create_dir_all(&self.avatar_path).await?;
        let stored = format!("{}.jpg", Uuid::new_v4());
        let path = self.avatar_path.join(&stored);
        self.storage.write_file(&path, content).await?;

        let mut conn = self.db.pool().acquire().await?;
        if let Err(e) = QuotaLedger::charge_avatar_in(&mut conn, user_id, &stored, size).await {
            if let Err(cleanup) = self.storage.delete_recursive(&path).await {
                warn!(user_id, "failed to remove avatar file: {}", cleanup);
            }
            return Err(e);
        }

        info!(user_id, size, "avatar uploaded");
        Ok(stored)
    }

    /// Remove the user's avatar and release the bytes recorded for it.
    ///
    /// An avatar file that is already gone does not stop the release.
    pub async fn delete_avatar(&self, user_id: i64) -> Result<()> {
        let _guard = self.locks.acquire(user_id).await;

        let user = UserRepository::new(self.db.pool())
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| CumulusError::NotFound("user".to_string()))?;
        let stored = user
            .avatar
            .ok_or_else(|| CumulusError::NotFound("avatar".to_string()))?;
        let path = self.avatar_path.join(&stored);

        let mut tx = self.db.pool().begin().await?;
        let size = QuotaLedger::release_avatar_in(&mut tx, user_id).await?;
        if !self.storage.delete_recursive(&path).await? {
            warn!(user_id, path = ?path, "avatar file already missing");
        }
        tx.commit().await?;

        info!(user_id, size, "avatar deleted");
        Ok(())
    }
}
