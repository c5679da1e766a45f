//! User model for Cumulus.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular account.
    #[default]
    User,
    /// Administrator.
    Admin,
}

impl Role {
    /// Convert role to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A registered account and its quota counters.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    /// Unique user ID.
    pub id: i64,
    /// Login email (unique).
    pub email: String,
    /// Credential hash, produced outside this crate.
    #[serde(skip_serializing)]
    pub password: String,
    /// First name.
    pub name: String,
    /// Last name.
    pub surname: String,
    /// Account role.
    #[sqlx(try_from = "String")]
    pub role: Role,
    /// Capacity in bytes.
    pub disk_space: i64,
    /// Bytes consumed by the user's files.
    pub used_space: i64,
    /// Stored avatar filename, if any.
    pub avatar: Option<String>,
    /// Bytes held by the avatar. Counts against `disk_space` but not
    /// `used_space`.
    pub avatar_size: i64,
    /// Account creation timestamp.
    pub created_at: String,
}

impl User {
    /// Bytes still available under the quota.
    pub fn available_space(&self) -> i64 {
        (self.disk_space - self.used_space - self.avatar_size).max(0)
    }

    /// Whether `bytes` more would still fit under the quota.
    pub fn can_store(&self, bytes: i64) -> bool {
        self.used_space + self.avatar_size + bytes <= self.disk_space
    }
}

/// Data for creating a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Login email.
    pub email: String,
    /// Credential hash.
    pub password: String,
    /// First name.
    pub name: String,
    /// Last name.
    pub surname: String,
    /// Account role (defaults to User).
    pub role: Role,
    /// Capacity in bytes.
    pub disk_space: i64,
}

impl NewUser {
    /// Create a new user with minimal required fields.
    pub fn new(email: impl Into<String>, password: impl Into<String>, disk_space: i64) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            name: "name".to_string(),
            surname: "surname".to_string(),
            role: Role::User,
            disk_space,
        }
    }

    /// Set first and last name.
    pub fn with_name(mut self, name: impl Into<String>, surname: impl Into<String>) -> Self {
        self.name = name.into();
        self.surname = surname.into();
        self
    }

    /// Set the role.
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
}
