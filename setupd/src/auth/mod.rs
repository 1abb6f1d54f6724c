pub mod db;
pub mod hash;
pub mod manager;

use chrono::{DateTime, Utc};

/// An account allowed into the management interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    /// Hex SHA-256 digest, see [`hash::password_hash`]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Where the initial administrator account is recorded
pub trait CredentialStore: Send + Sync {
    fn add_user(&self, name: &str, password: &str) -> anyhow::Result<()>;
}
