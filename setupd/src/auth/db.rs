use std::path::Path;
use anyhow::{Context, Result};
use rusqlite::{Connection, params, OptionalExtension};
use chrono::Utc;
use super::User;

pub struct UserDb {
    conn: Connection,
}

impl UserDb {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                name          TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                created_at    TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    /// Insert a user or replace its password. Returns true if the user is new.
    pub fn upsert_user(&self, user: &User) -> Result<bool> {
        let created = self.get_user(&user.name)?.is_none();

        self.conn.execute(
            r#"
            INSERT INTO users (name, password_hash, created_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET password_hash = excluded.password_hash
            "#,
            params![&user.name, &user.password_hash, user.created_at.to_rfc3339()],
        )
        .context("Failed to upsert user")?;

        Ok(created)
    }

    pub fn get_user(&self, name: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                "SELECT name, password_hash, created_at FROM users WHERE name = ?1",
                params![name],
                Self::row_to_user,
            )
            .optional()
            .context("Failed to query user")?;

        Ok(user)
    }

    pub fn count_users(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .context("Failed to count users")?;

        Ok(count as u64)
    }

    fn row_to_user(row: &rusqlite::Row) -> Result<User, rusqlite::Error> {
        let created_at_str: String = row.get(2)?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(e),
            ))?
            .with_timezone(&Utc);

        Ok(User {
            name: row.get(0)?,
            password_hash: row.get(1)?,
            created_at,
        })
    }
}
