use std::thread;
use tokio::sync::{mpsc, oneshot};
use anyhow::{Context, Result};
use chrono::Utc;
use super::db::UserDb;
use super::hash::password_hash;
use super::{CredentialStore, User};

/// Commands sent to the user database thread
pub enum UserCommand {
    Add(User, oneshot::Sender<Result<bool>>),
    Count(oneshot::Sender<Result<u64>>),
    Shutdown,
}

/// Handle to the thread that owns the user database.
///
/// The blocking methods must be called from outside the async runtime
/// (a plain thread or `spawn_blocking`), the async ones from inside it.
#[derive(Clone)]
pub struct UserHandle {
    tx: mpsc::Sender<UserCommand>,
}

impl UserHandle {
    pub fn spawn(db: UserDb) -> Self {
        let (tx, mut rx) = mpsc::channel::<UserCommand>(16);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    UserCommand::Add(user, reply) => {
                        let _ = reply.send(db.upsert_user(&user));
                    }
                    UserCommand::Count(reply) => {
                        let _ = reply.send(db.count_users());
                    }
                    UserCommand::Shutdown => {
                        tracing::info!("User database thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Add or replace a user. Returns true if the user is new.
    pub fn add_blocking(&self, name: &str, password: &str) -> Result<bool> {
        let user = User {
            name: name.to_string(),
            password_hash: password_hash(name, password),
            created_at: Utc::now(),
        };

        let (reply, rx) = oneshot::channel();
        self.tx
            .blocking_send(UserCommand::Add(user, reply))
            .context("User database thread is gone")?;
        rx.blocking_recv().context("User database thread dropped the reply")?
    }

    pub async fn count(&self) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(UserCommand::Count(reply)).await?;
        rx.await?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(UserCommand::Shutdown).await?;
        Ok(())
    }
}

impl CredentialStore for UserHandle {
    fn add_user(&self, name: &str, password: &str) -> Result<()> {
        let created = self.add_blocking(name, password)?;
        if created {
            tracing::info!("Created user {}", name);
        } else {
            tracing::info!("Replaced password of user {}", name);
        }
        Ok(())
    }
}
