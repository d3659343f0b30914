//! SQLite-backed implementation of the transactional store traits
//! `flockwork-core` defines in its `store` module (§6).
//!
//! This is the one external collaborator (§1) the workspace ships a real
//! implementation of, so the engine is runnable end-to-end; the trait
//! boundary in `flockwork_core::store` remains the contract any other
//! backend could implement instead.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub mod store;

pub use store::SqliteStore;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("database path error: {0}")]
    Path(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A write would have broken one of §3's invariants (e.g. `done=true`
    /// requested for a task with failing tests via a path that bypasses
    /// `update_done_safe`'s own check). Surfaced to callers that want to
    /// classify the failure rather than string-match a message, per §6.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Connection pool and migration runner, the same shape as the teacher's
/// own `Database` handle.
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
}

impl Database {
    /// `~/.cache/flockwork/flockwork.db`
    pub async fn new() -> Result<Self> {
        let path = Self::default_path()?;
        Self::with_path(path).await
    }

    pub async fn with_path(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DbError::Path(format!("failed to create directory: {e}")))?;
        }

        tracing::info!("opening database at {path:?}");

        let options = SqliteConnectOptions::from_str(
            path.to_str().ok_or_else(|| DbError::Path("invalid UTF-8 in path".to_string()))?,
        )?
        .create_if_missing(true);

        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

        Ok(Self { pool, path })
    }

    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> Result<PathBuf> {
        let cache_dir =
            dirs::cache_dir().ok_or_else(|| DbError::Path("could not determine cache directory".to_string()))?;
        Ok(cache_dir.join("flockwork").join("flockwork.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_creates_every_table() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::with_path(dir.path().join("test.db")).await.unwrap();
        db.migrate().await.unwrap();

        let rows = sqlx::query_as::<_, (String,)>("SELECT name FROM sqlite_master WHERE type='table'")
            .fetch_all(db.pool())
            .await
            .unwrap();
        let names: Vec<String> = rows.into_iter().map(|(n,)| n).collect();
        for expected in ["tasks", "epics", "batches", "worktrees", "cost_records", "expertise_files", "plans"] {
            assert!(names.contains(&expected.to_string()), "missing table {expected}");
        }
    }
}
