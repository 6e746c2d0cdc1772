//! Database layer: pool creation and embedded migrations.
//!
//! SQLite with WAL journaling and foreign keys on, mirroring the client-side
//! store settings. Queries throughout the server are runtime-checked
//! (`sqlx::query_as::<_, T>` + `.bind()`), so no database is needed at
//! compile time.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{ApiError, ApiResult};

/// Embedded migrations from the crate's `migrations/` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Database handle.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connects to the database and runs migrations.
    pub async fn connect(url: &str) -> ApiResult<Self> {
        info!(url = %url, "Connecting to database");

        let connect_options = SqliteConnectOptions::from_str(url)
            .map_err(|e| ApiError::Internal(format!("invalid database url: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(connect_options)
            .await?;

        let db = Database { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// An isolated in-memory database, for tests.
    pub async fn connect_in_memory() -> ApiResult<Self> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            // In-memory databases exist per-connection
            .max_connections(1)
            .connect_with(connect_options)
            .await?;

        let db = Database { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Runs pending migrations. Idempotent.
    pub async fn run_migrations(&self) -> ApiResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| ApiError::Internal(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_migrates_and_answers() {
        let db = Database::connect_in_memory().await.unwrap();
        let one: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(one.0, 0);
    }
}
