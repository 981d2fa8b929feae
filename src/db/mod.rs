mod migrations;
mod models;
mod queries;

pub use models::*;
pub use queries::*;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

/// Handle to the archive database holding the `post` and `media` relations.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database, running migrations if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails, migrations fail, or the
    /// database file is not writable.
    pub async fn new(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(10));

        // The archiver is a single sequential loop; one connection serializes
        // every statement in program order.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;

        let db = Self { pool };
        db.run_migrations().await?;
        verify_writable(&db.pool, path).await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        migrations::run(&self.pool).await?;
        info!("Database migrations complete");
        Ok(())
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Perform a real write so that a read-only file or mount is reported at
/// startup instead of on the first insert. `BEGIN` alone takes no lock.
async fn verify_writable(pool: &SqlitePool, path: &Path) -> Result<()> {
    let not_writable = || {
        format!(
            "SQLite database is not writable (path: {}). Check directory permissions",
            path.display()
        )
    };

    let mut tx = pool.begin().await.with_context(not_writable)?;
    sqlx::query("DELETE FROM _schema_version WHERE version < 0")
        .execute(&mut *tx)
        .await
        .with_context(not_writable)?;
    tx.commit()
        .await
        .context("Failed to commit SQLite writability check")?;
    Ok(())
}
