//! SQLite connection handling for chatvault.

use crate::config::StoreConfig;
use crate::error::Result;
use crate::schema::SCHEMA;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

/// Database handle for chatvault.
///
/// The pool is shared by readers and the write queue; only the write queue
/// ever mutates through it.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path, store: &StoreConfig) -> Result<Self> {
        let parent = path.parent().unwrap_or(Path::new("."));
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(store.busy_timeout())
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(store.max_connections.max(2))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Initialize schema.
    async fn init(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        self.ensure_messages_column("push_name", "TEXT").await?;
        self.ensure_messages_column("mentions", "TEXT NOT NULL DEFAULT '[]'")
            .await?;
        Ok(())
    }

    // Databases created by older versions lack later columns.
    async fn ensure_messages_column(&self, column: &str, definition: &str) -> Result<()> {
        let rows = sqlx::query("PRAGMA table_info(messages)")
            .fetch_all(&self.pool)
            .await?;

        let exists = rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>("name").ok())
            .any(|name| name == column);

        if !exists {
            let alter = format!("ALTER TABLE messages ADD COLUMN {column} {definition}");
            sqlx::query(&alter).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
