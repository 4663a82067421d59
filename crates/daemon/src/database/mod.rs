//! SQLite persistence for the cache registry.
//!
//! The schema holds three logical tables (`cache_entries`,
//! `user_attributions`, `operation_log`) plus a single-row `schema_version`
//! marker. Migrations are forward-only and applied idempotently on connect.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use time::OffsetDateTime;

pub(crate) mod attribution_queries;
pub(crate) mod entry_queries;
pub(crate) mod operation_log_queries;

pub use attribution_queries::UserUsage;
pub use entry_queries::{EntryFilter, NewEntry};
pub use operation_log_queries::{HistoryQuery, NewOperation};

/// Current schema version; bump together with a new entry in [`MIGRATIONS`].
pub const SCHEMA_VERSION: i64 = 1;

/// Statements applied to move from `version - 1` to `version`.
const MIGRATIONS: &[(i64, &[&str])] = &[(
    1,
    &[
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            canonical_path TEXT NOT NULL,
            cached_path TEXT NOT NULL,
            link_kind TEXT NOT NULL,
            status TEXT NOT NULL,
            triggered_by_reason TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            last_access_at INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_cache_entries_live_path
            ON cache_entries(canonical_path) WHERE status != 'removed'
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_cache_entries_status ON cache_entries(status)
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS user_attributions (
            canonical_path TEXT NOT NULL,
            user_id TEXT NOT NULL,
            attribution_reason TEXT NOT NULL,
            attributed_at INTEGER NOT NULL,
            PRIMARY KEY (canonical_path, user_id, attribution_reason)
        )
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_user_attributions_user ON user_attributions(user_id)
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS operation_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            canonical_path TEXT NOT NULL,
            operation TEXT NOT NULL,
            actor TEXT NOT NULL,
            status_before TEXT,
            status_after TEXT,
            outcome TEXT NOT NULL,
            detail TEXT,
            recorded_at INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_operation_log_path ON operation_log(canonical_path, id)
        "#,
    ],
)];

/// Database connection pool for the registry.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl std::ops::Deref for Database {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseSetupError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),
    #[error("Failed to create database directory: {0}")]
    Directory(#[from] std::io::Error),
    #[error("Database schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: i64, supported: i64 },
}

impl Database {
    /// Connect to a database file path.
    pub async fn open(path: &std::path::Path) -> Result<Self, DatabaseSetupError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        tracing::info!("Registry database initialized at {:?}", path);
        Ok(db)
    }

    /// Create a new in-memory database. A single connection is used so that
    /// every query sees the same memory database.
    pub async fn in_memory() -> Result<Self, DatabaseSetupError> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        tracing::debug!("Registry database initialized in-memory");
        Ok(db)
    }

    /// Apply every migration newer than the stored schema version.
    async fn run_migrations(&self) -> Result<(), DatabaseSetupError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let current = self.schema_version().await?;
        if current > SCHEMA_VERSION {
            return Err(DatabaseSetupError::UnsupportedVersion {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        for &(version, statements) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
            let mut tx = self.pool.begin().await?;
            for statement in statements {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            sqlx::query(
                r#"
                INSERT INTO schema_version (id, version) VALUES (1, ?1)
                ON CONFLICT(id) DO UPDATE SET version = excluded.version
                "#,
            )
            .bind(version)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            tracing::info!(version, "applied registry schema migration");
        }

        Ok(())
    }

    /// Stored schema version, 0 for a fresh database.
    pub async fn schema_version(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT version FROM schema_version WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("version")).unwrap_or(0))
    }
}

/// Timestamps are stored as unix seconds.
pub(crate) fn to_unix(ts: OffsetDateTime) -> i64 {
    ts.unix_timestamp()
}

pub(crate) fn from_unix(secs: i64) -> Result<OffsetDateTime, sqlx::Error> {
    OffsetDateTime::from_unix_timestamp(secs).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

/// Decode a labelled enum column.
pub(crate) fn parse_label<T>(value: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = common::types::ParseLabelError>,
{
    value.parse().map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_is_migrated() {
        let db = Database::in_memory().await.unwrap();
        assert_eq!(db.schema_version().await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        assert_eq!(db.schema_version().await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join("registry.db");
        {
            let db = Database::open(&path).await.unwrap();
            assert_eq!(db.schema_version().await.unwrap(), SCHEMA_VERSION);
            db.close().await;
        }
        let db = Database::open(&path).await.unwrap();
        assert_eq!(db.schema_version().await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_newer_schema_is_refused() {
        let db = Database::in_memory().await.unwrap();
        sqlx::query("UPDATE schema_version SET version = 99 WHERE id = 1")
            .execute(&*db)
            .await
            .unwrap();
        assert!(matches!(
            db.run_migrations().await,
            Err(DatabaseSetupError::UnsupportedVersion { found: 99, .. })
        ));
    }
}
