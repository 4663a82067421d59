use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use time::OffsetDateTime;

use common::types::{EntryStatus, OperationKind, OperationLogEntry, OperationOutcome};

use super::entry_queries::path_text;
use super::{from_unix, parse_label, to_unix, Database};

/// One audit row about to be appended
#[derive(Debug, Clone)]
pub struct NewOperation<'a> {
    pub canonical_path: &'a Path,
    pub operation: OperationKind,
    pub actor: &'a str,
    pub status_before: Option<EntryStatus>,
    pub status_after: Option<EntryStatus>,
    pub outcome: OperationOutcome,
    pub detail: Option<String>,
}

/// Page of the operation log, newest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub path: Option<PathBuf>,
    pub limit: Option<u32>,
    /// Only rows with an id strictly lower than this
    pub before: Option<i64>,
}

const DEFAULT_HISTORY_LIMIT: u32 = 50;

impl Database {
    pub async fn history(&self, query: &HistoryQuery) -> Result<Vec<OperationLogEntry>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, canonical_path, operation, actor, status_before, status_after,
                   outcome, detail, recorded_at
            FROM operation_log
            WHERE (?1 IS NULL OR canonical_path = ?1)
              AND (?2 IS NULL OR id < ?2)
            ORDER BY id DESC
            LIMIT ?3
            "#,
        )
        .bind(query.path.as_deref().map(path_text))
        .bind(query.before)
        .bind(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT) as i64)
        .fetch_all(&**self)
        .await?;

        rows.iter().map(row_to_operation).collect()
    }

    /// Delete rows recorded before `cutoff`. Returns the number removed.
    pub async fn prune_history(&self, cutoff: OffsetDateTime) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM operation_log WHERE recorded_at < ?1")
            .bind(to_unix(cutoff))
            .execute(&**self)
            .await?;
        Ok(result.rows_affected())
    }

    /// Append a row outside any larger transaction.
    pub async fn record_operation(&self, op: &NewOperation<'_>) -> Result<i64, sqlx::Error> {
        let mut conn = self.acquire().await?;
        insert_operation(&mut conn, op).await
    }
}

pub(crate) async fn insert_operation(
    conn: &mut SqliteConnection,
    op: &NewOperation<'_>,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO operation_log (
            canonical_path, operation, actor, status_before, status_after,
            outcome, detail, recorded_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(path_text(op.canonical_path))
    .bind(op.operation.as_str())
    .bind(op.actor)
    .bind(op.status_before.map(|s| s.as_str()))
    .bind(op.status_after.map(|s| s.as_str()))
    .bind(op.outcome.as_str())
    .bind(op.detail.as_deref())
    .bind(to_unix(OffsetDateTime::now_utc()))
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

fn row_to_operation(row: &SqliteRow) -> Result<OperationLogEntry, sqlx::Error> {
    let status_before: Option<String> = row.try_get("status_before")?;
    let status_after: Option<String> = row.try_get("status_after")?;
    Ok(OperationLogEntry {
        id: row.try_get("id")?,
        canonical_path: PathBuf::from(row.try_get::<String, _>("canonical_path")?),
        operation: parse_label(&row.try_get::<String, _>("operation")?)?,
        actor: row.try_get("actor")?,
        status_before: status_before.as_deref().map(parse_label).transpose()?,
        status_after: status_after.as_deref().map(parse_label).transpose()?,
        outcome: parse_label(&row.try_get::<String, _>("outcome")?)?,
        detail: row.try_get("detail")?,
        recorded_at: from_unix(row.try_get("recorded_at")?)?,
    })
}
