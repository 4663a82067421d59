use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use time::OffsetDateTime;

use common::types::{CacheEntry, CacheReason, EntryStatus, LinkKind};

use super::{from_unix, parse_label, to_unix, Database};

const ENTRY_COLUMNS: &str = r#"
    id, canonical_path, cached_path, link_kind, status, triggered_by_reason,
    size_bytes, created_at, last_access_at
"#;

/// Values for a freshly promoted entry
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub canonical_path: PathBuf,
    pub cached_path: PathBuf,
    pub link_kind: LinkKind,
    pub triggered_by_reason: CacheReason,
    pub size_bytes: u64,
    pub created_at: OffsetDateTime,
}

/// Filtered, paged entry query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryFilter {
    pub status: Option<EntryStatus>,
    pub reason: Option<CacheReason>,
    /// Only entries attributed to this user
    pub user: Option<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    /// Only entries created at least this many seconds ago
    pub older_than_secs: Option<u64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub const DEFAULT_PAGE_SIZE: u32 = 100;

impl Database {
    /// All entries whose status is not `removed`.
    pub async fn live_entries(&self) -> Result<Vec<CacheEntry>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM cache_entries WHERE status != 'removed' ORDER BY id ASC",
            ENTRY_COLUMNS
        ))
        .fetch_all(&**self)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    /// The live entry for a path, if any.
    pub async fn get_live_entry(&self, path: &Path) -> Result<Option<CacheEntry>, sqlx::Error> {
        let mut conn = self.acquire().await?;
        get_live_entry(&mut conn, path).await
    }

    pub async fn query_entries(&self, filter: &EntryFilter) -> Result<Vec<CacheEntry>, sqlx::Error> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM cache_entries WHERE 1 = 1",
            ENTRY_COLUMNS
        ));

        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(reason) = filter.reason {
            qb.push(" AND triggered_by_reason = ").push_bind(reason.as_str());
        }
        if let Some(user) = &filter.user {
            qb.push(
                " AND canonical_path IN (SELECT canonical_path FROM user_attributions WHERE user_id = ",
            )
            .push_bind(user.clone())
            .push(")");
        }
        if let Some(min) = filter.min_size {
            qb.push(" AND size_bytes >= ").push_bind(min as i64);
        }
        if let Some(max) = filter.max_size {
            qb.push(" AND size_bytes <= ").push_bind(max as i64);
        }
        if let Some(secs) = filter.older_than_secs {
            let cutoff = OffsetDateTime::now_utc() - time::Duration::seconds(secs as i64);
            qb.push(" AND created_at <= ").push_bind(to_unix(cutoff));
        }

        qb.push(" ORDER BY id DESC LIMIT ")
            .push_bind(filter.limit.unwrap_or(DEFAULT_PAGE_SIZE) as i64)
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0) as i64);

        let rows = qb.build().fetch_all(&**self).await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Count of entries per status.
    pub async fn count_by_status(&self) -> Result<Vec<(EntryStatus, u64, u64)>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count, COALESCE(SUM(size_bytes), 0) AS bytes
            FROM cache_entries
            GROUP BY status
            "#,
        )
        .fetch_all(&**self)
        .await?;

        rows.iter()
            .map(|r| {
                let status: String = r.try_get("status")?;
                Ok((
                    parse_label(&status)?,
                    r.try_get::<i64, _>("count")? as u64,
                    r.try_get::<i64, _>("bytes")? as u64,
                ))
            })
            .collect()
    }
}

pub(crate) async fn get_live_entry(
    conn: &mut SqliteConnection,
    path: &Path,
) -> Result<Option<CacheEntry>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM cache_entries WHERE canonical_path = ?1 AND status != 'removed'",
        ENTRY_COLUMNS
    ))
    .bind(path_text(path))
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(row_to_entry).transpose()
}

pub(crate) async fn insert_entry(
    conn: &mut SqliteConnection,
    entry: &NewEntry,
) -> Result<CacheEntry, sqlx::Error> {
    let created = to_unix(entry.created_at);
    let result = sqlx::query(
        r#"
        INSERT INTO cache_entries (
            canonical_path, cached_path, link_kind, status, triggered_by_reason,
            size_bytes, created_at, last_access_at
        )
        VALUES (?1, ?2, ?3, 'active', ?4, ?5, ?6, ?6)
        "#,
    )
    .bind(path_text(&entry.canonical_path))
    .bind(path_text(&entry.cached_path))
    .bind(entry.link_kind.as_str())
    .bind(entry.triggered_by_reason.as_str())
    .bind(entry.size_bytes as i64)
    .bind(created)
    .execute(&mut *conn)
    .await?;

    Ok(CacheEntry {
        id: result.last_insert_rowid(),
        canonical_path: entry.canonical_path.clone(),
        cached_path: entry.cached_path.clone(),
        link_kind: entry.link_kind,
        status: EntryStatus::Active,
        triggered_by_reason: entry.triggered_by_reason,
        size_bytes: entry.size_bytes,
        created_at: from_unix(created)?,
        last_access_at: from_unix(created)?,
    })
}

pub(crate) async fn set_entry_status(
    conn: &mut SqliteConnection,
    id: i64,
    status: EntryStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE cache_entries SET status = ?1 WHERE id = ?2")
        .bind(status.as_str())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn set_entry_link_kind(
    conn: &mut SqliteConnection,
    id: i64,
    link_kind: LinkKind,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE cache_entries SET link_kind = ?1 WHERE id = ?2")
        .bind(link_kind.as_str())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn touch_entry(
    conn: &mut SqliteConnection,
    id: i64,
    at: OffsetDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE cache_entries SET last_access_at = ?1 WHERE id = ?2")
        .bind(to_unix(at))
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn row_to_entry(row: &SqliteRow) -> Result<CacheEntry, sqlx::Error> {
    Ok(CacheEntry {
        id: row.try_get("id")?,
        canonical_path: PathBuf::from(row.try_get::<String, _>("canonical_path")?),
        cached_path: PathBuf::from(row.try_get::<String, _>("cached_path")?),
        link_kind: parse_label(&row.try_get::<String, _>("link_kind")?)?,
        status: parse_label(&row.try_get::<String, _>("status")?)?,
        triggered_by_reason: parse_label(&row.try_get::<String, _>("triggered_by_reason")?)?,
        size_bytes: row.try_get::<i64, _>("size_bytes")? as u64,
        created_at: from_unix(row.try_get("created_at")?)?,
        last_access_at: from_unix(row.try_get("last_access_at")?)?,
    })
}
