use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use common::types::{CacheReason, UserAttribution};

use super::entry_queries::path_text;
use super::{from_unix, parse_label, to_unix, Database};

/// Attributed live entries for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUsage {
    pub user_id: String,
    pub entry_count: u64,
    pub total_bytes: u64,
}

impl Database {
    pub async fn attributions_for(&self, path: &Path) -> Result<Vec<UserAttribution>, sqlx::Error> {
        let mut conn = self.acquire().await?;
        attributions_for(&mut conn, path).await
    }

    pub async fn all_attributions(&self) -> Result<Vec<UserAttribution>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, canonical_path, attribution_reason, attributed_at
            FROM user_attributions
            ORDER BY canonical_path, attributed_at
            "#,
        )
        .fetch_all(&**self)
        .await?;

        rows.iter().map(row_to_attribution).collect()
    }

    /// Count and size of active entries attributed to each user. Entries
    /// attributed to one user under several reasons are counted once.
    pub async fn user_usage(&self, user: Option<&str>) -> Result<Vec<UserUsage>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT a.user_id AS user_id,
                   COUNT(*) AS entry_count,
                   COALESCE(SUM(e.size_bytes), 0) AS total_bytes
            FROM (SELECT DISTINCT user_id, canonical_path FROM user_attributions) a
            JOIN cache_entries e
              ON e.canonical_path = a.canonical_path AND e.status = 'active'
            WHERE ?1 IS NULL OR a.user_id = ?1
            GROUP BY a.user_id
            ORDER BY a.user_id
            "#,
        )
        .bind(user)
        .fetch_all(&**self)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(UserUsage {
                    user_id: r.try_get("user_id")?,
                    entry_count: r.try_get::<i64, _>("entry_count")? as u64,
                    total_bytes: r.try_get::<i64, _>("total_bytes")? as u64,
                })
            })
            .collect()
    }
}

pub(crate) async fn attributions_for(
    conn: &mut SqliteConnection,
    path: &Path,
) -> Result<Vec<UserAttribution>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT user_id, canonical_path, attribution_reason, attributed_at
        FROM user_attributions
        WHERE canonical_path = ?1
        ORDER BY attributed_at, user_id
        "#,
    )
    .bind(path_text(path))
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_attribution).collect()
}

/// Returns false when the attribution already existed.
pub(crate) async fn insert_attribution(
    conn: &mut SqliteConnection,
    attribution: &UserAttribution,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO user_attributions
            (canonical_path, user_id, attribution_reason, attributed_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(path_text(&attribution.canonical_path))
    .bind(&attribution.user_id)
    .bind(attribution.attribution_reason.as_str())
    .bind(to_unix(attribution.attributed_at))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Remove matching attributions. `reason = None` removes every reason of the
/// user on that path.
pub(crate) async fn delete_attributions(
    conn: &mut SqliteConnection,
    path: &Path,
    user: &str,
    reason: Option<CacheReason>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM user_attributions
        WHERE canonical_path = ?1 AND user_id = ?2
          AND (?3 IS NULL OR attribution_reason = ?3)
        "#,
    )
    .bind(path_text(path))
    .bind(user)
    .bind(reason.map(|r| r.as_str()))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

pub(crate) async fn delete_path_attributions(
    conn: &mut SqliteConnection,
    path: &Path,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM user_attributions WHERE canonical_path = ?1")
        .bind(path_text(path))
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

fn row_to_attribution(row: &SqliteRow) -> Result<UserAttribution, sqlx::Error> {
    Ok(UserAttribution {
        user_id: row.try_get("user_id")?,
        canonical_path: PathBuf::from(row.try_get::<String, _>("canonical_path")?),
        attribution_reason: parse_label(&row.try_get::<String, _>("attribution_reason")?)?,
        attributed_at: from_unix(row.try_get("attributed_at")?)?,
    })
}
