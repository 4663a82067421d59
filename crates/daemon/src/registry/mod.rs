//! The cache registry
//!
//! Single source of truth for what is cached, for whom and why. Writes to one
//! canonical path are serialized by a per-row lock and committed in one
//! SQLite transaction together with their audit row. Reads are served from an
//! in-memory index of live entries that is updated after every commit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;

use common::types::{
    CacheEntry, CacheReason, EntryStatus, LinkKind, OperationKind, OperationLogEntry,
    OperationOutcome, UserAttribution,
};

use crate::database::{
    attribution_queries, entry_queries, operation_log_queries, Database, EntryFilter,
    HistoryQuery, NewEntry, NewOperation, UserUsage,
};
use crate::locks::PathLocks;

pub mod events;

pub use events::{EventBus, TierEvent, TierEventKind};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("path already has a live entry: {0}")]
    AlreadyTracked(PathBuf),
    #[error("no live entry for {0}")]
    Missing(PathBuf),
}

/// Aggregate usage across the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStatistics {
    /// Bytes held in cache storage by active and pending-removal entries
    pub total_bytes: u64,
    pub active_count: u64,
    pub orphaned_count: u64,
    pub pending_removal_count: u64,
    pub removed_count: u64,
    pub users: Vec<UserUsage>,
}

#[derive(Debug)]
pub struct CacheRegistry {
    db: Database,
    index: RwLock<HashMap<PathBuf, CacheEntry>>,
    row_locks: PathLocks,
    events: EventBus,
}

impl CacheRegistry {
    pub async fn open(db: Database) -> Result<Self, RegistryError> {
        let registry = Self {
            db,
            index: RwLock::new(HashMap::new()),
            row_locks: PathLocks::new(),
            events: EventBus::default(),
        };
        registry.reload().await?;
        Ok(registry)
    }

    /// Rebuild the in-memory index from the database.
    pub async fn reload(&self) -> Result<(), RegistryError> {
        let entries = self.db.live_entries().await?;
        let mut index = self.index.write();
        index.clear();
        for entry in entries {
            index.insert(entry.canonical_path.clone(), entry);
        }
        tracing::debug!(entries = index.len(), "registry index loaded");
        Ok(())
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TierEvent> {
        self.events.subscribe()
    }

    // ==================== reads ====================

    /// Live entry for a path.
    pub fn get(&self, path: &Path) -> Option<CacheEntry> {
        self.index.read().get(path).cloned()
    }

    /// Every live entry, ordered by path.
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.index.read().values().cloned().collect();
        entries.sort_by(|a, b| a.canonical_path.cmp(&b.canonical_path));
        entries
    }

    /// Bytes currently occupying cache storage.
    pub fn active_bytes(&self) -> u64 {
        self.index
            .read()
            .values()
            .filter(|e| matches!(e.status, EntryStatus::Active | EntryStatus::PendingRemoval))
            .map(|e| e.size_bytes)
            .sum()
    }

    pub async fn attributions(&self, path: &Path) -> Result<Vec<UserAttribution>, RegistryError> {
        Ok(self.db.attributions_for(path).await?)
    }

    pub async fn all_attributions(
        &self,
    ) -> Result<HashMap<PathBuf, Vec<UserAttribution>>, RegistryError> {
        let mut by_path: HashMap<PathBuf, Vec<UserAttribution>> = HashMap::new();
        for attribution in self.db.all_attributions().await? {
            by_path
                .entry(attribution.canonical_path.clone())
                .or_default()
                .push(attribution);
        }
        Ok(by_path)
    }

    pub async fn query(&self, filter: &EntryFilter) -> Result<Vec<CacheEntry>, RegistryError> {
        Ok(self.db.query_entries(filter).await?)
    }

    pub async fn statistics(&self) -> Result<RegistryStatistics, RegistryError> {
        let mut stats = RegistryStatistics::default();
        for (status, count, bytes) in self.db.count_by_status().await? {
            match status {
                EntryStatus::Active => {
                    stats.active_count = count;
                    stats.total_bytes += bytes;
                }
                EntryStatus::PendingRemoval => {
                    stats.pending_removal_count = count;
                    stats.total_bytes += bytes;
                }
                EntryStatus::Orphaned => stats.orphaned_count = count,
                EntryStatus::Removed => stats.removed_count = count,
            }
        }
        stats.users = self.db.user_usage(None).await?;
        Ok(stats)
    }

    pub async fn user_statistics(&self, user: &str) -> Result<UserUsage, RegistryError> {
        let usage = self.db.user_usage(Some(user)).await?;
        Ok(usage.into_iter().next().unwrap_or_else(|| UserUsage {
            user_id: user.to_string(),
            entry_count: 0,
            total_bytes: 0,
        }))
    }

    pub async fn history(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<OperationLogEntry>, RegistryError> {
        Ok(self.db.history(query).await?)
    }

    /// Drop audit rows older than `retention`.
    pub async fn prune_history(&self, retention: Duration) -> Result<u64, RegistryError> {
        let cutoff = OffsetDateTime::now_utc() - retention;
        let pruned = self.db.prune_history(cutoff).await?;
        if pruned > 0 {
            tracing::info!(pruned, "pruned operation log");
        }
        Ok(pruned)
    }

    // ==================== writes ====================

    /// Record a completed promotion. An orphaned entry for the same path is
    /// retired in the same transaction; its attributions carry over.
    pub async fn commit_promotion(
        &self,
        entry: NewEntry,
        user: Option<&str>,
        actor: &str,
    ) -> Result<CacheEntry, RegistryError> {
        let path = entry.canonical_path.clone();
        let _row = self.row_locks.lock(&path).await;

        let mut tx = self.db.begin().await?;
        let status_before = match entry_queries::get_live_entry(&mut tx, &path).await? {
            Some(previous) if previous.status == EntryStatus::Orphaned => {
                entry_queries::set_entry_status(&mut tx, previous.id, EntryStatus::Removed)
                    .await?;
                Some(EntryStatus::Orphaned)
            }
            Some(_) => return Err(RegistryError::AlreadyTracked(path)),
            None => None,
        };

        let created = entry_queries::insert_entry(&mut tx, &entry).await?;
        if let Some(user) = user {
            let attribution = UserAttribution {
                user_id: user.to_string(),
                canonical_path: path.clone(),
                attribution_reason: entry.triggered_by_reason,
                attributed_at: entry.created_at,
            };
            attribution_queries::insert_attribution(&mut tx, &attribution).await?;
        }
        operation_log_queries::insert_operation(
            &mut tx,
            &NewOperation {
                canonical_path: &path,
                operation: OperationKind::Promote,
                actor,
                status_before,
                status_after: Some(EntryStatus::Active),
                outcome: OperationOutcome::Ok,
                detail: Some(format!(
                    "{} as {}",
                    entry.triggered_by_reason, entry.link_kind
                )),
            },
        )
        .await?;
        tx.commit().await?;

        self.index.write().insert(path.clone(), created.clone());
        self.events
            .publish(TierEventKind::EntryAdded, path.clone(), EntryStatus::Active);
        self.events
            .publish(TierEventKind::StatisticsChanged, path, EntryStatus::Active);
        Ok(created)
    }

    /// Mark the live entry for `path` removed and drop its attributions.
    pub async fn commit_removal(
        &self,
        path: &Path,
        operation: OperationKind,
        actor: &str,
    ) -> Result<CacheEntry, RegistryError> {
        let _row = self.row_locks.lock(path).await;

        let mut tx = self.db.begin().await?;
        let mut entry = entry_queries::get_live_entry(&mut tx, path)
            .await?
            .ok_or_else(|| RegistryError::Missing(path.to_path_buf()))?;
        entry_queries::set_entry_status(&mut tx, entry.id, EntryStatus::Removed).await?;
        attribution_queries::delete_path_attributions(&mut tx, path).await?;
        operation_log_queries::insert_operation(
            &mut tx,
            &NewOperation {
                canonical_path: path,
                operation,
                actor,
                status_before: Some(entry.status),
                status_after: Some(EntryStatus::Removed),
                outcome: OperationOutcome::Ok,
                detail: None,
            },
        )
        .await?;
        tx.commit().await?;

        entry.status = EntryStatus::Removed;
        self.index.write().remove(path);
        self.events.publish(
            TierEventKind::EntryRemoved,
            path.to_path_buf(),
            EntryStatus::Removed,
        );
        self.events.publish(
            TierEventKind::StatisticsChanged,
            path.to_path_buf(),
            EntryStatus::Removed,
        );
        Ok(entry)
    }

    /// Attach a user/reason to a live entry. Returns false when it was
    /// already attached, in which case nothing is logged.
    pub async fn attribute(
        &self,
        path: &Path,
        user: &str,
        reason: CacheReason,
        actor: &str,
    ) -> Result<bool, RegistryError> {
        let _row = self.row_locks.lock(path).await;

        let mut tx = self.db.begin().await?;
        let entry = entry_queries::get_live_entry(&mut tx, path)
            .await?
            .ok_or_else(|| RegistryError::Missing(path.to_path_buf()))?;
        let attribution = UserAttribution {
            user_id: user.to_string(),
            canonical_path: path.to_path_buf(),
            attribution_reason: reason,
            attributed_at: OffsetDateTime::now_utc(),
        };
        let inserted = attribution_queries::insert_attribution(&mut tx, &attribution).await?;
        if inserted {
            operation_log_queries::insert_operation(
                &mut tx,
                &NewOperation {
                    canonical_path: path,
                    operation: OperationKind::Attribute,
                    actor,
                    status_before: Some(entry.status),
                    status_after: Some(entry.status),
                    outcome: OperationOutcome::Ok,
                    detail: Some(format!("{} for {}", reason, user)),
                },
            )
            .await?;
        }
        tx.commit().await?;

        if inserted {
            self.events.publish(
                TierEventKind::StatisticsChanged,
                path.to_path_buf(),
                entry.status,
            );
        }
        Ok(inserted)
    }

    /// Detach a user from a path; `reason = None` detaches every reason.
    /// Returns the number of attributions removed.
    pub async fn deattribute(
        &self,
        path: &Path,
        user: &str,
        reason: Option<CacheReason>,
        actor: &str,
    ) -> Result<u64, RegistryError> {
        let _row = self.row_locks.lock(path).await;

        let mut tx = self.db.begin().await?;
        let removed = attribution_queries::delete_attributions(&mut tx, path, user, reason).await?;
        let status = entry_queries::get_live_entry(&mut tx, path)
            .await?
            .map(|e| e.status);
        if removed > 0 {
            operation_log_queries::insert_operation(
                &mut tx,
                &NewOperation {
                    canonical_path: path,
                    operation: OperationKind::Deattribute,
                    actor,
                    status_before: status,
                    status_after: status,
                    outcome: OperationOutcome::Ok,
                    detail: Some(match reason {
                        Some(reason) => format!("{} for {}", reason, user),
                        None => format!("all reasons for {}", user),
                    }),
                },
            )
            .await?;
        }
        tx.commit().await?;

        if removed > 0 {
            if let Some(status) = status {
                self.events
                    .publish(TierEventKind::StatisticsChanged, path.to_path_buf(), status);
            }
        }
        Ok(removed)
    }

    /// Change the status of a live entry. Removal goes through
    /// [`CacheRegistry::commit_removal`].
    pub async fn set_status(
        &self,
        path: &Path,
        status: EntryStatus,
        actor: &str,
        detail: Option<String>,
    ) -> Result<CacheEntry, RegistryError> {
        if status == EntryStatus::Removed {
            return self.commit_removal(path, OperationKind::Sweep, actor).await;
        }

        let _row = self.row_locks.lock(path).await;

        let mut tx = self.db.begin().await?;
        let mut entry = entry_queries::get_live_entry(&mut tx, path)
            .await?
            .ok_or_else(|| RegistryError::Missing(path.to_path_buf()))?;
        if entry.status == status {
            return Ok(entry);
        }
        entry_queries::set_entry_status(&mut tx, entry.id, status).await?;
        operation_log_queries::insert_operation(
            &mut tx,
            &NewOperation {
                canonical_path: path,
                operation: OperationKind::Sweep,
                actor,
                status_before: Some(entry.status),
                status_after: Some(status),
                outcome: OperationOutcome::Ok,
                detail,
            },
        )
        .await?;
        tx.commit().await?;

        entry.status = status;
        self.index.write().insert(path.to_path_buf(), entry.clone());
        self.events
            .publish(TierEventKind::StatisticsChanged, path.to_path_buf(), status);
        Ok(entry)
    }

    /// Record that an entry's canonical path now uses a different link kind.
    pub async fn update_link_kind(
        &self,
        path: &Path,
        link_kind: LinkKind,
        actor: &str,
    ) -> Result<CacheEntry, RegistryError> {
        let _row = self.row_locks.lock(path).await;

        let mut tx = self.db.begin().await?;
        let mut entry = entry_queries::get_live_entry(&mut tx, path)
            .await?
            .ok_or_else(|| RegistryError::Missing(path.to_path_buf()))?;
        entry_queries::set_entry_link_kind(&mut tx, entry.id, link_kind).await?;
        operation_log_queries::insert_operation(
            &mut tx,
            &NewOperation {
                canonical_path: path,
                operation: OperationKind::Sweep,
                actor,
                status_before: Some(entry.status),
                status_after: Some(entry.status),
                outcome: OperationOutcome::Ok,
                detail: Some(format!("relinked {} -> {}", entry.link_kind, link_kind)),
            },
        )
        .await?;
        tx.commit().await?;

        entry.link_kind = link_kind;
        self.index.write().insert(path.to_path_buf(), entry.clone());
        Ok(entry)
    }

    /// Bump `last_access_at`. Not an audited transition.
    pub async fn touch(&self, path: &Path) -> Result<(), RegistryError> {
        let _row = self.row_locks.lock(path).await;

        let Some(id) = self.index.read().get(path).map(|e| e.id) else {
            return Ok(());
        };
        let now = OffsetDateTime::now_utc();
        let mut conn = self.db.acquire().await?;
        entry_queries::touch_entry(&mut conn, id, now).await?;
        drop(conn);

        if let Some(entry) = self.index.write().get_mut(path) {
            // Stored with second precision
            entry.last_access_at = now.replace_nanosecond(0).unwrap_or(now);
        }
        Ok(())
    }

    /// Append a failed-operation audit row. The entry itself is unchanged.
    pub async fn record_failure(
        &self,
        path: &Path,
        operation: OperationKind,
        actor: &str,
        detail: &str,
    ) -> Result<(), RegistryError> {
        let status = self.get(path).map(|e| e.status);
        self.db
            .record_operation(&NewOperation {
                canonical_path: path,
                operation,
                actor,
                status_before: status,
                status_after: status,
                outcome: OperationOutcome::Failed,
                detail: Some(detail.to_string()),
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry() -> CacheRegistry {
        let db = Database::in_memory().await.unwrap();
        CacheRegistry::open(db).await.unwrap()
    }

    fn new_entry(path: &str, size: u64) -> NewEntry {
        NewEntry {
            canonical_path: PathBuf::from(path),
            cached_path: PathBuf::from(format!("/cache{}", path)),
            link_kind: LinkKind::Symlink,
            triggered_by_reason: CacheReason::Watchlist,
            size_bytes: size,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_commit_promotion_indexes_and_logs() {
        let registry = registry().await;
        let entry = registry
            .commit_promotion(new_entry("/m/a.mkv", 100), Some("alice"), "test")
            .await
            .unwrap();

        assert_eq!(entry.status, EntryStatus::Active);
        assert_eq!(registry.get(Path::new("/m/a.mkv")).unwrap().id, entry.id);
        assert_eq!(registry.active_bytes(), 100);

        let attributions = registry.attributions(Path::new("/m/a.mkv")).await.unwrap();
        assert_eq!(attributions.len(), 1);
        assert_eq!(attributions[0].user_id, "alice");

        let history = registry.history(&HistoryQuery::default()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].operation, OperationKind::Promote);
        assert_eq!(history[0].status_before, None);
        assert_eq!(history[0].status_after, Some(EntryStatus::Active));
    }

    #[tokio::test]
    async fn test_second_live_entry_is_rejected() {
        let registry = registry().await;
        registry
            .commit_promotion(new_entry("/m/a.mkv", 1), None, "test")
            .await
            .unwrap();
        let err = registry
            .commit_promotion(new_entry("/m/a.mkv", 1), None, "test")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyTracked(_)));
    }

    #[tokio::test]
    async fn test_removal_then_recache_creates_new_row() {
        let registry = registry().await;
        let path = Path::new("/m/a.mkv");
        let first = registry
            .commit_promotion(new_entry("/m/a.mkv", 1), Some("alice"), "test")
            .await
            .unwrap();
        registry
            .commit_removal(path, OperationKind::Demote, "test")
            .await
            .unwrap();
        assert!(registry.get(path).is_none());
        assert!(registry.attributions(path).await.unwrap().is_empty());

        let second = registry
            .commit_promotion(new_entry("/m/a.mkv", 1), None, "test")
            .await
            .unwrap();
        assert_ne!(first.id, second.id);

        let stats = registry.statistics().await.unwrap();
        assert_eq!(stats.active_count, 1);
        assert_eq!(stats.removed_count, 1);
    }

    #[tokio::test]
    async fn test_orphaned_entry_is_replaced_on_promotion() {
        let registry = registry().await;
        let path = Path::new("/m/a.mkv");
        registry
            .commit_promotion(new_entry("/m/a.mkv", 1), Some("alice"), "test")
            .await
            .unwrap();
        registry
            .set_status(path, EntryStatus::Orphaned, "sweep", None)
            .await
            .unwrap();

        let replaced = registry
            .commit_promotion(new_entry("/m/a.mkv", 1), None, "sweep")
            .await
            .unwrap();
        assert_eq!(replaced.status, EntryStatus::Active);
        assert_eq!(registry.attributions(path).await.unwrap().len(), 1);

        let history = registry
            .history(&HistoryQuery {
                path: Some(path.to_path_buf()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(history[0].status_before, Some(EntryStatus::Orphaned));
    }

    #[tokio::test]
    async fn test_attribute_is_idempotent() {
        let registry = registry().await;
        let path = Path::new("/m/a.mkv");
        registry
            .commit_promotion(new_entry("/m/a.mkv", 1), Some("alice"), "test")
            .await
            .unwrap();

        assert!(registry
            .attribute(path, "bob", CacheReason::OnDeck, "test")
            .await
            .unwrap());
        assert!(!registry
            .attribute(path, "bob", CacheReason::OnDeck, "test")
            .await
            .unwrap());

        let history = registry.history(&HistoryQuery::default()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].operation, OperationKind::Attribute);
    }

    #[tokio::test]
    async fn test_attribute_untracked_path_fails() {
        let registry = registry().await;
        let err = registry
            .attribute(Path::new("/m/none.mkv"), "bob", CacheReason::Manual, "test")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Missing(_)));
    }

    #[tokio::test]
    async fn test_deattribute_all_reasons() {
        let registry = registry().await;
        let path = Path::new("/m/a.mkv");
        registry
            .commit_promotion(new_entry("/m/a.mkv", 1), Some("alice"), "test")
            .await
            .unwrap();
        registry
            .attribute(path, "alice", CacheReason::OnDeck, "test")
            .await
            .unwrap();
        registry
            .attribute(path, "bob", CacheReason::OnDeck, "test")
            .await
            .unwrap();

        let removed = registry.deattribute(path, "alice", None, "test").await.unwrap();
        assert_eq!(removed, 2);
        let remaining = registry.attributions(path).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].user_id, "bob");

        assert_eq!(
            registry.deattribute(path, "alice", None, "test").await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_user_statistics() {
        let registry = registry().await;
        registry
            .commit_promotion(new_entry("/m/a.mkv", 100), Some("alice"), "test")
            .await
            .unwrap();
        registry
            .commit_promotion(new_entry("/m/b.mkv", 50), Some("alice"), "test")
            .await
            .unwrap();
        registry
            .attribute(Path::new("/m/a.mkv"), "alice", CacheReason::OnDeck, "test")
            .await
            .unwrap();

        let alice = registry.user_statistics("alice").await.unwrap();
        assert_eq!(alice.entry_count, 2);
        assert_eq!(alice.total_bytes, 150);

        let nobody = registry.user_statistics("nobody").await.unwrap();
        assert_eq!(nobody.entry_count, 0);
    }

    #[tokio::test]
    async fn test_query_filters() {
        let registry = registry().await;
        registry
            .commit_promotion(new_entry("/m/small.mkv", 10), Some("alice"), "test")
            .await
            .unwrap();
        registry
            .commit_promotion(new_entry("/m/big.mkv", 1000), Some("bob"), "test")
            .await
            .unwrap();

        let big = registry
            .query(&EntryFilter {
                min_size: Some(100),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(big.len(), 1);
        assert_eq!(big[0].canonical_path, PathBuf::from("/m/big.mkv"));

        let alice = registry
            .query(&EntryFilter {
                user: Some("alice".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(alice.len(), 1);

        let paged = registry
            .query(&EntryFilter {
                limit: Some(1),
                offset: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].canonical_path, PathBuf::from("/m/small.mkv"));
    }

    #[tokio::test]
    async fn test_history_pagination() {
        let registry = registry().await;
        let path = Path::new("/m/a.mkv");
        registry
            .commit_promotion(new_entry("/m/a.mkv", 1), None, "test")
            .await
            .unwrap();
        for user in ["a", "b", "c"] {
            registry
                .attribute(path, user, CacheReason::Manual, "test")
                .await
                .unwrap();
        }

        let first_page = registry
            .history(&HistoryQuery {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first_page.len(), 2);
        assert!(first_page[0].id > first_page[1].id);

        let second_page = registry
            .history(&HistoryQuery {
                limit: Some(10),
                before: Some(first_page[1].id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second_page.len(), 2);
        assert_eq!(second_page[1].operation, OperationKind::Promote);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_without_state_change() {
        let registry = registry().await;
        let path = Path::new("/m/a.mkv");
        registry
            .record_failure(path, OperationKind::Promote, "test", "disk full")
            .await
            .unwrap();

        let history = registry.history(&HistoryQuery::default()).await.unwrap();
        assert_eq!(history[0].outcome, OperationOutcome::Failed);
        assert_eq!(history[0].detail.as_deref(), Some("disk full"));
        assert_eq!(history[0].status_before, history[0].status_after);
        assert!(registry.get(path).is_none());
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let registry = registry().await;
        let mut rx = registry.subscribe();
        registry
            .commit_promotion(new_entry("/m/a.mkv", 1), None, "test")
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, TierEventKind::EntryAdded);
        assert_eq!(event.canonical_path, PathBuf::from("/m/a.mkv"));
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_index() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("registry.db");
        {
            let db = Database::open(&db_path).await.unwrap();
            let registry = CacheRegistry::open(db).await.unwrap();
            registry
                .commit_promotion(new_entry("/m/a.mkv", 7), None, "test")
                .await
                .unwrap();
            registry.database().close().await;
        }
        let db = Database::open(&db_path).await.unwrap();
        let registry = CacheRegistry::open(db).await.unwrap();
        assert_eq!(registry.get(Path::new("/m/a.mkv")).unwrap().size_bytes, 7);
    }
}
