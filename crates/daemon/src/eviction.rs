//! Victim selection over the live registry
//!
//! Scores every evictable entry with the [`PriorityPolicy`] and hands the
//! ranked list to [`select_victims`]. The engine only decides; the tiering
//! operator carries out the evictions.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use time::OffsetDateTime;

use common::priority::{select_victims, PriorityPolicy, ScoreContext, ScoredEntry, VictimSelection};
use common::types::EntryStatus;

use crate::registry::{CacheRegistry, RegistryError};
use crate::watch::SessionTable;

/// Paths that are the next unwatched item in a series, refreshed by each
/// reconciliation cycle
pub type NextUp = Arc<RwLock<HashSet<PathBuf>>>;

#[derive(Debug, Clone)]
pub struct EvictionEngine {
    registry: Arc<CacheRegistry>,
    sessions: SessionTable,
    next_up: NextUp,
    policy: PriorityPolicy,
}

impl EvictionEngine {
    pub fn new(
        registry: Arc<CacheRegistry>,
        sessions: SessionTable,
        next_up: NextUp,
        policy: PriorityPolicy,
    ) -> Self {
        Self {
            registry,
            sessions,
            next_up,
            policy,
        }
    }

    /// Score every active entry. Orphaned entries hold no cache bytes.
    pub async fn rank(&self) -> Result<Vec<ScoredEntry>, RegistryError> {
        let attributions = self.registry.all_attributions().await?;
        let session_paths = self.sessions.paths();
        let next_up = self.next_up.read().clone();
        let ctx = ScoreContext {
            now: OffsetDateTime::now_utc(),
            session_paths: &session_paths,
            next_up: &next_up,
        };

        let ranked = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|e| e.status == EntryStatus::Active)
            .map(|entry| {
                let attrs = attributions
                    .get(&entry.canonical_path)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                ScoredEntry {
                    score: self.policy.score(&entry, attrs, &ctx),
                    attribution_count: attrs.len(),
                    has_session: session_paths.contains(&entry.canonical_path),
                    entry,
                }
            })
            .collect();
        Ok(ranked)
    }

    /// Lowest-priority entries whose removal frees at least `target_bytes`,
    /// or as many as can be found.
    pub async fn select_victims(&self, target_bytes: u64) -> Result<VictimSelection, RegistryError> {
        let selection = select_victims(self.rank().await?, target_bytes);
        if !selection.is_satisfied() {
            tracing::warn!(
                target_bytes,
                selected = selection.bytes_selected,
                shortfall = selection.shortfall(),
                "not enough evictable entries"
            );
        }
        Ok(selection)
    }
}
