//! Priority scoring and victim selection
//!
//! Scores are deterministic, additive and capped at [`MAX_SCORE`]. An entry
//! referenced by a live watch session is pinned at the maximum and is never a
//! victim, whatever the capacity pressure.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use time::OffsetDateTime;

use crate::types::{CacheEntry, UserAttribution};

pub const MAX_SCORE: u32 = 100;

const PER_EXTRA_USER: u32 = 5;
const EXTRA_USERS_CAP: u32 = 20;
const RECENCY_BONUS: f64 = 15.0;
const NEXT_IN_SERIES_BONUS: u32 = 15;

/// Inputs that are not stored on the entry itself
#[derive(Debug, Clone)]
pub struct ScoreContext<'a> {
    pub now: OffsetDateTime,
    /// Paths referenced by any current watch session
    pub session_paths: &'a HashSet<PathBuf>,
    /// Paths that are the next unwatched item of a series someone is watching
    pub next_up: &'a HashSet<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct PriorityPolicy {
    pub hot_window: Duration,
}

impl PriorityPolicy {
    pub fn new(hot_window: Duration) -> Self {
        Self { hot_window }
    }

    pub fn score(
        &self,
        entry: &CacheEntry,
        attributions: &[UserAttribution],
        ctx: &ScoreContext<'_>,
    ) -> u32 {
        if ctx.session_paths.contains(&entry.canonical_path) {
            return MAX_SCORE;
        }

        let base = attributions
            .iter()
            .map(|a| a.attribution_reason.base_score())
            .chain(std::iter::once(entry.triggered_by_reason.base_score()))
            .max()
            .unwrap_or(0);

        let users: HashSet<&str> = attributions.iter().map(|a| a.user_id.as_str()).collect();
        let extra_users = (users.len().saturating_sub(1) as u32 * PER_EXTRA_USER).min(EXTRA_USERS_CAP);

        let recency = self.recency_bonus(entry.created_at, ctx.now);

        let next_up = if ctx.next_up.contains(&entry.canonical_path) {
            NEXT_IN_SERIES_BONUS
        } else {
            0
        };

        (base + extra_users + recency + next_up).min(MAX_SCORE)
    }

    /// +15 for a brand new entry, decaying linearly to 0 at the window edge.
    fn recency_bonus(&self, created_at: OffsetDateTime, now: OffsetDateTime) -> u32 {
        let window = self.hot_window.as_secs_f64();
        if window <= 0.0 {
            return 0;
        }
        let age = (now - created_at).as_seconds_f64().max(0.0);
        if age >= window {
            return 0;
        }
        (RECENCY_BONUS * (window - age) / window).round() as u32
    }
}

/// An entry together with everything victim selection needs to know
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: CacheEntry,
    pub score: u32,
    pub attribution_count: usize,
    pub has_session: bool,
}

/// Result of a victim search; may free less than requested
#[derive(Debug, Clone, Default)]
pub struct VictimSelection {
    pub victims: Vec<CacheEntry>,
    pub target_bytes: u64,
    pub bytes_selected: u64,
}

impl VictimSelection {
    pub fn is_satisfied(&self) -> bool {
        self.bytes_selected >= self.target_bytes
    }

    pub fn shortfall(&self) -> u64 {
        self.target_bytes.saturating_sub(self.bytes_selected)
    }
}

/// Pick the cheapest entries to drop until `target_bytes` are freed.
///
/// Entries with a session are never selected. Entries with no attribution go
/// first, then ascending score, then least recently accessed.
pub fn select_victims(mut candidates: Vec<ScoredEntry>, target_bytes: u64) -> VictimSelection {
    let mut selection = VictimSelection {
        target_bytes,
        ..Default::default()
    };
    if target_bytes == 0 {
        return selection;
    }

    candidates.retain(|c| !c.has_session && c.score < MAX_SCORE);
    candidates.sort_by(victim_order);

    for candidate in candidates {
        if selection.bytes_selected >= target_bytes {
            break;
        }
        selection.bytes_selected += candidate.entry.size_bytes;
        selection.victims.push(candidate.entry);
    }

    selection
}

fn victim_order(a: &ScoredEntry, b: &ScoredEntry) -> Ordering {
    let a_unattributed = a.attribution_count == 0;
    let b_unattributed = b.attribution_count == 0;
    b_unattributed
        .cmp(&a_unattributed)
        .then(a.score.cmp(&b.score))
        .then(a.entry.last_access_at.cmp(&b.entry.last_access_at))
        .then(a.entry.canonical_path.cmp(&b.entry.canonical_path))
}
