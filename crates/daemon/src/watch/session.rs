//! In-memory watch sessions
//!
//! Owned by the watch monitor; everything else only reads the table to learn
//! which paths are being watched.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    Watching,
    /// Playback stopped; removal is scheduled
    GracePeriod,
    /// Session provider unreachable for too long
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSession {
    pub user_id: String,
    pub canonical_path: PathBuf,
    pub state: WatchState,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub scheduled_removal_at: Option<OffsetDateTime>,
}

pub type SessionKey = (String, PathBuf);

/// Shared table of sessions keyed by `(user, path)`
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    inner: Arc<RwLock<HashMap<SessionKey, WatchSession>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions referencing `path`, in any state.
    pub fn references(&self, path: &Path) -> usize {
        self.inner
            .read()
            .values()
            .filter(|s| s.canonical_path == path)
            .count()
    }

    /// Whether someone is currently playing `path`.
    pub fn is_actively_playing(&self, path: &Path) -> bool {
        self.inner
            .read()
            .values()
            .any(|s| s.canonical_path == path && s.state == WatchState::Watching)
    }

    /// Paths referenced by any session.
    pub fn paths(&self) -> HashSet<PathBuf> {
        self.inner
            .read()
            .values()
            .map(|s| s.canonical_path.clone())
            .collect()
    }

    pub fn list(&self) -> Vec<WatchSession> {
        let mut sessions: Vec<_> = self.inner.read().values().cloned().collect();
        sessions.sort_by(|a, b| {
            (&a.user_id, &a.canonical_path).cmp(&(&b.user_id, &b.canonical_path))
        });
        sessions
    }

    pub fn get(&self, user: &str, path: &Path) -> Option<WatchSession> {
        self.inner
            .read()
            .get(&(user.to_string(), path.to_path_buf()))
            .cloned()
    }

    pub(crate) fn insert(&self, session: WatchSession) {
        let key = (session.user_id.clone(), session.canonical_path.clone());
        self.inner.write().insert(key, session);
    }

    pub(crate) fn remove(&self, user: &str, path: &Path) -> Option<WatchSession> {
        self.inner
            .write()
            .remove(&(user.to_string(), path.to_path_buf()))
    }

    /// Apply `f` to every session, under one write lock.
    pub(crate) fn update_all(&self, mut f: impl FnMut(&mut WatchSession)) {
        for session in self.inner.write().values_mut() {
            f(session);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
