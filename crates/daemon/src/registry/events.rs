//! Registry change notifications

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use common::types::EntryStatus;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierEventKind {
    EntryAdded,
    EntryRemoved,
    StatisticsChanged,
}

impl TierEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierEventKind::EntryAdded => "entry_added",
            TierEventKind::EntryRemoved => "entry_removed",
            TierEventKind::StatisticsChanged => "statistics_changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierEvent {
    pub kind: TierEventKind,
    pub canonical_path: PathBuf,
    pub status: EntryStatus,
}

/// Fan-out of registry changes. Slow subscribers lag and miss events rather
/// than block writers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TierEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, kind: TierEventKind, canonical_path: PathBuf, status: EntryStatus) {
        let event = TierEvent {
            kind,
            canonical_path,
            status,
        };
        if self.tx.send(event).is_err() {
            tracing::trace!(?kind, "no subscribers for registry event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TierEvent> {
        self.tx.subscribe()
    }
}
