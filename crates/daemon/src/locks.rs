//! Per-path async locks
//!
//! One in-flight transition per canonical path. Locks are created on demand
//! and dropped from the table once nobody holds or waits on them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

pub type PathGuard = OwnedMutexGuard<()>;

#[derive(Debug, Clone, Default)]
pub struct PathLocks {
    table: Arc<parking_lot::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut table = self.table.lock();
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
        table
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait until the path is free and take it.
    pub async fn lock(&self, path: &Path) -> PathGuard {
        self.slot(path).lock_owned().await
    }

    /// Take the path only if nobody holds it.
    pub fn try_lock(&self, path: &Path) -> Option<PathGuard> {
        self.slot(path).try_lock_owned().ok()
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
