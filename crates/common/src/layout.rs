//! Mapping between canonical source paths and their cache locations

use std::path::{Path, PathBuf};

/// Cache files mirror the source tree: `cache_root / (canonical - source_root)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    source_root: PathBuf,
    cache_root: PathBuf,
}

impl CacheLayout {
    pub fn new(source_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            cache_root: cache_root.into(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Cache location for a canonical path, or `None` when the path lies
    /// outside the source root.
    pub fn cached_path_for(&self, canonical: &Path) -> Option<PathBuf> {
        let relative = canonical.strip_prefix(&self.source_root).ok()?;
        if relative.as_os_str().is_empty() {
            return None;
        }
        Some(self.cache_root.join(relative))
    }

    /// Canonical path owning a file found in the cache root.
    pub fn canonical_path_for(&self, cached: &Path) -> Option<PathBuf> {
        let relative = cached.strip_prefix(&self.cache_root).ok()?;
        if relative.as_os_str().is_empty() {
            return None;
        }
        Some(self.source_root.join(relative))
    }
}
