//! Link strategy selection
//!
//! Given the detected [`Topology`] and per-file context, picks the atomic
//! technique used to keep a canonical path resolvable after promotion.

use std::io;
use std::path::{Path, PathBuf};

use crate::topology::Topology;
use crate::types::LinkKind;

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),
    #[error("cache root is not a directory: {0}")]
    CacheRootNotDir(PathBuf),
    #[error("path is outside the source root: {0}")]
    OutsideSourceRoot(PathBuf),
}

#[derive(Debug, Clone)]
pub struct LinkStrategist {
    topology: Topology,
}

impl LinkStrategist {
    pub fn new(topology: Topology) -> Self {
        Self { topology }
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Replace the topology after an on-demand re-check.
    pub fn set_topology(&mut self, topology: Topology) {
        self.topology = topology;
    }

    /// Decide how `canonical_path` should be promoted into `cache_root`.
    ///
    /// Active playback forces [`LinkKind::Copy`]: the file being read is
    /// duplicated into the cache and the canonical path is left untouched.
    pub fn resolve_strategy(
        &self,
        canonical_path: &Path,
        cache_root: &Path,
        is_actively_playing: bool,
    ) -> Result<LinkKind, StrategyError> {
        let meta = std::fs::metadata(canonical_path).map_err(|source| StrategyError::Stat {
            path: canonical_path.to_path_buf(),
            source,
        })?;
        if !meta.is_file() {
            return Err(StrategyError::NotAFile(canonical_path.to_path_buf()));
        }

        let cache_meta = std::fs::metadata(cache_root).map_err(|source| StrategyError::Stat {
            path: cache_root.to_path_buf(),
            source,
        })?;
        if !cache_meta.is_dir() {
            return Err(StrategyError::CacheRootNotDir(cache_root.to_path_buf()));
        }

        if is_actively_playing {
            return Ok(LinkKind::Copy);
        }

        let kind = self.topology.preferred_link_kind();
        if kind == LinkKind::Copy {
            tracing::warn!(
                path = %canonical_path.display(),
                "no link possible between source and cache, promoting as COPY; \
                 the cached copy will diverge if the source changes"
            );
        }
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("movie.mkv");
        std::fs::write(&file, b"frames").unwrap();
        let cache = temp.path().join("cache");
        std::fs::create_dir_all(&cache).unwrap();
        (temp, file, cache)
    }

    #[test]
    fn test_split_topology_uses_symlink() {
        let (_temp, file, cache) = fixture();
        let strategist = LinkStrategist::new(Topology::split(true));
        assert_eq!(
            strategist.resolve_strategy(&file, &cache, false).unwrap(),
            LinkKind::Symlink
        );
    }

    #[test]
    fn test_unified_topology_uses_hardlink() {
        let (_temp, file, cache) = fixture();
        let strategist = LinkStrategist::new(Topology::unified());
        assert_eq!(
            strategist.resolve_strategy(&file, &cache, false).unwrap(),
            LinkKind::Hardlink
        );
    }

    #[test]
    fn test_symlink_denied_falls_back_to_copy() {
        let (_temp, file, cache) = fixture();
        let strategist = LinkStrategist::new(Topology::split(false));
        assert_eq!(
            strategist.resolve_strategy(&file, &cache, false).unwrap(),
            LinkKind::Copy
        );
    }

    #[test]
    fn test_active_playback_forces_copy() {
        let (_temp, file, cache) = fixture();
        let strategist = LinkStrategist::new(Topology::unified());
        assert_eq!(
            strategist.resolve_strategy(&file, &cache, true).unwrap(),
            LinkKind::Copy
        );
    }

    #[test]
    fn test_missing_file_is_strategy_error() {
        let (temp, _file, cache) = fixture();
        let strategist = LinkStrategist::new(Topology::unified());
        let err = strategist
            .resolve_strategy(&temp.path().join("gone.mkv"), &cache, false)
            .unwrap_err();
        assert!(matches!(err, StrategyError::Stat { .. }));
    }

    #[test]
    fn test_directory_is_not_a_file() {
        let (_temp, _file, cache) = fixture();
        let strategist = LinkStrategist::new(Topology::unified());
        let err = strategist.resolve_strategy(&cache, &cache, false).unwrap_err();
        assert!(matches!(err, StrategyError::NotAFile(_)));
    }

    /// Collects formatted log lines for assertions
    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn logs_while(f: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_copy_fallback_warns_per_file() {
        let (_temp, file, cache) = fixture();
        let strategist = LinkStrategist::new(Topology::split(false));
        let logs = logs_while(|| {
            strategist.resolve_strategy(&file, &cache, false).unwrap();
        });
        assert!(logs.contains("WARN"));
        assert!(logs.contains("promoting as COPY"));
        assert!(logs.contains("movie.mkv"));
    }

    #[test]
    fn test_playback_copy_does_not_warn() {
        let (_temp, file, cache) = fixture();
        let strategist = LinkStrategist::new(Topology::unified());
        let logs = logs_while(|| {
            strategist.resolve_strategy(&file, &cache, true).unwrap();
        });
        assert!(!logs.contains("promoting as COPY"));
    }
}
