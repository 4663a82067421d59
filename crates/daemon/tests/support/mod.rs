//! Shared fixture for the integration tests: a source tree and a cache root
//! in a temp directory, an in-memory registry and a running worker pool.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tempfile::TempDir;
use time::OffsetDateTime;

use common::capacity::CacheLimit;
use common::provider::{
    Candidate, CandidateProvider, PlaybackSession, ProviderError, SessionProvider,
};
use common::topology::Topology;
use common::types::CacheReason;

use tiercache_daemon::pool::WorkerPool;
use tiercache_daemon::watch::{MonitorConfig, WatchMonitor};
use tiercache_daemon::{Database, ServiceConfig, ServiceState, ShutdownHandle};

pub const GRACE: Duration = Duration::from_secs(60);

pub struct Harness {
    _temp: TempDir,
    pub source: PathBuf,
    pub cache: PathBuf,
    pub state: ServiceState,
    pub pool: Option<WorkerPool>,
    pub shutdown: ShutdownHandle,
}

impl Harness {
    pub async fn new(topology: Topology) -> Self {
        Self::with_limit(topology, CacheLimit::Percent(100)).await
    }

    pub async fn with_limit(topology: Topology, limit: CacheLimit) -> Self {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("media");
        let cache = temp.path().join("cache");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::create_dir_all(&cache).unwrap();

        let mut config = ServiceConfig::with_roots(&source, &cache);
        config.cache_limit = limit;
        config.workers = 2;

        let shutdown = ShutdownHandle::new();
        let database = Database::in_memory().await.unwrap();
        let (state, pool) = ServiceState::build(config, topology, database, shutdown.subscribe())
            .await
            .unwrap();

        Self {
            _temp: temp,
            source,
            cache,
            state,
            pool: Some(pool),
            shutdown,
        }
    }

    /// Write a media file under the source root and return its canonical path.
    pub fn media(&self, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.source.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn cached_path(&self, canonical: &Path) -> PathBuf {
        self.cache.join(canonical.strip_prefix(&self.source).unwrap())
    }

    /// A monitor sharing the service's session table.
    pub fn monitor(&self) -> WatchMonitor {
        WatchMonitor::new(self.state.sessions().clone(), monitor_config())
    }

    pub async fn stop(mut self) {
        self.shutdown.shutdown();
        if let Some(pool) = self.pool.take() {
            pool.join().await;
        }
    }
}

pub fn monitor_config() -> MonitorConfig {
    MonitorConfig {
        grace_period: GRACE,
        inactivity_threshold: Duration::from_secs(3600),
        failure_threshold: 3,
    }
}

pub fn playing(user: &str, path: &Path) -> PlaybackSession {
    PlaybackSession {
        user_id: user.to_string(),
        canonical_path: path.to_path_buf(),
        is_playing: true,
    }
}

pub fn after_grace(now: OffsetDateTime) -> OffsetDateTime {
    now + time::Duration::try_from(GRACE).unwrap() + time::Duration::seconds(1)
}

/// Session provider whose answer the test scripts between polls
#[derive(Debug)]
pub struct ScriptedSessions {
    next: Mutex<Result<Vec<PlaybackSession>, String>>,
}

impl ScriptedSessions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next: Mutex::new(Ok(Vec::new())),
        })
    }

    pub fn report(&self, sessions: Vec<PlaybackSession>) {
        *self.next.lock() = Ok(sessions);
    }

    pub fn fail(&self, reason: &str) {
        *self.next.lock() = Err(reason.to_string());
    }
}

#[async_trait]
impl SessionProvider for ScriptedSessions {
    async fn sessions(&self) -> Result<Vec<PlaybackSession>, ProviderError> {
        self.next
            .lock()
            .clone()
            .map_err(ProviderError::Unavailable)
    }
}

/// Candidate provider with a scripted answer
#[derive(Debug)]
pub struct ScriptedCandidates {
    next: Mutex<Result<Vec<Candidate>, String>>,
}

impl ScriptedCandidates {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next: Mutex::new(Ok(Vec::new())),
        })
    }

    pub fn set(&self, candidates: Vec<Candidate>) {
        *self.next.lock() = Ok(candidates);
    }

    pub fn fail(&self, reason: &str) {
        *self.next.lock() = Err(reason.to_string());
    }
}

#[async_trait]
impl CandidateProvider for ScriptedCandidates {
    async fn candidates(&self) -> Result<BoxStream<'static, Candidate>, ProviderError> {
        let candidates = self
            .next
            .lock()
            .clone()
            .map_err(ProviderError::Unavailable)?;
        Ok(stream::iter(candidates).boxed())
    }
}

pub fn candidate(user: &str, path: &Path, reason: CacheReason) -> Candidate {
    Candidate {
        canonical_path: path.to_path_buf(),
        user_id: user.to_string(),
        reason,
        next_in_series: false,
    }
}
