use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{Mutex as AsyncMutex, Semaphore, SemaphorePermit};

use common::layout::CacheLayout;
use common::signature::ContentSignature;
use common::strategy::{LinkStrategist, StrategyError};
use common::topology::Topology;
use common::types::{CacheEntry, CacheReason, EntryStatus, LinkKind, OperationKind};

use super::error::{FailureCounters, TierError};
use super::fsops;
use crate::database::NewEntry;
use crate::eviction::EvictionEngine;
use crate::locks::PathLocks;
use crate::registry::CacheRegistry;
use crate::watch::SessionTable;

/// Run blocking filesystem work off the async workers.
pub(super) async fn run_blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}

pub(super) fn signatures_match(a: &Path, b: &Path) -> io::Result<bool> {
    Ok(ContentSignature::compute(a)? == ContentSignature::compute(b)?)
}

/// Concurrency caps per bandwidth class
#[derive(Debug, Clone)]
pub struct TransferLimits {
    cache: Arc<Semaphore>,
    array: Arc<Semaphore>,
    network: Arc<Semaphore>,
}

impl TransferLimits {
    pub fn new(cache: usize, array: usize, network: usize) -> Self {
        Self {
            cache: Arc::new(Semaphore::new(cache)),
            array: Arc::new(Semaphore::new(array)),
            network: Arc::new(Semaphore::new(network)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorSettings {
    /// Resolved cache capacity
    pub cache_limit_bytes: u64,
    pub eviction_headroom_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoteRequest {
    pub canonical_path: PathBuf,
    pub reason: CacheReason,
    /// User the promotion is attributed to
    pub user_id: Option<String>,
    /// Who asked: `scheduler`, `watch`, `api`, ...
    pub actor: String,
    /// Set for administrator commands; only these re-promote an orphaned
    /// entry whose topology leaves copy as the only link kind
    #[serde(default)]
    pub manual: bool,
}

impl PromoteRequest {
    pub fn new(canonical_path: impl Into<PathBuf>, reason: CacheReason, actor: &str) -> Self {
        Self {
            canonical_path: canonical_path.into(),
            reason,
            user_id: None,
            actor: actor.to_string(),
            manual: false,
        }
    }

    pub fn for_user(mut self, user: impl Into<String>) -> Self {
        self.user_id = Some(user.into());
        self
    }

    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PromoteOutcome {
    Promoted { entry: CacheEntry },
    /// The path was already cached; `attributed` tells whether a new
    /// attribution was recorded
    AlreadyCached { entry: CacheEntry, attributed: bool },
}

impl PromoteOutcome {
    pub fn entry(&self) -> &CacheEntry {
        match self {
            PromoteOutcome::Promoted { entry } => entry,
            PromoteOutcome::AlreadyCached { entry, .. } => entry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DemoteOutcome {
    Demoted { entry: CacheEntry },
    /// The canonical path no longer linked to the cache (the library replaced
    /// the file); it was kept as is and only the cache copy was dropped
    Superseded { entry: CacheEntry },
    /// Nothing was cached at the path
    NotCached,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionReport {
    pub target_bytes: u64,
    pub freed_bytes: u64,
    pub evicted: usize,
}

/// Bytes promised to promotes that have passed the capacity check but not
/// yet committed. Released on drop.
#[derive(Debug)]
struct Reservation {
    bytes: u64,
    pool: Arc<Mutex<u64>>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut reserved = self.pool.lock();
        *reserved = reserved.saturating_sub(self.bytes);
    }
}

/// Performs promote, demote and evict transitions
#[derive(Debug)]
pub struct TieringOperator {
    pub(super) registry: Arc<CacheRegistry>,
    pub(super) layout: CacheLayout,
    strategist: RwLock<LinkStrategist>,
    pub(super) sessions: SessionTable,
    eviction: EvictionEngine,
    pub(super) locks: PathLocks,
    limits: TransferLimits,
    settings: OperatorSettings,
    failures: FailureCounters,
    /// Serializes capacity checks across paths
    capacity_gate: AsyncMutex<()>,
    reserved: Arc<Mutex<u64>>,
}

impl TieringOperator {
    pub fn new(
        registry: Arc<CacheRegistry>,
        layout: CacheLayout,
        topology: Topology,
        sessions: SessionTable,
        eviction: EvictionEngine,
        limits: TransferLimits,
        settings: OperatorSettings,
    ) -> Self {
        Self {
            registry,
            layout,
            strategist: RwLock::new(LinkStrategist::new(topology)),
            sessions,
            eviction,
            locks: PathLocks::new(),
            limits,
            settings,
            failures: FailureCounters::default(),
            capacity_gate: AsyncMutex::new(()),
            reserved: Arc::new(Mutex::new(0)),
        }
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn topology(&self) -> Topology {
        self.strategist.read().topology()
    }

    /// Replace the topology after an on-demand re-check.
    pub fn set_topology(&self, topology: Topology) {
        self.strategist.write().set_topology(topology);
    }

    pub fn failures(&self) -> &FailureCounters {
        &self.failures
    }

    pub fn settings(&self) -> OperatorSettings {
        self.settings
    }

    /// An orphaned copy under a topology that only allows copies. The source
    /// may have changed since the copy was taken, so only an administrator
    /// promotes it again.
    pub fn awaits_manual_reconcile(&self, entry: &CacheEntry) -> bool {
        entry.status == EntryStatus::Orphaned
            && entry.link_kind == LinkKind::Copy
            && self.topology().preferred_link_kind() == LinkKind::Copy
    }

    /// Count a failed call and append its audit row.
    pub(super) async fn fail(
        &self,
        path: &Path,
        operation: OperationKind,
        actor: &str,
        err: &TierError,
    ) {
        self.failures.record(err);
        tracing::warn!(path = %path.display(), %operation, code = err.code(), %err, "tiering operation failed");
        if let Err(log_err) = self
            .registry
            .record_failure(path, operation, actor, &err.to_string())
            .await
        {
            tracing::error!(path = %path.display(), %log_err, "failed to record operation failure");
        }
    }

    // ==================== promote ====================

    /// Move a file's bytes into the cache keeping its path resolvable.
    ///
    /// Promoting an already cached path only records a new attribution, if
    /// any; an orphaned entry is promoted again.
    pub async fn promote(&self, req: PromoteRequest) -> Result<PromoteOutcome, TierError> {
        let result = {
            let _guard = self.locks.lock(&req.canonical_path).await;
            self.promote_locked(&req).await
        };
        if let Err(err) = &result {
            self.fail(&req.canonical_path, OperationKind::Promote, &req.actor, err)
                .await;
        }
        result
    }

    pub(super) async fn promote_locked(
        &self,
        req: &PromoteRequest,
    ) -> Result<PromoteOutcome, TierError> {
        let path = &req.canonical_path;

        if let Some(entry) = self.registry.get(path) {
            let held = !req.manual && self.awaits_manual_reconcile(&entry);
            if held {
                tracing::debug!(
                    path = %path.display(),
                    actor = %req.actor,
                    "orphaned copy entry awaits a manual promote"
                );
            }
            if entry.status != EntryStatus::Orphaned || held {
                let attributed = match &req.user_id {
                    Some(user) => {
                        self.registry
                            .attribute(path, user, req.reason, &req.actor)
                            .await?
                    }
                    None => false,
                };
                self.registry.touch(path).await?;
                return Ok(PromoteOutcome::AlreadyCached { entry, attributed });
            }
        }

        let cached = self
            .layout
            .cached_path_for(path)
            .ok_or_else(|| StrategyError::OutsideSourceRoot(path.clone()))?;
        let playing = self.sessions.is_actively_playing(path);
        let strategist = self.strategist.read().clone();
        let kind = strategist.resolve_strategy(path, self.layout.cache_root(), playing)?;
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|source| StrategyError::Stat {
                path: path.clone(),
                source,
            })?
            .len();

        let _reservation = self.ensure_capacity(size, &req.actor).await?;

        let _cache_permit = acquire(&self.limits.cache).await;
        let _network_permit = if strategist.topology().source_is_network {
            Some(acquire(&self.limits.network).await)
        } else {
            None
        };

        tracing::info!(path = %path.display(), %kind, reason = %req.reason, size, "promoting");

        // 1-2: copy through a partial name, then rename into place
        let copied = {
            let (src, dest) = (path.clone(), cached.clone());
            run_blocking(move || fsops::copy_into_place(&src, &dest))
                .await
                .map_err(|e| TierError::transfer(path, e))?
        };

        match kind {
            LinkKind::Copy => self.verify_copy(path, &cached).await?,
            // 3-6: backup, link swap, verify, drop backup
            LinkKind::Hardlink | LinkKind::Symlink => {
                self.swap_to_link(path, &cached, kind, true).await?
            }
        }

        // 7
        let entry = self
            .registry
            .commit_promotion(
                NewEntry {
                    canonical_path: path.clone(),
                    cached_path: cached,
                    link_kind: kind,
                    triggered_by_reason: req.reason,
                    size_bytes: copied,
                    created_at: OffsetDateTime::now_utc(),
                },
                req.user_id.as_deref(),
                &req.actor,
            )
            .await?;

        tracing::info!(path = %path.display(), %kind, "promoted");
        Ok(PromoteOutcome::Promoted { entry })
    }

    async fn verify_copy(&self, canonical: &Path, cached: &Path) -> Result<(), TierError> {
        let (a, b) = (canonical.to_path_buf(), cached.to_path_buf());
        let matches = run_blocking(move || signatures_match(&a, &b))
            .await
            .map_err(|e| TierError::transfer(canonical, e))?;
        if matches {
            return Ok(());
        }
        let stray = cached.to_path_buf();
        let _ = run_blocking(move || fsops::remove_if_exists(&stray)).await;
        Err(TierError::transfer(
            canonical,
            io::Error::other("cached copy does not match the source"),
        ))
    }

    /// Replace `canonical` by a link to `cached`, which must already hold
    /// identical bytes. On any failure `canonical` still resolves to the
    /// original content. `discard_on_failure` drops the cached copy when the
    /// canonical file was never touched.
    pub(super) async fn swap_to_link(
        &self,
        canonical: &Path,
        cached: &Path,
        kind: LinkKind,
        discard_on_failure: bool,
    ) -> Result<(), TierError> {
        let backup = {
            let c = canonical.to_path_buf();
            match run_blocking(move || fsops::preserve_backup(&c)).await {
                Ok(backup) => backup,
                Err(e) => {
                    if discard_on_failure {
                        self.discard_cached(cached).await;
                    }
                    return Err(TierError::link(canonical, e));
                }
            }
        };

        let swapped = {
            let (c, k) = (canonical.to_path_buf(), cached.to_path_buf());
            run_blocking(move || fsops::swap_in_link(&c, &k, kind)).await
        };
        if let Err(e) = swapped {
            let b = backup.clone();
            if let Err(cleanup) = run_blocking(move || fsops::remove_if_exists(&b)).await {
                tracing::warn!(backup = %backup.display(), %cleanup, "failed to remove backup");
            }
            if discard_on_failure {
                self.discard_cached(cached).await;
            }
            return Err(TierError::link(canonical, e));
        }

        let verified = {
            let (c, b) = (canonical.to_path_buf(), backup.clone());
            run_blocking(move || signatures_match(&c, &b)).await
        };
        match verified {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                let (b, c) = (backup.clone(), canonical.to_path_buf());
                if let Err(rollback) = run_blocking(move || fs::rename(&b, &c)).await {
                    // Left for crash recovery: the backup is still on disk
                    tracing::error!(
                        path = %canonical.display(),
                        %rollback,
                        "failed to restore original after verification failure"
                    );
                }
                let source = match verified {
                    Err(e) => e,
                    Ok(_) => io::Error::other("linked content does not match the original"),
                };
                return Err(TierError::transfer(canonical, source));
            }
        }

        let b = backup.clone();
        if let Err(e) = run_blocking(move || fsops::remove_if_exists(&b)).await {
            tracing::warn!(backup = %backup.display(), %e, "failed to remove backup after promote");
        }
        Ok(())
    }

    async fn discard_cached(&self, cached: &Path) {
        let c = cached.to_path_buf();
        if let Err(e) = run_blocking(move || fsops::remove_if_exists(&c)).await {
            tracing::warn!(cached = %cached.display(), %e, "failed to discard cached copy");
        }
    }

    // ==================== capacity ====================

    /// Bytes committed in the registry plus bytes reserved by promotes in
    /// flight.
    fn committed_and_reserved(&self) -> u64 {
        self.registry
            .active_bytes()
            .saturating_add(*self.reserved.lock())
    }

    fn reserve(&self, bytes: u64) -> Reservation {
        *self.reserved.lock() += bytes;
        Reservation {
            bytes,
            pool: self.reserved.clone(),
        }
    }

    /// Make room for `incoming` bytes, evicting if the limit would be crossed,
    /// and hold them until the returned reservation drops.
    async fn ensure_capacity(&self, incoming: u64, actor: &str) -> Result<Reservation, TierError> {
        let _gate = self.capacity_gate.lock().await;
        let limit = self.settings.cache_limit_bytes;
        let used = self.committed_and_reserved();
        if used.saturating_add(incoming) <= limit {
            return Ok(self.reserve(incoming));
        }

        let needed = used.saturating_add(incoming) - limit + self.settings.eviction_headroom_bytes;
        let report = self.free_space(needed, actor).await?;
        let available = limit.saturating_sub(self.committed_and_reserved());
        if available < incoming {
            tracing::warn!(
                incoming,
                available,
                freed = report.freed_bytes,
                "cache capacity exceeded, promotion refused"
            );
            return Err(TierError::CapacityExceeded {
                needed: incoming,
                available,
            });
        }
        Ok(self.reserve(incoming))
    }

    /// Evict until usage is back under the configured limit.
    pub async fn enforce_capacity(&self, actor: &str) -> Result<EvictionReport, TierError> {
        let limit = self.settings.cache_limit_bytes;
        let used = self.registry.active_bytes();
        if used <= limit {
            return Ok(EvictionReport::default());
        }
        tracing::info!(used, limit, "cache over limit, evicting");
        self.free_space(used - limit, actor).await
    }

    /// Evict the lowest-priority entries until `target` bytes are freed.
    /// Entries locked by another transition are skipped.
    async fn free_space(&self, target: u64, actor: &str) -> Result<EvictionReport, TierError> {
        let selection = self.eviction.select_victims(target).await?;
        let mut report = EvictionReport {
            target_bytes: target,
            ..Default::default()
        };

        for victim in selection.victims {
            if report.freed_bytes >= target {
                break;
            }
            let path = victim.canonical_path;
            let Some(_guard) = self.locks.try_lock(&path) else {
                tracing::debug!(path = %path.display(), "eviction victim busy, skipping");
                continue;
            };
            match self.demote_locked(&path, OperationKind::Evict, actor, true).await {
                Ok(DemoteOutcome::Demoted { entry } | DemoteOutcome::Superseded { entry }) => {
                    report.freed_bytes += entry.size_bytes;
                    report.evicted += 1;
                }
                Ok(DemoteOutcome::NotCached) => {}
                Err(err) => self.fail(&path, OperationKind::Evict, actor, &err).await,
            }
        }

        Ok(report)
    }

    // ==================== demote ====================

    /// Move a cached file back to bulk storage. Refused with
    /// [`TierError::Busy`] while any watch session references the path.
    pub async fn demote(&self, path: &Path, actor: &str) -> Result<DemoteOutcome, TierError> {
        self.demote_as(path, OperationKind::Demote, actor).await
    }

    /// A demote recorded as an eviction.
    pub async fn evict(&self, path: &Path, actor: &str) -> Result<DemoteOutcome, TierError> {
        self.demote_as(path, OperationKind::Evict, actor).await
    }

    async fn demote_as(
        &self,
        path: &Path,
        operation: OperationKind,
        actor: &str,
    ) -> Result<DemoteOutcome, TierError> {
        let result = {
            let _guard = self.locks.lock(path).await;
            self.demote_locked(path, operation, actor, false).await
        };
        if let Err(err) = &result {
            self.fail(path, operation, actor, err).await;
        }
        result
    }

    pub(super) async fn demote_locked(
        &self,
        path: &Path,
        operation: OperationKind,
        actor: &str,
        force: bool,
    ) -> Result<DemoteOutcome, TierError> {
        let Some(entry) = self.registry.get(path) else {
            return Ok(DemoteOutcome::NotCached);
        };

        if !force {
            let sessions = self.sessions.references(path);
            if sessions > 0 {
                return Err(TierError::Busy {
                    path: path.to_path_buf(),
                    sessions,
                });
            }
        }

        let _array_permit = acquire(&self.limits.array).await;
        tracing::info!(path = %path.display(), %operation, kind = %entry.link_kind, "demoting");

        match entry.link_kind {
            LinkKind::Copy => {
                let (c, k) = (entry.canonical_path.clone(), entry.cached_path.clone());
                run_blocking(move || {
                    let meta = fs::symlink_metadata(&c)?;
                    if !meta.is_file() {
                        return Err(io::Error::other("canonical path is not a regular file"));
                    }
                    fsops::remove_if_exists(&k)
                })
                .await
                .map_err(|e| TierError::link(path, e))?;
            }
            LinkKind::Hardlink | LinkKind::Symlink => {
                let (c, k) = (entry.canonical_path.clone(), entry.cached_path.clone());
                let restored = run_blocking(move || restore_canonical(&c, &k))
                    .await
                    .map_err(|e| TierError::transfer(path, e))?;
                if restored == Restored::Superseded {
                    tracing::warn!(
                        path = %path.display(),
                        cached = %entry.cached_path.display(),
                        "canonical file was replaced after promotion, keeping it and dropping the cache copy"
                    );
                    let removed = self.registry.commit_removal(path, operation, actor).await?;
                    return Ok(DemoteOutcome::Superseded { entry: removed });
                }
            }
        }

        let removed = self.registry.commit_removal(path, operation, actor).await?;
        tracing::info!(path = %path.display(), %operation, "demoted");
        Ok(DemoteOutcome::Demoted { entry: removed })
    }
}

async fn acquire(semaphore: &Semaphore) -> Option<SemaphorePermit<'_>> {
    // Only fails once closed, which never happens: the semaphores live as
    // long as the operator
    semaphore.acquire().await.ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Restored {
    /// The cache bytes are back at the canonical path
    Restored,
    /// The canonical path held another file; only the cache copy was removed
    Superseded,
}

/// Put real bytes back at `canonical` and drop the cached copy. A canonical
/// path that no longer links to `cached` is authoritative and left untouched.
fn restore_canonical(canonical: &Path, cached: &Path) -> io::Result<Restored> {
    if !fsops::exists_no_follow(cached) {
        // A hard-linked canonical keeps the bytes after the cache copy is gone
        let meta = fs::symlink_metadata(canonical)?;
        if meta.is_file() {
            return Ok(Restored::Restored);
        }
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "cached copy is missing and canonical path holds no data",
        ));
    }

    match fsops::is_link_to(canonical, cached) {
        Ok(Some(_)) => {}
        // Nothing left at the canonical path: the cache holds the only bytes
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Ok(None) => {
            fsops::remove_if_exists(cached)?;
            return Ok(Restored::Superseded);
        }
        Err(e) => return Err(e),
    }

    let staged = fsops::restore_path(canonical);
    fsops::remove_if_exists(&staged)?;
    let staged_result = (|| -> io::Result<()> {
        fs::copy(cached, &staged)?;
        fs::File::open(&staged)?.sync_all()?;
        if !signatures_match(&staged, cached)? {
            return Err(io::Error::other("restored copy does not match the cache"));
        }
        fs::rename(&staged, canonical)
    })();
    if let Err(e) = staged_result {
        let _ = fsops::remove_if_exists(&staged);
        return Err(e);
    }

    let meta = fs::symlink_metadata(canonical)?;
    if !meta.is_file() || !signatures_match(canonical, cached)? {
        return Err(io::Error::other("canonical path did not verify after restore"));
    }
    fsops::remove_if_exists(cached)?;
    Ok(Restored::Restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::database::Database;
    use crate::process::ShutdownHandle;
    use crate::service_state::State;

    struct Fixture {
        _temp: tempfile::TempDir,
        _shutdown: ShutdownHandle,
        source: PathBuf,
        cache: PathBuf,
        state: State,
    }

    async fn fixture(topology: Topology) -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("media");
        let cache = temp.path().join("cache");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&cache).unwrap();

        let shutdown = ShutdownHandle::new();
        let database = Database::in_memory().await.unwrap();
        let (state, _pool) = State::build(
            Config::with_roots(&source, &cache),
            topology,
            database,
            shutdown.subscribe(),
        )
        .await
        .unwrap();

        Fixture {
            _temp: temp,
            _shutdown: shutdown,
            source,
            cache,
            state,
        }
    }

    #[tokio::test]
    async fn test_verification_mismatch_puts_original_back() {
        let f = fixture(Topology::split(true)).await;
        let canonical = f.source.join("Film.mkv");
        let cached = f.cache.join("Film.mkv");
        fs::write(&canonical, b"original media bytes").unwrap();
        fs::write(&cached, b"torn copy").unwrap();

        let err = f
            .state
            .operator()
            .swap_to_link(&canonical, &cached, LinkKind::Symlink, false)
            .await
            .unwrap_err();

        assert!(matches!(err, TierError::Transfer { .. }));
        assert!(fs::symlink_metadata(&canonical).unwrap().is_file());
        assert_eq!(fs::read(&canonical).unwrap(), b"original media bytes");
        assert!(!fsops::backup_path(&canonical).exists());
        assert!(!fsops::staging_link_path(&canonical).exists());
        // The cache copy is left for the sweep
        assert!(cached.exists());
    }

    #[tokio::test]
    async fn test_verification_mismatch_with_hardlink_keeps_original_inode() {
        use std::os::unix::fs::MetadataExt;

        let f = fixture(Topology::unified()).await;
        let canonical = f.source.join("Episode.mkv");
        let cached = f.cache.join("Episode.mkv");
        fs::write(&canonical, b"original media bytes").unwrap();
        fs::write(&cached, b"different").unwrap();
        let original_ino = fs::metadata(&canonical).unwrap().ino();

        let err = f
            .state
            .operator()
            .swap_to_link(&canonical, &cached, LinkKind::Hardlink, false)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "transfer_error");
        assert_eq!(fs::metadata(&canonical).unwrap().ino(), original_ino);
        assert_eq!(fs::read(&canonical).unwrap(), b"original media bytes");
    }

    #[tokio::test]
    async fn test_reservation_is_released_on_drop() {
        let f = fixture(Topology::unified()).await;
        let operator = f.state.operator();

        let reservation = operator.reserve(40);
        assert_eq!(operator.committed_and_reserved(), 40);
        drop(reservation);
        assert_eq!(operator.committed_and_reserved(), 0);
    }
}
