//! Crash recovery and the periodic integrity sweep
//!
//! Recovery runs once at startup, before any transition is accepted, and
//! resolves whatever a crash left between the steps of a promote or demote.
//! The sweep runs on a timer and reconciles the registry with the disk.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use common::types::{CacheEntry, CacheReason, EntryStatus, LinkKind, OperationKind};

use super::error::TierError;
use super::fsops::{self, Artifact};
use super::operator::{run_blocking, signatures_match, PromoteRequest, TieringOperator};
use crate::database::NewEntry;

const RECOVERY_ACTOR: &str = "recovery";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Promotes whose link was in place; the backup was dropped
    pub completed: usize,
    /// Promotes undone by putting the backup back
    pub rolled_back: usize,
    /// Canonical paths recreated from a backup
    pub restored: usize,
    /// Linked files registered after the crash lost their commit
    pub adopted: usize,
    /// Partial, staged and restore files deleted
    pub artifacts_removed: usize,
    /// Backups left on disk for an operator to look at
    pub unresolved: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub orphaned: usize,
    pub repromoted: usize,
    pub removed: usize,
    pub relinked: usize,
    pub adopted: usize,
    pub strays_deleted: usize,
    /// Entries skipped because another transition held their lock
    pub skipped_busy: usize,
    /// Orphaned copies left for a manual promote
    pub awaiting_manual: usize,
}

enum BackupResolution {
    /// Canonical was gone; the backup was renamed into place
    Restored,
    /// Canonical still is the original; the backup was a second name
    RolledBack,
    /// Canonical links to the cache and verifies
    Completed(LinkKind),
    /// Canonical links to the cache but the content differs
    Reverted,
    Unresolved,
}

fn resolve_backup(
    backup: &Path,
    canonical: &Path,
    cached: Option<&Path>,
) -> io::Result<BackupResolution> {
    if !fsops::exists_no_follow(canonical) {
        fs::rename(backup, canonical)?;
        return Ok(BackupResolution::Restored);
    }
    if fsops::same_file(canonical, backup)? {
        fs::remove_file(backup)?;
        return Ok(BackupResolution::RolledBack);
    }
    let Some(cached) = cached else {
        return Ok(BackupResolution::Unresolved);
    };
    match fsops::is_link_to(canonical, cached)? {
        Some(kind) => {
            let linked_matches = fs::metadata(canonical).is_ok()
                && signatures_match(canonical, backup)?;
            if linked_matches {
                fs::remove_file(backup)?;
                Ok(BackupResolution::Completed(kind))
            } else {
                fs::rename(backup, canonical)?;
                Ok(BackupResolution::Reverted)
            }
        }
        None => Ok(BackupResolution::Unresolved),
    }
}

/// What the disk says about an entry
struct EntryState {
    canonical_present: bool,
    canonical_resolves: bool,
    cached_present: bool,
}

impl TieringOperator {
    /// Resolve interrupted transitions left on disk by a crash.
    pub async fn recover(&self) -> Result<RecoveryReport, TierError> {
        let mut report = RecoveryReport::default();

        let source_root = self.layout.source_root().to_path_buf();
        let cache_root = self.layout.cache_root().to_path_buf();
        let mut files = {
            let root = source_root.clone();
            run_blocking(move || fsops::walk_files(&root))
                .await
                .map_err(|e| TierError::transfer(&source_root, e))?
        };
        files.extend({
            let root = cache_root.clone();
            run_blocking(move || fsops::walk_files(&root))
                .await
                .map_err(|e| TierError::transfer(&cache_root, e))?
        });

        for file in files {
            match fsops::classify_artifact(&file) {
                Some(Artifact::Backup { canonical }) => {
                    self.recover_backup(&file, &canonical, &mut report).await?;
                }
                Some(Artifact::Partial { .. })
                | Some(Artifact::StagedLink { .. })
                | Some(Artifact::Restore { .. }) => {
                    let f = file.clone();
                    match run_blocking(move || fsops::remove_if_exists(&f)).await {
                        Ok(()) => {
                            tracing::debug!(path = %file.display(), "removed interrupted artifact");
                            report.artifacts_removed += 1;
                        }
                        Err(e) => {
                            tracing::warn!(path = %file.display(), %e, "failed to remove artifact")
                        }
                    }
                }
                None => {}
            }
        }

        if report != RecoveryReport::default() {
            tracing::info!(?report, "crash recovery finished");
        }
        Ok(report)
    }

    async fn recover_backup(
        &self,
        backup: &Path,
        canonical: &Path,
        report: &mut RecoveryReport,
    ) -> Result<(), TierError> {
        let cached = self.layout.cached_path_for(canonical);
        let resolution = {
            let (b, c, k) = (backup.to_path_buf(), canonical.to_path_buf(), cached.clone());
            run_blocking(move || resolve_backup(&b, &c, k.as_deref()))
                .await
                .map_err(|e| TierError::link(canonical, e))?
        };

        match resolution {
            BackupResolution::Restored => {
                tracing::warn!(path = %canonical.display(), "canonical path recreated from backup");
                report.restored += 1;
            }
            BackupResolution::RolledBack | BackupResolution::Reverted => {
                tracing::info!(path = %canonical.display(), "interrupted promote rolled back");
                report.rolled_back += 1;
            }
            BackupResolution::Completed(kind) => {
                report.completed += 1;
                if let Some(cached) = cached {
                    if self.registry.get(canonical).is_none() {
                        self.adopt(canonical, &cached, kind, RECOVERY_ACTOR).await?;
                        report.adopted += 1;
                    }
                }
            }
            BackupResolution::Unresolved => {
                tracing::warn!(
                    backup = %backup.display(),
                    "backup does not match any interrupted promote, leaving it in place"
                );
                report.unresolved += 1;
            }
        }
        Ok(())
    }

    /// Register a cached file that the canonical path already links to.
    async fn adopt(
        &self,
        canonical: &Path,
        cached: &Path,
        kind: LinkKind,
        actor: &str,
    ) -> Result<CacheEntry, TierError> {
        let size = tokio::fs::metadata(cached)
            .await
            .map_err(|e| TierError::transfer(cached, e))?
            .len();
        let entry = self
            .registry
            .commit_promotion(
                NewEntry {
                    canonical_path: canonical.to_path_buf(),
                    cached_path: cached.to_path_buf(),
                    link_kind: kind,
                    triggered_by_reason: CacheReason::Manual,
                    size_bytes: size,
                    created_at: OffsetDateTime::now_utc(),
                },
                None,
                actor,
            )
            .await?;
        tracing::info!(path = %canonical.display(), %kind, "adopted linked cache file");
        Ok(entry)
    }

    /// Reconcile every live entry with the disk, then clear stray cache files.
    pub async fn sweep(&self, actor: &str) -> Result<SweepReport, TierError> {
        let mut report = SweepReport::default();
        let preferred = self.topology().preferred_link_kind();

        for snapshot in self.registry.snapshot() {
            let path = snapshot.canonical_path;
            let Some(_guard) = self.locks.try_lock(&path) else {
                report.skipped_busy += 1;
                continue;
            };
            // Re-read under the lock
            let Some(entry) = self.registry.get(&path) else {
                continue;
            };
            if let Err(err) = self.sweep_entry(&entry, preferred, actor, &mut report).await {
                self.fail(&path, OperationKind::Sweep, actor, &err).await;
            }
        }

        self.sweep_strays(actor, &mut report).await?;

        if report != SweepReport::default() {
            tracing::info!(?report, "integrity sweep finished");
        }
        Ok(report)
    }

    async fn sweep_entry(
        &self,
        entry: &CacheEntry,
        preferred: LinkKind,
        actor: &str,
        report: &mut SweepReport,
    ) -> Result<(), TierError> {
        let path = entry.canonical_path.as_path();
        let state = {
            let (c, k) = (entry.canonical_path.clone(), entry.cached_path.clone());
            run_blocking(move || {
                Ok(EntryState {
                    canonical_present: fsops::exists_no_follow(&c),
                    canonical_resolves: fs::metadata(&c).map(|m| m.is_file()).unwrap_or(false),
                    cached_present: fsops::exists_no_follow(&k),
                })
            })
            .await
            .map_err(|e| TierError::transfer(path, e))?
        };

        if !state.canonical_present {
            tracing::info!(path = %path.display(), "canonical path deleted, dropping cache entry");
            if entry.status == EntryStatus::Active {
                self.registry
                    .set_status(
                        path,
                        EntryStatus::PendingRemoval,
                        actor,
                        Some("canonical path deleted".to_string()),
                    )
                    .await?;
            }
            let cached = entry.cached_path.clone();
            run_blocking(move || fsops::remove_if_exists(&cached))
                .await
                .map_err(|e| TierError::transfer(path, e))?;
            self.registry
                .commit_removal(path, OperationKind::Sweep, actor)
                .await?;
            report.removed += 1;
            return Ok(());
        }

        if entry.status == EntryStatus::PendingRemoval {
            self.demote_locked(path, OperationKind::Sweep, actor, true)
                .await?;
            report.removed += 1;
            return Ok(());
        }

        let mut status = entry.status;
        if status == EntryStatus::Active && !state.cached_present {
            tracing::warn!(path = %path.display(), "cached copy missing, entry orphaned");
            self.registry
                .set_status(
                    path,
                    EntryStatus::Orphaned,
                    actor,
                    Some("cached copy missing".to_string()),
                )
                .await?;
            report.orphaned += 1;
            status = EntryStatus::Orphaned;
        }

        if status == EntryStatus::Orphaned {
            let mut orphan = entry.clone();
            orphan.status = status;
            if state.canonical_resolves && self.awaits_manual_reconcile(&orphan) {
                if entry.status == EntryStatus::Active {
                    tracing::warn!(
                        path = %path.display(),
                        "orphaned copy not re-promoted automatically, promote it manually to refresh the cache"
                    );
                } else {
                    tracing::debug!(path = %path.display(), "orphaned copy awaits a manual promote");
                }
                report.awaiting_manual += 1;
            } else if state.canonical_resolves {
                let req = PromoteRequest::new(path, entry.triggered_by_reason, actor);
                self.promote_locked(&req).await?;
                report.repromoted += 1;
            } else {
                tracing::warn!(path = %path.display(), "orphaned entry has no source data left");
                self.registry
                    .commit_removal(path, OperationKind::Sweep, actor)
                    .await?;
                report.removed += 1;
            }
            return Ok(());
        }

        // Copies made during playback are upgraded once nobody watches
        if entry.link_kind == LinkKind::Copy
            && preferred != LinkKind::Copy
            && self.sessions.references(path) == 0
        {
            let (c, k) = (entry.canonical_path.clone(), entry.cached_path.clone());
            let identical = run_blocking(move || signatures_match(&c, &k))
                .await
                .map_err(|e| TierError::transfer(path, e))?;
            if identical {
                self.swap_to_link(path, &entry.cached_path, preferred, false)
                    .await?;
                self.registry
                    .update_link_kind(path, preferred, actor)
                    .await?;
                tracing::info!(path = %path.display(), kind = %preferred, "copy entry relinked");
                report.relinked += 1;
            }
        }
        Ok(())
    }

    /// Cache files no entry owns: adopted when the canonical path links to
    /// them, deleted otherwise.
    async fn sweep_strays(&self, actor: &str, report: &mut SweepReport) -> Result<(), TierError> {
        let cache_root = self.layout.cache_root().to_path_buf();
        let files = {
            let root = cache_root.clone();
            run_blocking(move || fsops::walk_files(&root))
                .await
                .map_err(|e| TierError::transfer(&cache_root, e))?
        };
        let owned: HashSet<PathBuf> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|e| e.cached_path)
            .collect();

        for file in files {
            // In-flight copies belong to a promote holding the path lock
            if fsops::classify_artifact(&file).is_some() || owned.contains(&file) {
                continue;
            }
            let Some(canonical) = self.layout.canonical_path_for(&file) else {
                continue;
            };
            let Some(_guard) = self.locks.try_lock(&canonical) else {
                continue;
            };
            if self.registry.get(&canonical).is_some() {
                continue;
            }

            let link = {
                let (c, k) = (canonical.clone(), file.clone());
                run_blocking(move || match fsops::is_link_to(&c, &k) {
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                    other => other,
                })
                .await
                .map_err(|e| TierError::transfer(&canonical, e))?
            };

            match link {
                Some(kind) => {
                    self.adopt(&canonical, &file, kind, actor).await?;
                    report.adopted += 1;
                }
                None => {
                    let f = file.clone();
                    run_blocking(move || fsops::remove_if_exists(&f))
                        .await
                        .map_err(|e| TierError::transfer(&file, e))?;
                    tracing::info!(path = %file.display(), "deleted stray cache file");
                    report.strays_deleted += 1;
                }
            }
        }
        Ok(())
    }
}
