//! Reconciliation cycle
//!
//! Every `reconcile_interval` the scheduler compares the candidate set with
//! the registry: new candidates are promoted or attributed, stale provider
//! attributions are dropped, unattributed entries are demoted, then capacity
//! is enforced and the integrity sweep runs. All filesystem work goes
//! through the worker pool.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use common::path_map::PathMapper;
use common::provider::{Candidate, CandidateProvider, ProviderError};
use common::types::{CacheReason, EntryStatus};

use crate::eviction::NextUp;
use crate::pool::{Job, JobDispatcher, JobHandle, JobOutput, PoolError};
use crate::registry::{CacheRegistry, RegistryError};
use crate::tiering::{PromoteOutcome, PromoteRequest};
use crate::watch::SessionTable;

const SCHEDULER_ACTOR: &str = "scheduler";

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub retry_attempts: u32,
    pub backoff: Duration,
    pub log_retention: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub candidates: usize,
    pub promoted: usize,
    pub promote_failures: usize,
    pub attributed: usize,
    pub deattributed: u64,
    pub demoted: usize,
    pub demote_failures: usize,
    pub evicted: usize,
    pub pruned_operations: u64,
}

/// Desired attributions for one path
#[derive(Debug, Default)]
struct Wanted {
    best: Option<CacheReason>,
    attributions: Vec<(String, CacheReason)>,
}

#[derive(Debug)]
pub struct Reconciler {
    provider: Arc<dyn CandidateProvider>,
    mapper: PathMapper,
    registry: Arc<CacheRegistry>,
    sessions: SessionTable,
    next_up: NextUp,
    jobs: JobDispatcher,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        provider: Arc<dyn CandidateProvider>,
        mapper: PathMapper,
        registry: Arc<CacheRegistry>,
        sessions: SessionTable,
        next_up: NextUp,
        jobs: JobDispatcher,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            provider,
            mapper,
            registry,
            sessions,
            next_up,
            jobs,
            settings,
        }
    }

    async fn fetch_candidates(&self) -> Result<Vec<Candidate>, ProviderError> {
        let attempts = self.settings.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.provider.candidates().await {
                Ok(stream) => return Ok(stream.collect().await),
                Err(err) if attempt < attempts => {
                    let delay = self.settings.backoff.saturating_mul(attempt);
                    tracing::warn!(%err, attempt, retry_in = ?delay, "candidate provider failed");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Run one reconciliation cycle. A provider failure aborts the cycle
    /// before any attribution is touched.
    pub async fn run_cycle(&self) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::default();

        let candidates: Vec<Candidate> = self
            .fetch_candidates()
            .await?
            .into_iter()
            .map(|mut c| {
                c.canonical_path = self.mapper.to_host(&c.canonical_path);
                c
            })
            .collect();
        report.candidates = candidates.len();

        *self.next_up.write() = candidates
            .iter()
            .filter(|c| c.next_in_series)
            .map(|c| c.canonical_path.clone())
            .collect();

        let mut wanted: BTreeMap<PathBuf, Wanted> = BTreeMap::new();
        let mut desired: HashSet<(String, PathBuf, CacheReason)> = HashSet::new();
        for candidate in candidates {
            let key = (
                candidate.user_id.clone(),
                candidate.canonical_path.clone(),
                candidate.reason,
            );
            if !desired.insert(key) {
                continue;
            }
            let slot = wanted.entry(candidate.canonical_path).or_default();
            match slot.best {
                Some(best) if best.base_score() >= candidate.reason.base_score() => {}
                _ => slot.best = Some(candidate.reason),
            }
            slot.attributions.push((candidate.user_id, candidate.reason));
        }

        self.apply_wanted(wanted, &mut report).await?;
        self.drop_stale(&desired, &mut report).await?;
        self.demote_unattributed(&mut report).await?;

        let capacity = self
            .jobs
            .submit(Job::EnforceCapacity {
                actor: SCHEDULER_ACTOR.to_string(),
            })
            .await?;
        match capacity.wait().await {
            Ok(JobOutput::Evicted(eviction)) => report.evicted = eviction.evicted,
            Ok(_) => {}
            Err(err) => tracing::warn!(%err, "capacity enforcement failed"),
        }

        let sweep = self
            .jobs
            .submit(Job::Sweep {
                actor: SCHEDULER_ACTOR.to_string(),
            })
            .await?;
        if let Err(err) = sweep.wait().await {
            tracing::warn!(%err, "integrity sweep failed");
        }

        report.pruned_operations = self
            .registry
            .prune_history(self.settings.log_retention)
            .await?;

        tracing::info!(?report, "reconciliation cycle finished");
        Ok(report)
    }

    /// Promote or attribute each wanted path, highest reason first.
    async fn apply_wanted(
        &self,
        wanted: BTreeMap<PathBuf, Wanted>,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let mut ordered: Vec<(PathBuf, Wanted)> = wanted.into_iter().collect();
        ordered.sort_by_key(|(_, w)| {
            std::cmp::Reverse(w.best.map(|r| r.base_score()).unwrap_or(0))
        });

        let mut pending: Vec<(JobHandle, Vec<(String, CacheReason)>)> = Vec::new();
        for (path, want) in ordered {
            let tracked = self
                .registry
                .get(&path)
                .is_some_and(|e| e.status != EntryStatus::Orphaned);
            if tracked {
                for (user, reason) in &want.attributions {
                    if self
                        .registry
                        .attribute(&path, user, *reason, SCHEDULER_ACTOR)
                        .await?
                    {
                        report.attributed += 1;
                    }
                }
                continue;
            }

            let Some(best) = want.best else { continue };
            let mut rest = want.attributions;
            let Some(index) = rest.iter().position(|(_, r)| *r == best) else {
                continue;
            };
            let (user, reason) = rest.remove(index);
            let req = PromoteRequest::new(&path, reason, SCHEDULER_ACTOR).for_user(user);
            pending.push((self.jobs.submit(Job::Promote(req)).await?, rest));
        }

        for (handle, rest) in pending {
            let path = match handle.job() {
                Job::Promote(req) => req.canonical_path.clone(),
                _ => continue,
            };
            match handle.wait().await {
                Ok(JobOutput::Promoted(outcome)) => {
                    if matches!(outcome, PromoteOutcome::Promoted { .. }) {
                        report.promoted += 1;
                    }
                    for (user, reason) in rest {
                        if self
                            .registry
                            .attribute(&path, &user, reason, SCHEDULER_ACTOR)
                            .await?
                        {
                            report.attributed += 1;
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(path = %path.display(), %err, "scheduled promote failed");
                    report.promote_failures += 1;
                }
            }
        }
        Ok(())
    }

    /// Remove provider-managed attributions no longer in the candidate set.
    async fn drop_stale(
        &self,
        desired: &HashSet<(String, PathBuf, CacheReason)>,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        for (path, attributions) in self.registry.all_attributions().await? {
            for attribution in attributions {
                let reason = attribution.attribution_reason;
                if !reason.is_provider_managed() {
                    continue;
                }
                let key = (attribution.user_id.clone(), path.clone(), reason);
                if desired.contains(&key) {
                    continue;
                }
                report.deattributed += self
                    .registry
                    .deattribute(&path, &attribution.user_id, Some(reason), SCHEDULER_ACTOR)
                    .await?;
            }
        }
        Ok(())
    }

    /// Demote active entries nobody justifies any more.
    async fn demote_unattributed(&self, report: &mut ReconcileReport) -> Result<(), ReconcileError> {
        let attributions = self.registry.all_attributions().await?;
        let mut handles = Vec::new();
        for entry in self.registry.snapshot() {
            if entry.status != EntryStatus::Active
                || attributions.contains_key(&entry.canonical_path)
                || self.sessions.references(&entry.canonical_path) > 0
            {
                continue;
            }
            let job = Job::Demote {
                path: entry.canonical_path,
                actor: SCHEDULER_ACTOR.to_string(),
            };
            handles.push(self.jobs.submit(job).await?);
        }

        for handle in handles {
            match handle.wait().await {
                Ok(_) => report.demoted += 1,
                Err(err) => {
                    tracing::debug!(%err, "scheduled demote failed");
                    report.demote_failures += 1;
                }
            }
        }
        Ok(())
    }

    /// Cycle every `interval` until `shutdown` fires.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(?interval, "scheduler started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.run_cycle().await {
                        tracing::warn!(%err, "reconciliation cycle aborted");
                    }
                }
            }
        }
        tracing::info!("scheduler stopped");
    }
}
