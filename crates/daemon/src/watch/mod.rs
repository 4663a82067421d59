//! Real-time watch monitor
//!
//! Polls the session provider, feeds the [`WatchMonitor`] state machine and
//! turns its actions into registry attributions and pool jobs. The service
//! never touches the filesystem itself.

mod monitor;
mod session;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::Instant;

use common::path_map::PathMapper;
use common::provider::{ProviderError, SessionProvider};
use common::types::{CacheReason, EntryStatus};

use crate::pool::{Job, JobDispatcher, JobHandle, PoolError};
use crate::registry::{CacheRegistry, RegistryError};
use crate::tiering::PromoteRequest;

pub use monitor::{MonitorConfig, WatchAction, WatchMonitor};
pub use session::{SessionTable, WatchSession, WatchState};

const WATCH_ACTOR: &str = "watch";
/// Longest wait between polls while the provider keeps failing
const MAX_BACKOFF_SHIFT: u32 = 5;

#[derive(Debug, thiserror::Error)]
enum ApplyError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[derive(Debug)]
pub struct WatchService {
    monitor: WatchMonitor,
    provider: Arc<dyn SessionProvider>,
    mapper: PathMapper,
    registry: Arc<CacheRegistry>,
    jobs: JobDispatcher,
    poll_interval: Duration,
    backoff: Duration,
}

impl WatchService {
    pub fn new(
        monitor: WatchMonitor,
        provider: Arc<dyn SessionProvider>,
        mapper: PathMapper,
        registry: Arc<CacheRegistry>,
        jobs: JobDispatcher,
        poll_interval: Duration,
        backoff: Duration,
    ) -> Self {
        Self {
            monitor,
            provider,
            mapper,
            registry,
            jobs,
            poll_interval,
            backoff,
        }
    }

    pub fn monitor(&self) -> &WatchMonitor {
        &self.monitor
    }

    /// Poll the provider once and apply the resulting transitions. Returns
    /// the jobs submitted.
    pub async fn poll_once(&mut self, now: OffsetDateTime) -> Result<Vec<JobHandle>, ProviderError> {
        let reported = match self.provider.sessions().await {
            Ok(reported) => reported,
            Err(err) => {
                self.monitor.poll_failed();
                return Err(err);
            }
        };
        let reported: Vec<_> = reported
            .into_iter()
            .map(|mut session| {
                session.canonical_path = self.mapper.to_host(&session.canonical_path);
                session
            })
            .collect();

        let actions = self.monitor.observe(&reported, now);
        Ok(self.apply_all(actions).await)
    }

    /// Fire every grace timer that ran out by `now`.
    pub async fn expire_due(&mut self, now: OffsetDateTime) -> Vec<JobHandle> {
        let actions = self.monitor.due(now);
        self.apply_all(actions).await
    }

    async fn apply_all(&self, actions: Vec<WatchAction>) -> Vec<JobHandle> {
        let mut jobs = Vec::new();
        for action in actions {
            match self.apply(&action).await {
                Ok(Some(handle)) => jobs.push(handle),
                Ok(None) => {}
                Err(err) => tracing::warn!(?action, %err, "failed to apply watch transition"),
            }
        }
        jobs
    }

    async fn apply(&self, action: &WatchAction) -> Result<Option<JobHandle>, ApplyError> {
        match action {
            WatchAction::StartWatching {
                user_id,
                canonical_path,
            } => self.start_watching(user_id, canonical_path).await,
            WatchAction::Expire {
                user_id,
                canonical_path,
                drop_all,
            } => self.expire(user_id, canonical_path, *drop_all).await,
        }
    }

    async fn start_watching(
        &self,
        user: &str,
        path: &Path,
    ) -> Result<Option<JobHandle>, ApplyError> {
        match self.registry.get(path) {
            Some(entry) if entry.status != EntryStatus::Orphaned => {
                self.registry
                    .attribute(path, user, CacheReason::ActiveWatching, WATCH_ACTOR)
                    .await?;
                self.registry.touch(path).await?;
                Ok(None)
            }
            _ => {
                let req = PromoteRequest::new(path, CacheReason::ActiveWatching, WATCH_ACTOR)
                    .for_user(user);
                Ok(Some(self.jobs.submit(Job::Promote(req)).await?))
            }
        }
    }

    async fn expire(
        &self,
        user: &str,
        path: &Path,
        drop_all: bool,
    ) -> Result<Option<JobHandle>, ApplyError> {
        self.registry
            .deattribute(path, user, Some(CacheReason::ActiveWatching), WATCH_ACTOR)
            .await?;
        if drop_all {
            self.registry
                .deattribute(path, user, None, WATCH_ACTOR)
                .await?;
        }

        if self.registry.get(path).is_none() || self.monitor.sessions().references(path) > 0 {
            return Ok(None);
        }
        if !self.registry.attributions(path).await?.is_empty() {
            tracing::debug!(path = %path.display(), "still attributed, keeping cached");
            return Ok(None);
        }
        let job = Job::Demote {
            path: path.to_path_buf(),
            actor: WATCH_ACTOR.to_string(),
        };
        Ok(Some(self.jobs.submit(job).await?))
    }

    fn failure_backoff(&self) -> Duration {
        let failures = self.monitor.consecutive_failures().max(1);
        let shift = (failures - 1).min(MAX_BACKOFF_SHIFT);
        self.backoff.saturating_mul(1 << shift)
    }

    /// Poll until `shutdown` fires, firing grace timers in between.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval = ?self.poll_interval, "watch monitor started");
        let mut next_poll = Instant::now();

        loop {
            let deadline = self.monitor.next_deadline().map(|at| {
                let wait = at - OffsetDateTime::now_utc();
                Instant::now() + Duration::try_from(wait).unwrap_or_default()
            });
            let timer = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep_until(next_poll) => {
                    match self.poll_once(OffsetDateTime::now_utc()).await {
                        Ok(_) => next_poll = Instant::now() + self.poll_interval,
                        Err(err) => {
                            let delay = self.failure_backoff();
                            tracing::warn!(
                                %err,
                                failures = self.monitor.consecutive_failures(),
                                retry_in = ?delay,
                                "session poll failed"
                            );
                            next_poll = Instant::now() + delay;
                        }
                    }
                }
                _ = timer => {
                    self.expire_due(OffsetDateTime::now_utc()).await;
                }
            }
        }
        tracing::info!("watch monitor stopped");
    }
}
