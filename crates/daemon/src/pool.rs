//! Worker pool running tiering jobs
//!
//! The scheduler, the watch monitor and the HTTP API submit jobs through a
//! cloneable [`JobDispatcher`]; a fixed set of workers pulls them from a
//! bounded flume queue. Submitting awaits queue space.
//!
//! Every job gets a [`JobHandle`]. A job cancelled while queued is skipped by
//! the worker that dequeues it. Once started it runs to completion, and
//! cancelling submits the reverse job instead.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use common::types::CacheReason;

use crate::tiering::{
    DemoteOutcome, EvictionReport, PromoteOutcome, PromoteRequest, SweepReport, TierError,
    TieringOperator,
};

const QUEUED: u8 = 0;
const STARTED: u8 = 1;
const CANCELLED: u8 = 2;

/// Work the pool can carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Promote(PromoteRequest),
    Demote { path: PathBuf, actor: String },
    Evict { path: PathBuf, actor: String },
    /// Evict until usage is under the configured limit
    EnforceCapacity { actor: String },
    Sweep { actor: String },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::Promote(_) => "promote",
            Job::Demote { .. } => "demote",
            Job::Evict { .. } => "evict",
            Job::EnforceCapacity { .. } => "enforce_capacity",
            Job::Sweep { .. } => "sweep",
        }
    }

    /// The job undoing this one, if it can be undone.
    fn reverse(&self) -> Option<Job> {
        match self {
            Job::Promote(req) => Some(Job::Demote {
                path: req.canonical_path.clone(),
                actor: req.actor.clone(),
            }),
            Job::Demote { path, actor } | Job::Evict { path, actor } => {
                Some(Job::Promote(PromoteRequest::new(
                    path.clone(),
                    CacheReason::Manual,
                    actor,
                )))
            }
            Job::EnforceCapacity { .. } | Job::Sweep { .. } => None,
        }
    }
}

#[derive(Debug)]
pub enum JobOutput {
    Promoted(PromoteOutcome),
    Demoted(DemoteOutcome),
    Evicted(EvictionReport),
    Swept(SweepReport),
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Closed,
    #[error("job was cancelled before it started")]
    Cancelled,
    #[error("worker exited before replying")]
    WorkerLost,
    #[error(transparent)]
    Tier(#[from] TierError),
}

type Reply = Result<JobOutput, TierError>;

struct Envelope {
    id: u64,
    job: Job,
    state: Arc<AtomicU8>,
    reply: oneshot::Sender<Reply>,
}

/// Cloneable submission side of the pool
#[derive(Clone)]
pub struct JobDispatcher {
    tx: flume::Sender<Envelope>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("queued", &self.tx.len())
            .finish()
    }
}

impl JobDispatcher {
    /// Queue a job, waiting for space if the queue is full.
    pub async fn submit(&self, job: Job) -> Result<JobHandle, PoolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(AtomicU8::new(QUEUED));
        let (reply_tx, reply_rx) = oneshot::channel();
        tracing::debug!(id, kind = job.kind(), "submitting job");

        self.tx
            .send_async(Envelope {
                id,
                job: job.clone(),
                state: state.clone(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| PoolError::Closed)?;

        Ok(JobHandle {
            id,
            job,
            state,
            reply: reply_rx,
            dispatcher: self.clone(),
        })
    }

    /// Number of jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.tx.len()
    }
}

/// What cancelling a job did
#[derive(Debug)]
pub enum CancelOutcome {
    /// Removed before any worker touched it
    Dequeued,
    /// Already started; the reverse job was queued
    Reversed(JobHandle),
    /// Already started and has no reverse
    NotReversible,
}

#[derive(Debug)]
pub struct JobHandle {
    id: u64,
    job: Job,
    state: Arc<AtomicU8>,
    reply: oneshot::Receiver<Reply>,
    dispatcher: JobDispatcher,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn is_started(&self) -> bool {
        self.state.load(Ordering::Acquire) == STARTED
    }

    /// Wait for the job's result.
    pub async fn wait(self) -> Result<JobOutput, PoolError> {
        match self.reply.await {
            Ok(result) => result.map_err(PoolError::from),
            Err(_) if self.state.load(Ordering::Acquire) == CANCELLED => {
                Err(PoolError::Cancelled)
            }
            Err(_) => Err(PoolError::WorkerLost),
        }
    }

    pub async fn cancel(&self) -> Result<CancelOutcome, PoolError> {
        if self
            .state
            .compare_exchange(QUEUED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::debug!(id = self.id, kind = self.job.kind(), "job cancelled while queued");
            return Ok(CancelOutcome::Dequeued);
        }
        if self.state.load(Ordering::Acquire) == CANCELLED {
            return Ok(CancelOutcome::Dequeued);
        }
        match self.job.reverse() {
            Some(reverse) => {
                tracing::info!(id = self.id, kind = self.job.kind(), "job already started, queueing reverse");
                Ok(CancelOutcome::Reversed(self.dispatcher.submit(reverse).await?))
            }
            None => Ok(CancelOutcome::NotReversible),
        }
    }
}

/// Fixed set of workers draining the job queue
#[derive(Debug)]
pub struct WorkerPool {
    dispatcher: JobDispatcher,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks. They exit once `shutdown` fires or every
    /// dispatcher is dropped, finishing the job in hand first.
    pub fn start(
        operator: Arc<TieringOperator>,
        workers: usize,
        queue_depth: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (tx, rx) = flume::bounded(queue_depth.max(1));
        let workers = (0..workers.max(1))
            .map(|index| {
                tokio::spawn(run_worker(
                    index,
                    rx.clone(),
                    operator.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        Self {
            dispatcher: JobDispatcher {
                tx,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            workers,
        }
    }

    pub fn dispatcher(&self) -> JobDispatcher {
        self.dispatcher.clone()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        drop(self.dispatcher);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(%e, "worker task panicked");
            }
        }
    }
}

async fn run_worker(
    index: usize,
    rx: flume::Receiver<Envelope>,
    operator: Arc<TieringOperator>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(worker = index, "worker started");
    loop {
        let envelope = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            received = rx.recv_async() => match received {
                Ok(envelope) => envelope,
                Err(_) => break,
            },
        };

        if envelope
            .state
            .compare_exchange(QUEUED, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(id = envelope.id, "skipping cancelled job");
            continue;
        }

        let result = execute(&operator, envelope.job).await;
        if let Err(err) = &result {
            tracing::debug!(id = envelope.id, code = err.code(), "job failed");
        }
        // The submitter may have stopped waiting
        let _ = envelope.reply.send(result);
    }
    tracing::debug!(worker = index, "worker stopped");
}

async fn execute(operator: &TieringOperator, job: Job) -> Reply {
    match job {
        Job::Promote(req) => operator.promote(req).await.map(JobOutput::Promoted),
        Job::Demote { path, actor } => operator.demote(&path, &actor).await.map(JobOutput::Demoted),
        Job::Evict { path, actor } => operator.evict(&path, &actor).await.map(JobOutput::Demoted),
        Job::EnforceCapacity { actor } => operator
            .enforce_capacity(&actor)
            .await
            .map(JobOutput::Evicted),
        Job::Sweep { actor } => operator.sweep(&actor).await.map(JobOutput::Swept),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_of_promote_is_demote() {
        let job = Job::Promote(PromoteRequest::new("/media/a.mkv", CacheReason::OnDeck, "api"));
        assert_eq!(
            job.reverse(),
            Some(Job::Demote {
                path: PathBuf::from("/media/a.mkv"),
                actor: "api".to_string(),
            })
        );
    }

    #[test]
    fn test_capacity_jobs_have_no_reverse() {
        assert_eq!(
            Job::EnforceCapacity {
                actor: "scheduler".into()
            }
            .reverse(),
            None
        );
        assert_eq!(Job::Sweep { actor: "api".into() }.reverse(), None);
    }

    #[tokio::test]
    async fn test_cancel_before_start_dequeues() {
        let (tx, rx) = flume::bounded(4);
        let dispatcher = JobDispatcher {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        let handle = dispatcher
            .submit(Job::Sweep { actor: "test".into() })
            .await
            .unwrap();

        assert!(matches!(handle.cancel().await.unwrap(), CancelOutcome::Dequeued));
        // The worker side sees the cancelled flag and drops the job
        let envelope = rx.recv_async().await.unwrap();
        assert_eq!(envelope.state.load(Ordering::Acquire), CANCELLED);
        drop(envelope);
        assert!(matches!(handle.wait().await, Err(PoolError::Cancelled)));
    }

    #[tokio::test]
    async fn test_submit_after_workers_gone_is_closed() {
        let (tx, rx) = flume::bounded::<Envelope>(1);
        drop(rx);
        let dispatcher = JobDispatcher {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        let err = dispatcher
            .submit(Job::Sweep { actor: "test".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Closed));
    }
}
