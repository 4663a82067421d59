//! Service lifecycle
//!
//! Startup order: state (registry, operator, pool), crash recovery, then the
//! background loops and the HTTP API. Shutdown is broadcast through a
//! [`ShutdownHandle`]; the API stops accepting requests, the loops exit and
//! the workers finish the job in hand.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use common::path_map::PathMapper;
use common::provider::{CandidateProvider, SessionProvider};

use crate::config::Config;
use crate::http_server;
use crate::pool::WorkerPool;
use crate::providers::{
    JsonFileCandidateProvider, JsonFileSessionProvider, NoCandidates, NoSessions,
};
use crate::scheduler::{ReconcileSettings, Reconciler};
use crate::service_state::{State, StateSetupError};
use crate::tiering::TierError;
use crate::watch::{MonitorConfig, WatchMonitor, WatchService};

/// Broadcasts shutdown to every service task
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service setup failed: {0}")]
    Setup(#[from] StateSetupError),
    #[error("crash recovery failed: {0}")]
    Recovery(#[from] TierError),
    #[error("failed to bind API listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("API server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Build the state from `config` and run until `shutdown` fires.
pub async fn start_service(config: Config, shutdown: ShutdownHandle) -> Result<(), ServiceError> {
    let (state, pool) = State::from_config(config, shutdown.subscribe()).await?;
    run_service(state, pool, shutdown).await
}

/// Run an assembled service until `shutdown` fires.
pub async fn run_service(
    state: State,
    pool: WorkerPool,
    shutdown: ShutdownHandle,
) -> Result<(), ServiceError> {
    let config = state.config().clone();

    let recovery = state.operator().recover().await?;
    tracing::info!(?recovery, "startup recovery complete");

    let candidates: Arc<dyn CandidateProvider> = match &config.candidates_file {
        Some(path) => Arc::new(JsonFileCandidateProvider::new(path)),
        None => {
            tracing::warn!("no candidates_file configured, reconciliation sees an empty set");
            Arc::new(NoCandidates)
        }
    };
    let sessions: Arc<dyn SessionProvider> = match &config.sessions_file {
        Some(path) => Arc::new(JsonFileSessionProvider::new(path)),
        None => Arc::new(NoSessions),
    };
    let mapper = PathMapper::new(config.path_mappings.clone());

    let watch = WatchService::new(
        WatchMonitor::new(
            state.sessions().clone(),
            MonitorConfig {
                grace_period: config.grace_period(),
                inactivity_threshold: config.inactivity_threshold(),
                failure_threshold: config.session_failure_threshold,
            },
        ),
        sessions,
        mapper.clone(),
        state.registry().clone(),
        state.jobs().clone(),
        config.session_poll_interval(),
        config.provider_backoff(),
    );
    let reconciler = Reconciler::new(
        candidates,
        mapper,
        state.registry().clone(),
        state.sessions().clone(),
        state.next_up().clone(),
        state.jobs().clone(),
        ReconcileSettings {
            retry_attempts: config.provider_retry_attempts,
            backoff: config.provider_backoff(),
            log_retention: config.operation_log_retention(),
        },
    );

    let listener = TcpListener::bind(config.api_listen_addr)
        .await
        .map_err(ServiceError::Bind)?;
    tracing::info!(addr = %config.api_listen_addr, "API listening");

    let watch_task = tokio::spawn(watch.run(shutdown.subscribe()));
    let scheduler_task =
        tokio::spawn(reconciler.run(config.reconcile_interval(), shutdown.subscribe()));

    let mut stop = shutdown.subscribe();
    let served = axum::serve(listener, http_server::router(state.clone()))
        .with_graceful_shutdown(async move {
            let _ = stop.wait_for(|stopped| *stopped).await;
        })
        .await;

    // Make sure the loops stop even if the server exited on its own
    shutdown.shutdown();
    for (name, task) in [("watch", watch_task), ("scheduler", scheduler_task)] {
        if let Err(e) = task.await {
            tracing::error!(task = name, %e, "service task panicked");
        }
    }
    drop(state);
    pool.join().await;
    tracing::info!("service stopped");

    served.map_err(ServiceError::Serve)
}

/// Start the service in the background, stopping on ctrl-c.
pub fn spawn_service(config: Config) -> (ShutdownHandle, JoinHandle<Result<(), ServiceError>>) {
    let shutdown = ShutdownHandle::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("ctrl-c received, shutting down");
                signal.shutdown();
            }
            Err(e) => tracing::error!(%e, "failed to listen for ctrl-c"),
        }
    });

    let handle = tokio::spawn(start_service(config, shutdown.clone()));
    (shutdown, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_reaches_subscribers() {
        let handle = ShutdownHandle::new();
        let mut rx = handle.subscribe();
        assert!(!handle.is_shutdown());

        handle.shutdown();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(handle.is_shutdown());
    }
}
