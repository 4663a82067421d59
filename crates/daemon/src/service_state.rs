use std::io;
use std::sync::Arc;

use tokio::sync::watch;

use common::capacity::filesystem_size;
use common::layout::CacheLayout;
use common::priority::PriorityPolicy;
use common::topology::{self, Topology, TopologyError};

use crate::config::Config;
use crate::database::{Database, DatabaseSetupError};
use crate::eviction::{EvictionEngine, NextUp};
use crate::pool::{JobDispatcher, WorkerPool};
use crate::registry::{CacheRegistry, RegistryError};
use crate::tiering::{OperatorSettings, TieringOperator, TransferLimits};
use crate::watch::SessionTable;

/// Shared handles for every part of the running service
#[derive(Debug, Clone)]
pub struct State {
    config: Arc<Config>,
    registry: Arc<CacheRegistry>,
    operator: Arc<TieringOperator>,
    sessions: SessionTable,
    next_up: NextUp,
    jobs: JobDispatcher,
}

impl State {
    /// Detect the topology, open the registry and start the worker pool.
    pub async fn from_config(
        config: Config,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, WorkerPool), StateSetupError> {
        let topology = topology::detect(&config.mount_roots(), config.force_network_source)?;

        let db_path = config
            .database_path()
            .ok_or(StateSetupError::NoDataDirectory)?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(StateSetupError::DataDirectory)?;
        }
        let database = Database::open(&db_path).await?;
        tracing::info!(path = %db_path.display(), "registry database opened");

        Self::build(config, topology, database, shutdown).await
    }

    /// Assemble the service from already resolved parts.
    pub async fn build(
        config: Config,
        topology: Topology,
        database: Database,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, WorkerPool), StateSetupError> {
        let filesystem_bytes =
            filesystem_size(&config.cache_root).map_err(StateSetupError::CacheFilesystem)?;
        let cache_limit_bytes = config.cache_limit.resolve(filesystem_bytes);
        tracing::info!(
            limit = %config.cache_limit,
            cache_limit_bytes,
            filesystem_bytes,
            "cache capacity resolved"
        );

        let registry = Arc::new(CacheRegistry::open(database).await?);
        let sessions = SessionTable::new();
        let next_up = NextUp::default();
        let eviction = EvictionEngine::new(
            registry.clone(),
            sessions.clone(),
            next_up.clone(),
            PriorityPolicy::new(config.hot_window()),
        );
        let operator = Arc::new(TieringOperator::new(
            registry.clone(),
            CacheLayout::new(&config.source_root, &config.cache_root),
            topology,
            sessions.clone(),
            eviction,
            TransferLimits::new(
                config.cache_transfers,
                config.array_transfers,
                config.network_transfers,
            ),
            OperatorSettings {
                cache_limit_bytes,
                eviction_headroom_bytes: config.eviction_headroom_bytes,
            },
        ));
        let pool = WorkerPool::start(
            operator.clone(),
            config.workers,
            config.queue_depth,
            shutdown,
        );

        let state = Self {
            config: Arc::new(config),
            registry,
            operator,
            sessions,
            next_up,
            jobs: pool.dispatcher(),
        };
        Ok((state, pool))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    pub fn operator(&self) -> &Arc<TieringOperator> {
        &self.operator
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn next_up(&self) -> &NextUp {
        &self.next_up
    }

    pub fn jobs(&self) -> &JobDispatcher {
        &self.jobs
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("topology detection failed: {0}")]
    Topology(#[from] TopologyError),
    #[error("no data directory available for the registry database")]
    NoDataDirectory,
    #[error("failed to create data directory: {0}")]
    DataDirectory(#[source] io::Error),
    #[error("failed to size cache filesystem: {0}")]
    CacheFilesystem(#[source] io::Error),
    #[error("database setup error: {0}")]
    Database(#[from] DatabaseSetupError),
    #[error("registry load error: {0}")]
    Registry(#[from] RegistryError),
}
