use std::path::PathBuf;

use clap::Args;

use tiercache_daemon::config::ConfigError;
use tiercache_daemon::logging::{self, LoggingError};
use tiercache_daemon::process::ServiceError;
use tiercache_daemon::{spawn_service, ServiceConfig};

#[derive(Args, Debug, Clone)]
pub struct Daemon {
    /// Write logs to daily files in this directory as well as stdout
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("no config path given and no default config directory available")]
    NoConfigPath,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("service task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Daemon {
    type Error = DaemonError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config_path = ctx
            .config_path
            .clone()
            .or_else(ServiceConfig::default_path)
            .ok_or(DaemonError::NoConfigPath)?;
        let config = ServiceConfig::load(&config_path)?;

        let log_dir = self.log_dir.clone().or_else(|| config.log_dir.clone());
        let _guard = logging::init(&config.log_level, log_dir.as_deref())?;
        tracing::info!(config = %config_path.display(), "starting tiercache daemon");

        let (_shutdown, handle) = spawn_service(config);
        handle.await??;
        Ok("tiercache daemon stopped".to_string())
    }
}
