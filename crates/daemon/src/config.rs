//! Service configuration
//!
//! Loaded once at startup from a TOML file and passed by reference to the
//! constructors that need it. Every duration is expressed in seconds.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::capacity::CacheLimit;
use common::path_map::PathMapping;
use common::topology::MountRoots;

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_DIR_NAME: &str = "tiercache";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root of the slow bulk storage the media files live on
    pub source_root: PathBuf,
    /// Root as the media server sees it; defaults to `source_root`
    #[serde(default)]
    pub server_root: Option<PathBuf>,
    /// Root of the fast cache storage
    pub cache_root: PathBuf,
    /// Registry database; defaults to `<data dir>/tiercache/registry.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default = "default_api_listen_addr")]
    pub api_listen_addr: SocketAddr,

    #[serde(default)]
    pub cache_limit: CacheLimit,
    /// Extra bytes freed beyond the strict minimum when evicting for a promote
    #[serde(default)]
    pub eviction_headroom_bytes: u64,
    /// Treat the source root as network-mounted regardless of detection
    #[serde(default)]
    pub force_network_source: bool,

    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_cache_transfers")]
    pub cache_transfers: usize,
    #[serde(default = "default_array_transfers")]
    pub array_transfers: usize,
    #[serde(default = "default_network_transfers")]
    pub network_transfers: usize,

    #[serde(default = "default_hot_window_secs")]
    pub hot_window_secs: u64,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_inactivity_threshold_secs")]
    pub inactivity_threshold_secs: u64,
    #[serde(default = "default_session_poll_interval_secs")]
    pub session_poll_interval_secs: u64,
    /// Consecutive failed polls before tracked sessions become `unknown`
    #[serde(default = "default_session_failure_threshold")]
    pub session_failure_threshold: u32,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_provider_retry_attempts")]
    pub provider_retry_attempts: u32,
    #[serde(default = "default_provider_backoff_secs")]
    pub provider_backoff_secs: u64,
    #[serde(default = "default_operation_log_retention_days")]
    pub operation_log_retention_days: u64,

    /// Media-server path prefixes and their host equivalents
    #[serde(default)]
    pub path_mappings: Vec<PathMapping>,
    /// JSON file exported by the media-server client with cache candidates
    #[serde(default)]
    pub candidates_file: Option<PathBuf>,
    /// JSON file exported by the media-server client with playback sessions
    #[serde(default)]
    pub sessions_file: Option<PathBuf>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily-rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_api_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7878))
}

fn default_workers() -> usize {
    4
}

fn default_queue_depth() -> usize {
    64
}

fn default_cache_transfers() -> usize {
    2
}

fn default_array_transfers() -> usize {
    2
}

fn default_network_transfers() -> usize {
    1
}

fn default_hot_window_secs() -> u64 {
    48 * 3600
}

fn default_grace_period_secs() -> u64 {
    10 * 60
}

fn default_inactivity_threshold_secs() -> u64 {
    14 * 24 * 3600
}

fn default_session_poll_interval_secs() -> u64 {
    15
}

fn default_session_failure_threshold() -> u32 {
    3
}

fn default_reconcile_interval_secs() -> u64 {
    30 * 60
}

fn default_provider_retry_attempts() -> u32 {
    3
}

fn default_provider_backoff_secs() -> u64 {
    5
}

fn default_operation_log_retention_days() -> u64 {
    90
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    /// Default config location: `<config dir>/tiercache/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(DEFAULT_DIR_NAME).join(DEFAULT_CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal config for the given roots, everything else defaulted.
    pub fn with_roots(source_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            server_root: None,
            cache_root: cache_root.into(),
            database_path: None,
            api_listen_addr: default_api_listen_addr(),
            cache_limit: CacheLimit::default(),
            eviction_headroom_bytes: 0,
            force_network_source: false,
            workers: default_workers(),
            queue_depth: default_queue_depth(),
            cache_transfers: default_cache_transfers(),
            array_transfers: default_array_transfers(),
            network_transfers: default_network_transfers(),
            hot_window_secs: default_hot_window_secs(),
            grace_period_secs: default_grace_period_secs(),
            inactivity_threshold_secs: default_inactivity_threshold_secs(),
            session_poll_interval_secs: default_session_poll_interval_secs(),
            session_failure_threshold: default_session_failure_threshold(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            provider_retry_attempts: default_provider_retry_attempts(),
            provider_backoff_secs: default_provider_backoff_secs(),
            operation_log_retention_days: default_operation_log_retention_days(),
            path_mappings: Vec::new(),
            candidates_file: None,
            sessions_file: None,
            log_level: default_log_level(),
            log_dir: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.source_root.is_absolute() || !self.cache_root.is_absolute() {
            return Err(ConfigError::Invalid(
                "source_root and cache_root must be absolute paths".into(),
            ));
        }
        if self.cache_root.starts_with(&self.source_root)
            || self.source_root.starts_with(&self.cache_root)
        {
            return Err(ConfigError::Invalid(
                "source_root and cache_root must not contain each other".into(),
            ));
        }
        for (name, value) in [
            ("workers", self.workers),
            ("queue_depth", self.queue_depth),
            ("cache_transfers", self.cache_transfers),
            ("array_transfers", self.array_transfers),
            ("network_transfers", self.network_transfers),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be at least 1", name)));
            }
        }
        if self.grace_period_secs == 0 {
            return Err(ConfigError::Invalid("grace_period_secs must be non-zero".into()));
        }
        if self.session_poll_interval_secs == 0 || self.reconcile_interval_secs == 0 {
            return Err(ConfigError::Invalid("poll intervals must be non-zero".into()));
        }
        if self.session_failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "session_failure_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn server_root(&self) -> &Path {
        self.server_root.as_deref().unwrap_or(&self.source_root)
    }

    /// Roots compared by topology detection.
    pub fn mount_roots(&self) -> MountRoots {
        MountRoots {
            source_root: self.source_root.clone(),
            server_root: self.server_root().to_path_buf(),
            cache_root: self.cache_root.clone(),
        }
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path.clone().or_else(|| {
            dirs::data_dir().map(|dir| dir.join(DEFAULT_DIR_NAME).join("registry.db"))
        })
    }

    pub fn hot_window(&self) -> Duration {
        Duration::from_secs(self.hot_window_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold_secs)
    }

    pub fn session_poll_interval(&self) -> Duration {
        Duration::from_secs(self.session_poll_interval_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn provider_backoff(&self) -> Duration {
        Duration::from_secs(self.provider_backoff_secs)
    }

    pub fn operation_log_retention(&self) -> Duration {
        Duration::from_secs(self.operation_log_retention_days * 24 * 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = Config::from_toml(
            r#"
            source_root = "/mnt/user/media"
            cache_root = "/mnt/cache/media"
            "#,
        )
        .unwrap();

        assert_eq!(config.cache_limit, CacheLimit::Percent(90));
        assert_eq!(config.workers, 4);
        assert_eq!(config.grace_period(), Duration::from_secs(600));
        assert_eq!(config.server_root(), Path::new("/mnt/user/media"));
        assert_eq!(config.api_listen_addr.port(), 7878);
    }

    #[test]
    fn test_full_config_parses() {
        let config = Config::from_toml(
            r#"
            source_root = "/mnt/user/media"
            server_root = "/data"
            cache_root = "/mnt/cache/media"
            cache_limit = "500GB"
            workers = 2
            grace_period_secs = 30
            candidates_file = "/var/lib/tiercache/candidates.json"

            [[path_mappings]]
            server = "/data"
            host = "/mnt/user/media"
            "#,
        )
        .unwrap();

        assert_eq!(config.cache_limit, CacheLimit::Bytes(500_000_000_000));
        assert_eq!(config.workers, 2);
        assert_eq!(config.path_mappings.len(), 1);
        assert_eq!(config.server_root(), Path::new("/data"));
    }

    #[test]
    fn test_nested_roots_are_rejected() {
        let err = Config::from_toml(
            r#"
            source_root = "/mnt/media"
            cache_root = "/mnt/media/cache"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = Config::from_toml(
            r#"
            source_root = "/a"
            cache_root = "/b"
            workers = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_cache_limit_is_parse_error() {
        let err = Config::from_toml(
            r#"
            source_root = "/a"
            cache_root = "/b"
            cache_limit = "lots"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
