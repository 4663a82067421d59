// Service modules (daemon functionality)
pub mod config;
pub(crate) mod database;
pub mod eviction;
pub mod http_server;
pub mod locks;
pub mod logging;
pub mod pool;
pub mod process;
pub mod providers;
pub mod registry;
pub mod scheduler;
pub mod service_state;
pub mod tiering;
pub mod watch;

// Re-exports for consumers (CLI, integration tests)
pub use config::Config as ServiceConfig;
pub use database::{Database, DatabaseSetupError, EntryFilter, HistoryQuery, UserUsage};
pub use process::{spawn_service, start_service, ShutdownHandle};
pub use registry::CacheRegistry;
pub use service_state::State as ServiceState;
pub use tiering::{TierError, TieringOperator};
