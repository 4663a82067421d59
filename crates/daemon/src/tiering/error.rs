use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use common::provider::ProviderError;
use common::strategy::StrategyError;

use crate::registry::RegistryError;

/// Closed taxonomy of tiering failures
#[derive(Debug, thiserror::Error)]
pub enum TierError {
    #[error("no link strategy: {0}")]
    Strategy(#[from] StrategyError),
    #[error("transfer failed for {path}: {source}")]
    Transfer {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("link operation failed for {path}: {source}")]
    Link {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} is referenced by {sessions} watch session(s)")]
    Busy { path: PathBuf, sessions: usize },
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    ProviderUnavailable(#[from] ProviderError),
    #[error("cache capacity exceeded: need {needed} bytes, {available} available")]
    CapacityExceeded { needed: u64, available: u64 },
    #[error("not tracked: {0}")]
    NotFound(PathBuf),
}

impl TierError {
    pub(crate) fn transfer(path: impl Into<PathBuf>, source: io::Error) -> Self {
        TierError::Transfer {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn link(path: impl Into<PathBuf>, source: io::Error) -> Self {
        TierError::Link {
            path: path.into(),
            source,
        }
    }

    /// Stable machine-readable code, used by the HTTP API and the counters.
    pub fn code(&self) -> &'static str {
        match self {
            TierError::Strategy(_) => "strategy_error",
            TierError::Transfer { .. } => "transfer_error",
            TierError::Link { .. } => "link_error",
            TierError::Busy { .. } => "busy",
            TierError::Registry(_) => "registry_error",
            TierError::ProviderUnavailable(_) => "provider_unavailable",
            TierError::CapacityExceeded { .. } => "capacity_exceeded",
            TierError::NotFound(_) => "not_found",
        }
    }
}

const CODES: [&str; 8] = [
    "strategy_error",
    "transfer_error",
    "link_error",
    "busy",
    "registry_error",
    "provider_unavailable",
    "capacity_exceeded",
    "not_found",
];

/// Aggregate error counters, one per taxonomy code
#[derive(Debug, Default)]
pub struct FailureCounters {
    counts: [AtomicU64; CODES.len()],
}

impl FailureCounters {
    pub fn record(&self, err: &TierError) {
        if let Some(slot) = CODES.iter().position(|code| *code == err.code()) {
            self.counts[slot].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get(&self, code: &str) -> u64 {
        CODES
            .iter()
            .position(|c| *c == code)
            .map(|slot| self.counts[slot].load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        CODES
            .iter()
            .zip(self.counts.iter())
            .map(|(code, count)| (code.to_string(), count.load(Ordering::Relaxed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_cover_every_variant() {
        let errors = [
            TierError::Strategy(StrategyError::NotAFile("/x".into())),
            TierError::transfer("/x", io::Error::other("boom")),
            TierError::link("/x", io::Error::other("boom")),
            TierError::Busy {
                path: "/x".into(),
                sessions: 1,
            },
            TierError::Registry(RegistryError::Missing("/x".into())),
            TierError::ProviderUnavailable(ProviderError::Unavailable("down".into())),
            TierError::CapacityExceeded {
                needed: 1,
                available: 0,
            },
            TierError::NotFound("/x".into()),
        ];
        let codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        assert_eq!(codes, CODES.to_vec());
    }

    #[test]
    fn test_counters() {
        let counters = FailureCounters::default();
        counters.record(&TierError::NotFound("/x".into()));
        counters.record(&TierError::NotFound("/y".into()));
        counters.record(&TierError::Busy {
            path: "/x".into(),
            sessions: 2,
        });
        assert_eq!(counters.get("not_found"), 2);
        assert_eq!(counters.get("busy"), 1);
        assert_eq!(counters.snapshot()["link_error"], 0);
    }
}
