//! Interfaces to external collaborators
//!
//! The media-server client that enumerates watchlists, on-deck items and
//! playback sessions lives outside this workspace. Its output is consumed as
//! plain data through these traits.

use std::fmt::Debug;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::types::CacheReason;

/// A file some user's activity says should be cached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub canonical_path: PathBuf,
    pub user_id: String,
    pub reason: CacheReason,
    /// Next unwatched item of a series the user is progressing through
    #[serde(default)]
    pub next_in_series: bool,
}

/// One playback session as reported by the media server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSession {
    pub user_id: String,
    pub canonical_path: PathBuf,
    pub is_playing: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Yields the desired cache set for one reconciliation cycle.
///
/// The stream is finite and carries no ordering guarantee.
#[async_trait]
pub trait CandidateProvider: Send + Sync + Debug + 'static {
    async fn candidates(&self) -> Result<BoxStream<'static, Candidate>, ProviderError>;
}

/// Yields the playback sessions currently known to the media server.
#[async_trait]
pub trait SessionProvider: Send + Sync + Debug + 'static {
    async fn sessions(&self) -> Result<Vec<PlaybackSession>, ProviderError>;
}
