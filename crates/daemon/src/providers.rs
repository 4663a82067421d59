//! File-backed providers
//!
//! The media-server client writes its view of the world to JSON files; these
//! providers read them on every call. A missing or malformed file makes the
//! provider unavailable for that call.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;

use common::provider::{
    Candidate, CandidateProvider, PlaybackSession, ProviderError, SessionProvider,
};

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ProviderError> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| ProviderError::Unavailable(format!("{}: {}", path.display(), e)))?;
    serde_json::from_slice(&raw)
        .map_err(|e| ProviderError::Unavailable(format!("{}: {}", path.display(), e)))
}

/// Reads a JSON array of [`Candidate`]s
#[derive(Debug, Clone)]
pub struct JsonFileCandidateProvider {
    path: PathBuf,
}

impl JsonFileCandidateProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CandidateProvider for JsonFileCandidateProvider {
    async fn candidates(&self) -> Result<BoxStream<'static, Candidate>, ProviderError> {
        let candidates: Vec<Candidate> = read_json(&self.path).await?;
        tracing::debug!(count = candidates.len(), path = %self.path.display(), "read candidates");
        Ok(stream::iter(candidates).boxed())
    }
}

/// Reads a JSON array of [`PlaybackSession`]s
#[derive(Debug, Clone)]
pub struct JsonFileSessionProvider {
    path: PathBuf,
}

impl JsonFileSessionProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SessionProvider for JsonFileSessionProvider {
    async fn sessions(&self) -> Result<Vec<PlaybackSession>, ProviderError> {
        read_json(&self.path).await
    }
}

/// Used when no candidate file is configured: every cycle sees an empty set.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCandidates;

#[async_trait]
impl CandidateProvider for NoCandidates {
    async fn candidates(&self) -> Result<BoxStream<'static, Candidate>, ProviderError> {
        Ok(stream::empty().boxed())
    }
}

/// Used when no session file is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSessions;

#[async_trait]
impl SessionProvider for NoSessions {
    async fn sessions(&self) -> Result<Vec<PlaybackSession>, ProviderError> {
        Ok(Vec::new())
    }
}
