use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use common::prelude::CacheEntry;
use tiercache_daemon::http_server::api::client::ApiError;
use tiercache_daemon::http_server::api::v0::entries::DemoteEntryRequest;

use crate::cli::format_bytes;

#[derive(Args, Debug, Clone)]
pub struct Demote {
    #[command(flatten)]
    pub request: DemoteEntryRequest,
}

/// Shared by `demote` and `evict`
#[derive(Debug)]
pub struct DemoteOutput {
    pub verb: &'static str,
    pub entry: CacheEntry,
}

impl fmt::Display for DemoteOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (freed {})",
            self.verb.green(),
            self.entry.canonical_path.display(),
            format_bytes(self.entry.size_bytes)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DemoteError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Demote {
    type Error = DemoteError;
    type Output = DemoteOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut client = ctx.client.clone();
        let response = client.call(self.request.clone()).await?;
        Ok(DemoteOutput {
            verb: "Demoted",
            entry: response.entry,
        })
    }
}
