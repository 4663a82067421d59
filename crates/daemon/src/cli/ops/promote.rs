use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use tiercache_daemon::http_server::api::client::ApiError;
use tiercache_daemon::http_server::api::v0::entries::PromoteEntryRequest;
use tiercache_daemon::tiering::PromoteOutcome;

use crate::cli::format_bytes;

#[derive(Args, Debug, Clone)]
pub struct Promote {
    #[command(flatten)]
    pub request: PromoteEntryRequest,
}

#[derive(Debug)]
pub struct PromoteOutput {
    pub outcome: PromoteOutcome,
}

impl fmt::Display for PromoteOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entry = self.outcome.entry();
        match &self.outcome {
            PromoteOutcome::Promoted { .. } => write!(
                f,
                "{} {} ({}, {})",
                "Promoted".green(),
                entry.canonical_path.display(),
                entry.link_kind,
                format_bytes(entry.size_bytes)
            ),
            PromoteOutcome::AlreadyCached { attributed, .. } => {
                write!(
                    f,
                    "{} {}",
                    "Already cached".yellow(),
                    entry.canonical_path.display()
                )?;
                if *attributed {
                    write!(f, " (attribution added)")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PromoteError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Promote {
    type Error = PromoteError;
    type Output = PromoteOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut client = ctx.client.clone();
        let response = client.call(self.request.clone()).await?;
        Ok(PromoteOutput {
            outcome: response.outcome,
        })
    }
}
