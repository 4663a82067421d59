use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use tiercache_daemon::http_server::api::client::ApiError;
use tiercache_daemon::http_server::api::v0::topology::{
    RecheckTopologyRequest, TopologyRequest, TopologyResponse,
};

#[derive(Args, Debug, Clone)]
pub struct Topology {
    /// Detect the mount layout again instead of showing the current one
    #[arg(long)]
    pub recheck: bool,
}

#[derive(Debug)]
pub struct TopologyOutput {
    pub response: TopologyResponse,
}

impl fmt::Display for TopologyOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.response.topology;
        writeln!(f, "{} {:?}", "layout:".dimmed(), t.kind)?;
        writeln!(f, "{} {}", "preferred link:".dimmed(), t.preferred_link_kind())?;
        writeln!(f, "{} {}", "symlinks allowed:".dimmed(), t.symlinks_allowed)?;
        write!(f, "{} {}", "network source:".dimmed(), t.source_is_network)?;
        if self.response.changed {
            write!(f, "\n{}", "topology changed; new promotions use the new layout".yellow())?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Topology {
    type Error = TopologyError;
    type Output = TopologyOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut client = ctx.client.clone();
        let response = if self.recheck {
            client.call(RecheckTopologyRequest {}).await?
        } else {
            client.call(TopologyRequest {}).await?
        };
        Ok(TopologyOutput { response })
    }
}
