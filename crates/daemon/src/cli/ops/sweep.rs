use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use tiercache_daemon::http_server::api::client::ApiError;
use tiercache_daemon::http_server::api::v0::sweep::SweepRequest;
use tiercache_daemon::tiering::SweepReport;

#[derive(Args, Debug, Clone)]
pub struct Sweep;

#[derive(Debug)]
pub struct SweepOutput {
    pub report: SweepReport,
}

impl fmt::Display for SweepOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.report;
        writeln!(f, "{}", "Sweep complete".green())?;
        writeln!(f, "  {} {}", "orphaned:".dimmed(), r.orphaned)?;
        writeln!(f, "  {} {}", "re-promoted:".dimmed(), r.repromoted)?;
        writeln!(f, "  {} {}", "removed:".dimmed(), r.removed)?;
        writeln!(f, "  {} {}", "relinked:".dimmed(), r.relinked)?;
        writeln!(f, "  {} {}", "adopted:".dimmed(), r.adopted)?;
        writeln!(f, "  {} {}", "strays deleted:".dimmed(), r.strays_deleted)?;
        writeln!(f, "  {} {}", "awaiting manual promote:".dimmed(), r.awaiting_manual)?;
        write!(f, "  {} {}", "skipped (busy):".dimmed(), r.skipped_busy)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Sweep {
    type Error = SweepError;
    type Output = SweepOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut client = ctx.client.clone();
        let response = client.call(SweepRequest {}).await?;
        Ok(SweepOutput {
            report: response.report,
        })
    }
}
