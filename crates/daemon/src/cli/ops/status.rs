use std::fmt;

use clap::Args;
use owo_colors::OwoColorize;

use tiercache_daemon::http_server::api::client::ApiError;
use tiercache_daemon::http_server::api::v0::entries::{StatsRequest, StatsResponse};

use crate::cli::format_bytes;

#[derive(Args, Debug, Clone)]
pub struct Status;

#[derive(Debug)]
pub struct StatusOutput {
    pub stats: StatsResponse,
}

impl fmt::Display for StatusOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats.statistics;
        let limit = self.stats.cache_limit_bytes;
        let used_pct = if limit == 0 {
            0.0
        } else {
            s.total_bytes as f64 * 100.0 / limit as f64
        };

        writeln!(f, "{}:", "Cache".bold())?;
        writeln!(
            f,
            "  {} {} of {} ({:.1}%)",
            "used:".dimmed(),
            format_bytes(s.total_bytes),
            format_bytes(limit),
            used_pct
        )?;
        writeln!(f, "  {} {}", "active:".dimmed(), s.active_count)?;
        let orphaned = s.orphaned_count.to_string();
        if s.orphaned_count > 0 {
            writeln!(f, "  {} {}", "orphaned:".dimmed(), orphaned.yellow())?;
        } else {
            writeln!(f, "  {} {}", "orphaned:".dimmed(), orphaned)?;
        }
        writeln!(f, "  {} {}", "pending removal:".dimmed(), s.pending_removal_count)?;
        writeln!(
            f,
            "  {} {:?}, symlinks {}, network source {}",
            "topology:".dimmed(),
            self.stats.topology.kind,
            self.stats.topology.symlinks_allowed,
            self.stats.topology.source_is_network
        )?;
        writeln!(f, "  {} {}", "watch sessions:".dimmed(), self.stats.watch_sessions)?;
        writeln!(f, "  {} {}", "queued jobs:".dimmed(), self.stats.queued_jobs)?;

        if !s.users.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}:", "Users".bold())?;
            for user in &s.users {
                writeln!(
                    f,
                    "  {} {} files, {}",
                    format!("{}:", user.user_id).dimmed(),
                    user.entry_count,
                    format_bytes(user.total_bytes)
                )?;
            }
        }

        let failures: Vec<_> = self.stats.failures.iter().filter(|(_, n)| **n > 0).collect();
        if !failures.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}:", "Failures".bold())?;
            for (code, count) in failures {
                writeln!(f, "  {} {}", format!("{}:", code).red(), count)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Status {
    type Error = StatusError;
    type Output = StatusOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut client = ctx.client.clone();
        let stats = client.call(StatsRequest {}).await?;
        Ok(StatusOutput { stats })
    }
}
