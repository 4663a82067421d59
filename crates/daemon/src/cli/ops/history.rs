use std::fmt;

use clap::Args;
use comfy_table::Table;

use common::prelude::OperationLogEntry;
use tiercache_daemon::http_server::api::client::ApiError;
use tiercache_daemon::http_server::api::v0::operations::OperationsRequest;

#[derive(Args, Debug, Clone)]
pub struct History {
    #[command(flatten)]
    pub query: OperationsRequest,
}

#[derive(Debug)]
pub struct HistoryOutput {
    pub operations: Vec<OperationLogEntry>,
    pub next_before: Option<i64>,
}

impl fmt::Display for HistoryOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operations.is_empty() {
            return write!(f, "No operations recorded");
        }

        let mut table = Table::new();
        table.set_header(vec!["ID", "WHEN", "OPERATION", "ACTOR", "PATH", "TRANSITION", "OUTCOME"]);
        for op in &self.operations {
            let transition = format!(
                "{} -> {}",
                op.status_before.map(|s| s.as_str()).unwrap_or("-"),
                op.status_after.map(|s| s.as_str()).unwrap_or("-")
            );
            let outcome = match &op.detail {
                Some(detail) => format!("{}: {}", op.outcome, detail),
                None => op.outcome.to_string(),
            };
            table.add_row(vec![
                op.id.to_string(),
                op.recorded_at.to_string(),
                op.operation.to_string(),
                op.actor.clone(),
                op.canonical_path.display().to_string(),
                transition,
                outcome,
            ]);
        }
        write!(f, "{table}")?;
        if let Some(before) = self.next_before {
            write!(f, "\nmore: --before {}", before)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for History {
    type Error = HistoryError;
    type Output = HistoryOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut client = ctx.client.clone();
        let response = client.call(self.query.clone()).await?;
        Ok(HistoryOutput {
            operations: response.operations,
            next_before: response.next_before,
        })
    }
}
