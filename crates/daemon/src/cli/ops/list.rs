use std::fmt;

use clap::Args;
use comfy_table::Table;

use common::prelude::CacheEntry;
use tiercache_daemon::http_server::api::client::ApiError;
use tiercache_daemon::http_server::api::v0::entries::ListEntriesRequest;

use crate::cli::format_bytes;

#[derive(Args, Debug, Clone)]
pub struct List {
    #[command(flatten)]
    pub filter: ListEntriesRequest,
}

#[derive(Debug)]
pub struct ListOutput {
    pub entries: Vec<CacheEntry>,
}

impl fmt::Display for ListOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "No entries found");
        }

        let mut table = Table::new();
        table.set_header(vec!["PATH", "STATUS", "LINK", "REASON", "SIZE", "LAST ACCESS"]);
        for e in &self.entries {
            table.add_row(vec![
                e.canonical_path.display().to_string(),
                e.status.to_string(),
                e.link_kind.to_string(),
                e.triggered_by_reason.to_string(),
                format_bytes(e.size_bytes),
                e.last_access_at.date().to_string(),
            ]);
        }
        write!(f, "{table}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ListError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for List {
    type Error = ListError;
    type Output = ListOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut client = ctx.client.clone();
        let response = client.call(self.filter.clone()).await?;
        Ok(ListOutput {
            entries: response.entries,
        })
    }
}
