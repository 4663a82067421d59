use clap::Args;

use tiercache_daemon::http_server::api::v0::entries::EvictEntryRequest;

use super::demote::{DemoteError, DemoteOutput};

#[derive(Args, Debug, Clone)]
pub struct Evict {
    #[command(flatten)]
    pub request: EvictEntryRequest,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Evict {
    type Error = DemoteError;
    type Output = DemoteOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut client = ctx.client.clone();
        let response = client.call(self.request.clone()).await?;
        Ok(DemoteOutput {
            verb: "Evicted",
            entry: response.entry,
        })
    }
}
