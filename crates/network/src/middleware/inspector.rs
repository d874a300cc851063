use super::{Middleware, Next, dispatch_block};
use crate::{
    block_tracker::PollingBlockTracker,
    error::{ClientError, Result},
    methods::{block_param, method_info, parse_quantity},
};
use alloy_eips::BlockNumberOrTag;
use serde_json::Value;
use wallet_rpc::Request;

/// Correlates requests with the block tracker.
///
/// Requests for a block ahead of the latest known block fail with
/// [ClientError::UnknownBlock] after one forced check. Transaction results mined in a block the
/// tracker hasn't seen yet trigger an out-of-cycle check.
#[derive(Debug)]
pub struct BlockTrackerInspector {
    block_tracker: PollingBlockTracker,
}

impl BlockTrackerInspector {
    pub fn new(block_tracker: PollingBlockTracker) -> Self {
        Self { block_tracker }
    }
}

#[async_trait::async_trait]
impl Middleware for BlockTrackerInspector {
    async fn handle(&self, request: Request, next: Next) -> Result<Value> {
        let info = method_info(request.method());

        if let Some(index) = info.block_param_index
            && let Some(BlockNumberOrTag::Number(requested)) = block_param(&request, index)
        {
            let mut latest = dispatch_block(&self.block_tracker).await?;
            if requested > latest {
                latest = self.block_tracker.check_for_latest_block().await?;
            }
            if requested > latest {
                warn!(
                    target: "network::inspector",
                    method = %request.method, requested, latest,
                    "request for unknown block"
                );
                return Err(ClientError::UnknownBlock { requested, latest });
            }
        }

        let value = next.run(request).await?;

        if info.inspect_result_block
            && let Some(number) = value.get("blockNumber").and_then(parse_quantity)
            && self.block_tracker.latest_block_number().is_none_or(|latest| number > latest)
        {
            trace!(target: "network::inspector", number, "result is ahead of the block tracker");
            if let Err(err) = self.block_tracker.check_for_latest_block().await {
                debug!(target: "network::inspector", %err, "failed to refresh block tracker");
            }
        }
        Ok(value)
    }
}
