use super::{Middleware, Next};
use crate::{
    block_tracker::PollingBlockTracker,
    error::Result,
    methods::{block_param, is_empty_result, method_info, resolve_earliest},
};
use alloy_eips::BlockNumberOrTag;
use serde_json::Value;
use wallet_rpc::Request;

/// Re-issues requests whose result is empty, once per new block.
///
/// Gives up after `max_attempts` and returns the last empty result.
#[derive(Debug)]
pub struct RetryOnEmptyMiddleware {
    block_tracker: PollingBlockTracker,
    max_attempts: usize,
}

impl RetryOnEmptyMiddleware {
    pub fn new(block_tracker: PollingBlockTracker, max_attempts: usize) -> Self {
        Self { block_tracker, max_attempts: max_attempts.max(1) }
    }

    /// Only the latest block and known historical blocks can be expected to show up eventually
    fn should_retry(&self, request: &Request, index: Option<usize>) -> bool {
        let Some(index) = index else { return true };
        match block_param(request, index).map(resolve_earliest) {
            Some(BlockNumberOrTag::Latest) => true,
            Some(BlockNumberOrTag::Number(number)) => {
                self.block_tracker.latest_block_number().is_some_and(|latest| number <= latest)
            }
            _ => false,
        }
    }
}

#[async_trait::async_trait]
impl Middleware for RetryOnEmptyMiddleware {
    async fn handle(&self, request: Request, next: Next) -> Result<Value> {
        let info = method_info(request.method());
        if !info.retry_on_empty || !self.should_retry(&request, info.block_param_index) {
            return next.run(request).await;
        }

        let mut attempt = 1;
        loop {
            let value = next.clone().run(request.clone()).await?;
            if !is_empty_result(&value) {
                return Ok(value);
            }
            if attempt >= self.max_attempts {
                debug!(
                    target: "network::retry",
                    method = %request.method, attempt,
                    "giving up on empty result"
                );
                return Ok(value);
            }
            debug!(
                target: "network::retry",
                method = %request.method, attempt,
                "empty result, waiting for next block"
            );
            if let Err(err) = self.block_tracker.wait_for_next_block().await {
                debug!(target: "network::retry", %err, "block tracker failed, giving up");
                return Ok(value);
            }
            attempt += 1;
        }
    }
}
