use super::{Middleware, Next};
use crate::{
    block_tracker::PollingBlockTracker,
    error::Result,
    methods::{block_param, method_info, to_quantity},
};
use alloy_eips::BlockNumberOrTag;
use serde_json::Value;
use wallet_rpc::{Request, RequestParams};

/// Normalizes the block parameter of methods that take one.
///
/// A missing parameter becomes `latest`, `earliest` becomes block zero and numbers are written in
/// their canonical form. If `substitute_latest` is set, `latest` is replaced with the tracker's
/// latest block number for backends that can't resolve tags themselves.
#[derive(Debug)]
pub struct BlockRefMiddleware {
    block_tracker: PollingBlockTracker,
    substitute_latest: bool,
}

impl BlockRefMiddleware {
    pub fn new(block_tracker: PollingBlockTracker, substitute_latest: bool) -> Self {
        Self { block_tracker, substitute_latest }
    }
}

#[async_trait::async_trait]
impl Middleware for BlockRefMiddleware {
    async fn handle(&self, mut request: Request, next: Next) -> Result<Value> {
        let Some(index) = method_info(request.method()).block_param_index else {
            return next.run(request).await;
        };
        let replacement = match block_param(&request, index) {
            Some(BlockNumberOrTag::Latest) if self.substitute_latest => {
                Some(to_quantity(self.block_tracker.latest_block().await?))
            }
            Some(BlockNumberOrTag::Latest) => Some(Value::String("latest".to_string())),
            Some(BlockNumberOrTag::Earliest) => Some(to_quantity(0)),
            Some(BlockNumberOrTag::Number(number)) => Some(to_quantity(number)),
            // pending, safe and finalized are left to the backend
            _ => None,
        };
        if let Some(value) = replacement {
            set_param(&mut request, index, value);
        }
        next.run(request).await
    }
}

/// Sets the positional param at `index`, padding missing params with `null`.
pub(crate) fn set_param(request: &mut Request, index: usize, value: Value) {
    let mut params = match std::mem::take(&mut request.params) {
        RequestParams::Array(params) => params,
        RequestParams::None => Vec::new(),
        // named params have no position, leave them untouched
        params @ RequestParams::Object(_) => {
            request.params = params;
            return;
        }
    };
    if params.len() <= index {
        params.resize(index + 1, Value::Null);
    }
    params[index] = value;
    request.params = RequestParams::Array(params);
}
