use super::{CacheKey, Middleware, Next, dispatch_block};
use crate::{block_tracker::PollingBlockTracker, error::Result, methods::method_info};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::HashMap, fmt, sync::Arc};
use wallet_rpc::Request;

type InflightRequest = Shared<BoxFuture<'static, Result<Value>>>;

/// Deduplicates identical cacheable requests while they are in flight.
///
/// Concurrent callers of the same request share a single dispatch. The entry is removed as soon
/// as the request completes, successful or not.
pub struct InflightMiddleware {
    block_tracker: PollingBlockTracker,
    inflight: Arc<Mutex<HashMap<CacheKey, InflightRequest>>>,
}

impl InflightMiddleware {
    pub fn new(block_tracker: PollingBlockTracker) -> Self {
        Self { block_tracker, inflight: Default::default() }
    }
}

#[async_trait::async_trait]
impl Middleware for InflightMiddleware {
    async fn handle(&self, request: Request, next: Next) -> Result<Value> {
        let info = method_info(request.method());
        if !info.is_cacheable() {
            return next.run(request).await;
        }
        let latest = dispatch_block(&self.block_tracker).await?;
        let Some(key) = CacheKey::new(&request, &info, latest) else {
            return next.run(request).await;
        };

        let fut = {
            let mut inflight = self.inflight.lock();
            match inflight.get(&key) {
                Some(fut) => {
                    trace!(target: "network::inflight", method = %key.method, "joining request");
                    fut.clone()
                }
                None => {
                    let table = Arc::clone(&self.inflight);
                    let entry = key.clone();
                    let fut = async move {
                        let res = next.run(request).await;
                        table.lock().remove(&entry);
                        res
                    }
                    .boxed()
                    .shared();
                    inflight.insert(key, fut.clone());
                    fut
                }
            }
        };
        fut.await
    }
}

impl fmt::Debug for InflightMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InflightMiddleware")
            .field("inflight", &self.inflight.lock().len())
            .finish_non_exhaustive()
    }
}
