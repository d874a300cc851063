//! The request pipeline.
//!
//! A pipeline is an ordered list of [Middleware] stages in front of a [Transport]. Each stage may
//! answer the request itself, rewrite it and forward it, or pass it through unchanged.

use crate::{
    block_tracker::PollingBlockTracker,
    config::{BackendAdapter, ChainId, ClientConfig},
    error::Result,
    provider::Provider,
    transport::{Transport, TranslatingTransport},
};
use futures::{FutureExt, future::BoxFuture};
use serde_json::Value;
use std::{fmt, sync::Arc};
use wallet_rpc::Request;

mod block_ref;
mod cache;
mod inflight;
mod inspector;
mod retry;
mod scaffold;

pub use block_ref::BlockRefMiddleware;
pub use cache::{BlockCacheMiddleware, CacheKey};
pub use inflight::InflightMiddleware;
pub use inspector::BlockTrackerInspector;
pub use retry::RetryOnEmptyMiddleware;
pub use scaffold::ScaffoldMiddleware;

pub(crate) use block_ref::set_param;

/// A single stage of a [Pipeline].
#[async_trait::async_trait]
pub trait Middleware: Send + Sync + fmt::Debug {
    /// Handles the request, calling `next` to forward it to the remaining stages.
    async fn handle(&self, request: Request, next: Next) -> Result<Value>;
}

/// The remaining stages of a pipeline.
///
/// Owned, so stages can run it any number of times.
#[derive(Clone)]
pub struct Next {
    stack: Arc<[Arc<dyn Middleware>]>,
    transport: Arc<dyn Transport>,
    index: usize,
}

impl Next {
    /// Forwards the request to the next stage, or the transport after the last one.
    pub fn run(self, request: Request) -> BoxFuture<'static, Result<Value>> {
        async move {
            let middleware = self.stack.get(self.index).cloned();
            match middleware {
                Some(middleware) => {
                    let next = Self { index: self.index + 1, ..self };
                    middleware.handle(request, next).await
                }
                None => Ok(self.transport.send(request).await?),
            }
        }
        .boxed()
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("index", &self.index).field("len", &self.stack.len()).finish()
    }
}

/// Declarative description of a pipeline stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Answers `eth_chainId`, and `net_version` if set, from configuration
    Scaffold { chain_id: ChainId, network_version: Option<String> },
    /// Normalizes block parameters, replacing `latest` with a concrete number if set
    BlockRef { substitute_latest: bool },
    Cache,
    Inflight,
    RetryOnEmpty,
    Inspector,
}

/// Which kind of backend a pipeline talks to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backend {
    /// A built-in network served by the hosted infrastructure
    BuiltIn { chain_id: ChainId, network_version: String },
    /// An arbitrary JSON-RPC endpoint
    Custom { chain_id: ChainId },
    /// A custom endpoint speaking a different dialect, its transport translates requests
    Alternate { chain_id: ChainId, adapter: BackendAdapter },
}

impl Backend {
    /// Returns the stages for this backend, in dispatch order
    pub fn stages(&self) -> Vec<Stage> {
        let tail = [Stage::Cache, Stage::Inflight, Stage::RetryOnEmpty, Stage::Inspector];
        let mut stages = Vec::with_capacity(6);
        match self {
            Self::BuiltIn { chain_id, network_version } => {
                stages.push(Stage::Scaffold {
                    chain_id: *chain_id,
                    network_version: Some(network_version.clone()),
                });
                stages.push(Stage::BlockRef { substitute_latest: false });
            }
            Self::Custom { chain_id } => {
                stages.push(Stage::Scaffold { chain_id: *chain_id, network_version: None });
                stages.push(Stage::BlockRef { substitute_latest: true });
            }
            Self::Alternate { chain_id, .. } => {
                stages.push(Stage::Scaffold { chain_id: *chain_id, network_version: None });
                // tags are translated into the backend's own
                stages.push(Stage::BlockRef { substitute_latest: false });
            }
        }
        stages.extend(tail);
        stages
    }

    /// Returns the transport the pipeline and block tracker of this backend share.
    ///
    /// Alternate backends get the translation in front of the terminal transport so every stage
    /// keys its method rules on the `eth_*` name.
    pub fn transport(&self, transport: Arc<dyn Transport>) -> Arc<dyn Transport> {
        match self {
            Self::Alternate { adapter, .. } => {
                Arc::new(TranslatingTransport::new(adapter.clone(), transport))
            }
            Self::BuiltIn { .. } | Self::Custom { .. } => transport,
        }
    }
}

/// A composed request pipeline for one network configuration.
///
/// The cache and inflight tables belong to this pipeline alone.
#[derive(Clone, Debug)]
pub struct Pipeline {
    head: Next,
}

// === impl Pipeline ===

impl Pipeline {
    /// Builds the pipeline for the given stages.
    pub fn new(
        stages: Vec<Stage>,
        block_tracker: &PollingBlockTracker,
        transport: Arc<dyn Transport>,
        config: &ClientConfig,
    ) -> Self {
        let stack = stages
            .into_iter()
            .map(|stage| -> Arc<dyn Middleware> {
                let tracker = block_tracker.clone();
                match stage {
                    Stage::Scaffold { chain_id, network_version } => {
                        Arc::new(ScaffoldMiddleware::new(chain_id, network_version))
                    }
                    Stage::BlockRef { substitute_latest } => {
                        Arc::new(BlockRefMiddleware::new(tracker, substitute_latest))
                    }
                    Stage::Cache => {
                        Arc::new(BlockCacheMiddleware::new(
                            tracker,
                            config.fork_cache_depth,
                            config.cache_capacity,
                        ))
                    }
                    Stage::Inflight => Arc::new(InflightMiddleware::new(tracker)),
                    Stage::RetryOnEmpty => {
                        Arc::new(RetryOnEmptyMiddleware::new(tracker, config.retry_max_attempts))
                    }
                    Stage::Inspector => Arc::new(BlockTrackerInspector::new(tracker)),
                }
            })
            .collect();
        Self { head: Next { stack, transport, index: 0 } }
    }

    /// Sends the request through all stages
    pub async fn handle(&self, request: Request) -> Result<Value> {
        self.head.clone().run(request).await
    }
}

#[async_trait::async_trait]
impl Provider for Pipeline {
    async fn request(&self, request: Request) -> Result<Value> {
        self.handle(request).await
    }
}

/// Returns the block the request is dispatched at
async fn dispatch_block(block_tracker: &PollingBlockTracker) -> Result<u64> {
    Ok(block_tracker.latest_block().await?)
}
