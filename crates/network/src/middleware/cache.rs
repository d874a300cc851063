use super::{Middleware, Next, dispatch_block};
use crate::{
    block_tracker::PollingBlockTracker,
    error::Result,
    methods::{
        CacheTier, MethodInfo, block_param, can_cache_result, method_info, parse_block_ref,
        resolve_earliest,
    },
};
use alloy_eips::BlockNumberOrTag;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::num::NonZeroUsize;
use wallet_rpc::Request;

/// Identifies a cacheable request.
///
/// Shared by the cache and the inflight table.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: String,
    /// params serialized with sorted object keys
    pub params: String,
    pub tier: CacheTier,
    /// the block a block-scoped result belongs to
    pub block: Option<u64>,
}

impl CacheKey {
    /// Returns the key of the request when dispatched at block `latest`.
    ///
    /// Returns `None` if the request can't be cached, for example because it refers to the
    /// pending block. Fork-scoped requests whose range follows the chain head are keyed like
    /// block-scoped ones at `latest`.
    pub fn new(request: &Request, info: &MethodInfo, latest: u64) -> Option<Self> {
        let (tier, block) = match info.tier {
            CacheTier::Never => return None,
            CacheTier::Permanent => (CacheTier::Permanent, None),
            CacheTier::Fork => match fork_range(request) {
                ForkRange::Pinned => (CacheTier::Fork, None),
                ForkRange::Head => (CacheTier::Block, Some(latest)),
                ForkRange::Pending => return None,
            },
            CacheTier::Block => match info.block_param_index {
                None => (CacheTier::Block, Some(latest)),
                Some(index) => match resolve_earliest(block_param(request, index)?) {
                    BlockNumberOrTag::Latest => (CacheTier::Block, Some(latest)),
                    BlockNumberOrTag::Number(number) => (CacheTier::Block, Some(number)),
                    _ => return None,
                },
            },
        };
        let params = canonicalize(&request.params.clone().into()).to_string();
        Some(Self { method: request.method.clone(), params, tier, block })
    }
}

/// How a fork-scoped request refers to the chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ForkRange {
    /// explicit block numbers or a block hash only
    Pinned,
    /// moves with the latest block
    Head,
    Pending,
}

fn fork_range(request: &Request) -> ForkRange {
    let refs = match request.method() {
        "eth_getLogs" => match request.param(0) {
            Some(Value::Object(filter)) if filter.contains_key("blockHash") => {
                return ForkRange::Pinned;
            }
            Some(Value::Object(filter)) => vec![filter.get("fromBlock"), filter.get("toBlock")],
            _ => return ForkRange::Head,
        },
        // the range of an installed filter isn't known here
        "eth_getFilterLogs" => return ForkRange::Head,
        _ => vec![request.param(0)],
    };
    let mut range = ForkRange::Pinned;
    for block in refs.into_iter().map(parse_block_ref) {
        match block.map(resolve_earliest) {
            Some(BlockNumberOrTag::Number(_)) => {}
            Some(BlockNumberOrTag::Pending) => return ForkRange::Pending,
            _ => range = ForkRange::Head,
        }
    }
    range
}

/// Sorts object keys recursively so equal params serialize identically
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries = map.iter().collect::<Vec<_>>();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect())
        }
        Value::Array(values) => Value::Array(values.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    stored_at: u64,
    /// keyed by the latest block rather than an explicit number
    rolls_off: bool,
}

#[derive(Debug)]
struct CacheState {
    entries: LruCache<CacheKey, CacheEntry>,
    pruned_at: u64,
}

impl CacheState {
    fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { entries: LruCache::new(capacity), pruned_at: 0 }
    }

    fn get(&mut self, key: &CacheKey, latest: u64, fork_depth: u64) -> Option<Value> {
        self.prune(latest, fork_depth);
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    fn insert(&mut self, key: CacheKey, value: Value, latest: u64) {
        let rolls_off = key.tier == CacheTier::Block && key.block == Some(latest);
        self.entries.put(key, CacheEntry { value, stored_at: latest, rolls_off });
    }

    /// Drops entries that are no longer valid at block `latest`
    fn prune(&mut self, latest: u64, fork_depth: u64) {
        if latest == self.pruned_at {
            return;
        }
        let stale = self
            .entries
            .iter()
            .filter(|(key, entry)| match key.tier {
                CacheTier::Block => entry.rolls_off && key.block != Some(latest),
                CacheTier::Fork => latest.saturating_sub(entry.stored_at) > fork_depth,
                CacheTier::Permanent | CacheTier::Never => false,
            })
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        for key in stale {
            self.entries.pop(&key);
        }
        self.pruned_at = latest;
    }
}

/// Serves cacheable methods from results fetched earlier.
///
/// Empty results are never stored so a later real result can take their place. Holds at most
/// `capacity` results, evicting the least recently used.
#[derive(Debug)]
pub struct BlockCacheMiddleware {
    block_tracker: PollingBlockTracker,
    fork_depth: u64,
    state: Mutex<CacheState>,
}

impl BlockCacheMiddleware {
    pub fn new(block_tracker: PollingBlockTracker, fork_depth: u64, capacity: usize) -> Self {
        Self { block_tracker, fork_depth, state: Mutex::new(CacheState::new(capacity)) }
    }
}

#[async_trait::async_trait]
impl Middleware for BlockCacheMiddleware {
    async fn handle(&self, request: Request, next: Next) -> Result<Value> {
        let info = method_info(request.method());
        if !info.is_cacheable() {
            return next.run(request).await;
        }
        let latest = dispatch_block(&self.block_tracker).await?;
        let Some(key) = CacheKey::new(&request, &info, latest) else {
            trace!(target: "network::cache", method = %request.method, "request is not cacheable");
            return next.run(request).await;
        };

        let cached = self.state.lock().get(&key, latest, self.fork_depth);
        if let Some(value) = cached {
            trace!(target: "network::cache", method = %key.method, block = ?key.block, "cache hit");
            return Ok(value);
        }
        trace!(target: "network::cache", method = %key.method, block = ?key.block, "cache miss");

        let value = next.run(request).await?;
        if can_cache_result(&info, &value) {
            self.state.lock().insert(key, value.clone(), latest);
        } else {
            trace!(target: "network::cache", method = %key.method, "not caching result");
        }
        Ok(value)
    }
}
