//! Filter and subscription emulation on top of a plain request/response provider.
//!
//! Filters are advanced block by block using the block tracker as clock: every new block queries
//! the range between a filter's last seen block (exclusive) and the new latest block (inclusive),
//! so an entry is delivered exactly once.

use crate::{
    block_tracker::BlockTrackerEvent,
    error::{ClientError, Result},
    methods::to_quantity,
    provider::Provider,
    proxy::SwappableProxy,
};
use alloy_eips::BlockNumberOrTag;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    sync::{Mutex, broadcast, broadcast::error::RecvError},
    task::JoinHandle,
    time::Instant,
};
use wallet_rpc::{Request, SubscriptionId, Version, subscription::random_id};

/// Block filters and header subscriptions catch up on at most this many blocks
pub const MAX_BLOCK_CATCH_UP: u64 = 100;

const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// Parameters of a log filter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFilter {
    params: Map<String, Value>,
    from_block: Option<u64>,
    to_block: Option<u64>,
}

// === impl LogFilter ===

impl LogFilter {
    /// Parses the filter object of `eth_newFilter` or `eth_subscribe`
    pub fn new(params: Value) -> Result<Self> {
        let params = match params {
            Value::Object(params) => params,
            Value::Null => Map::new(),
            other => return Err(ClientError::InvalidParams(format!("invalid filter {other}"))),
        };
        let from_block = block_bound(params.get("fromBlock"))?;
        let to_block = block_bound(params.get("toBlock"))?;
        Ok(Self { params, from_block, to_block })
    }

    /// The filter object as it was installed
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// The block range to query after `last_seen`, if any
    fn range(&self, last_seen: u64, latest: u64) -> Option<(u64, u64)> {
        let from = (last_seen + 1).max(self.from_block.unwrap_or_default());
        let to = latest.min(self.to_block.unwrap_or(u64::MAX));
        (from <= to).then_some((from, to))
    }

    fn query(&self, from: u64, to: u64) -> Value {
        let mut params = self.params.clone();
        params.insert("fromBlock".to_string(), to_quantity(from));
        params.insert("toBlock".to_string(), to_quantity(to));
        Value::Object(params)
    }
}

/// Returns the concrete block of a filter bound, `None` for tags that follow the chain head
fn block_bound(value: Option<&Value>) -> Result<Option<u64>> {
    let Some(Value::String(tag)) = value else { return Ok(None) };
    match BlockNumberOrTag::from_str(tag) {
        Ok(BlockNumberOrTag::Number(number)) => Ok(Some(number)),
        Ok(BlockNumberOrTag::Earliest) => Ok(Some(0)),
        Ok(_) => Ok(None),
        Err(_) => Err(ClientError::InvalidParams(format!("invalid block {tag:?}"))),
    }
}

/// What a subscription delivers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// new block headers
    NewHeads,
    /// logs matching the filter
    Logs(LogFilter),
}

impl SubscriptionKind {
    /// Parses the params of `eth_subscribe`
    pub fn from_params(params: &[Value]) -> Result<Self> {
        match params.first().and_then(Value::as_str) {
            Some("newHeads") => Ok(Self::NewHeads),
            Some("logs") => {
                let filter = LogFilter::new(params.get(1).cloned().unwrap_or_default())?;
                Ok(Self::Logs(filter))
            }
            Some(kind) => {
                Err(ClientError::InvalidParams(format!("unsupported subscription {kind:?}")))
            }
            None => Err(ClientError::InvalidParams("missing subscription kind".to_string())),
        }
    }
}

/// A pushed subscription event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionNotification {
    pub jsonrpc: Version,
    pub method: String,
    pub params: SubscriptionParams,
}

impl SubscriptionNotification {
    pub fn new(subscription: SubscriptionId, result: Value) -> Self {
        Self {
            jsonrpc: Version::V2,
            method: "eth_subscription".to_string(),
            params: SubscriptionParams { subscription, result },
        }
    }
}

/// Represents the `params` field of an `eth_subscription` event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionParams {
    pub subscription: SubscriptionId,
    pub result: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Watch {
    Logs(LogFilter),
    BlockHashes,
    Headers,
}

/// Tracks how far a filter or subscription has been delivered
#[derive(Debug)]
struct Cursor {
    watch: Watch,
    last_seen: u64,
}

impl Cursor {
    fn new(watch: Watch, last_seen: u64) -> Self {
        Self { watch, last_seen }
    }

    /// Returns the entries in `(last_seen, latest]` and moves the cursor to `latest`.
    ///
    /// On failure the cursor stays put so the range is queried again.
    async fn advance(&mut self, provider: &dyn Provider, latest: u64) -> Result<Vec<Value>> {
        if latest < self.last_seen {
            debug!(
                target: "network::filter",
                last_seen = self.last_seen, latest,
                "chain head moved back, resetting cursor"
            );
            self.last_seen = latest;
            return Ok(Vec::new());
        }
        if latest == self.last_seen {
            return Ok(Vec::new());
        }

        let entries = match &self.watch {
            Watch::Logs(filter) => {
                let Some((from, to)) = filter.range(self.last_seen, latest) else {
                    self.last_seen = latest;
                    return Ok(Vec::new());
                };
                match provider.call("eth_getLogs", vec![filter.query(from, to)]).await? {
                    Value::Array(logs) => logs,
                    Value::Null => Vec::new(),
                    other => {
                        return Err(ClientError::Decode {
                            what: "logs",
                            reason: format!("expected an array, got {other}"),
                        });
                    }
                }
            }
            Watch::BlockHashes | Watch::Headers => {
                let first =
                    (self.last_seen + 1).max(latest.saturating_sub(MAX_BLOCK_CATCH_UP - 1));
                let mut entries = Vec::new();
                for number in first..=latest {
                    let params = vec![to_quantity(number), Value::Bool(false)];
                    let block = provider.call("eth_getBlockByNumber", params).await?;
                    if block.is_null() {
                        continue;
                    }
                    if self.watch == Watch::Headers {
                        entries.push(block);
                    } else if let Some(hash) = block.get("hash") {
                        entries.push(hash.clone());
                    }
                }
                entries
            }
        };
        self.last_seen = latest;
        Ok(entries)
    }
}

#[derive(Debug)]
struct InstalledFilter {
    cursor: Cursor,
    /// entries collected since the last poll
    pending: Vec<Value>,
    last_poll: Instant,
}

#[derive(Debug, Default)]
struct FilterState {
    filters: HashMap<String, InstalledFilter>,
    subscriptions: HashMap<SubscriptionId, Cursor>,
}

impl FilterState {
    /// Removes filters that have not been polled within `timeout`
    fn evict(&mut self, now: Instant, timeout: Duration) {
        self.filters.retain(|id, filter| {
            let alive = now.duration_since(filter.last_poll) <= timeout;
            if !alive {
                trace!(target: "network::filter", %id, "evicting stale filter");
            }
            alive
        });
    }
}

/// Serves the filter and subscription methods, forwarding everything else to the proxy.
#[derive(Clone)]
pub struct FilterManager {
    inner: Arc<FilterInner>,
}

struct FilterInner {
    proxy: SwappableProxy,
    state: Mutex<FilterState>,
    notifications: broadcast::Sender<SubscriptionNotification>,
    timeout: Duration,
    listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

// === impl FilterManager ===

impl FilterManager {
    /// Creates a manager that advances its filters on every new block of the proxy.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(proxy: SwappableProxy, timeout: Duration) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let events = proxy.subscribe();
        let inner = Arc::new(FilterInner {
            proxy,
            state: Default::default(),
            notifications,
            timeout,
            listener: Default::default(),
        });
        let listener = tokio::spawn(listen(Arc::downgrade(&inner), events));
        *inner.listener.lock() = Some(listener);
        Self { inner }
    }

    /// Installs a log filter, returns its id
    pub async fn new_filter(&self, params: Value) -> Result<String> {
        let filter = LogFilter::new(params)?;
        self.install(Watch::Logs(filter)).await
    }

    /// Installs a filter for new block hashes, returns its id
    pub async fn new_block_filter(&self) -> Result<String> {
        self.install(Watch::BlockHashes).await
    }

    async fn install(&self, watch: Watch) -> Result<String> {
        let latest = self.inner.proxy.latest_block().await?;
        let id = random_id();
        let filter = InstalledFilter {
            cursor: Cursor::new(watch, latest),
            pending: Vec::new(),
            last_poll: Instant::now(),
        };
        self.inner.state.lock().await.filters.insert(id.clone(), filter);
        trace!(target: "network::filter", %id, latest, "installed filter");
        Ok(id)
    }

    /// Returns all entries since the last poll of the filter
    pub async fn get_filter_changes(&self, id: &str) -> Result<Vec<Value>> {
        let now = Instant::now();
        let mut state = self.inner.state.lock().await;
        state.evict(now, self.inner.timeout);
        // read under the lock so a concurrent update can't leave the cursor ahead of `latest`
        let latest = self.inner.proxy.latest_block_number();
        let filter =
            state.filters.get_mut(id).ok_or_else(|| ClientError::FilterNotFound(id.to_string()))?;
        filter.last_poll = now;
        if let Some(latest) = latest {
            let entries = filter.cursor.advance(&self.inner.proxy, latest).await?;
            filter.pending.extend(entries);
        }
        Ok(std::mem::take(&mut filter.pending))
    }

    /// Returns all logs matching the filter, regardless of what has been delivered
    pub async fn get_filter_logs(&self, id: &str) -> Result<Value> {
        let params = {
            let now = Instant::now();
            let mut state = self.inner.state.lock().await;
            state.evict(now, self.inner.timeout);
            let filter = state
                .filters
                .get_mut(id)
                .ok_or_else(|| ClientError::FilterNotFound(id.to_string()))?;
            filter.last_poll = now;
            match &filter.cursor.watch {
                Watch::Logs(filter) => filter.params().clone(),
                _ => return Err(ClientError::InvalidParams(format!("{id} is not a log filter"))),
            }
        };
        self.inner.proxy.call("eth_getLogs", vec![Value::Object(params)]).await
    }

    /// Removes the filter, returns false if it didn't exist
    pub async fn uninstall_filter(&self, id: &str) -> bool {
        self.inner.state.lock().await.filters.remove(id).is_some()
    }

    /// Starts a push subscription, notifications are published on [Self::notifications]
    pub async fn subscribe(&self, kind: SubscriptionKind) -> Result<SubscriptionId> {
        let latest = self.inner.proxy.latest_block().await?;
        let watch = match kind {
            SubscriptionKind::NewHeads => Watch::Headers,
            SubscriptionKind::Logs(filter) => Watch::Logs(filter),
        };
        let id = SubscriptionId::random();
        self.inner.state.lock().await.subscriptions.insert(id.clone(), Cursor::new(watch, latest));
        trace!(target: "network::filter", %id, latest, "new subscription");
        Ok(id)
    }

    /// Ends the subscription, returns false if it didn't exist
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        self.inner.state.lock().await.subscriptions.remove(id).is_some()
    }

    pub fn notifications(&self) -> broadcast::Receiver<SubscriptionNotification> {
        self.inner.notifications.subscribe()
    }

    /// Number of installed filters
    pub async fn filter_count(&self) -> usize {
        self.inner.state.lock().await.filters.len()
    }

    /// Advances every filter and subscription to the latest block of the proxy
    pub async fn update(&self) {
        let proxy = &self.inner.proxy;
        let mut state = self.inner.state.lock().await;
        state.evict(Instant::now(), self.inner.timeout);
        let Some(latest) = proxy.latest_block_number() else { return };

        for (id, filter) in &mut state.filters {
            match filter.cursor.advance(proxy, latest).await {
                Ok(entries) => filter.pending.extend(entries),
                Err(err) => warn!(target: "network::filter", %id, %err, "failed to update filter"),
            }
        }
        for (id, cursor) in &mut state.subscriptions {
            match cursor.advance(proxy, latest).await {
                Ok(entries) => {
                    for entry in entries {
                        let notification = SubscriptionNotification::new(id.clone(), entry);
                        let _ = self.inner.notifications.send(notification);
                    }
                }
                Err(err) => {
                    warn!(target: "network::filter", %id, %err, "failed to update subscription")
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Provider for FilterManager {
    async fn request(&self, request: Request) -> Result<Value> {
        let params = request.params_array();
        match request.method.as_str() {
            "eth_newFilter" => {
                let filter = params.first().cloned().unwrap_or_default();
                Ok(Value::String(self.new_filter(filter).await?))
            }
            "eth_newBlockFilter" => Ok(Value::String(self.new_block_filter().await?)),
            "eth_getFilterChanges" => {
                Ok(Value::Array(self.get_filter_changes(filter_id(params)?).await?))
            }
            "eth_getFilterLogs" => self.get_filter_logs(filter_id(params)?).await,
            "eth_uninstallFilter" => {
                Ok(Value::Bool(self.uninstall_filter(filter_id(params)?).await))
            }
            "eth_subscribe" => {
                let id = self.subscribe(SubscriptionKind::from_params(params)?).await?;
                Ok(Value::String(id.to_string()))
            }
            "eth_unsubscribe" => {
                let id = SubscriptionId::String(filter_id(params)?.to_string());
                Ok(Value::Bool(self.unsubscribe(&id).await))
            }
            _ => self.inner.proxy.request(request).await,
        }
    }
}

impl fmt::Debug for FilterManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterManager")
            .field("proxy", &self.inner.proxy)
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

impl Drop for FilterInner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

fn filter_id(params: &[Value]) -> Result<&str> {
    params
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::InvalidParams("missing id".to_string()))
}

/// Advances the manager's filters on every new block
async fn listen(manager: Weak<FilterInner>, mut events: broadcast::Receiver<BlockTrackerEvent>) {
    loop {
        match events.recv().await {
            Ok(BlockTrackerEvent::Latest(_)) => {
                let Some(inner) = manager.upgrade() else { break };
                FilterManager { inner }.update().await;
            }
            Ok(BlockTrackerEvent::Error(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                debug!(target: "network::filter", skipped, "missed block events");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
