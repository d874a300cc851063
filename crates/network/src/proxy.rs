//! An indirection handle whose target can be swapped while callers hold on to it.

use crate::{
    block_tracker::{BlockTrackerEvent, PollingBlockTracker},
    error::{Result, TransportError},
    provider::Provider,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::broadcast;
use wallet_rpc::Request;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The provider and block tracker a proxy currently forwards to
#[derive(Clone, Debug)]
pub struct ProxyTarget {
    pub provider: Arc<dyn Provider>,
    pub block_tracker: PollingBlockTracker,
}

/// Forwards requests and block tracker events to whatever target is installed.
///
/// Requests dispatched before a [SwappableProxy::retarget] complete against the old target, every
/// request issued after it returns goes to the new one. Event subscriptions survive the swap:
/// every event the old tracker published before the swap is delivered, none after it.
#[derive(Clone)]
pub struct SwappableProxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    target: RwLock<ProxyTarget>,
    /// relayed to by the tracker of the current target
    events: Arc<broadcast::Sender<BlockTrackerEvent>>,
    /// incremented on every swap
    generation: AtomicU64,
}

// === impl SwappableProxy ===

impl SwappableProxy {
    /// Creates a new proxy for the target.
    pub fn new(target: ProxyTarget) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let events = Arc::new(events);
        target.block_tracker.add_relay(Arc::clone(&events));
        let target = RwLock::new(target);
        Self { inner: Arc::new(ProxyInner { target, events, generation: AtomicU64::new(0) }) }
    }

    /// Atomically replaces the target.
    pub fn retarget(&self, target: ProxyTarget) {
        let generation = {
            let mut slot = self.inner.target.write();
            slot.block_tracker.remove_relay(&self.inner.events);
            target.block_tracker.add_relay(Arc::clone(&self.inner.events));
            *slot = target;
            self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        debug!(target: "network::proxy", generation, "retargeted proxy");
    }

    /// Returns a snapshot of the current target
    pub fn target(&self) -> ProxyTarget {
        self.inner.target.read().clone()
    }

    pub fn provider(&self) -> Arc<dyn Provider> {
        Arc::clone(&self.inner.target.read().provider)
    }

    pub fn block_tracker(&self) -> PollingBlockTracker {
        self.inner.target.read().block_tracker.clone()
    }

    /// Number of swaps performed so far
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Subscribes to the block tracker events of the current and all future targets
    pub fn subscribe(&self) -> broadcast::Receiver<BlockTrackerEvent> {
        self.inner.events.subscribe()
    }

    pub fn latest_block_number(&self) -> Option<u64> {
        self.block_tracker().latest_block_number()
    }

    pub async fn latest_block(&self) -> Result<u64, TransportError> {
        self.block_tracker().latest_block().await
    }

    pub async fn check_for_latest_block(&self) -> Result<u64, TransportError> {
        self.block_tracker().check_for_latest_block().await
    }
}

#[async_trait::async_trait]
impl Provider for SwappableProxy {
    async fn request(&self, request: Request) -> Result<Value> {
        let provider = self.provider();
        provider.request(request).await
    }
}

impl fmt::Debug for SwappableProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwappableProxy")
            .field("target", &*self.inner.target.read())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        self.target.get_mut().block_tracker.remove_relay(&self.events);
    }
}
