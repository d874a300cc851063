//! Polls the transport for the chain's latest block number.

use crate::{error::TransportError, methods::parse_quantity, transport::Transport};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use parking_lot::{Mutex, RwLock};
use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use wallet_rpc::{Request, RequestParams};

/// Capacity of the event channel, slow receivers lag behind rather than block the tracker
const EVENT_CHANNEL_CAPACITY: usize = 64;

type PendingPoll = Shared<BoxFuture<'static, Result<u64, TransportError>>>;

/// Events published by a [PollingBlockTracker]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockTrackerEvent {
    /// The latest block number changed
    Latest(u64),
    /// A poll failed, the tracker keeps polling
    Error(TransportError),
}

/// Snapshot of a tracker's state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockTrackerState {
    pub latest_block_number: Option<u64>,
    pub poll_interval: Duration,
    pub is_polling: bool,
}

/// Tracks the latest block by polling `eth_blockNumber` on a fixed interval.
///
/// At most one poll is outstanding at a time: a forced check while a poll is in flight joins the
/// in-flight request instead of issuing another one.
#[derive(Clone)]
pub struct PollingBlockTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    transport: Arc<dyn Transport>,
    poll_interval: Duration,
    latest: RwLock<Option<u64>>,
    events: broadcast::Sender<BlockTrackerEvent>,
    /// channels of proxies currently targeting this tracker, published to alongside `events`
    relays: Mutex<Vec<Arc<broadcast::Sender<BlockTrackerEvent>>>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    pending: Mutex<Option<PendingPoll>>,
}

// === impl PollingBlockTracker ===

impl PollingBlockTracker {
    pub fn new(transport: Arc<dyn Transport>, poll_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(TrackerInner {
                transport,
                poll_interval,
                latest: RwLock::new(None),
                events,
                relays: Mutex::new(Vec::new()),
                poll_task: Mutex::new(None),
                pending: Mutex::new(None),
            }),
        }
    }

    /// Starts polling on the configured interval, the first poll is issued immediately.
    ///
    /// Does nothing if the tracker is already polling.
    pub fn start(&self) {
        let mut task = self.inner.poll_task.lock();
        if task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        trace!(target: "block_tracker", interval = ?self.inner.poll_interval, "start polling");
        let inner = Arc::downgrade(&self.inner);
        let poll_interval = self.inner.poll_interval;
        *task = Some(tokio::spawn(poll_loop(inner, poll_interval)));
    }

    /// Stops polling, event subscriptions stay intact so the tracker can be restarted.
    pub fn stop(&self) {
        if let Some(task) = self.inner.poll_task.lock().take() {
            trace!(target: "block_tracker", "stop polling");
            task.abort();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.inner.poll_task.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Returns the latest block number seen so far, without polling
    pub fn latest_block_number(&self) -> Option<u64> {
        *self.inner.latest.read()
    }

    pub fn state(&self) -> BlockTrackerState {
        BlockTrackerState {
            latest_block_number: self.latest_block_number(),
            poll_interval: self.inner.poll_interval,
            is_polling: self.is_polling(),
        }
    }

    /// Subscribes to [BlockTrackerEvent]s
    pub fn subscribe(&self) -> broadcast::Receiver<BlockTrackerEvent> {
        self.inner.events.subscribe()
    }

    /// Publishes every future event to `events` as well.
    pub(crate) fn add_relay(&self, events: Arc<broadcast::Sender<BlockTrackerEvent>>) {
        self.inner.relays.lock().push(events);
    }

    /// Stops publishing to `events`, returns once no event is sent to it anymore.
    pub(crate) fn remove_relay(&self, events: &Arc<broadcast::Sender<BlockTrackerEvent>>) {
        self.inner.relays.lock().retain(|relay| !Arc::ptr_eq(relay, events));
    }

    /// Returns the latest block number, polling once if none is known yet.
    pub async fn latest_block(&self) -> Result<u64, TransportError> {
        if let Some(number) = self.latest_block_number() {
            return Ok(number);
        }
        self.check_for_latest_block().await
    }

    /// Forces an out-of-cycle poll.
    ///
    /// Joins the outstanding poll if there is one.
    pub async fn check_for_latest_block(&self) -> Result<u64, TransportError> {
        let poll = {
            let mut pending = self.inner.pending.lock();
            match pending.as_ref() {
                Some(poll) => poll.clone(),
                None => {
                    let inner = Arc::clone(&self.inner);
                    let poll = async move {
                        let res = inner.fetch_latest().await;
                        *inner.pending.lock() = None;
                        res
                    }
                    .boxed()
                    .shared();
                    *pending = Some(poll.clone());
                    poll
                }
            }
        };
        poll.await
    }

    /// Waits until the tracker publishes a new block.
    ///
    /// If the tracker isn't polling this waits one poll interval and forces a check instead, the
    /// returned number may then be unchanged.
    pub async fn wait_for_next_block(&self) -> Result<u64, TransportError> {
        if !self.is_polling() {
            tokio::time::sleep(self.inner.poll_interval).await;
            return self.check_for_latest_block().await;
        }
        let mut events = self.subscribe();
        loop {
            match events.recv().await {
                Ok(BlockTrackerEvent::Latest(number)) => return Ok(number),
                Ok(BlockTrackerEvent::Error(err)) => return Err(err),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return self.latest_block().await,
            }
        }
    }
}

impl fmt::Debug for PollingBlockTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingBlockTracker")
            .field("transport", &self.inner.transport)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// === impl TrackerInner ===

impl TrackerInner {
    async fn fetch_latest(&self) -> Result<u64, TransportError> {
        let request = Request::new("eth_blockNumber", RequestParams::None);
        let res = self.transport.send(request).await.and_then(|value| {
            parse_quantity(&value).ok_or_else(|| {
                TransportError::InvalidResponse(format!("invalid block number {value}"))
            })
        });
        match res {
            Ok(number) => {
                self.set_latest(number);
                Ok(number)
            }
            Err(err) => {
                warn!(target: "block_tracker", %err, "failed to fetch latest block");
                self.publish(BlockTrackerEvent::Error(err.clone()));
                Err(err)
            }
        }
    }

    fn set_latest(&self, number: u64) {
        let previous = self.latest.write().replace(number);
        if previous != Some(number) {
            trace!(target: "block_tracker", ?previous, number, "new latest block");
            self.publish(BlockTrackerEvent::Latest(number));
        }
    }

    fn publish(&self, event: BlockTrackerEvent) {
        // held while sending so a relay removed concurrently sees either all or none of it
        let relays = self.relays.lock();
        for relay in relays.iter() {
            let _ = relay.send(event.clone());
        }
        let _ = self.events.send(event);
    }
}

impl Drop for TrackerInner {
    fn drop(&mut self) {
        if let Some(task) = self.poll_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Polls until the tracker is stopped or dropped
async fn poll_loop(inner: Weak<TrackerInner>, poll_interval: Duration) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else { break };
        // failures are published as events
        let _ = PollingBlockTracker { inner }.check_for_latest_block().await;
    }
}
