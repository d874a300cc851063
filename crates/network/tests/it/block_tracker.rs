use crate::utils::MockTransport;
use std::{sync::Arc, time::Duration};
use wallet_network::{BlockTrackerEvent, PollingBlockTracker, Transport, TransportError};

fn tracker(transport: &Arc<MockTransport>) -> PollingBlockTracker {
    let transport: Arc<dyn Transport> = Arc::clone(transport) as _;
    PollingBlockTracker::new(transport, Duration::from_secs(20))
}

#[tokio::test(start_paused = true)]
async fn polls_until_stopped() {
    let transport = MockTransport::new(7);
    transport.auto_mine(true);
    let tracker = tracker(&transport);
    let mut events = tracker.subscribe();

    assert!(!tracker.is_polling());
    tracker.start();
    assert!(tracker.is_polling());

    assert_eq!(events.recv().await.unwrap(), BlockTrackerEvent::Latest(8));
    assert_eq!(events.recv().await.unwrap(), BlockTrackerEvent::Latest(9));
    assert_eq!(tracker.latest_block_number(), Some(9));

    tracker.stop();
    assert!(!tracker.is_polling());
    let polls = transport.calls("eth_blockNumber");
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.calls("eth_blockNumber"), polls);

    // restarting keeps existing subscriptions
    tracker.start();
    assert_eq!(events.recv().await.unwrap(), BlockTrackerEvent::Latest(10));
}

#[tokio::test(start_paused = true)]
async fn only_publishes_changes() {
    let transport = MockTransport::new(3);
    let tracker = tracker(&transport);
    let mut events = tracker.subscribe();

    assert_eq!(tracker.check_for_latest_block().await.unwrap(), 3);
    assert_eq!(tracker.check_for_latest_block().await.unwrap(), 3);
    transport.set_block(4);
    assert_eq!(tracker.check_for_latest_block().await.unwrap(), 4);

    assert_eq!(events.try_recv().unwrap(), BlockTrackerEvent::Latest(3));
    assert_eq!(events.try_recv().unwrap(), BlockTrackerEvent::Latest(4));
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn joins_outstanding_poll() {
    let transport = MockTransport::new(3);
    transport.set_delay(Duration::from_secs(1));
    let tracker = tracker(&transport);

    let (a, b) = tokio::join!(tracker.latest_block(), tracker.check_for_latest_block());
    assert_eq!((a.unwrap(), b.unwrap()), (3, 3));
    assert_eq!(transport.calls("eth_blockNumber"), 1);

    // the cached number is served without polling
    assert_eq!(tracker.latest_block().await.unwrap(), 3);
    assert_eq!(transport.calls("eth_blockNumber"), 1);
}

#[tokio::test(start_paused = true)]
async fn keeps_polling_after_errors() {
    crate::init_tracing();
    let transport = MockTransport::new(3);
    transport.on("eth_blockNumber", |_| Err(TransportError::Timeout));
    let tracker = tracker(&transport);
    let mut events = tracker.subscribe();
    tracker.start();

    assert_eq!(events.recv().await.unwrap(), BlockTrackerEvent::Error(TransportError::Timeout));
    assert_eq!(events.recv().await.unwrap(), BlockTrackerEvent::Error(TransportError::Timeout));
    assert!(tracker.is_polling());
    assert_eq!(tracker.latest_block_number(), None);

    transport.on("eth_blockNumber", |_| Ok(serde_json::json!("0x2a")));
    assert_eq!(events.recv().await.unwrap(), BlockTrackerEvent::Latest(42));
    assert_eq!(tracker.latest_block_number(), Some(42));
}
