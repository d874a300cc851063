use crate::utils::{MockTransport, block_hash, pipeline, quantity};
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use wallet_network::{
    BuiltInNetwork, ClientError, FilterManager, PollingBlockTracker, Provider, ProxyTarget,
    SwappableProxy, filter::SubscriptionKind, middleware::Backend,
};
use wallet_rpc::{Request, SubscriptionId};

const TIMEOUT: Duration = Duration::from_secs(300);

fn bound(request: &Request, key: &str) -> u64 {
    let value = request.param(0).and_then(|filter| filter.get(key)).and_then(Value::as_str);
    value.and_then(|hex| u64::from_str_radix(hex.trim_start_matches("0x"), 16).ok()).unwrap()
}

/// A node with one log per block and block hashes derived from the block number
fn node(block: u64) -> Arc<MockTransport> {
    let transport = MockTransport::new(block);
    transport.on("eth_getLogs", |req| {
        let logs = (bound(req, "fromBlock")..=bound(req, "toBlock"))
            .map(|number| json!({ "blockNumber": quantity(number), "logIndex": "0x0" }))
            .collect();
        Ok(Value::Array(logs))
    });
    transport.on("eth_getBlockByNumber", |req| {
        let number = req.param(0).and_then(Value::as_str).unwrap_or_default().to_string();
        let byte = u8::from_str_radix(number.trim_start_matches("0x"), 16).unwrap_or_default();
        Ok(json!({ "number": number, "hash": block_hash(byte) }))
    });
    transport
}

fn manager(transport: &Arc<MockTransport>) -> (FilterManager, PollingBlockTracker) {
    let network = BuiltInNetwork::Mainnet;
    let backend = Backend::BuiltIn {
        chain_id: network.chain_id(),
        network_version: network.network_version(),
    };
    let (pipeline, tracker) = pipeline(transport, backend);
    let proxy = SwappableProxy::new(ProxyTarget {
        provider: Arc::new(pipeline),
        block_tracker: tracker.clone(),
    });
    (FilterManager::new(proxy, TIMEOUT), tracker)
}

async fn mine_to(transport: &MockTransport, tracker: &PollingBlockTracker, block: u64) {
    transport.set_block(block);
    assert_eq!(tracker.check_for_latest_block().await.unwrap(), block);
}

fn log_blocks(entries: &[Value]) -> Vec<Value> {
    entries.iter().map(|log| log["blockNumber"].clone()).collect()
}

#[tokio::test(start_paused = true)]
async fn log_filters_deliver_each_block_once() {
    let transport = node(10);
    let (manager, tracker) = manager(&transport);

    let id = manager.new_filter(json!({ "address": "0xab" })).await.unwrap();
    assert!(manager.get_filter_changes(&id).await.unwrap().is_empty());

    mine_to(&transport, &tracker, 13).await;
    let changes = manager.get_filter_changes(&id).await.unwrap();
    assert_eq!(log_blocks(&changes), vec![quantity(11), quantity(12), quantity(13)]);

    // polling again without new blocks is an empty diff
    assert!(manager.get_filter_changes(&id).await.unwrap().is_empty());
    assert!(manager.get_filter_changes(&id).await.unwrap().is_empty());

    mine_to(&transport, &tracker, 14).await;
    tokio::task::yield_now().await;
    let changes = manager.get_filter_changes(&id).await.unwrap();
    assert_eq!(log_blocks(&changes), vec![quantity(14)]);

    for request in transport.requests("eth_getLogs") {
        assert_eq!(request.param(0).unwrap()["address"], json!("0xab"));
    }
}

#[tokio::test(start_paused = true)]
async fn log_filters_respect_their_range() {
    let transport = node(10);
    let (manager, tracker) = manager(&transport);

    let id = manager.new_filter(json!({ "fromBlock": "0xc", "toBlock": "0xd" })).await.unwrap();
    mine_to(&transport, &tracker, 20).await;
    let changes = manager.get_filter_changes(&id).await.unwrap();
    assert_eq!(log_blocks(&changes), vec![quantity(12), quantity(13)]);

    let logs = manager.get_filter_logs(&id).await.unwrap();
    assert_eq!(logs.as_array().map(Vec::len), Some(2));
}

#[tokio::test(start_paused = true)]
async fn resets_when_the_chain_moves_back() {
    let transport = node(10);
    let (manager, tracker) = manager(&transport);
    let id = manager.new_filter(json!({})).await.unwrap();

    mine_to(&transport, &tracker, 8).await;
    assert!(manager.get_filter_changes(&id).await.unwrap().is_empty());

    mine_to(&transport, &tracker, 9).await;
    let changes = manager.get_filter_changes(&id).await.unwrap();
    assert_eq!(log_blocks(&changes), vec![quantity(9)]);
}

#[tokio::test(start_paused = true)]
async fn block_filters_deliver_hashes() {
    let transport = node(10);
    let (manager, tracker) = manager(&transport);
    let id = manager.new_block_filter().await.unwrap();

    mine_to(&transport, &tracker, 12).await;
    let changes = manager.get_filter_changes(&id).await.unwrap();
    assert_eq!(changes, vec![json!(block_hash(11)), json!(block_hash(12))]);
    assert!(manager.get_filter_changes(&id).await.unwrap().is_empty());

    let err = manager.get_filter_logs(&id).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidParams(_)));
}

#[tokio::test(start_paused = true)]
async fn subscriptions_push_notifications() {
    let transport = node(10);
    let (manager, tracker) = manager(&transport);
    let mut notifications = manager.notifications();

    let heads = manager.subscribe(SubscriptionKind::NewHeads).await.unwrap();
    let logs = manager
        .call("eth_subscribe", vec![json!("logs"), json!({ "address": "0xab" })])
        .await
        .unwrap();
    let logs = SubscriptionId::String(logs.as_str().unwrap().to_string());

    mine_to(&transport, &tracker, 11).await;
    let mut received = Vec::new();
    for _ in 0..2 {
        let notification = notifications.recv().await.unwrap();
        assert_eq!(notification.method, "eth_subscription");
        received.push(notification.params);
    }
    let head = received.iter().find(|params| params.subscription == heads).unwrap();
    assert_eq!(head.result["number"], quantity(11));
    let log = received.iter().find(|params| params.subscription == logs).unwrap();
    assert_eq!(log.result["blockNumber"], quantity(11));

    assert!(manager.unsubscribe(&heads).await);
    assert!(!manager.unsubscribe(&heads).await);
    let unsubscribed = manager.call("eth_unsubscribe", vec![json!(logs.to_string())]).await;
    assert_eq!(unsubscribed.unwrap(), json!(true));
}

#[tokio::test(start_paused = true)]
async fn evicts_idle_filters() {
    let transport = node(10);
    let (manager, _tracker) = manager(&transport);
    let polled = manager.new_filter(json!({})).await.unwrap();
    let idle = manager.new_block_filter().await.unwrap();

    tokio::time::sleep(Duration::from_secs(200)).await;
    manager.get_filter_changes(&polled).await.unwrap();
    tokio::time::sleep(Duration::from_secs(200)).await;
    manager.get_filter_changes(&polled).await.unwrap();

    let err = manager.get_filter_changes(&idle).await.unwrap_err();
    assert_eq!(err, ClientError::FilterNotFound(idle));
    assert_eq!(manager.filter_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn serves_filter_methods_over_json_rpc() {
    let transport = node(10);
    let (manager, _tracker) = manager(&transport);

    let id = manager.call("eth_newBlockFilter", vec![]).await.unwrap();
    let changes = manager.call("eth_getFilterChanges", vec![id.clone()]).await.unwrap();
    assert_eq!(changes, json!([]));
    assert_eq!(manager.call("eth_uninstallFilter", vec![id.clone()]).await.unwrap(), json!(true));
    assert_eq!(manager.call("eth_uninstallFilter", vec![id.clone()]).await.unwrap(), json!(false));
    assert!(manager.call("eth_getFilterChanges", vec![id]).await.is_err());

    // everything else goes to the network
    assert_eq!(manager.call("eth_chainId", vec![]).await.unwrap(), json!("0x1"));
    assert!(manager.call("eth_subscribe", vec![json!("syncing")]).await.is_err());
}
