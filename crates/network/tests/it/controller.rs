use crate::utils::{MockTransportFactory, client_factory};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use wallet_network::{
    BuiltInNetwork, ChainId, ClientError, ConfigError, ControllerState, NetworkClientId,
    NetworkConfiguration, NetworkController, NetworkEvent, NetworkState, NetworkStatus, Provider,
    TransportError,
};
use wallet_rpc::RpcError;

const LOCAL_RPC: &str = "http://localhost:8545";

fn controller(transports: &Arc<MockTransportFactory>) -> NetworkController {
    let state = ControllerState::new(NetworkConfiguration::built_in(BuiltInNetwork::Mainnet));
    NetworkController::new(client_factory(transports), state)
}

fn local() -> NetworkConfiguration {
    NetworkConfiguration::custom(ChainId::new(1337).unwrap(), LOCAL_RPC, "ETH")
}

async fn next_events(
    events: &mut tokio::sync::broadcast::Receiver<NetworkEvent>,
    n: usize,
) -> Vec<NetworkEvent> {
    let mut received = Vec::with_capacity(n);
    for _ in 0..n {
        received.push(events.recv().await.unwrap());
    }
    received
}

#[tokio::test(start_paused = true)]
async fn switches_networks() {
    crate::init_tracing();
    let transports = Arc::new(MockTransportFactory::default());
    let controller = controller(&transports);
    let mut events = controller.subscribe();

    assert_eq!(controller.provider_and_block_tracker().unwrap_err(), ClientError::NotInitialized);
    assert_eq!(controller.lookup_network().await.unwrap_err(), ClientError::NotInitialized);

    controller.initialize_provider().await.unwrap();
    similar_asserts::assert_eq!(
        next_events(&mut events, 3).await,
        vec![
            NetworkEvent::WillChange,
            NetworkEvent::DidChange(NetworkClientId::BuiltIn(BuiltInNetwork::Mainnet)),
            NetworkEvent::BackendUnblocked,
        ]
    );
    let state = controller.state();
    assert_eq!(state.network, NetworkState::Identified("1".to_string()));
    assert_eq!(state.status, NetworkStatus::Available);
    assert_eq!(state.details.eip1559, Some(true));
    assert_eq!(controller.previous_configuration(), None);

    let proxy = controller.provider_and_block_tracker().unwrap();
    assert_eq!(proxy.call("eth_chainId", vec![]).await.unwrap(), json!("0x1"));

    controller.set_provider_type("sepolia").await.unwrap();
    similar_asserts::assert_eq!(
        next_events(&mut events, 3).await,
        vec![
            NetworkEvent::WillChange,
            NetworkEvent::DidChange(NetworkClientId::BuiltIn(BuiltInNetwork::Sepolia)),
            NetworkEvent::BackendUnblocked,
        ]
    );
    assert_eq!(controller.chain_id(), BuiltInNetwork::Sepolia.chain_id());
    assert_eq!(controller.network_version().as_deref(), Some("11155111"));
    assert_eq!(
        controller.previous_configuration(),
        Some(NetworkConfiguration::built_in(BuiltInNetwork::Mainnet))
    );

    // handles taken before the switch follow it
    assert_eq!(proxy.call("eth_chainId", vec![]).await.unwrap(), json!("0xaa36a7"));
    assert_eq!(proxy.generation(), 1);
    controller.destroy();
}

#[tokio::test(start_paused = true)]
async fn rejects_invalid_configurations_without_events() {
    let transports = Arc::new(MockTransportFactory::default());
    let controller = controller(&transports);
    let mut events = controller.subscribe();
    controller.initialize_provider().await.unwrap();
    next_events(&mut events, 3).await;
    let before = controller.state();

    let mut ftp = local();
    ftp.rpc_url = Some("ftp://localhost:8545".to_string());
    let err = controller.apply_configuration(ftp).await.unwrap_err();
    assert!(matches!(err, ConfigError::InvalidRpcUrl { .. }));

    let err = controller.set_provider_type("goerli").await.unwrap_err();
    assert_eq!(err, ConfigError::UnknownNetwork("goerli".to_string()));

    let err = controller.set_active_network("missing").await.unwrap_err();
    assert_eq!(err, ConfigError::UnknownConfiguration("missing".to_string()));

    assert!(events.try_recv().is_err());
    assert_eq!(controller.state(), before);
}

#[tokio::test(start_paused = true)]
async fn rolls_back_to_the_previous_network() {
    let transports = Arc::new(MockTransportFactory::default());
    let controller = controller(&transports);
    controller.initialize_provider().await.unwrap();

    controller.set_provider_type("linea-sepolia").await.unwrap();
    assert_eq!(controller.network_version().as_deref(), Some("59141"));

    controller.rollback().await.unwrap();
    let mainnet = NetworkConfiguration::built_in(BuiltInNetwork::Mainnet);
    assert_eq!(controller.state().provider_config, mainnet);
    assert_eq!(controller.network_version().as_deref(), Some("1"));
    // rolling back doesn't overwrite what it rolled back to
    assert_eq!(controller.previous_configuration(), Some(mainnet));
}

#[tokio::test(start_paused = true)]
async fn discards_stale_lookups() {
    let transports = Arc::new(MockTransportFactory::default());
    let mainnet = transports.transport(&NetworkClientId::BuiltIn(BuiltInNetwork::Mainnet));
    mainnet.set_delay(Duration::from_secs(10));
    mainnet.set_base_fee(None);
    let controller = controller(&transports);

    let initializing = tokio::spawn({
        let controller = controller.clone();
        async move { controller.initialize_provider().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(controller.state().network, NetworkState::Loading);

    controller.set_provider_type("sepolia").await.unwrap();
    initializing.await.unwrap().unwrap();

    let state = controller.state();
    assert_eq!(state.provider_config, NetworkConfiguration::built_in(BuiltInNetwork::Sepolia));
    assert_eq!(state.network, NetworkState::Identified("11155111".to_string()));
    assert_eq!(state.details.eip1559, Some(true));
}

#[tokio::test(start_paused = true)]
async fn reports_blocked_backends() {
    let transports = Arc::new(MockTransportFactory::default());
    let mainnet = transports.transport(&NetworkClientId::BuiltIn(BuiltInNetwork::Mainnet));
    mainnet.set_region_blocked(true);
    let controller = controller(&transports);
    let mut events = controller.subscribe();

    controller.initialize_provider().await.unwrap();
    assert_eq!(next_events(&mut events, 3).await[2], NetworkEvent::BackendBlocked);
    assert_eq!(controller.state().status, NetworkStatus::Blocked);

    mainnet.set_region_blocked(false);
    controller.reset_connection().await.unwrap();
    assert_eq!(next_events(&mut events, 3).await[2], NetworkEvent::BackendUnblocked);
    assert_eq!(controller.state().status, NetworkStatus::Available);
}

#[tokio::test(start_paused = true)]
async fn classifies_failed_lookups() {
    let transports = Arc::new(MockTransportFactory::default());
    let node = transports.transport(&NetworkClientId::Custom(LOCAL_RPC.to_string()));
    let controller = controller(&transports);
    controller.initialize_provider().await.unwrap();

    node.on("net_version", |_| Err(RpcError::internal_error().into()));
    controller.apply_configuration(local()).await.unwrap();
    assert_eq!(controller.state().status, NetworkStatus::Unknown);
    assert_eq!(controller.network_version(), None);

    node.on("net_version", |_| Ok(json!("not a number")));
    controller.reset_connection().await.unwrap();
    assert_eq!(controller.state().status, NetworkStatus::Unknown);

    node.on("net_version", |_| Err(TransportError::Connection("refused".to_string())));
    controller.reset_connection().await.unwrap();
    assert_eq!(controller.state().status, NetworkStatus::Unavailable);

    node.on("net_version", |_| Ok(json!("0x539")));
    controller.lookup_network().await.unwrap();
    assert_eq!(controller.state().status, NetworkStatus::Available);
    assert_eq!(controller.network_version().as_deref(), Some("1337"));
}

#[tokio::test(start_paused = true)]
async fn failed_lookup_forgets_the_identified_network() {
    let transports = Arc::new(MockTransportFactory::default());
    let mainnet = transports.transport(&NetworkClientId::BuiltIn(BuiltInNetwork::Mainnet));
    let controller = controller(&transports);
    controller.initialize_provider().await.unwrap();
    assert_eq!(controller.network_version().as_deref(), Some("1"));
    assert_eq!(controller.state().details.eip1559, Some(true));

    mainnet.on("eth_getBlockByNumber", |_| Err(TransportError::Connection("reset".to_string())));
    mainnet.set_block(2);
    controller.provider_and_block_tracker().unwrap().check_for_latest_block().await.unwrap();
    controller.lookup_network().await.unwrap();

    let state = controller.state();
    assert_eq!(state.network, NetworkState::Loading);
    assert_eq!(state.status, NetworkStatus::Unavailable);
    assert_eq!(state.details.eip1559, None);
}

#[tokio::test(start_paused = true)]
async fn manages_custom_networks() {
    let transports = Arc::new(MockTransportFactory::default());
    let controller = controller(&transports);
    let mut events = controller.subscribe();
    controller.initialize_provider().await.unwrap();
    next_events(&mut events, 3).await;

    let id = controller.upsert_network_configuration(local(), true).await.unwrap();
    similar_asserts::assert_eq!(
        next_events(&mut events, 3).await,
        vec![
            NetworkEvent::WillChange,
            NetworkEvent::DidChange(NetworkClientId::Custom(LOCAL_RPC.to_string())),
            NetworkEvent::BackendUnblocked,
        ]
    );
    assert_eq!(controller.chain_id(), ChainId::new(1337).unwrap());

    // the same endpoint updates the saved entry
    let renamed = NetworkConfiguration::custom(
        ChainId::new(1337).unwrap(),
        LOCAL_RPC.to_uppercase(),
        "ETH",
    )
    .with_nickname("local");
    let same = controller.upsert_network_configuration(renamed, false).await.unwrap();
    assert_eq!(same, id);
    let saved = controller.state().network_configurations;
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[&id].nickname.as_deref(), Some("local"));
    assert!(events.try_recv().is_err());

    let other =
        NetworkConfiguration::custom(ChainId::new(31337).unwrap(), "http://127.0.0.1:8546", "ETH");
    let other_id = controller.upsert_network_configuration(other, false).await.unwrap();
    assert_ne!(other_id, id);

    controller.set_active_network(&other_id).await.unwrap();
    assert_eq!(controller.chain_id(), ChainId::new(31337).unwrap());

    controller.remove_network_configuration(&other_id).unwrap();
    assert_eq!(
        controller.set_active_network(&other_id).await.unwrap_err(),
        ConfigError::UnknownConfiguration(other_id.clone())
    );
    assert_eq!(controller.state().network_configurations.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn caches_eip1559_support() {
    let transports = Arc::new(MockTransportFactory::default());
    let sepolia = transports.transport(&NetworkClientId::BuiltIn(BuiltInNetwork::Sepolia));
    sepolia.set_base_fee(None);
    let controller = controller(&transports);
    let mainnet = transports.transport(&NetworkClientId::BuiltIn(BuiltInNetwork::Mainnet));

    controller.initialize_provider().await.unwrap();
    let fetched = mainnet.calls("eth_getBlockByNumber");
    assert!(controller.eip1559_compatibility().await.unwrap());
    assert_eq!(mainnet.calls("eth_getBlockByNumber"), fetched);

    controller.set_provider_type("sepolia").await.unwrap();
    assert!(!controller.eip1559_compatibility().await.unwrap());
    assert_eq!(controller.state().details.eip1559, Some(false));
}
