//! Owns the active network configuration and orchestrates network switches.
//!
//! Every switch increments a generation counter. Lookups and probes started for a configuration
//! compare their captured generation with the current one and discard their result if the network
//! changed in the meantime.

use crate::{
    client::{ClientFactory, NetworkClient, NetworkClientId},
    config::{BuiltInNetwork, ChainId, NetworkConfiguration},
    error::{ClientError, ConfigError, TransportError},
    provider::Provider,
    proxy::SwappableProxy,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::broadcast;
use uuid::Uuid;
use wallet_rpc::ErrorCode;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Whether the network of the active configuration has been identified
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkState {
    Loading,
    /// the network version reported by the node
    Identified(String),
}

/// Availability of the active network
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkStatus {
    #[default]
    Unknown,
    Available,
    Unavailable,
    Blocked,
}

/// Capabilities of the active network, cleared on every switch
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDetails {
    pub eip1559: Option<bool>,
}

/// Lifecycle events of the controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkEvent {
    WillChange,
    DidChange(NetworkClientId),
    BackendBlocked,
    BackendUnblocked,
}

/// Snapshot of the controller's state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ControllerState {
    pub provider_config: NetworkConfiguration,
    pub network: NetworkState,
    pub status: NetworkStatus,
    pub details: NetworkDetails,
    /// saved custom networks by id
    pub network_configurations: BTreeMap<String, NetworkConfiguration>,
}

impl ControllerState {
    pub fn new(provider_config: NetworkConfiguration) -> Self {
        Self {
            provider_config,
            network: NetworkState::Loading,
            status: NetworkStatus::Unknown,
            details: NetworkDetails::default(),
            network_configurations: BTreeMap::new(),
        }
    }
}

/// Switches between networks behind a single [SwappableProxy].
#[derive(Clone)]
pub struct NetworkController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    factory: ClientFactory,
    state: RwLock<ControllerState>,
    /// the configuration active before the last change
    previous: RwLock<Option<NetworkConfiguration>>,
    client: RwLock<Option<NetworkClient>>,
    proxy: RwLock<Option<SwappableProxy>>,
    generation: AtomicU64,
    events: broadcast::Sender<NetworkEvent>,
    /// serializes switches with the completion of lookups and probes
    switching: Mutex<()>,
}

// === impl NetworkController ===

impl NetworkController {
    pub fn new(factory: ClientFactory, state: ControllerState) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ControllerInner {
                factory,
                state: RwLock::new(state),
                previous: RwLock::new(None),
                client: RwLock::new(None),
                proxy: RwLock::new(None),
                generation: AtomicU64::new(0),
                events,
                switching: Mutex::new(()),
            }),
        }
    }

    /// Subscribes to [NetworkEvent]s
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> ControllerState {
        self.inner.state.read().clone()
    }

    pub fn chain_id(&self) -> ChainId {
        self.inner.state.read().provider_config.chain_id
    }

    /// The network version, once identified
    pub fn network_version(&self) -> Option<String> {
        match &self.inner.state.read().network {
            NetworkState::Identified(version) => Some(version.clone()),
            NetworkState::Loading => None,
        }
    }

    pub fn previous_configuration(&self) -> Option<NetworkConfiguration> {
        self.inner.previous.read().clone()
    }

    /// Returns the proxy that serves both the provider and the block tracker of the active
    /// network.
    ///
    /// The handle stays valid across network switches.
    pub fn provider_and_block_tracker(&self) -> Result<SwappableProxy, ClientError> {
        self.inner.proxy.read().clone().ok_or(ClientError::NotInitialized)
    }

    /// Builds the client for the configuration the controller was created with
    pub async fn initialize_provider(&self) -> Result<(), ConfigError> {
        let configuration = self.inner.state.read().provider_config.clone();
        self.apply(configuration, false).await
    }

    /// Switches to the configuration.
    ///
    /// Invalid configurations are rejected before anything changes.
    pub async fn apply_configuration(
        &self,
        configuration: NetworkConfiguration,
    ) -> Result<(), ConfigError> {
        self.apply(configuration, true).await
    }

    /// Switches to a built-in network by name
    pub async fn set_provider_type(&self, network: &str) -> Result<(), ConfigError> {
        let network: BuiltInNetwork = network.parse()?;
        self.apply_configuration(NetworkConfiguration::built_in(network)).await
    }

    /// Switches to a saved custom network
    pub async fn set_active_network(&self, id: &str) -> Result<(), ConfigError> {
        let configuration = self
            .inner
            .state
            .read()
            .network_configurations
            .get(id)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownConfiguration(id.to_string()))?;
        self.apply_configuration(configuration).await
    }

    /// Rebuilds the client of the active configuration
    pub async fn reset_connection(&self) -> Result<(), ConfigError> {
        let configuration = self.inner.state.read().provider_config.clone();
        self.apply(configuration, false).await
    }

    /// Reinstalls the configuration that was active before the last change.
    ///
    /// The previous configuration itself is left unchanged.
    pub async fn rollback(&self) -> Result<(), ConfigError> {
        let Some(configuration) = self.previous_configuration() else { return Ok(()) };
        self.apply(configuration, false).await
    }

    /// Saves a custom network, returns its id.
    ///
    /// An existing entry with the same RPC URL is updated in place.
    pub async fn upsert_network_configuration(
        &self,
        configuration: NetworkConfiguration,
        set_active: bool,
    ) -> Result<String, ConfigError> {
        configuration.validate()?;
        let rpc_url = configuration.rpc_url.clone().ok_or(ConfigError::MissingRpcUrl)?;
        let id = {
            let mut state = self.inner.state.write();
            let existing = state
                .network_configurations
                .iter()
                .find(|(_, saved)| {
                    saved.rpc_url.as_deref().is_some_and(|url| url.eq_ignore_ascii_case(&rpc_url))
                })
                .map(|(id, _)| id.clone());
            let id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());
            state.network_configurations.insert(id.clone(), configuration.clone());
            id
        };
        trace!(target: "network::controller", %id, %rpc_url, "saved network configuration");
        if set_active {
            self.apply_configuration(configuration).await?;
        }
        Ok(id)
    }

    /// Removes a saved custom network
    pub fn remove_network_configuration(
        &self,
        id: &str,
    ) -> Result<NetworkConfiguration, ConfigError> {
        self.inner
            .state
            .write()
            .network_configurations
            .remove(id)
            .ok_or_else(|| ConfigError::UnknownConfiguration(id.to_string()))
    }

    /// Looks up the network version and capabilities of the active network
    pub async fn lookup_network(&self) -> Result<(), ClientError> {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let client = self.inner.client.read().clone().ok_or(ClientError::NotInitialized)?;
        self.lookup(generation, &client).await;
        Ok(())
    }

    /// Whether the active network supports EIP-1559, cached until the next switch
    pub async fn eip1559_compatibility(&self) -> Result<bool, ClientError> {
        let cached = self.inner.state.read().details.eip1559;
        if let Some(eip1559) = cached {
            return Ok(eip1559);
        }
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let client = self.inner.client.read().clone().ok_or(ClientError::NotInitialized)?;
        let eip1559 = fetch_eip1559(&client).await?;
        let _switching = self.inner.switching.lock();
        if self.inner.generation.load(Ordering::SeqCst) == generation {
            self.inner.state.write().details.eip1559 = Some(eip1559);
        }
        Ok(eip1559)
    }

    /// Stops polling of the active network, in-flight requests still complete
    pub fn destroy(&self) {
        let client = self.inner.client.read().clone();
        if let Some(client) = client {
            debug!(target: "network::controller", id = %client.id, "destroying network client");
            client.destroy();
        }
    }

    async fn apply(
        &self,
        configuration: NetworkConfiguration,
        record_previous: bool,
    ) -> Result<(), ConfigError> {
        let (generation, client) = self.switch(configuration, record_previous)?;
        self.lookup(generation, &client).await;
        Ok(())
    }

    /// Builds the client and installs it, without suspending.
    fn switch(
        &self,
        configuration: NetworkConfiguration,
        record_previous: bool,
    ) -> Result<(u64, NetworkClient), ConfigError> {
        let client = self.inner.factory.create(&configuration)?;

        let _switching = self.inner.switching.lock();
        if record_previous {
            let current = self.inner.state.read().provider_config.clone();
            *self.inner.previous.write() = Some(current);
        }
        let _ = self.inner.events.send(NetworkEvent::WillChange);

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.inner.state.write();
            state.provider_config = configuration;
            state.network = NetworkState::Loading;
            state.status = NetworkStatus::Unknown;
            state.details = NetworkDetails::default();
        }

        {
            let mut proxy = self.inner.proxy.write();
            if let Some(proxy) = proxy.as_ref() {
                proxy.retarget(client.target());
            } else {
                *proxy = Some(SwappableProxy::new(client.target()));
            }
        }
        // relayed by the proxy from its first poll on
        client.block_tracker.start();
        // the old tracker stops only once the new one is installed
        let previous = self.inner.client.write().replace(client.clone());
        if let Some(previous) = previous {
            previous.destroy();
        }

        info!(target: "network::controller", id = %client.id, generation, "switched network");
        let _ = self.inner.events.send(NetworkEvent::DidChange(client.id.clone()));
        self.probe(generation, &client);
        Ok((generation, client))
    }

    /// Checks whether the hosted backend serves the caller's region.
    ///
    /// Custom networks are always reported as unblocked.
    fn probe(&self, generation: u64, client: &NetworkClient) {
        if client.configuration.is_custom() {
            let _ = self.inner.events.send(NetworkEvent::BackendUnblocked);
            return;
        }
        let provider = client.provider.clone();
        let controller = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let res = provider.call("eth_blockNumber", vec![]).await;
            let Some(inner) = controller.upgrade() else { return };
            let _switching = inner.switching.lock();
            if inner.generation.load(Ordering::SeqCst) != generation {
                debug!(target: "network::controller", generation, "discarding stale probe");
                return;
            }
            match res {
                Ok(_) => {
                    let _ = inner.events.send(NetworkEvent::BackendUnblocked);
                }
                Err(err) if err.is_region_blocked() => {
                    let _ = inner.events.send(NetworkEvent::BackendBlocked);
                }
                Err(err) => {
                    debug!(target: "network::controller", %err, "reachability probe failed");
                }
            }
        });
    }

    /// Identifies the network of `client`, unless the network changed in the meantime
    async fn lookup(&self, generation: u64, client: &NetworkClient) {
        let res = async {
            let version = client.provider.call("net_version", vec![]).await?;
            let version = convert_network_id(&version)?;
            let eip1559 = fetch_eip1559(client).await?;
            Ok::<_, ClientError>((version, eip1559))
        }
        .await;

        let _switching = self.inner.switching.lock();
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            debug!(target: "network::controller", generation, "discarding stale network lookup");
            return;
        }
        let mut state = self.inner.state.write();
        match res {
            Ok((version, eip1559)) => {
                trace!(target: "network::controller", %version, eip1559, "identified network");
                state.network = NetworkState::Identified(version);
                state.status = NetworkStatus::Available;
                state.details.eip1559 = Some(eip1559);
            }
            Err(err) => {
                warn!(target: "network::controller", %err, "failed to identify network");
                state.network = NetworkState::Loading;
                state.status = network_status(&err);
                state.details = NetworkDetails::default();
            }
        }
    }
}

impl fmt::Debug for NetworkController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkController")
            .field("state", &*self.inner.state.read())
            .field("generation", &self.inner.generation.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

async fn fetch_eip1559(client: &NetworkClient) -> Result<bool, ClientError> {
    let block =
        client.provider.call("eth_getBlockByNumber", vec![json!("latest"), json!(false)]).await?;
    Ok(block.get("baseFeePerGas").is_some_and(|fee| !fee.is_null()))
}

/// Classifies a failed lookup
fn network_status(err: &ClientError) -> NetworkStatus {
    match err {
        ClientError::Transport(TransportError::RegionBlocked) => NetworkStatus::Blocked,
        ClientError::Transport(TransportError::Rpc(err))
            if err.code == ErrorCode::InternalError =>
        {
            NetworkStatus::Unknown
        }
        ClientError::Decode { .. } => NetworkStatus::Unknown,
        _ => NetworkStatus::Unavailable,
    }
}

/// Converts a `net_version` result, a number, a strict hex string or a decimal string, to its
/// decimal form
pub fn convert_network_id(value: &Value) -> Result<String, ClientError> {
    let id = match value {
        Value::Number(number) => number.as_u64(),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) if !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()) => {
                u64::from_str_radix(hex, 16).ok()
            }
            Some(_) => None,
            None if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => s.parse().ok(),
            None => None,
        },
        _ => None,
    };
    id.map(|id| id.to_string())
        .ok_or_else(|| ClientError::Decode { what: "network id", reason: value.to_string() })
}
