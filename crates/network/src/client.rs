//! Builds a request pipeline and block tracker for one network configuration.

use crate::{
    block_tracker::PollingBlockTracker,
    config::{BuiltInNetwork, ClientConfig, NetworkConfiguration, NetworkKind},
    error::ConfigError,
    middleware::{Backend, Pipeline},
    proxy::ProxyTarget,
    transport::{HttpTransport, Transport},
};
use std::{fmt, sync::Arc};

/// Identifies the network a client talks to
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NetworkClientId {
    BuiltIn(BuiltInNetwork),
    /// the endpoint of a custom network
    Custom(String),
}

impl NetworkClientId {
    /// Returns the id of the given configuration
    pub fn of(configuration: &NetworkConfiguration) -> Self {
        match configuration.kind {
            NetworkKind::BuiltIn { network } => Self::BuiltIn(network),
            NetworkKind::Custom => Self::Custom(configuration.rpc_url.clone().unwrap_or_default()),
        }
    }
}

impl fmt::Display for NetworkClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuiltIn(network) => f.write_str(network.as_str()),
            Self::Custom(url) => f.write_str(url),
        }
    }
}

/// Opens the terminal transport for a configuration.
pub trait TransportFactory: Send + Sync + fmt::Debug {
    fn connect(&self, configuration: &NetworkConfiguration)
    -> Result<Arc<dyn Transport>, ConfigError>;
}

/// Connects over HTTP, built-in networks are served by the hosted infrastructure.
#[derive(Clone, Debug)]
pub struct HttpTransportFactory {
    project_id: String,
    config: ClientConfig,
}

impl HttpTransportFactory {
    pub fn new(project_id: impl Into<String>, config: ClientConfig) -> Self {
        Self { project_id: project_id.into(), config }
    }

    /// Returns the endpoint of a built-in network
    pub fn built_in_url(&self, network: BuiltInNetwork) -> String {
        format!("https://{network}.infura.io/v3/{}", self.project_id)
    }
}

impl TransportFactory for HttpTransportFactory {
    fn connect(
        &self,
        configuration: &NetworkConfiguration,
    ) -> Result<Arc<dyn Transport>, ConfigError> {
        let url = match configuration.kind {
            NetworkKind::BuiltIn { network } => self.built_in_url(network),
            NetworkKind::Custom => {
                configuration.rpc_url.clone().ok_or(ConfigError::MissingRpcUrl)?
            }
        };
        let transport = HttpTransport::builder(&url)
            .timeout(self.config.request_timeout())
            .max_retry(self.config.max_retry)
            .initial_backoff(self.config.initial_backoff())
            .build()?;
        Ok(Arc::new(transport))
    }
}

/// A pipeline and its block tracker for one configuration
#[derive(Clone, Debug)]
pub struct NetworkClient {
    pub id: NetworkClientId,
    pub configuration: NetworkConfiguration,
    pub provider: Pipeline,
    pub block_tracker: PollingBlockTracker,
}

impl NetworkClient {
    /// Returns the target to install in a proxy
    pub fn target(&self) -> ProxyTarget {
        ProxyTarget {
            provider: Arc::new(self.provider.clone()),
            block_tracker: self.block_tracker.clone(),
        }
    }

    /// Stops the block tracker, in-flight requests still complete
    pub fn destroy(&self) {
        self.block_tracker.stop();
    }
}

/// Builds a [NetworkClient] per configuration
#[derive(Clone, Debug)]
pub struct ClientFactory {
    transports: Arc<dyn TransportFactory>,
    config: ClientConfig,
}

impl ClientFactory {
    pub fn new(transports: Arc<dyn TransportFactory>, config: ClientConfig) -> Self {
        Self { transports, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Validates the configuration and builds a client for it.
    ///
    /// The block tracker of the new client is not started.
    pub fn create(
        &self,
        configuration: &NetworkConfiguration,
    ) -> Result<NetworkClient, ConfigError> {
        configuration.validate()?;
        let backend = backend_of(configuration);
        let transport = backend.transport(self.transports.connect(configuration)?);
        let block_tracker =
            PollingBlockTracker::new(Arc::clone(&transport), self.config.poll_interval());
        let provider = Pipeline::new(backend.stages(), &block_tracker, transport, &self.config);
        let id = NetworkClientId::of(configuration);
        info!(
            target: "network::client",
            %id,
            chain_id = %configuration.chain_id,
            "created network client"
        );
        Ok(NetworkClient { id, configuration: configuration.clone(), provider, block_tracker })
    }
}

/// Picks the backend variant for a configuration
pub fn backend_of(configuration: &NetworkConfiguration) -> Backend {
    let chain_id = configuration.chain_id;
    match (&configuration.kind, &configuration.adapter) {
        (NetworkKind::BuiltIn { network }, _) => {
            Backend::BuiltIn { chain_id, network_version: network.network_version() }
        }
        (NetworkKind::Custom, Some(adapter)) => {
            Backend::Alternate { chain_id, adapter: adapter.clone() }
        }
        (NetworkKind::Custom, None) => Backend::Custom { chain_id },
    }
}
