//! Network configurations and client settings

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};
use url::Url;

/// The largest chain id that can be represented safely by every consumer of the wallet.
pub const MAX_SAFE_CHAIN_ID: u64 = 4_503_599_627_370_476;

/// Default interval at which the block tracker polls for new blocks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(20);

/// Default number of attempts made for methods that are retried on empty results
pub const DEFAULT_RETRY_MAX_ATTEMPTS: usize = 5;

/// Default number of blocks a fork-scoped cache entry is served for
pub const DEFAULT_FORK_CACHE_DEPTH: u64 = 5;

/// Default maximum number of results a pipeline caches
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Default time after which an unpolled filter is removed
pub const DEFAULT_FILTER_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A validated chain id.
///
/// Parsed from a `0x` prefixed hex string without leading zeros, never above
/// [`MAX_SAFE_CHAIN_ID`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainId(u64);

// === impl ChainId ===

impl ChainId {
    /// Creates a new chain id, rejecting ids above [`MAX_SAFE_CHAIN_ID`] and zero
    pub fn new(id: u64) -> Result<Self, ConfigError> {
        if id == 0 {
            return Err(ConfigError::InvalidChainId(format!("{id:#x}")));
        }
        if id > MAX_SAFE_CHAIN_ID {
            return Err(ConfigError::UnsafeChainId(format!("{id:#x}")));
        }
        Ok(Self(id))
    }

    pub const fn id(&self) -> u64 {
        self.0
    }
}

impl FromStr for ChainId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidChainId(s.to_string());
        let digits = s.strip_prefix("0x").ok_or_else(invalid)?;
        if digits.is_empty()
            || digits.starts_with('0')
            || !digits.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(invalid());
        }
        let id = u64::from_str_radix(digits, 16)
            .map_err(|_| ConfigError::UnsafeChainId(s.to_string()))?;
        Self::new(id).map_err(|_| ConfigError::UnsafeChainId(s.to_string()))
    }
}

impl TryFrom<String> for ChainId {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ChainId> for String {
    fn from(id: ChainId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Networks served by the hosted infrastructure provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuiltInNetwork {
    Mainnet,
    Sepolia,
    LineaSepolia,
    LineaMainnet,
}

// === impl BuiltInNetwork ===

impl BuiltInNetwork {
    pub const ALL: [Self; 4] =
        [Self::Mainnet, Self::Sepolia, Self::LineaSepolia, Self::LineaMainnet];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Sepolia => "sepolia",
            Self::LineaSepolia => "linea-sepolia",
            Self::LineaMainnet => "linea-mainnet",
        }
    }

    pub const fn chain_id(&self) -> ChainId {
        match self {
            Self::Mainnet => ChainId(1),
            Self::Sepolia => ChainId(11_155_111),
            Self::LineaSepolia => ChainId(59_141),
            Self::LineaMainnet => ChainId(59_144),
        }
    }

    /// Native currency symbol
    pub const fn ticker(&self) -> &'static str {
        match self {
            Self::Mainnet | Self::LineaMainnet => "ETH",
            Self::Sepolia => "SepoliaETH",
            Self::LineaSepolia => "LineaETH",
        }
    }

    /// The network version reported by `net_version`
    pub fn network_version(&self) -> String {
        self.chain_id().id().to_string()
    }
}

impl FromStr for BuiltInNetwork {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|network| network.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownNetwork(s.to_string()))
    }
}

impl fmt::Display for BuiltInNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a configuration targets a built-in network or an arbitrary endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NetworkKind {
    BuiltIn { network: BuiltInNetwork },
    Custom,
}

/// Translation table for backends that speak a different dialect of the eth namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackendAdapter {
    pub name: String,
    /// `eth_*` method name to the backend's method name
    #[serde(default)]
    pub methods: BTreeMap<String, String>,
    /// block tag to the backend's equivalent tag, e.g. `latest` to `latest_state`
    #[serde(default)]
    pub block_tags: BTreeMap<String, String>,
    /// tag inserted when a request omits its block parameter
    #[serde(default)]
    pub default_block_tag: Option<String>,
}

impl BackendAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn method(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.methods.insert(from.into(), to.into());
        self
    }

    pub fn block_tag(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.block_tags.insert(from.into(), to.into());
        self
    }

    pub fn default_block_tag(mut self, tag: impl Into<String>) -> Self {
        self.default_block_tag = Some(tag.into());
        self
    }
}

/// Declarative description of a network a client can be built for.
///
/// A configuration is never mutated once handed to the client factory, switching networks always
/// builds a new client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkConfiguration {
    #[serde(flatten)]
    pub kind: NetworkKind,
    pub chain_id: ChainId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    pub ticker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_explorer_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<BackendAdapter>,
}

// === impl NetworkConfiguration ===

impl NetworkConfiguration {
    /// Configuration of a built-in network
    pub fn built_in(network: BuiltInNetwork) -> Self {
        Self {
            kind: NetworkKind::BuiltIn { network },
            chain_id: network.chain_id(),
            rpc_url: None,
            ticker: network.ticker().to_string(),
            nickname: None,
            block_explorer_url: None,
            adapter: None,
        }
    }

    /// Configuration of a custom RPC endpoint
    pub fn custom(
        chain_id: ChainId,
        rpc_url: impl Into<String>,
        ticker: impl Into<String>,
    ) -> Self {
        Self {
            kind: NetworkKind::Custom,
            chain_id,
            rpc_url: Some(rpc_url.into()),
            ticker: ticker.into(),
            nickname: None,
            block_explorer_url: None,
            adapter: None,
        }
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    pub fn with_block_explorer_url(mut self, url: impl Into<String>) -> Self {
        self.block_explorer_url = Some(url.into());
        self
    }

    pub fn with_adapter(mut self, adapter: BackendAdapter) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Returns the built-in network this configuration refers to, if any
    pub fn network(&self) -> Option<BuiltInNetwork> {
        match self.kind {
            NetworkKind::BuiltIn { network } => Some(network),
            NetworkKind::Custom => None,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self.kind, NetworkKind::Custom)
    }

    /// Checks that the configuration can be used to build a client.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.kind {
            NetworkKind::BuiltIn { network } => {
                if self.chain_id != network.chain_id() {
                    return Err(ConfigError::ChainIdMismatch {
                        network,
                        expected: network.chain_id().to_string(),
                        actual: self.chain_id.to_string(),
                    });
                }
            }
            NetworkKind::Custom => {
                let url = self.rpc_url.as_deref().ok_or(ConfigError::MissingRpcUrl)?;
                validate_rpc_url(url)?;
            }
        }
        if self.ticker.trim().is_empty() {
            return Err(ConfigError::MissingTicker);
        }
        Ok(())
    }
}

/// Only http(s) endpoints are accepted for custom networks
pub fn validate_rpc_url(url: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidRpcUrl { url: url.to_string(), reason };
    let parsed = Url::parse(url).map_err(|err| invalid(err.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(invalid(format!("unsupported scheme `{scheme}`"))),
    }
}

/// Tunables shared by every client the factory builds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// interval at which the block tracker polls, in milliseconds
    pub poll_interval_ms: u64,
    /// how often retry-on-empty methods are attempted before the empty result is returned
    pub retry_max_attempts: usize,
    /// how many blocks a fork-scoped cache entry stays valid
    pub fork_cache_depth: u64,
    /// maximum number of cached results, the least recently used are evicted first
    pub cache_capacity: usize,
    /// filters that are not polled within this window are uninstalled
    pub filter_timeout_secs: u64,
    /// HTTP request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// how often the HTTP transport retries a retryable failure
    pub max_retry: u32,
    /// initial backoff of the HTTP transport in milliseconds
    pub initial_backoff_ms: u64,
}

// === impl ClientConfig ===

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn filter_timeout(&self) -> Duration {
        Duration::from_secs(self.filter_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Sets the poll interval of the block tracker
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sets the number of attempts for retry-on-empty methods
    #[must_use]
    pub fn with_retry_max_attempts(mut self, attempts: usize) -> Self {
        self.retry_max_attempts = attempts;
        self
    }

    /// Sets the number of blocks a fork-scoped cache entry is served for
    #[must_use]
    pub fn with_fork_cache_depth(mut self, depth: u64) -> Self {
        self.fork_cache_depth = depth;
        self
    }

    /// Sets the maximum number of cached results
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Sets the time after which idle filters are removed
    #[must_use]
    pub fn with_filter_timeout(mut self, timeout: Duration) -> Self {
        self.filter_timeout_secs = timeout.as_secs();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            fork_cache_depth: DEFAULT_FORK_CACHE_DEPTH,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            filter_timeout_secs: DEFAULT_FILTER_TIMEOUT.as_secs(),
            request_timeout_ms: 45_000,
            max_retry: 5,
            initial_backoff_ms: 800,
        }
    }
}
