//! Error types of the network client

use crate::config::BuiltInNetwork;
use wallet_rpc::RpcError;

/// Helper type alias
pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Errors raised by the terminal transport.
///
/// These are propagated unchanged through the middleware pipeline.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connection(String),
    #[error("request timed out")]
    Timeout,
    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid JSON-RPC response: {0}")]
    InvalidResponse(String),
    #[error("the network is not available in this region")]
    RegionBlocked,
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Errors returned to callers of a network client.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unknown block {requested:#x}, latest known block is {latest:#x}")]
    UnknownBlock { requested: u64, latest: u64 },
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("filter not found: {0}")]
    FilterNotFound(String),
    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },
    #[error("the network client has not been initialized")]
    NotInitialized,
}

impl ClientError {
    /// Returns true if the backend refused the request because of the caller's region
    pub fn is_region_blocked(&self) -> bool {
        matches!(self, Self::Transport(TransportError::RegionBlocked))
    }

    /// Converts the error into a JSON-RPC error object.
    ///
    /// Errors returned by the endpoint itself are passed through verbatim.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Transport(TransportError::Rpc(err)) => err.clone(),
            Self::UnknownBlock { .. } => RpcError::resource_not_found(self.to_string()),
            Self::InvalidParams(msg) => RpcError::invalid_params(msg.clone()),
            Self::FilterNotFound(_) => RpcError::invalid_params(self.to_string()),
            _ => RpcError::internal_error_with(self.to_string()),
        }
    }
}

impl From<RpcError> for ClientError {
    fn from(err: RpcError) -> Self {
        Self::Transport(TransportError::Rpc(err))
    }
}

/// Errors raised while validating or applying a network configuration.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid chain id {0:?}: expected a 0x-prefixed hex string without leading zeros")]
    InvalidChainId(String),
    #[error("chain id {0:?} exceeds the maximum safe chain id")]
    UnsafeChainId(String),
    #[error("unknown network {0:?}")]
    UnknownNetwork(String),
    #[error("a custom network requires an RPC URL")]
    MissingRpcUrl,
    #[error("invalid RPC URL {url:?}: {reason}")]
    InvalidRpcUrl { url: String, reason: String },
    #[error("a ticker is required")]
    MissingTicker,
    #[error("chain id {actual} does not match {expected} of network {network}")]
    ChainIdMismatch { network: BuiltInNetwork, expected: String, actual: String },
    #[error("no network configuration with id {0:?}")]
    UnknownConfiguration(String),
    #[error("invalid header {0:?}, expected `key:value`")]
    InvalidHeader(String),
}
