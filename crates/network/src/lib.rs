//! # wallet-network
//!
//! The JSON-RPC network layer of the wallet: per-network request pipelines, a polling block
//! tracker, filter emulation and a controller that switches networks behind a stable proxy.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

/// Polls the latest block number of a node
pub mod block_tracker;

/// Builds a pipeline and block tracker per network configuration
pub mod client;

/// Network configurations and client settings
pub mod config;

/// Network switching
pub mod controller;

pub mod error;

/// Filter and subscription emulation on top of polling
pub mod filter;

/// Per-method caching and block parameter rules
pub mod methods;

/// The request pipeline
pub mod middleware;

pub mod provider;

pub mod proxy;

/// Terminal transports
pub mod transport;

pub use block_tracker::{BlockTrackerEvent, BlockTrackerState, PollingBlockTracker};
pub use client::{ClientFactory, HttpTransportFactory, NetworkClient, NetworkClientId};
pub use config::{
    BackendAdapter, BuiltInNetwork, ChainId, ClientConfig, NetworkConfiguration, NetworkKind,
};
pub use controller::{
    ControllerState, NetworkController, NetworkDetails, NetworkEvent, NetworkState,
    NetworkStatus,
};
pub use error::{ClientError, ConfigError, Result, TransportError};
pub use filter::{FilterManager, SubscriptionNotification};
pub use middleware::Pipeline;
pub use provider::Provider;
pub use proxy::{ProxyTarget, SwappableProxy};
pub use transport::{HttpTransport, Transport, TranslatingTransport};
