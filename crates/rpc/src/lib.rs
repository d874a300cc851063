//! JSON-RPC 2.0 wire types shared by the wallet network client.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

/// JSON-RPC request bindings
pub mod request;

/// JSON-RPC response bindings
pub mod response;

/// JSON-RPC error bindings
pub mod error;

/// Subscription and filter identifiers
pub mod subscription;

pub use error::{ErrorCode, RpcError};
pub use request::{Id, Request, RequestParams, Version};
pub use response::{Response, ResponseResult};
pub use subscription::SubscriptionId;
