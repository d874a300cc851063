//! The terminal transport a pipeline dispatches to

use crate::error::TransportError;
use serde_json::Value;
use std::fmt;
use wallet_rpc::{Request, Response};

mod http;
pub mod policy;
mod translate;

pub use http::{HttpTransport, HttpTransportBuilder};
pub use translate::TranslatingTransport;

/// Body returned by the hosted infrastructure when requests from the caller's region are refused
pub const REGION_BLOCKED_ERROR: &str = "countryBlocked";

/// Performs a single JSON-RPC request against a remote endpoint.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends the request and returns the `result` member of the response.
    async fn send(&self, request: Request) -> Result<Value, TransportError>;
}

/// Extracts the outcome of a JSON-RPC response object.
pub fn parse_response(value: Value) -> Result<Value, TransportError> {
    // the hosted infrastructure reports refused regions with a bare string
    if value.get("error").and_then(Value::as_str) == Some(REGION_BLOCKED_ERROR) {
        return Err(TransportError::RegionBlocked);
    }
    let response: Response = serde_json::from_value(value)
        .map_err(|err| TransportError::InvalidResponse(err.to_string()))?;
    response.into_result().map_err(TransportError::Rpc)
}
