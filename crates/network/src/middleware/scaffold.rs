use super::{Middleware, Next};
use crate::{config::ChainId, error::Result};
use serde_json::Value;
use std::collections::HashMap;
use wallet_rpc::Request;

/// Answers fixed methods from configuration without touching the transport.
#[derive(Debug)]
pub struct ScaffoldMiddleware {
    results: HashMap<&'static str, Value>,
}

impl ScaffoldMiddleware {
    pub fn new(chain_id: ChainId, network_version: Option<String>) -> Self {
        let mut results = HashMap::from([("eth_chainId", Value::String(chain_id.to_string()))]);
        if let Some(version) = network_version {
            results.insert("net_version", Value::String(version));
        }
        Self { results }
    }
}

#[async_trait::async_trait]
impl Middleware for ScaffoldMiddleware {
    async fn handle(&self, request: Request, next: Next) -> Result<Value> {
        if let Some(value) = self.results.get(request.method()) {
            trace!(target: "network::scaffold", method = %request.method, "static result");
            return Ok(value.clone());
        }
        next.run(request).await
    }
}
