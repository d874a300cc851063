use crate::error::Result;
use serde_json::Value;
use std::{fmt, sync::Arc};
use wallet_rpc::Request;

/// Something JSON-RPC requests can be sent to.
#[async_trait::async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    /// Handles the request and returns its result
    async fn request(&self, request: Request) -> Result<Value>;

    /// Convenience for requests with positional params
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        self.request(Request::new(method, params)).await
    }
}

#[async_trait::async_trait]
impl<P: Provider + ?Sized> Provider for Arc<P> {
    async fn request(&self, request: Request) -> Result<Value> {
        (**self).request(request).await
    }
}
