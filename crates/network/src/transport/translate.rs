use super::Transport;
use crate::{
    config::BackendAdapter, error::TransportError, methods::method_info, middleware::set_param,
};
use serde_json::Value;
use std::sync::Arc;
use wallet_rpc::Request;

/// Rewrites requests for a backend that speaks a different dialect.
///
/// Sits between the pipeline and the backend's transport, so every stage as well as the block
/// tracker works with `eth_*` names. Method names and block tags are looked up in the adapter's
/// tables, a missing block parameter is filled with the adapter's default tag.
#[derive(Debug)]
pub struct TranslatingTransport {
    adapter: BackendAdapter,
    inner: Arc<dyn Transport>,
}

impl TranslatingTransport {
    pub fn new(adapter: BackendAdapter, inner: Arc<dyn Transport>) -> Self {
        Self { adapter, inner }
    }

    pub fn adapter(&self) -> &BackendAdapter {
        &self.adapter
    }

    fn translate(&self, mut request: Request) -> Request {
        if let Some(index) = method_info(request.method()).block_param_index {
            let tag = match request.param(index) {
                None | Some(Value::Null) => self.adapter.default_block_tag.clone(),
                Some(Value::String(tag)) => self.adapter.block_tags.get(tag).cloned(),
                Some(_) => None,
            };
            if let Some(tag) = tag {
                set_param(&mut request, index, Value::String(tag));
            }
        }
        if let Some(method) = self.adapter.methods.get(request.method()) {
            request.method.clone_from(method);
        }
        request
    }
}

#[async_trait::async_trait]
impl Transport for TranslatingTransport {
    async fn send(&self, request: Request) -> Result<Value, TransportError> {
        let translated = self.translate(request);
        trace!(
            target: "network::translate",
            backend = %self.adapter.name, method = %translated.method,
            "translated request"
        );
        self.inner.send(translated).await
    }
}
