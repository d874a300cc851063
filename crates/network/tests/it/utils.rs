//! A scriptable in-memory node.

use parking_lot::Mutex;
use serde_json::{Value, json};
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};
use wallet_network::{
    ClientConfig, ConfigError, NetworkConfiguration, NetworkClientId, PollingBlockTracker,
    Transport, TransportError,
    client::{ClientFactory, TransportFactory},
    middleware::{Backend, Pipeline},
};
use wallet_rpc::Request;

type Handler = Arc<dyn Fn(&Request) -> Result<Value, TransportError> + Send + Sync>;

/// Answers `eth_blockNumber`, `net_version` and `eth_getBlockByNumber` from its own state, every
/// other method either from a registered handler or with `null`.
pub struct MockTransport {
    state: Mutex<MockState>,
}

struct MockState {
    block: u64,
    /// advance the chain on every `eth_blockNumber`
    auto_mine: bool,
    base_fee: Option<Value>,
    region_blocked: bool,
    delay: Option<Duration>,
    handlers: HashMap<String, Handler>,
    requests: Vec<Request>,
}

impl MockTransport {
    pub fn new(block: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                block,
                auto_mine: false,
                base_fee: Some(json!("0x7")),
                region_blocked: false,
                delay: None,
                handlers: HashMap::new(),
                requests: Vec::new(),
            }),
        })
    }

    pub fn block(&self) -> u64 {
        self.state.lock().block
    }

    pub fn set_block(&self, block: u64) {
        self.state.lock().block = block;
    }

    pub fn auto_mine(&self, enabled: bool) {
        self.state.lock().auto_mine = enabled;
    }

    pub fn set_base_fee(&self, fee: Option<Value>) {
        self.state.lock().base_fee = fee;
    }

    pub fn set_region_blocked(&self, blocked: bool) {
        self.state.lock().region_blocked = blocked;
    }

    /// Delays every response
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    pub fn on<F>(&self, method: &str, handler: F)
    where
        F: Fn(&Request) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        self.state.lock().handlers.insert(method.to_string(), Arc::new(handler));
    }

    /// All requests received for `method`
    pub fn requests(&self, method: &str) -> Vec<Request> {
        self.state.lock().requests.iter().filter(|req| req.method == method).cloned().collect()
    }

    pub fn calls(&self, method: &str) -> usize {
        self.requests(method).len()
    }

    fn respond(&self, request: &Request) -> Result<Value, TransportError> {
        let handler = {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            if state.region_blocked {
                return Err(TransportError::RegionBlocked);
            }
            match state.handlers.get(request.method()) {
                Some(handler) => Arc::clone(handler),
                None => return Ok(state.default_response(request)),
            }
        };
        handler(request)
    }
}

impl MockState {
    fn default_response(&mut self, request: &Request) -> Value {
        match request.method() {
            "eth_blockNumber" => {
                if self.auto_mine {
                    self.block += 1;
                }
                quantity(self.block)
            }
            "net_version" => json!("1"),
            "eth_getBlockByNumber" => {
                let mut block = json!({ "number": quantity(self.block) });
                if let Some(fee) = &self.base_fee {
                    block["baseFeePerGas"] = fee.clone();
                }
                block
            }
            _ => Value::Null,
        }
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: Request) -> Result<Value, TransportError> {
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.respond(&request)
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport").field("block", &self.block()).finish_non_exhaustive()
    }
}

/// Hands out a [MockTransport] per network
#[derive(Debug, Default)]
pub struct MockTransportFactory {
    transports: Mutex<HashMap<NetworkClientId, Arc<MockTransport>>>,
}

impl MockTransportFactory {
    /// Returns the transport of the network, creating it at block 1 if needed
    pub fn transport(&self, id: &NetworkClientId) -> Arc<MockTransport> {
        let mut transports = self.transports.lock();
        Arc::clone(transports.entry(id.clone()).or_insert_with(|| MockTransport::new(1)))
    }
}

impl TransportFactory for MockTransportFactory {
    fn connect(
        &self,
        configuration: &NetworkConfiguration,
    ) -> Result<Arc<dyn Transport>, ConfigError> {
        let transport: Arc<dyn Transport> = self.transport(&NetworkClientId::of(configuration));
        Ok(transport)
    }
}

pub fn client_factory(transports: &Arc<MockTransportFactory>) -> ClientFactory {
    ClientFactory::new(Arc::clone(transports) as Arc<dyn TransportFactory>, ClientConfig::default())
}

/// Builds a pipeline over the transport the way the client factory does, the tracker is not
/// started
pub fn pipeline(
    transport: &Arc<MockTransport>,
    backend: Backend,
) -> (Pipeline, PollingBlockTracker) {
    let config = ClientConfig::default();
    let transport = backend.transport(Arc::clone(transport) as Arc<dyn Transport>);
    let tracker = PollingBlockTracker::new(Arc::clone(&transport), config.poll_interval());
    let pipeline = Pipeline::new(backend.stages(), &tracker, transport, &config);
    (pipeline, tracker)
}

pub fn quantity(number: u64) -> Value {
    json!(format!("{number:#x}"))
}

/// A non-zero block hash
pub fn block_hash(byte: u8) -> String {
    format!("0x{}", format!("{byte:02x}").repeat(32))
}
