//! The table of cacheable methods and helpers to inspect their parameters and results.

use alloy_eips::BlockNumberOrTag;
use alloy_primitives::{B256, U64};
use serde_json::Value;
use std::str::FromStr;
use wallet_rpc::Request;

/// Placeholder some nodes return instead of `null`
pub const NIL_PLACEHOLDER: &str = "<nil>";

/// How long a cached result stays valid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheTier {
    /// valid for the block it was fetched at
    Block,
    /// valid for a short window of blocks, tolerating shallow reorgs
    Fork,
    /// immutable data
    Permanent,
    /// never cached
    Never,
}

/// How the pipeline treats a method
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MethodInfo {
    pub tier: CacheTier,
    /// position of the block parameter, if the method takes one
    pub block_param_index: Option<usize>,
    /// whether an empty result is retried once new blocks arrive
    pub retry_on_empty: bool,
    /// results without a non-zero `blockHash` are not final
    pub check_block_hash: bool,
    /// a `blockNumber` in the result ahead of the tracker triggers a block check
    pub inspect_result_block: bool,
}

impl MethodInfo {
    const fn new(tier: CacheTier) -> Self {
        Self {
            tier,
            block_param_index: None,
            retry_on_empty: false,
            check_block_hash: false,
            inspect_result_block: false,
        }
    }

    const fn block_param(mut self, index: usize) -> Self {
        self.block_param_index = Some(index);
        self.retry_on_empty = true;
        self
    }

    const fn transaction(mut self) -> Self {
        self.retry_on_empty = true;
        self.check_block_hash = true;
        self.inspect_result_block = true;
        self
    }

    pub const fn is_cacheable(&self) -> bool {
        !matches!(self.tier, CacheTier::Never)
    }
}

/// Returns how the pipeline handles `method`.
pub fn method_info(method: &str) -> MethodInfo {
    use CacheTier::*;
    match method {
        "web3_clientVersion"
        | "web3_sha3"
        | "eth_protocolVersion"
        | "eth_getBlockByHash"
        | "eth_getBlockTransactionCountByHash"
        | "eth_getUncleCountByBlockHash"
        | "eth_getTransactionByBlockHashAndIndex"
        | "eth_getUncleByBlockHashAndIndex"
        | "eth_getCompilers"
        | "shh_version" => MethodInfo::new(Permanent),
        "eth_getTransactionByHash" | "eth_getTransactionReceipt" => {
            MethodInfo::new(Permanent).transaction()
        }
        "eth_getLogs"
        | "eth_getFilterLogs"
        | "eth_getBlockTransactionCountByNumber"
        | "eth_getUncleCountByBlockNumber"
        | "eth_getTransactionByBlockNumberAndIndex"
        | "eth_getUncleByBlockNumberAndIndex" => MethodInfo::new(Fork),
        "eth_blockNumber" | "eth_gasPrice" | "eth_estimateGas" => MethodInfo::new(Block),
        "eth_getBlockByNumber" => MethodInfo::new(Block).block_param(0),
        "eth_getBalance" | "eth_getCode" | "eth_getTransactionCount" | "eth_call" => {
            MethodInfo::new(Block).block_param(1)
        }
        "eth_getStorageAt" => MethodInfo::new(Block).block_param(2),
        _ => MethodInfo::new(Never),
    }
}

/// Returns the block reference of the request at `index`.
///
/// A missing or `null` parameter refers to the latest block. Returns `None` for references that
/// can't be interpreted as a block number or tag, like EIP-1898 objects.
pub fn block_param(request: &Request, index: usize) -> Option<BlockNumberOrTag> {
    parse_block_ref(request.param(index))
}

/// Parses a block reference, a missing or `null` value refers to the latest block.
pub fn parse_block_ref(value: Option<&Value>) -> Option<BlockNumberOrTag> {
    match value {
        None | Some(Value::Null) => Some(BlockNumberOrTag::Latest),
        Some(Value::String(s)) => BlockNumberOrTag::from_str(s).ok(),
        Some(Value::Number(n)) => n.as_u64().map(BlockNumberOrTag::Number),
        Some(_) => None,
    }
}

/// Resolves `earliest` to block zero, other tags are returned as is.
pub fn resolve_earliest(tag: BlockNumberOrTag) -> BlockNumberOrTag {
    match tag {
        BlockNumberOrTag::Earliest => BlockNumberOrTag::Number(0),
        tag => tag,
    }
}

/// Whether the value is one of the recognized "no data yet" results.
pub fn is_empty_result(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s == NIL_PLACEHOLDER,
        _ => false,
    }
}

/// Whether a successful result may be stored in the cache.
pub fn can_cache_result(info: &MethodInfo, value: &Value) -> bool {
    if is_empty_result(value) {
        return false;
    }
    if info.check_block_hash {
        return value
            .get("blockHash")
            .and_then(Value::as_str)
            .and_then(|hash| B256::from_str(hash).ok())
            .is_some_and(|hash| !hash.is_zero());
    }
    true
}

/// Parses a hex encoded quantity like `"0x1b4"`.
pub fn parse_quantity(value: &Value) -> Option<u64> {
    let s = value.as_str()?;
    if !s.starts_with("0x") {
        return None;
    }
    U64::from_str(s).ok().map(|n| n.to::<u64>())
}

/// Formats a block number as a hex quantity
pub fn to_quantity(number: u64) -> Value {
    Value::String(format!("{number:#x}"))
}
