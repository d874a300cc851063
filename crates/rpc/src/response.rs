use crate::{
    error::RpcError,
    request::{Id, Version},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Response to a single request.
///
/// Exactly one of `result` and `error` is present on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: Version,
    #[serde(default)]
    pub id: Id,
    #[serde(flatten)]
    pub outcome: ResponseResult,
}

impl Response {
    /// Returns the `result` member, or the `error` member as an error
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.outcome {
            ResponseResult::Success(value) => Ok(value),
            ResponseResult::Error(err) => Err(err),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseResult {
    #[serde(rename = "result")]
    Success(Value),
    #[serde(rename = "error")]
    Error(RpcError),
}
