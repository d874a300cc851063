use alloy_primitives::hex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a push subscription, nodes use either numbers or hex strings
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionId {
    Number(u64),
    String(String),
}

impl SubscriptionId {
    /// A fresh id from [random_id]
    pub fn random() -> Self {
        Self::String(random_id())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(num) => write!(f, "{num:#x}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<String> for SubscriptionId {
    fn from(id: String) -> Self {
        Self::String(id)
    }
}

/// Returns 16 random bytes as a `0x` prefixed hex string, used for filter and subscription ids
pub fn random_id() -> String {
    hex::encode_prefixed(rand::random::<[u8; 16]>())
}
