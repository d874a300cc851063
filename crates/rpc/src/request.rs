use serde::{Deserialize, Serialize};
use std::fmt;

/// A JSON-RPC request object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: Version,
    pub method: String,
    #[serde(default, skip_serializing_if = "RequestParams::is_none")]
    pub params: RequestParams,
    #[serde(default)]
    pub id: Id,
}

// === impl Request ===

impl Request {
    /// Creates a new request with a `Null` id
    pub fn new(method: impl Into<String>, params: impl Into<RequestParams>) -> Self {
        Self { jsonrpc: Version::V2, method: method.into(), params: params.into(), id: Id::Null }
    }

    /// Sets the id of the request
    pub fn with_id(mut self, id: impl Into<Id>) -> Self {
        self.id = id.into();
        self
    }

    /// Returns the name of the method
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the positional parameter at `index`, if any
    pub fn param(&self, index: usize) -> Option<&serde_json::Value> {
        match &self.params {
            RequestParams::Array(params) => params.get(index),
            _ => None,
        }
    }

    /// Returns the positional parameters, empty for `None` and object params.
    pub fn params_array(&self) -> &[serde_json::Value] {
        match &self.params {
            RequestParams::Array(params) => params,
            _ => &[],
        }
    }
}

/// Represents requests parameter
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestParams {
    /// no parameters provided
    #[default]
    None,
    /// An array of JSON values
    Array(Vec<serde_json::Value>),
    /// a map of JSON values
    Object(serde_json::Map<String, serde_json::Value>),
}

impl RequestParams {
    /// Whether no parameters were provided
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl From<RequestParams> for serde_json::Value {
    fn from(params: RequestParams) -> Self {
        match params {
            RequestParams::None => Self::Null,
            RequestParams::Array(arr) => arr.into(),
            RequestParams::Object(obj) => obj.into(),
        }
    }
}

impl From<Vec<serde_json::Value>> for RequestParams {
    fn from(params: Vec<serde_json::Value>) -> Self {
        Self::Array(params)
    }
}

impl From<serde_json::Value> for RequestParams {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::None,
            serde_json::Value::Array(arr) => Self::Array(arr),
            serde_json::Value::Object(obj) => Self::Object(obj),
            other => Self::Array(vec![other]),
        }
    }
}

/// Represents the version of the RPC protocol
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum Version {
    #[default]
    V2,
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match *self {
            Self::V2 => serializer.serialize_str("2.0"),
        }
    }
}

impl<'a> Deserialize<'a> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        struct VersionVisitor;

        impl serde::de::Visitor<'_> for VersionVisitor {
            type Value = Version;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a string")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match value {
                    "2.0" => Ok(Version::V2),
                    _ => Err(serde::de::Error::custom("invalid version")),
                }
            }
        }
        deserializer.deserialize_identifier(VersionVisitor)
    }
}

/// Request id
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    String(String),
    Number(i64),
    #[default]
    Null,
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => s.fmt(f),
            Self::Number(n) => n.fmt(f),
            Self::Null => f.write_str("null"),
        }
    }
}

impl From<i64> for Id {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl From<u64> for Id {
    fn from(id: u64) -> Self {
        i64::try_from(id).map(Self::Number).unwrap_or_else(|_| Self::String(id.to_string()))
    }
}

impl From<String> for Id {
    fn from(id: String) -> Self {
        Self::String(id)
    }
}
