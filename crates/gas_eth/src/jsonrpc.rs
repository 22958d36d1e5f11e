//! A minimal JSON-RPC 2.0 envelope: request, response, and error shapes.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Version {
    #[serde(rename = "2.0")]
    V2_0,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(untagged)]
pub enum Id {
    Num(u64),
    Str(String),
}

/// A request envelope, generic over the method enum. `MethodT` is expected
/// to serialize itself as `{"method": ..., "params": [...]}`, which is
/// flattened into the surrounding envelope.
#[derive(Debug, Serialize)]
pub struct Request<'a, MethodT> {
    pub jsonrpc: Version,
    pub id: Id,
    #[serde(flatten)]
    pub method: &'a MethodT,
}

/// A JSON-RPC error object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("JSON-RPC error {code}: {message}")]
pub struct Error {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResponseData<T> {
    Success { result: T },
    Error { error: Error },
}

impl<T> ResponseData<T> {
    fn into_result(self) -> Result<T, Error> {
        match self {
            ResponseData::Success { result } => Ok(result),
            ResponseData::Error { error } => Err(error),
        }
    }
}

/// A parsed JSON-RPC response envelope.
#[derive(Debug, Deserialize)]
pub struct Response<T> {
    #[serde(flatten)]
    data: ResponseData<T>,
}

impl<T> Response<T> {
    pub fn into_result(self) -> Result<T, Error> {
        self.data.into_result()
    }
}
