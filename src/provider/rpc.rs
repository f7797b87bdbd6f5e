//! Request and response shapes of the page-facing API.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::errors::RpcError;

/// Argument of `request()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestArguments {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestArguments {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self { method: method.into(), params: Some(params) }
    }

    pub fn method(method: impl Into<String>) -> Self {
        Self { method: method.into(), params: None }
    }

    /// Params with the empty default applied.
    pub fn params_or_default(&self) -> Value {
        match &self.params {
            None | Some(Value::Null) => json!([]),
            Some(params) => params.clone(),
        }
    }
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

/// Legacy `send` / `sendAsync` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self { jsonrpc: default_jsonrpc(), id: id.into(), method: method.into(), params: Some(params) }
    }
}

impl From<&JsonRpcRequest> for RequestArguments {
    fn from(request: &JsonRpcRequest) -> Self {
        Self { method: request.method.clone(), params: request.params.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    /// Builds the response for `request`, echoing its `id` and `jsonrpc`.
    pub fn for_request(request: &JsonRpcRequest, outcome: Result<Value, RpcError>) -> Self {
        let (result, error) = match outcome {
            Ok(result) => (Some(result), None),
            Err(error) => (None, Some(error)),
        };
        Self { jsonrpc: request.jsonrpc.clone(), id: request.id.clone(), result, error }
    }
}
