//! JSON-RPC 2.0 protocol types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

// Standard codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
// Implementation-defined codes.
pub const INDEX_ERROR: i64 = -32000;
pub const SYMBOL_NOT_FOUND: i64 = -32001;
pub const FILE_NOT_FOUND: i64 = -32002;
pub const PERMISSION_DENIED: i64 = -32003;

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
    pub id: Option<Value>,
}

impl RpcResponse {
    pub fn success(result: Value, id: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(code: i64, message: impl Into<String>, id: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    pub fn error_with_data(
        code: i64,
        message: impl Into<String>,
        data: Value,
        id: Option<Value>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
                data: Some(data),
            }),
            id,
        }
    }
}

impl RpcRequest {
    /// Structural validity per the 2.0 spec.
    pub fn validate(&self) -> Result<(), RpcResponse> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(RpcResponse::error(
                INVALID_REQUEST,
                "jsonrpc must be \"2.0\"",
                self.id.clone(),
            ));
        }
        if self.method.is_empty() {
            return Err(RpcResponse::error(
                INVALID_REQUEST,
                "method must be non-empty",
                self.id.clone(),
            ));
        }
        Ok(())
    }
}
