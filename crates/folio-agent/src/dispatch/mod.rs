//! JSON-RPC 2.0 envelope used between the executor and the workspace.
//!
//! Dispatch never fails at the Rust level: every outcome, including
//! "approval required", travels inside [`RpcResponse`].

pub mod processor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ActorContext;

pub use processor::InternalProcessor;

pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// The method needs a human decision; `data` carries `{approvalToken, expiresAt}`.
pub const APPROVAL_REQUIRED: i64 = -32001;
pub const NOT_FOUND: i64 = -32004;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: Value,
}

impl RpcRequest {
    pub fn new(method: &str, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: Value::from(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Approval token carried by an `APPROVAL_REQUIRED` error.
    pub fn approval_token(&self) -> Option<&str> {
        if self.code != APPROVAL_REQUIRED {
            return None;
        }
        self.data.as_ref()?.get("approvalToken")?.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Split into the Rust-level outcome.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Identity and approval state a request is dispatched under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchContext {
    pub actor: ActorContext,
    /// Set when a redeemed approval token authorizes this request.
    pub approved: bool,
}

impl DispatchContext {
    pub fn new(actor: ActorContext) -> Self {
        Self {
            actor,
            approved: false,
        }
    }

    pub fn approved(actor: ActorContext) -> Self {
        Self {
            actor,
            approved: true,
        }
    }
}

/// Routes a JSON-RPC request to whatever applies it.
#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    async fn dispatch(&self, ctx: &DispatchContext, request: RpcRequest) -> RpcResponse;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_envelope_shape() {
        let request = RpcRequest::new("task.create", json!({"title": "x"}), 7);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["method"], "task.create");
        assert_eq!(json["id"], 7);
    }

    #[test]
    fn test_approval_token_only_for_approval_code() {
        let err = RpcError::new(APPROVAL_REQUIRED, "Approval required")
            .with_data(json!({"approvalToken": "abc", "expiresAt": 10}));
        assert_eq!(err.approval_token(), Some("abc"));

        let other = RpcError::new(INTERNAL_ERROR, "boom").with_data(json!({"approvalToken": "abc"}));
        assert_eq!(other.approval_token(), None);
    }

    #[test]
    fn test_response_into_result() {
        let ok = RpcResponse::success(json!(1), json!({"id": "p1"}));
        assert_eq!(ok.into_result().unwrap()["id"], "p1");

        let err = RpcResponse::failure(json!(1), RpcError::new(NOT_FOUND, "Task not found"));
        let err = err.into_result().unwrap_err();
        assert_eq!(err.code, NOT_FOUND);
        assert!(!serde_json::to_string(&err).unwrap().contains("data"));
    }
}
