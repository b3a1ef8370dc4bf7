//! JSON-RPC transport
//!
//! The gateway talks to endpoints through the [`RpcTransport`] seam so the
//! failover logic can be exercised without a live node.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// JSON-RPC 2.0 request body
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
    pub id: u64,
}

impl RpcRequest {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
            id: 1,
        }
    }
}

/// EVM RPC response wrapper
#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

/// EVM RPC error
#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Sends one request to one endpoint. No retries at this layer.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Returns the `result` member (JSON `null` when absent)
    async fn send(&self, url: &str, request: &RpcRequest) -> Result<Value, TransportError>;
}

/// reqwest-backed HTTP transport with a per-request timeout
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> eyre::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, url: &str, request: &RpcRequest) -> Result<Value, TransportError> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Unreachable(format!("HTTP {}", status)));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Unreachable(format!("malformed response: {}", e)))?;

        if let Some(error) = body.error {
            return Err(TransportError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(body.result.unwrap_or(Value::Null))
    }
}
