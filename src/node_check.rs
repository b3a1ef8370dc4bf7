//! Endpoint liveness check
//!
//! Asks every configured endpoint of every chain for `web3_clientVersion`
//! directly (no failover) so operators can see which nodes are down.

use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::gateway::{ChainGateway, RpcRequest};
use crate::registry::ChainRegistry;
use crate::rpc_fallback::redact_url;

pub const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub chain: String,
    /// Position in the chain's endpoint list (0 = primary)
    pub index: usize,
    /// Redacted endpoint URL
    pub endpoint: String,
    /// Endpoint the gateway currently routes through
    pub active: bool,
    pub status: NodeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn check_endpoint(gateway: &ChainGateway, index: usize, limit: Duration) -> NodeStatus {
    let url = gateway.endpoints().endpoint(index);
    let request = RpcRequest::new("web3_clientVersion", json!([]));

    let (status, client, error) = match timeout(limit, gateway.transport().send(url, &request)).await
    {
        Ok(Ok(Value::String(version))) => (NodeState::Online, Some(version), None),
        Ok(Ok(other)) => (NodeState::Online, Some(other.to_string()), None),
        Ok(Err(e)) => (NodeState::Offline, None, Some(e.to_string())),
        Err(_) => (
            NodeState::Offline,
            None,
            Some(format!("no response within {}s", limit.as_secs())),
        ),
    };

    NodeStatus {
        chain: gateway.name().to_string(),
        index,
        endpoint: redact_url(url),
        active: gateway.endpoints().current_index() == index,
        status,
        client,
        error,
    }
}

/// Check all endpoints of all chains concurrently
pub async fn check_nodes(registry: &ChainRegistry, limit: Duration) -> Vec<NodeStatus> {
    let checks = registry.all().flat_map(|gateway| {
        (0..gateway.endpoints().len()).map(move |index| check_endpoint(gateway, index, limit))
    });
    join_all(checks).await
}

/// Log one line per endpoint
pub fn log_node_statuses(statuses: &[NodeStatus]) {
    for node in statuses {
        match node.status {
            NodeState::Online => info!(
                chain = %node.chain,
                endpoint = %node.endpoint,
                client = node.client.as_deref().unwrap_or(""),
                active = node.active,
                "Node online"
            ),
            NodeState::Offline => warn!(
                chain = %node.chain,
                endpoint = %node.endpoint,
                error = node.error.as_deref().unwrap_or(""),
                active = node.active,
                "Node offline"
            ),
        }
    }
}
