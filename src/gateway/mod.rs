//! Chain Gateway
//!
//! One gateway per configured chain. It binds the chain's endpoint pool, its
//! contract role and (optionally) a signing identity, and exposes the handful of
//! JSON-RPC reads and the raw-transaction write the reconciler needs.
//!
//! Every read goes through [`ChainGateway::call`], which fails over to the next
//! endpoint at most once per call. Submission never re-broadcasts: the
//! transaction hash is computed locally before the send, so a lost response is
//! reported with the hash attached and left for the retry path to look up.

pub mod receipt;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U128, U256, U64};
use alloy::rpc::types::TransactionRequest;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

pub use receipt::{LogEntry, Receipt};
pub use transport::{HttpTransport, RpcRequest, RpcTransport};

use crate::config::ChainConfig;
use crate::error::{BridgeError, TransportError};
use crate::metrics;
use crate::rpc_fallback::{redact_url, EndpointPool};
use crate::signer::{SignedTransaction, TransactionSigner};
use crate::types::ChainRole;

/// Per-chain RPC access with single-step failover
pub struct ChainGateway {
    config: ChainConfig,
    pool: EndpointPool,
    transport: Arc<dyn RpcTransport>,
    signer: Option<Arc<dyn TransactionSigner>>,
    receipt_poll_interval: Duration,
}

impl ChainGateway {
    pub fn new(
        config: ChainConfig,
        transport: Arc<dyn RpcTransport>,
        signer: Option<Arc<dyn TransactionSigner>>,
        receipt_poll_interval: Duration,
    ) -> eyre::Result<Self> {
        let pool = EndpointPool::new(config.rpc_urls.clone())?;

        info!(
            chain = %config.name,
            chain_id = config.chain_id,
            role = config.role.label(),
            endpoints = pool.len(),
            primary = %redact_url(pool.current_endpoint()),
            signer = signer.is_some(),
            "Chain gateway initialized"
        );

        Ok(Self {
            config,
            pool,
            transport,
            signer,
            receipt_poll_interval,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn role(&self) -> &ChainRole {
        &self.config.role
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &EndpointPool {
        &self.pool
    }

    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }

    /// Account that signs destination calls on this chain
    pub fn signer_address(&self) -> Result<Address, BridgeError> {
        self.signer
            .as_ref()
            .map(|s| s.address())
            .ok_or_else(|| BridgeError::MissingSigner(self.config.name.clone()))
    }

    /// Send a read request, failing over to the next endpoint at most once.
    ///
    /// A well-formed JSON-RPC error that is not an infrastructure condition is
    /// returned as [`BridgeError::Rpc`] without failover.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        let request = RpcRequest::new(method, params);

        let observed = self.pool.current_index();
        match self
            .transport
            .send(self.pool.endpoint(observed), &request)
            .await
        {
            Ok(value) => return Ok(value),
            Err(e) if e.is_infrastructure() => self.fail_over(observed, method, &e),
            Err(e) => return Err(self.rpc_error(e)),
        }

        let retry_index = self.pool.current_index();
        match self
            .transport
            .send(self.pool.endpoint(retry_index), &request)
            .await
        {
            Ok(value) => Ok(value),
            Err(e) if e.is_infrastructure() => {
                self.fail_over(retry_index, method, &e);
                Err(BridgeError::TransportFailure {
                    chain: self.config.name.clone(),
                    reason: format!("{} failed after failover: {}", method, e),
                })
            }
            Err(e) => Err(self.rpc_error(e)),
        }
    }

    /// Latest block number
    pub async fn block_number(&self) -> Result<u64, BridgeError> {
        let value = self.call("eth_blockNumber", json!([])).await?;
        let block: U64 = self.decode("eth_blockNumber", value)?;
        Ok(block.to::<u64>())
    }

    /// Current network gas price in wei
    pub async fn gas_price(&self) -> Result<u128, BridgeError> {
        let value = self.call("eth_gasPrice", json!([])).await?;
        let price: U128 = self.decode("eth_gasPrice", value)?;
        Ok(price.to::<u128>())
    }

    /// Next nonce for `address`, counting transactions still in the mempool
    pub async fn pending_nonce(&self, address: Address) -> Result<u64, BridgeError> {
        let value = self
            .call("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        let nonce: U64 = self.decode("eth_getTransactionCount", value)?;
        Ok(nonce.to::<u64>())
    }

    /// Number of transactions from `address` included in blocks. A nonce below
    /// this value can no longer be used.
    pub async fn mined_nonce(&self, address: Address) -> Result<u64, BridgeError> {
        let value = self
            .call("eth_getTransactionCount", json!([address, "latest"]))
            .await?;
        let nonce: U64 = self.decode("eth_getTransactionCount", value)?;
        Ok(nonce.to::<u64>())
    }

    /// Native balance of `address` at the latest block
    pub async fn balance(&self, address: Address) -> Result<U256, BridgeError> {
        let value = self
            .call("eth_getBalance", json!([address, "latest"]))
            .await?;
        self.decode("eth_getBalance", value)
    }

    /// Read-only contract call at the latest block
    pub async fn eth_call(&self, to: Address, data: Bytes) -> Result<Bytes, BridgeError> {
        let value = self
            .call("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await?;
        self.decode("eth_call", value)
    }

    /// Receipt for `tx_hash`, `None` while the node does not know it
    pub async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, BridgeError> {
        let value = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        self.decode("eth_getTransactionReceipt", value)
    }

    /// Sign a fully specified transaction without sending it
    pub async fn sign(&self, tx: TransactionRequest) -> Result<SignedTransaction, BridgeError> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| BridgeError::MissingSigner(self.config.name.clone()))?;

        signer
            .sign(tx)
            .await
            .map_err(|e| BridgeError::SubmissionFailed {
                chain: self.config.name.clone(),
                reason: e.to_string(),
                tx_hash: None,
            })
    }

    /// Broadcast a signed transaction, returning its hash.
    ///
    /// The broadcast is attempted exactly once. On an infrastructure failure the
    /// endpoint cursor still advances for later calls, but the transaction is
    /// not sent again: the outcome is unknown and the error carries the hash.
    pub async fn broadcast(&self, signed: &SignedTransaction) -> Result<B256, BridgeError> {
        let tx_hash = signed.hash;

        let request = RpcRequest::new(
            "eth_sendRawTransaction",
            json!([format!("0x{}", hex::encode(&signed.raw))]),
        );

        let observed = self.pool.current_index();
        match self
            .transport
            .send(self.pool.endpoint(observed), &request)
            .await
        {
            Ok(value) => {
                if let Ok(returned) = serde_json::from_value::<B256>(value) {
                    if returned != tx_hash {
                        warn!(
                            chain = %self.config.name,
                            local = %tx_hash,
                            returned = %returned,
                            "Node returned a different transaction hash, keeping local hash"
                        );
                    }
                }
                debug!(chain = %self.config.name, tx_hash = %tx_hash, "Transaction broadcast");
                Ok(tx_hash)
            }
            Err(e) if e.is_infrastructure() => {
                self.fail_over(observed, "eth_sendRawTransaction", &e);
                Err(BridgeError::SubmissionFailed {
                    chain: self.config.name.clone(),
                    reason: format!("broadcast outcome unknown: {}", e),
                    tx_hash: Some(tx_hash),
                })
            }
            Err(TransportError::Rpc { message, .. }) if is_already_known(&message) => {
                info!(
                    chain = %self.config.name,
                    tx_hash = %tx_hash,
                    "Transaction already known to node"
                );
                Ok(tx_hash)
            }
            Err(e) => Err(BridgeError::SubmissionFailed {
                chain: self.config.name.clone(),
                reason: e.to_string(),
                tx_hash: None,
            }),
        }
    }

    /// Poll until `tx_hash` has a receipt with a definitive status.
    ///
    /// Poll errors are logged and polling continues until `timeout` elapses.
    pub async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<Receipt, BridgeError> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if receipt.succeeded().is_some() => return Ok(receipt),
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        chain = %self.config.name,
                        tx_hash = %tx_hash,
                        error = %e,
                        "Receipt poll failed"
                    );
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(BridgeError::NotConfirmed {
                    tx_hash,
                    timeout_secs: timeout.as_secs(),
                });
            }
            sleep(self.receipt_poll_interval.min(deadline - now)).await;
        }
    }

    fn fail_over(&self, observed: usize, method: &str, error: &TransportError) {
        let next = self.pool.advance_from(observed);
        metrics::record_failover(&self.config.name);
        warn!(
            chain = %self.config.name,
            method = method,
            failed_endpoint = %redact_url(self.pool.endpoint(observed)),
            next_endpoint = %redact_url(self.pool.endpoint(next)),
            error = %error,
            "RPC endpoint failed, switching to next endpoint"
        );
    }

    fn rpc_error(&self, error: TransportError) -> BridgeError {
        match error {
            TransportError::Rpc { code, message } => BridgeError::Rpc {
                chain: self.config.name.clone(),
                code,
                message,
            },
            TransportError::Unreachable(reason) => BridgeError::TransportFailure {
                chain: self.config.name.clone(),
                reason,
            },
        }
    }

    fn decode<T: DeserializeOwned>(&self, method: &str, value: Value) -> Result<T, BridgeError> {
        serde_json::from_value(value).map_err(|e| BridgeError::Rpc {
            chain: self.config.name.clone(),
            code: -32700,
            message: format!("malformed {} result: {}", method, e),
        })
    }
}

fn is_already_known(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("already known") || msg.contains("known transaction")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::types::ChainRole;

    /// Replays scripted responses and records which URL each request hit
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<Value, TransportError>>>,
        hits: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<Value, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                hits: Mutex::new(Vec::new()),
            })
        }

        fn hits(&self) -> Vec<(String, String)> {
            self.hits.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RpcTransport for ScriptedTransport {
        async fn send(&self, url: &str, request: &RpcRequest) -> Result<Value, TransportError> {
            self.hits
                .lock()
                .unwrap()
                .push((url.to_string(), request.method.clone()));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Unreachable("script exhausted".into())))
        }
    }

    fn gateway(transport: Arc<ScriptedTransport>, endpoints: usize) -> ChainGateway {
        let config = ChainConfig {
            name: "XDC".to_string(),
            chain_id: 50,
            role: ChainRole::MintBurn {
                contract: Address::repeat_byte(0xaa),
            },
            rpc_urls: (0..endpoints)
                .map(|i| format!("http://node{}:8545", i))
                .collect(),
            finality_blocks: 1,
            gas_limit: 1_300_000,
            gas_price_multiplier_pct: 150,
            confirmation_timeout: Duration::from_millis(50),
            event: crate::contracts::default_event_layout(&ChainRole::MintBurn {
                contract: Address::repeat_byte(0xaa),
            }),
        };
        ChainGateway::new(config, transport, None, Duration::from_millis(10)).unwrap()
    }

    fn down() -> Result<Value, TransportError> {
        Err(TransportError::Unreachable("connection refused".into()))
    }

    #[tokio::test]
    async fn test_call_success_does_not_move_cursor() {
        let transport = ScriptedTransport::new(vec![Ok(json!("0x10"))]);
        let gw = gateway(transport.clone(), 3);
        assert_eq!(gw.block_number().await.unwrap(), 16);
        assert_eq!(gw.endpoints().current_index(), 0);
    }

    #[tokio::test]
    async fn test_call_fails_over_once() {
        let transport = ScriptedTransport::new(vec![down(), Ok(json!("0x3b9aca00"))]);
        let gw = gateway(transport.clone(), 3);

        assert_eq!(gw.gas_price().await.unwrap(), 1_000_000_000);
        assert_eq!(gw.endpoints().current_index(), 1);

        let hits = transport.hits();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "http://node0:8545");
        assert_eq!(hits[1].0, "http://node1:8545");
    }

    #[tokio::test]
    async fn test_call_surfaces_after_second_failure() {
        let transport = ScriptedTransport::new(vec![down(), down(), Ok(json!("0x1"))]);
        let gw = gateway(transport.clone(), 3);

        let err = gw.block_number().await.unwrap_err();
        assert!(matches!(err, BridgeError::TransportFailure { .. }));
        // Bounded: exactly two attempts, the third response is never consumed
        assert_eq!(transport.hits().len(), 2);
        assert_eq!(gw.endpoints().current_index(), 2);
    }

    #[tokio::test]
    async fn test_rpc_error_is_not_failover() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::Rpc {
            code: 3,
            message: "execution reverted".into(),
        })]);
        let gw = gateway(transport.clone(), 2);

        let err = gw
            .eth_call(Address::ZERO, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Rpc { code: 3, .. }));
        assert_eq!(gw.endpoints().current_index(), 0);
        assert_eq!(transport.hits().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_receipt_is_none() {
        let transport = ScriptedTransport::new(vec![Ok(Value::Null)]);
        let gw = gateway(transport, 1);
        let receipt = gw
            .transaction_receipt(B256::repeat_byte(1))
            .await
            .unwrap();
        assert!(receipt.is_none());
    }

    #[tokio::test]
    async fn test_sign_without_signer() {
        let transport = ScriptedTransport::new(vec![]);
        let gw = gateway(transport.clone(), 1);
        let err = gw.sign(TransactionRequest::default()).await.unwrap_err();
        assert!(matches!(err, BridgeError::MissingSigner(_)));
        assert!(transport.hits().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_receipt_times_out() {
        let transport = ScriptedTransport::new(vec![Ok(Value::Null); 32]);
        let gw = gateway(transport, 1);
        let hash = B256::repeat_byte(7);
        let err = gw
            .wait_for_receipt(hash, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotConfirmed { tx_hash, .. } if tx_hash == hash));
    }

    #[tokio::test]
    async fn test_wait_for_receipt_skips_statusless_receipts() {
        let hash = B256::repeat_byte(7);
        let transport = ScriptedTransport::new(vec![
            Ok(json!({ "transactionHash": hash, "blockNumber": null })),
            Ok(json!({ "transactionHash": hash, "blockNumber": "0x5", "status": "0x1", "logs": [] })),
        ]);
        let gw = gateway(transport, 1);
        let receipt = gw
            .wait_for_receipt(hash, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(receipt.succeeded(), Some(true));
        assert_eq!(receipt.block(), Some(5));
    }

    #[test]
    fn test_already_known_detection() {
        assert!(is_already_known("already known"));
        assert!(is_already_known("Known transaction: 0xabc"));
        assert!(!is_already_known("nonce too low"));
    }
}
