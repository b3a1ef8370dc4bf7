//! Shared fixtures: an in-process multi-chain JSON-RPC node and a harness
//! wiring it to real gateways, a real signer and the in-memory store.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{address, keccak256, Address, B256, U256};
use async_trait::async_trait;
use serde_json::{json, Value};

use reconciler::config::{ChainConfig, RetryConfig};
use reconciler::contracts::{default_event_layout, EventLayout};
use reconciler::db::{MemoryRecordStore, RecordStore};
use reconciler::error::TransportError;
use reconciler::gateway::{ChainGateway, RpcRequest, RpcTransport};
use reconciler::reconciler::Reconciler;
use reconciler::registry::ChainRegistry;
use reconciler::scheduler::RetryScheduler;
use reconciler::signer::{LocalSigner, TransactionSigner};
use reconciler::types::ChainRole;

/// Anvil account #0
pub const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub const LOCK_CONTRACT: Address = address!("1111111111111111111111111111111111111111");
pub const XDC_CONTRACT: Address = address!("2222222222222222222222222222222222222222");
pub const BNB_CONTRACT: Address = address!("3333333333333333333333333333333333333333");
pub const USER: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");

pub const MAX_RETRIES: u32 = 3;

/// How the node answers the next `eth_sendRawTransaction`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Accept and mine successfully
    Confirm,
    /// Accept and mine with status 0
    Revert,
    /// Accept but never mine
    Hang,
    /// Connection drops: the node may or may not have the transaction
    Drop,
}

/// A raw transaction that reached the node, decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentTx {
    pub hash: B256,
    pub nonce: u64,
    pub gas_price: u128,
}

fn decode_sent(raw: &[u8]) -> SentTx {
    let tx = TxEnvelope::decode_2718(&mut &raw[..]).expect("signed transaction");
    SentTx {
        hash: keccak256(raw),
        nonce: tx.nonce(),
        gas_price: tx.gas_price().unwrap_or_default(),
    }
}

#[derive(Debug)]
pub struct ChainState {
    pub head: u64,
    pub receipts: HashMap<B256, Value>,
    pub submit_modes: VecDeque<SubmitMode>,
    pub default_submit: SubmitMode,
    /// Raw transactions that reached the node, hex encoded
    pub sent: Vec<String>,
    pub sent_txs: Vec<SentTx>,
    /// Nonces below this are included in blocks
    pub mined_nonce: u64,
    pub balance: U256,
    pub total_supply: U256,
}

impl Default for ChainState {
    fn default() -> Self {
        Self {
            head: 1_000,
            receipts: HashMap::new(),
            submit_modes: VecDeque::new(),
            default_submit: SubmitMode::Confirm,
            sent: Vec::new(),
            sent_txs: Vec::new(),
            mined_nonce: 0,
            balance: U256::ZERO,
            total_supply: U256::ZERO,
        }
    }
}

#[derive(Debug, Default)]
struct NodeState {
    chains: HashMap<String, ChainState>,
    down: HashSet<String>,
    requests: Vec<(String, String)>,
}

/// One process pretending to be every endpoint of every chain.
///
/// Endpoint URLs look like `http://<chain>-<n>.node.test:8545`.
#[derive(Debug, Default)]
pub struct MockNode {
    state: Mutex<NodeState>,
}

pub fn endpoint(chain: &str, index: usize) -> String {
    format!("http://{}-{}.node.test:8545", chain.to_lowercase(), index)
}

fn chain_of(url: &str) -> String {
    url.trim_start_matches("http://")
        .split('-')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn quantity(n: u64) -> Value {
    json!(format!("{:#x}", n))
}

impl MockNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_chain<R>(&self, chain: &str, f: impl FnOnce(&mut ChainState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(state.chains.entry(chain.to_lowercase()).or_default())
    }

    pub fn set_down(&self, url: &str, down: bool) {
        let mut state = self.state.lock().unwrap();
        if down {
            state.down.insert(url.to_string());
        } else {
            state.down.remove(url);
        }
    }

    pub fn set_receipt(&self, chain: &str, receipt: Value) {
        let hash: B256 = serde_json::from_value(receipt["transactionHash"].clone()).unwrap();
        self.with_chain(chain, |c| c.receipts.insert(hash, receipt));
    }

    pub fn queue_submit(&self, chain: &str, mode: SubmitMode) {
        self.with_chain(chain, |c| c.submit_modes.push_back(mode));
    }

    pub fn set_default_submit(&self, chain: &str, mode: SubmitMode) {
        self.with_chain(chain, |c| c.default_submit = mode);
    }

    pub fn sent(&self, chain: &str) -> Vec<String> {
        self.with_chain(chain, |c| c.sent.clone())
    }

    pub fn sent_hashes(&self, chain: &str) -> Vec<B256> {
        self.with_chain(chain, |c| c.sent_txs.iter().map(|t| t.hash).collect())
    }

    pub fn sent_txs(&self, chain: &str) -> Vec<SentTx> {
        self.with_chain(chain, |c| c.sent_txs.clone())
    }

    /// Number of requests for `method` against any endpoint of `chain`
    pub fn request_count(&self, chain: &str, method: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .requests
            .iter()
            .filter(|(url, m)| chain_of(url) == chain.to_lowercase() && m == method)
            .count()
    }

    /// Mine a pending transaction after the fact
    pub fn mine(&self, chain: &str, hash: B256, success: bool) {
        self.with_chain(chain, |c| c.include(hash, success));
    }

    fn handle(&self, url: &str, request: &RpcRequest) -> Result<Value, TransportError> {
        let mut state = self.state.lock().unwrap();
        state
            .requests
            .push((url.to_string(), request.method.clone()));

        if state.down.contains(url) {
            return Err(TransportError::Unreachable(format!(
                "error sending request for url ({})",
                url
            )));
        }

        let chain = state.chains.entry(chain_of(url)).or_default();
        let params = &request.params;

        match request.method.as_str() {
            "eth_blockNumber" => Ok(quantity(chain.head)),
            "eth_gasPrice" => Ok(quantity(1_000_000_000)),
            "eth_getTransactionCount" => match params[1].as_str() {
                Some("latest") => Ok(quantity(chain.mined_nonce)),
                _ => Ok(quantity(chain.pending_nonce())),
            },
            "eth_getBalance" => Ok(json!(chain.balance)),
            "eth_call" => Ok(json!(format!(
                "0x{}",
                hex::encode(chain.total_supply.to_be_bytes::<32>())
            ))),
            "web3_clientVersion" => Ok(json!("MockNode/v1.0.0")),
            "eth_getTransactionReceipt" => {
                let hash: B256 = serde_json::from_value(params[0].clone()).map_err(|e| {
                    TransportError::Rpc {
                        code: -32602,
                        message: e.to_string(),
                    }
                })?;
                Ok(chain.receipts.get(&hash).cloned().unwrap_or(Value::Null))
            }
            "eth_sendRawTransaction" => {
                let raw_hex = params[0]
                    .as_str()
                    .unwrap_or_default()
                    .trim_start_matches("0x")
                    .to_string();
                let raw = hex::decode(&raw_hex).map_err(|e| TransportError::Rpc {
                    code: -32602,
                    message: e.to_string(),
                })?;
                let tx = decode_sent(&raw);
                let hash = tx.hash;
                if tx.nonce < chain.mined_nonce {
                    return Err(TransportError::Rpc {
                        code: -32000,
                        message: "nonce too low".to_string(),
                    });
                }

                let mode = chain
                    .submit_modes
                    .pop_front()
                    .unwrap_or(chain.default_submit);

                chain.sent.push(raw_hex);
                chain.sent_txs.push(tx);
                match mode {
                    SubmitMode::Confirm => chain.include(hash, true),
                    SubmitMode::Revert => chain.include(hash, false),
                    SubmitMode::Hang => {}
                    SubmitMode::Drop => {
                        return Err(TransportError::Unreachable(
                            "connection reset by peer".to_string(),
                        ));
                    }
                }
                Ok(json!(hash))
            }
            other => Err(TransportError::Rpc {
                code: -32601,
                message: format!("the method {} does not exist", other),
            }),
        }
    }
}

impl ChainState {
    fn pending_nonce(&self) -> u64 {
        self.sent_txs
            .iter()
            .map(|t| t.nonce + 1)
            .max()
            .unwrap_or_default()
            .max(self.mined_nonce)
    }

    /// Put a sent transaction in a block, using up its nonce
    fn include(&mut self, hash: B256, success: bool) {
        let tx = self
            .sent_txs
            .iter()
            .find(|t| t.hash == hash)
            .copied()
            .expect("transaction was sent");
        self.mined_nonce = self.mined_nonce.max(tx.nonce + 1);
        self.receipts.insert(hash, plain_receipt(hash, success));
    }
}

#[async_trait]
impl RpcTransport for MockNode {
    async fn send(&self, url: &str, request: &RpcRequest) -> Result<Value, TransportError> {
        self.handle(url, request)
    }
}

pub fn plain_receipt(hash: B256, success: bool) -> Value {
    json!({
        "transactionHash": hash,
        "blockNumber": quantity(1_000),
        "status": if success { "0x1" } else { "0x0" },
        "logs": []
    })
}

fn word(v: U256) -> String {
    hex::encode(v.to_be_bytes::<32>())
}

/// Receipt of a `Locked(user, amount, fee, netAmount)` on the lock contract
pub fn locked_receipt(hash: B256, net_amount: u64, block: u64, success: bool) -> Value {
    locked_receipt_for(hash, USER, net_amount, block, success)
}

pub fn locked_receipt_for(
    hash: B256,
    user: Address,
    net_amount: u64,
    block: u64,
    success: bool,
) -> Value {
    let fee = U256::from(net_amount / 100);
    let gross = U256::from(net_amount) + fee;
    let layout = default_event_layout(&ChainRole::LockUnlock {
        contract: LOCK_CONTRACT,
    });
    json!({
        "transactionHash": hash,
        "blockNumber": quantity(block),
        "status": if success { "0x1" } else { "0x0" },
        "logs": [{
            "address": LOCK_CONTRACT,
            "topics": [layout.topic0.unwrap(), user.into_word()],
            "data": format!("0x{}{}{}", word(gross), word(fee), word(U256::from(net_amount))),
        }]
    })
}

/// Receipt of a burn on a mint contract: the token's
/// `Transfer(from, 0x0, amount)`
pub fn burned_receipt(hash: B256, contract: Address, amount: u64, block: u64) -> Value {
    json!({
        "transactionHash": hash,
        "blockNumber": quantity(block),
        "status": "0x1",
        "logs": [{
            "address": contract,
            "topics": [
                keccak256("Transfer(address,address,uint256)"),
                USER.into_word(),
                B256::ZERO,
            ],
            "data": format!("0x{}", word(U256::from(amount))),
        }]
    })
}

pub struct Harness {
    pub node: Arc<MockNode>,
    pub store: Arc<MemoryRecordStore>,
    pub registry: Arc<ChainRegistry>,
    pub reconciler: Arc<Reconciler>,
}

pub struct HarnessBuilder {
    lock_finality: u64,
    endpoints: usize,
    mint_event: Option<EventLayout>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            lock_finality: 1,
            endpoints: 2,
            mint_event: None,
        }
    }
}

fn chain_config(name: &str, chain_id: u64, role: ChainRole, endpoints: usize) -> ChainConfig {
    let lock = role.is_lock_unlock();
    ChainConfig {
        name: name.to_string(),
        chain_id,
        role,
        event: default_event_layout(&role),
        rpc_urls: (0..endpoints).map(|i| endpoint(name, i)).collect(),
        finality_blocks: 1,
        gas_limit: if lock { 500_000 } else { 1_300_000 },
        gas_price_multiplier_pct: if lock { 100 } else { 150 },
        confirmation_timeout: Duration::from_millis(60),
    }
}

impl HarnessBuilder {
    pub fn lock_finality(mut self, blocks: u64) -> Self {
        self.lock_finality = blocks;
        self
    }

    /// Burn event layout for every mint chain
    pub fn mint_event(mut self, layout: EventLayout) -> Self {
        self.mint_event = Some(layout);
        self
    }

    pub fn build(self) -> Harness {
        let node = MockNode::new();
        let transport: Arc<dyn RpcTransport> = node.clone();
        let signer: Arc<dyn TransactionSigner> =
            Arc::new(LocalSigner::from_private_key(TEST_KEY).unwrap());

        let mut lock = chain_config(
            "Cypherium",
            16166,
            ChainRole::LockUnlock {
                contract: LOCK_CONTRACT,
            },
            self.endpoints,
        );
        lock.finality_blocks = self.lock_finality;
        let mut xdc = chain_config(
            "XDC",
            50,
            ChainRole::MintBurn {
                contract: XDC_CONTRACT,
            },
            self.endpoints,
        );
        let mut bnb = chain_config(
            "BNB",
            56,
            ChainRole::MintBurn {
                contract: BNB_CONTRACT,
            },
            self.endpoints,
        );
        if let Some(layout) = self.mint_event {
            xdc.event = layout;
            bnb.event = layout;
        }

        let gateways = vec![lock, xdc, bnb]
            .into_iter()
            .map(|c| {
                ChainGateway::new(
                    c,
                    transport.clone(),
                    Some(signer.clone()),
                    Duration::from_millis(5),
                )
                .unwrap()
            })
            .collect();

        let registry = Arc::new(ChainRegistry::new(gateways).unwrap());
        let store = Arc::new(MemoryRecordStore::new());
        let store_dyn: Arc<dyn RecordStore> = store.clone();
        let reconciler = Arc::new(Reconciler::new(registry.clone(), store_dyn, MAX_RETRIES));

        Harness {
            node,
            store,
            registry,
            reconciler,
        }
    }
}

impl Harness {
    pub fn new() -> Self {
        HarnessBuilder::default().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub fn scheduler(&self) -> RetryScheduler {
        RetryScheduler::with_owner(
            self.reconciler.clone(),
            RetryConfig {
                interval: Duration::from_millis(20),
                max_retries: MAX_RETRIES,
                concurrency: 2,
                lease_duration: Duration::from_secs(30),
            },
            "test-scheduler".to_string(),
        )
    }
}

pub fn tx_hash(byte: u8) -> B256 {
    B256::repeat_byte(byte)
}
