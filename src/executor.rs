//! Action executor
//!
//! Builds, signs and broadcasts the compensating `mint` / `unlock` call on the
//! destination chain, then waits for its receipt. Gas price is the network
//! price scaled by the chain's multiplier; gas limit is the chain's fixed
//! ceiling.
//!
//! Signing and broadcasting are separate steps so the caller can record the
//! hash and nonce before anything leaves the process.

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::TransactionRequest;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::ChainConfig;
use crate::contracts::encode_compensating_call;
use crate::error::BridgeError;
use crate::gateway::ChainGateway;
use crate::metrics;
use crate::signer::SignedTransaction;
use crate::types::{BroadcastSlot, ContractMethod};

/// Gas pricing for one destination chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPolicy {
    /// Percent applied to the network gas price (150 = x1.5)
    pub multiplier_pct: u32,
    pub gas_limit: u64,
}

impl GasPolicy {
    pub fn for_chain(config: &ChainConfig) -> Self {
        Self {
            multiplier_pct: config.gas_price_multiplier_pct,
            gas_limit: config.gas_limit,
        }
    }

    /// Scale a network gas price, rounding down
    pub fn apply(&self, base_gas_price: u128) -> u128 {
        base_gas_price.saturating_mul(self.multiplier_pct as u128) / 100
    }
}

/// Confirmed destination transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
}

/// Signed compensating call, not yet broadcast
#[derive(Debug, Clone)]
pub struct PreparedCall {
    pub signed: SignedTransaction,
    pub slot: BroadcastSlot,
}

impl PreparedCall {
    pub fn tx_hash(&self) -> B256 {
        self.signed.hash
    }
}

/// Price for a transaction replacing one signed at `previous`. Nodes only
/// accept a replacement priced at least 10% above the pending one.
pub fn replacement_gas_price(policy: &GasPolicy, base_gas_price: u128, previous: u128) -> u128 {
    let bumped = previous
        .saturating_mul(REPLACEMENT_BUMP_PCT)
        .saturating_add(99)
        / 100;
    policy.apply(base_gas_price).max(bumped)
}

const REPLACEMENT_BUMP_PCT: u128 = 112;

/// Build and sign `method(recipient, amount)` for the destination contract.
///
/// With `replacing` set the call reuses that nonce and outbids its gas
/// price, so it can only ever be mined instead of the earlier transaction.
/// Otherwise it takes the account's next pending nonce.
pub async fn prepare(
    gateway: &ChainGateway,
    method: ContractMethod,
    recipient: Address,
    amount: U256,
    replacing: Option<BroadcastSlot>,
) -> Result<PreparedCall, BridgeError> {
    let chain = gateway.name().to_string();
    let config = gateway.config();
    let policy = GasPolicy::for_chain(config);

    let from = gateway.signer_address()?;

    let base_gas_price = gateway
        .gas_price()
        .await
        .map_err(|e| before_broadcast(&chain, "gas price", e))?;

    let slot = match replacing {
        Some(previous) => BroadcastSlot {
            nonce: previous.nonce,
            gas_price: replacement_gas_price(&policy, base_gas_price, previous.gas_price),
        },
        None => BroadcastSlot {
            nonce: gateway
                .pending_nonce(from)
                .await
                .map_err(|e| before_broadcast(&chain, "nonce", e))?,
            gas_price: policy.apply(base_gas_price),
        },
    };

    let tx = TransactionRequest::default()
        .with_to(config.role.contract())
        .with_input(encode_compensating_call(method, recipient, amount))
        .with_value(U256::ZERO)
        .with_nonce(slot.nonce)
        .with_chain_id(gateway.chain_id())
        .with_gas_limit(policy.gas_limit)
        .with_gas_price(slot.gas_price);

    let signed = gateway.sign(tx).await?;

    info!(
        chain = %chain,
        method = %method,
        recipient = %recipient,
        amount = %amount,
        nonce = slot.nonce,
        gas_price = slot.gas_price,
        gas_limit = policy.gas_limit,
        replacement = replacing.is_some(),
        tx_hash = %signed.hash,
        "Signed compensating transaction"
    );

    Ok(PreparedCall { signed, slot })
}

/// Broadcast a prepared call and wait for a definitive receipt.
///
/// Once a hash exists every failure carries it, so the caller can look it up
/// later instead of minting again.
pub async fn send_and_confirm(
    gateway: &ChainGateway,
    prepared: &PreparedCall,
) -> Result<ExecutionReceipt, BridgeError> {
    let chain = gateway.name();
    let config = gateway.config();

    let started = Instant::now();
    let tx_hash = match gateway.broadcast(&prepared.signed).await {
        Ok(hash) => hash,
        Err(e) => {
            metrics::record_execution(chain, "submission_failed", None);
            warn!(chain = %chain, error = %e, "Submission failed");
            return Err(e);
        }
    };

    let receipt = match gateway
        .wait_for_receipt(tx_hash, config.confirmation_timeout)
        .await
    {
        Ok(receipt) => receipt,
        Err(BridgeError::NotConfirmed { .. }) => {
            metrics::record_execution(chain, "timeout", None);
            warn!(
                chain = %chain,
                tx_hash = %tx_hash,
                timeout_secs = config.confirmation_timeout.as_secs(),
                "Destination transaction not confirmed in time"
            );
            return Err(BridgeError::Timeout(tx_hash));
        }
        Err(e) => return Err(e),
    };

    let elapsed = started.elapsed().as_secs_f64();
    if receipt.succeeded() != Some(true) {
        metrics::record_execution(chain, "reverted", Some(elapsed));
        error!(chain = %chain, tx_hash = %tx_hash, "Destination transaction reverted");
        return Err(BridgeError::ExecutionReverted(tx_hash));
    }

    metrics::record_execution(chain, "success", Some(elapsed));
    info!(
        chain = %chain,
        tx_hash = %tx_hash,
        block = ?receipt.block(),
        "Compensating transaction confirmed"
    );

    Ok(ExecutionReceipt {
        tx_hash,
        block_number: receipt.block(),
    })
}

fn before_broadcast(chain: &str, step: &str, error: BridgeError) -> BridgeError {
    BridgeError::SubmissionFailed {
        chain: chain.to_string(),
        reason: format!("could not read {}: {}", step, error),
        tx_hash: None,
    }
}
