//! Source event verification
//!
//! A claim is only acted on once its source transaction has been fetched
//! from the source chain, found successful and final, and shown to contain the
//! expected event from the expected contract. The amount used downstream is
//! always the one decoded from that event, never the caller's.

use alloy::primitives::{Address, B256, U256};
use tracing::{debug, info, warn};

use crate::contracts::{decode_amount_word, EventLayout};
use crate::error::BridgeError;
use crate::gateway::{ChainGateway, Receipt};

/// Authoritative result of a successful verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedEvent {
    pub amount: U256,
    pub emitting_contract: Address,
    /// Block that included the source transaction
    pub block_confirmed: u64,
}

/// Verify that `tx_hash` on `gateway`'s chain emitted the expected event.
///
/// `claimed` is checked against the decoded amount when the caller supplied
/// one (burn claims); lock claims pass `None` and take the decoded amount.
/// `user` must be the account the event names when the layout has a user topic.
pub async fn verify(
    gateway: &ChainGateway,
    tx_hash: B256,
    contract: Address,
    layout: EventLayout,
    user: Address,
    claimed: Option<U256>,
) -> Result<VerifiedEvent, BridgeError> {
    let receipt = gateway
        .transaction_receipt(tx_hash)
        .await?
        .ok_or(BridgeError::TransactionNotFound(tx_hash))?;

    // Mined receipts always carry a block; pending ones are not claimable yet
    let block = receipt
        .block()
        .ok_or(BridgeError::TransactionNotFound(tx_hash))?;

    // Only status 1 counts; a pre-Byzantium receipt without status is not proof
    if receipt.succeeded() != Some(true) {
        warn!(
            chain = %gateway.name(),
            tx_hash = %tx_hash,
            status = ?receipt.status,
            "Source transaction not successful"
        );
        return Err(BridgeError::TransactionReverted(tx_hash));
    }

    let required = gateway.config().finality_blocks;
    if required > 1 {
        let head = gateway.block_number().await?;
        let confirmations = head.saturating_sub(block) + 1;
        if confirmations < required {
            debug!(
                chain = %gateway.name(),
                tx_hash = %tx_hash,
                confirmations,
                required,
                "Source transaction not final yet"
            );
            return Err(BridgeError::NotFinalized {
                tx_hash,
                confirmations,
                required,
            });
        }
    }

    let event = extract_event(&receipt, block, contract, layout, user, claimed)?;

    info!(
        chain = %gateway.name(),
        tx_hash = %tx_hash,
        amount = %event.amount,
        block = event.block_confirmed,
        "Source event verified"
    );

    Ok(event)
}

/// Find the first matching log in `receipt` and check its user and amount
pub fn extract_event(
    receipt: &Receipt,
    block: u64,
    contract: Address,
    layout: EventLayout,
    user: Address,
    claimed: Option<U256>,
) -> Result<VerifiedEvent, BridgeError> {
    let tx_hash = receipt.transaction_hash;

    // Address comparison is on parsed bytes, so checksum casing cannot matter
    let log = receipt
        .logs
        .iter()
        .find(|log| {
            log.address == contract
                && layout
                    .topic0
                    .map_or(true, |topic| log.topic0() == Some(&topic))
        })
        .ok_or(BridgeError::EventNotFound(tx_hash))?;

    if let Some(index) = layout.user_topic {
        let topic = log.topics.get(index).ok_or_else(|| BridgeError::MalformedEvent {
            tx_hash,
            reason: format!("log has {} topics, user topic {} missing", log.topics.len(), index),
        })?;
        let actual = Address::from_word(*topic);
        if actual != user {
            return Err(BridgeError::UserMismatch {
                claimed: user,
                actual,
            });
        }
    }

    let amount = decode_amount_word(&log.data, layout.amount_word).ok_or_else(|| {
        BridgeError::MalformedEvent {
            tx_hash,
            reason: format!(
                "log data is {} bytes, amount word {} needs {}",
                log.data.len(),
                layout.amount_word,
                (layout.amount_word + 1) * 32
            ),
        }
    })?;

    if amount.is_zero() {
        return Err(BridgeError::ZeroAmount);
    }

    if let Some(claimed) = claimed {
        if claimed != amount {
            return Err(BridgeError::AmountMismatch {
                claimed,
                actual: amount,
            });
        }
    }

    Ok(VerifiedEvent {
        amount,
        emitting_contract: log.address,
        block_confirmed: block,
    })
}
