//! Claim reconciliation pipeline
//!
//! A claim becomes a pending record, is verified against the source chain and
//! only then executed on the destination chain:
//!
//! ```text
//! pending ──verify ok──▶ (amount + block bound) ──execute ok──▶ success
//!    │                                                │
//!    └──verify err──▶ failed (unverified)             └──err──▶ failed (verified, retryable)
//! ```
//!
//! Unverified failures are never retried by the scheduler; the claim can be
//! sent again once the source transaction is final. A rejection no resend can
//! change (reverted source, wrong amount, wrong user) closes the record to
//! identical claims. Verified failures are retried through
//! [`Reconciler::retry_record`] until the retry ceiling.

use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::contracts::EventLayout;
use crate::db::{BridgeTransaction, NewBridgeTransaction, RecordStore, RecordUpdate};
use crate::error::{BridgeError, StoreError};
use crate::executor;
use crate::gateway::ChainGateway;
use crate::metrics;
use crate::registry::ChainRegistry;
use crate::verifier;
use crate::types::{BridgeAction, BroadcastSlot};

/// Inbound claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// Native funds locked on the lock chain; mint on `network`.
    /// The amount comes from the verified event.
    LockMint {
        network: String,
        user: Address,
        source_tx_hash: B256,
    },
    /// Wrapped funds burned on `network`; unlock on the lock chain
    BurnUnlock {
        network: String,
        user: Address,
        amount: U256,
        source_tx_hash: B256,
    },
}

impl Claim {
    pub fn action(&self) -> BridgeAction {
        match self {
            Claim::LockMint { .. } => BridgeAction::LockMint,
            Claim::BurnUnlock { .. } => BridgeAction::BurnUnlock,
        }
    }

    pub fn network(&self) -> &str {
        match self {
            Claim::LockMint { network, .. } | Claim::BurnUnlock { network, .. } => network,
        }
    }

    pub fn user(&self) -> Address {
        match self {
            Claim::LockMint { user, .. } | Claim::BurnUnlock { user, .. } => *user,
        }
    }

    pub fn source_tx_hash(&self) -> B256 {
        match self {
            Claim::LockMint { source_tx_hash, .. } | Claim::BurnUnlock { source_tx_hash, .. } => {
                *source_tx_hash
            }
        }
    }

    /// Caller-supplied amount, only burn claims carry one
    pub fn claimed_amount(&self) -> Option<U256> {
        match self {
            Claim::LockMint { .. } => None,
            Claim::BurnUnlock { amount, .. } => Some(*amount),
        }
    }
}

/// Result handed back to the claim's caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The claim was well formed but its source transaction is not final yet
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub not_yet_confirmed: bool,
}

impl ClaimOutcome {
    fn from_result(result: Result<B256, BridgeError>) -> Self {
        match result {
            Ok(tx_hash) => Self {
                success: true,
                tx_hash: Some(tx_hash),
                error: None,
                not_yet_confirmed: false,
            },
            Err(e) => Self {
                success: false,
                tx_hash: None,
                not_yet_confirmed: e.is_not_yet_confirmed(),
                error: Some(e.to_string()),
            },
        }
    }
}

/// What a retry attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Record was no longer eligible when it was re-read
    Skipped,
    /// A previously broadcast transaction turned out to be confirmed
    Recovered(B256),
    /// A new compensating transaction was confirmed
    Executed(B256),
}

/// Source and destination for one direction
struct Route<'a> {
    source: &'a Arc<ChainGateway>,
    destination: &'a Arc<ChainGateway>,
    layout: EventLayout,
}

pub struct Reconciler {
    registry: Arc<ChainRegistry>,
    store: Arc<dyn RecordStore>,
    max_retries: u32,
}

impl Reconciler {
    pub fn new(registry: Arc<ChainRegistry>, store: Arc<dyn RecordStore>, max_retries: u32) -> Self {
        Self {
            registry,
            store,
            max_retries,
        }
    }

    pub fn registry(&self) -> &Arc<ChainRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run a claim through the pipeline and shape the result for the caller
    pub async fn submit_claim(&self, claim: Claim) -> ClaimOutcome {
        ClaimOutcome::from_result(self.process_claim(claim).await)
    }

    /// Verify a claim and execute its compensating action.
    ///
    /// Returns the confirmed destination transaction hash.
    pub async fn process_claim(&self, claim: Claim) -> Result<B256, BridgeError> {
        let action = claim.action();
        let source_tx_hash = claim.source_tx_hash();
        metrics::record_claim_received(action.as_str());

        if claim.user() == Address::ZERO {
            return Err(BridgeError::InvalidClaim("user address is zero".to_string()));
        }
        if claim.claimed_amount() == Some(U256::ZERO) {
            return Err(BridgeError::InvalidClaim(
                "amount must be greater than zero".to_string(),
            ));
        }

        let route = self.route(action, claim.network())?;

        let new_record = NewBridgeTransaction {
            user: claim.user(),
            source_network: route.source.name().to_string(),
            destination_network: route.destination.name().to_string(),
            action,
            amount: claim.claimed_amount(),
            source_tx_hash,
        };

        let id = match self.store.create(&new_record).await {
            Ok(id) => id,
            Err(StoreError::Duplicate { existing_id }) => {
                if self.store.reopen_unverified(existing_id, &new_record).await? {
                    info!(
                        record_id = existing_id,
                        action = %action,
                        source_tx_hash = %source_tx_hash,
                        "Reopened unverified claim"
                    );
                    existing_id
                } else {
                    warn!(
                        record_id = existing_id,
                        action = %action,
                        source_tx_hash = %source_tx_hash,
                        "Duplicate claim rejected"
                    );
                    return Err(BridgeError::DuplicateClaim { existing_id });
                }
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            record_id = id,
            action = %action,
            source = %route.source.name(),
            destination = %route.destination.name(),
            source_tx_hash = %source_tx_hash,
            "Processing claim"
        );

        let verified = match verifier::verify(
            route.source,
            source_tx_hash,
            route.source.role().contract(),
            route.layout,
            claim.user(),
            claim.claimed_amount(),
        )
        .await
        {
            Ok(verified) => verified,
            Err(e) => {
                metrics::record_verification_failure(action.as_str(), e.kind());
                warn!(record_id = id, error = %e, "Claim failed verification");
                self.fail_record(id, action, &e).await?;
                return Err(e);
            }
        };

        self.store
            .update(
                id,
                &RecordUpdate::default().verified(verified.amount, verified.block_confirmed),
            )
            .await?;

        self.execute_record(id, action, route.destination, claim.user(), verified.amount, None)
            .await
    }

    /// Re-attempt the destination side of a verified, failed record.
    ///
    /// The record is re-read first so a stale sweep snapshot cannot act on a
    /// record that has since succeeded. Every destination hash left by earlier
    /// attempts is checked before anything new is sent, and one that may still
    /// be pending is replaced at its nonce rather than joined by a second mint.
    pub async fn retry_record(&self, id: i64) -> Result<RetryOutcome, BridgeError> {
        let record = self.store.get(id).await?.ok_or(StoreError::NotFound(id))?;
        if !record.is_retryable(self.max_retries) {
            return Ok(RetryOutcome::Skipped);
        }

        let amount = record.amount.ok_or_else(|| StoreError::Corrupt {
            id,
            reason: "verified record has no amount".to_string(),
        })?;

        let route = self.route(record.action, mint_network(&record))?;

        info!(
            record_id = id,
            action = %record.action,
            attempt = record.retries + 1,
            destination = %route.destination.name(),
            "Retrying compensating action"
        );

        // Read before the receipts: a nonce used after this point shows up as
        // a receipt below
        let replacing = match self.open_slot(id, route.destination, &record).await {
            Ok(slot) => slot,
            Err(e) => {
                metrics::record_retry("failed");
                self.fail_record(id, record.action, &e).await?;
                return Err(e);
            }
        };

        for previous in record.destination_tx_hashes() {
            match route.destination.transaction_receipt(previous).await {
                Ok(Some(receipt)) if receipt.succeeded() == Some(true) => {
                    self.store
                        .update(id, &RecordUpdate::default().succeeded(previous))
                        .await?;
                    metrics::record_retry("recovered");
                    info!(
                        record_id = id,
                        tx_hash = %previous,
                        "Earlier destination transaction confirmed, record recovered"
                    );
                    return Ok(RetryOutcome::Recovered(previous));
                }
                Ok(Some(receipt)) => {
                    info!(
                        record_id = id,
                        tx_hash = %previous,
                        status = ?receipt.status,
                        "Earlier destination transaction did not succeed"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    metrics::record_retry("failed");
                    self.fail_record(id, record.action, &e).await?;
                    return Err(e);
                }
            }
        }

        if let Some(slot) = replacing {
            warn!(
                record_id = id,
                tx_hash = ?record.destination_tx_hash,
                nonce = slot.nonce,
                "Earlier destination transaction may still be pending, replacing it"
            );
        }

        match self
            .execute_record(
                id,
                record.action,
                route.destination,
                record.user,
                amount,
                replacing,
            )
            .await
        {
            Ok(hash) => {
                metrics::record_retry("success");
                Ok(RetryOutcome::Executed(hash))
            }
            Err(e) => {
                metrics::record_retry("failed");
                Err(e)
            }
        }
    }

    /// Slot of an earlier destination transaction that could still be mined.
    ///
    /// While the signer has not used that nonce, a new transaction must
    /// replace the earlier one at the same nonce. Once the nonce is used and
    /// none of the record's transactions has a successful receipt, none of
    /// them can be mined any more.
    async fn open_slot(
        &self,
        id: i64,
        destination: &ChainGateway,
        record: &BridgeTransaction,
    ) -> Result<Option<BroadcastSlot>, BridgeError> {
        let slot = match record.broadcast_slot() {
            Some(slot) => slot,
            None => return Ok(None),
        };

        let signer = destination.signer_address()?;
        let mined = destination.mined_nonce(signer).await?;
        if slot.nonce >= mined {
            Ok(Some(slot))
        } else {
            info!(
                record_id = id,
                nonce = slot.nonce,
                mined_nonce = mined,
                "Nonce of earlier destination transaction is used, signing at a fresh nonce"
            );
            Ok(None)
        }
    }

    /// Sign, record and broadcast the compensating call.
    ///
    /// The hash and slot are stored before the broadcast, so a crash after the
    /// send still leaves a transaction the retry path can find.
    async fn execute_record(
        &self,
        id: i64,
        action: BridgeAction,
        destination: &ChainGateway,
        recipient: Address,
        amount: U256,
        replacing: Option<BroadcastSlot>,
    ) -> Result<B256, BridgeError> {
        let method = destination.role().compensating_method();

        let prepared =
            match executor::prepare(destination, method, recipient, amount, replacing).await {
                Ok(prepared) => prepared,
                Err(e) => {
                    self.fail_record(id, action, &e).await?;
                    return Err(e);
                }
            };

        self.store
            .update(
                id,
                &RecordUpdate::default().in_flight(prepared.tx_hash(), prepared.slot),
            )
            .await?;

        match executor::send_and_confirm(destination, &prepared).await {
            Ok(receipt) => {
                self.store
                    .update(id, &RecordUpdate::default().succeeded(receipt.tx_hash))
                    .await
                    .map_err(|e| {
                        error!(
                            record_id = id,
                            tx_hash = %receipt.tx_hash,
                            error = %e,
                            "Compensating transaction confirmed but record update failed"
                        );
                        e
                    })?;
                info!(
                    record_id = id,
                    action = %action,
                    tx_hash = %receipt.tx_hash,
                    amount = %amount,
                    "Claim reconciled"
                );
                Ok(receipt.tx_hash)
            }
            Err(e) => {
                self.fail_record(id, action, &e).await?;
                Err(e)
            }
        }
    }

    /// Mark a record failed, keeping any destination hash the error carries
    async fn fail_record(
        &self,
        id: i64,
        action: BridgeAction,
        error: &BridgeError,
    ) -> Result<(), BridgeError> {
        let mut update = RecordUpdate::default()
            .failed(error.to_string())
            .destination_tx_hash(error.destination_tx_hash());
        if error.is_final_rejection() {
            update = update.rejected();
        }
        self.store.update(id, &update).await?;

        if let Some(record) = self.store.get(id).await? {
            if record.verified_block.is_some() && record.retries >= self.max_retries {
                metrics::record_terminal_failure(action.as_str());
                error!(
                    record_id = id,
                    action = %action,
                    retries = record.retries,
                    source_tx_hash = %record.source_tx_hash,
                    destination_tx_hash = ?record.destination_tx_hash,
                    error = %error,
                    "Retry ceiling reached, operator intervention required"
                );
            } else {
                warn!(
                    record_id = id,
                    retries = record.retries,
                    error = %error,
                    "Record marked failed"
                );
            }
        }
        Ok(())
    }

    fn route(&self, action: BridgeAction, network: &str) -> Result<Route<'_>, BridgeError> {
        let lock_chain = self.registry.lock_chain();
        let mint_chain = self.registry.mint_chain(network)?;
        Ok(match action {
            BridgeAction::LockMint => Route {
                source: lock_chain,
                destination: mint_chain,
                layout: lock_chain.config().event,
            },
            BridgeAction::BurnUnlock => Route {
                source: mint_chain,
                destination: lock_chain,
                layout: mint_chain.config().event,
            },
        })
    }
}

/// The mint chain a record's direction names
fn mint_network(record: &BridgeTransaction) -> &str {
    match record.action {
        BridgeAction::LockMint => &record.destination_network,
        BridgeAction::BurnUnlock => &record.source_network,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_accessors() {
        let claim = Claim::BurnUnlock {
            network: "BNB".to_string(),
            user: Address::repeat_byte(1),
            amount: U256::from(10),
            source_tx_hash: B256::repeat_byte(2),
        };
        assert_eq!(claim.action(), BridgeAction::BurnUnlock);
        assert_eq!(claim.claimed_amount(), Some(U256::from(10)));
        assert_eq!(claim.network(), "BNB");

        let claim = Claim::LockMint {
            network: "XDC".to_string(),
            user: Address::repeat_byte(1),
            source_tx_hash: B256::repeat_byte(2),
        };
        assert_eq!(claim.action(), BridgeAction::LockMint);
        assert_eq!(claim.claimed_amount(), None);
    }

    #[test]
    fn test_outcome_shape() {
        let ok = ClaimOutcome::from_result(Ok(B256::repeat_byte(3)));
        let body = serde_json::to_value(&ok).unwrap();
        assert_eq!(body["success"], true);
        assert!(body.get("error").is_none());
        assert!(body.get("not_yet_confirmed").is_none());

        let pending = ClaimOutcome::from_result(Err(BridgeError::TransactionNotFound(
            B256::repeat_byte(4),
        )));
        assert!(!pending.success);
        assert!(pending.not_yet_confirmed);

        let rejected = ClaimOutcome::from_result(Err(BridgeError::ZeroAmount));
        assert!(!rejected.not_yet_confirmed);
        assert!(rejected.error.is_some());
    }
}
