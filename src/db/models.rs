use std::str::FromStr;

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::error::StoreError;
use crate::types::{BridgeAction, BroadcastSlot, Status};

// Amounts are NUMERIC(78,0) in the database. They are written as decimal text
// cast in SQL ($n::NUMERIC) and read back with amount::TEXT.

/// Reconciliation record for one bridge operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeTransaction {
    pub id: i64,
    /// Account credited on the destination chain
    pub user: Address,
    pub source_network: String,
    pub destination_network: String,
    pub action: BridgeAction,
    /// Verified amount; lock claims carry none until their event is verified
    pub amount: Option<U256>,
    pub source_tx_hash: B256,
    /// Set as soon as a compensating transaction has been signed
    pub destination_tx_hash: Option<B256>,
    /// Earlier signed versions, any of which may still be mined
    pub superseded_tx_hashes: Vec<B256>,
    pub destination_nonce: Option<u64>,
    pub destination_gas_price: Option<u128>,
    pub status: Status,
    pub retries: u32,
    pub last_error: Option<String>,
    /// Verification failed for a reason a later claim cannot change
    pub rejected: bool,
    /// Source block of the verified event; `None` until verification passed
    pub verified_block: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BridgeTransaction {
    /// Verified and failed with attempts left
    pub fn is_retryable(&self, max_retries: u32) -> bool {
        self.status == Status::Failed && self.retries < max_retries && self.verified_block.is_some()
    }

    /// Slot of the latest signed destination transaction
    pub fn broadcast_slot(&self) -> Option<BroadcastSlot> {
        Some(BroadcastSlot {
            nonce: self.destination_nonce?,
            gas_price: self.destination_gas_price?,
        })
    }

    /// Every destination transaction signed for this record, latest first
    pub fn destination_tx_hashes(&self) -> Vec<B256> {
        self.destination_tx_hash
            .into_iter()
            .chain(self.superseded_tx_hashes.iter().rev().copied())
            .collect()
    }
}

/// For inserting new records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBridgeTransaction {
    pub user: Address,
    pub source_network: String,
    pub destination_network: String,
    pub action: BridgeAction,
    /// Caller-claimed amount (burn claims only)
    pub amount: Option<U256>,
    pub source_tx_hash: B256,
}

/// Partial update; unset fields are left as they are.
///
/// A new `destination_tx_hash` moves the previous one to
/// `superseded_tx_hashes`, and a superseded hash that becomes current again
/// leaves that list. `rejected` can only be set here; reopening a record
/// clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    pub status: Option<Status>,
    pub amount: Option<U256>,
    pub verified_block: Option<u64>,
    pub destination_tx_hash: Option<B256>,
    pub broadcast_slot: Option<BroadcastSlot>,
    pub last_error: Option<String>,
    pub clear_error: bool,
    pub increment_retries: bool,
    pub rejected: bool,
}

impl RecordUpdate {
    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Bind the amount and block that verification produced
    pub fn verified(mut self, amount: U256, block: u64) -> Self {
        self.amount = Some(amount);
        self.verified_block = Some(block);
        self
    }

    pub fn destination_tx_hash(mut self, hash: Option<B256>) -> Self {
        self.destination_tx_hash = hash;
        self
    }

    /// A signed destination transaction, recorded before it is broadcast
    pub fn in_flight(mut self, hash: B256, slot: BroadcastSlot) -> Self {
        self.destination_tx_hash = Some(hash);
        self.broadcast_slot = Some(slot);
        self
    }

    /// Close the record to resubmissions of the same claim
    pub fn rejected(mut self) -> Self {
        self.rejected = true;
        self
    }

    /// Mark failed, record the error and count the attempt
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = Some(Status::Failed);
        self.last_error = Some(error.into());
        self.increment_retries = true;
        self
    }

    pub fn succeeded(mut self, destination_tx_hash: B256) -> Self {
        self.status = Some(Status::Success);
        self.destination_tx_hash = Some(destination_tx_hash);
        self.clear_error = true;
        self
    }
}

/// Record counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub success: i64,
    pub failed: i64,
    /// Failed records still eligible for retry
    pub retryable: i64,
}

/// Raw `bridge_transactions` row
#[derive(Debug, Clone, FromRow)]
pub struct BridgeTransactionRow {
    pub id: i64,
    pub user_address: String,
    pub source_network: String,
    pub destination_network: String,
    pub action: String,
    pub amount: Option<String>,
    pub source_tx_hash: String,
    pub destination_tx_hash: Option<String>,
    pub superseded_tx_hashes: Vec<String>,
    pub destination_nonce: Option<i64>,
    pub destination_gas_price: Option<String>,
    pub status: String,
    pub retries: i32,
    pub last_error: Option<String>,
    pub rejected: bool,
    pub verified_block: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<BridgeTransactionRow> for BridgeTransaction {
    type Error = StoreError;

    fn try_from(row: BridgeTransactionRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |reason: String| StoreError::Corrupt { id, reason };

        let amount = row
            .amount
            .as_deref()
            .map(|s| U256::from_str_radix(s, 10))
            .transpose()
            .map_err(|e| corrupt(format!("amount: {}", e)))?;

        let destination_tx_hash = row
            .destination_tx_hash
            .as_deref()
            .map(B256::from_str)
            .transpose()
            .map_err(|e| corrupt(format!("destination_tx_hash: {}", e)))?;

        let superseded_tx_hashes = row
            .superseded_tx_hashes
            .iter()
            .map(|h| B256::from_str(h))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| corrupt(format!("superseded_tx_hashes: {}", e)))?;

        let destination_gas_price = row
            .destination_gas_price
            .as_deref()
            .map(|s| s.parse::<u128>())
            .transpose()
            .map_err(|e| corrupt(format!("destination_gas_price: {}", e)))?;

        Ok(Self {
            id,
            user: Address::from_str(&row.user_address)
                .map_err(|e| corrupt(format!("user_address: {}", e)))?,
            source_network: row.source_network,
            destination_network: row.destination_network,
            action: row.action.parse().map_err(corrupt)?,
            amount,
            source_tx_hash: B256::from_str(&row.source_tx_hash)
                .map_err(|e| corrupt(format!("source_tx_hash: {}", e)))?,
            destination_tx_hash,
            superseded_tx_hashes,
            destination_nonce: row
                .destination_nonce
                .map(|n| u64::try_from(n).map_err(|_| corrupt(format!("destination_nonce {}", n))))
                .transpose()?,
            destination_gas_price,
            status: row.status.parse().map_err(corrupt)?,
            retries: u32::try_from(row.retries)
                .map_err(|_| corrupt(format!("negative retries {}", row.retries)))?,
            last_error: row.last_error,
            rejected: row.rejected,
            verified_block: row
                .verified_block
                .map(|b| u64::try_from(b).map_err(|_| corrupt(format!("verified_block {}", b))))
                .transpose()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
