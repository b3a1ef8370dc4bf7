//! Error taxonomy for the reconciliation core
//!
//! Transport failures are absorbed by the chain gateway (one failover per call)
//! and only surface here once the failover attempt also failed. Verification
//! failures are terminal rejections; destination-side failures are retried by
//! the scheduler up to the configured ceiling.

use alloy::primitives::{Address, B256, U256};
use thiserror::Error;

/// Failure talking to a single RPC endpoint
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Endpoint unreachable: timeout, connection error, non-2xx, unparseable body
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    /// The endpoint answered with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
}

impl TransportError {
    /// Whether this failure says something about the endpoint rather than the request.
    ///
    /// Rate limiting and upstream-unavailable responses are reported as JSON-RPC
    /// errors by most providers, so they count as infrastructure failures too.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            TransportError::Unreachable(_) => true,
            TransportError::Rpc { code, message } => {
                let msg = message.to_lowercase();
                *code == -32005
                    || msg.contains("rate limit")
                    || msg.contains("too many requests")
                    || msg.contains("header not found")
                    || msg.contains("temporarily unavailable")
                    || msg.contains("upstream")
            }
        }
    }
}

/// Record store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate claim: record {existing_id} already tracks this source transaction")]
    Duplicate { existing_id: i64 },
    #[error("record {0} not found")]
    NotFound(i64),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: i64, reason: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Bridge reconciliation errors
#[derive(Debug, Error)]
pub enum BridgeError {
    // ---- gateway ----
    #[error("transport failure on {chain}: {reason}")]
    TransportFailure { chain: String, reason: String },
    #[error("RPC error on {chain}: {message} (code {code})")]
    Rpc {
        chain: String,
        code: i64,
        message: String,
    },
    #[error("transaction {tx_hash} not confirmed within {timeout_secs}s")]
    NotConfirmed { tx_hash: B256, timeout_secs: u64 },

    // ---- verification (terminal) ----
    #[error("source transaction {0} not found")]
    TransactionNotFound(B256),
    #[error("source transaction {0} reverted on-chain")]
    TransactionReverted(B256),
    #[error("source transaction {tx_hash} has {confirmations} confirmations, {required} required")]
    NotFinalized {
        tx_hash: B256,
        confirmations: u64,
        required: u64,
    },
    #[error("expected event not found in logs of {0}")]
    EventNotFound(B256),
    #[error("event in {tx_hash} could not be decoded: {reason}")]
    MalformedEvent { tx_hash: B256, reason: String },
    #[error("claimed amount {claimed} does not match on-chain amount {actual}")]
    AmountMismatch { claimed: U256, actual: U256 },
    #[error("on-chain amount is zero")]
    ZeroAmount,
    #[error("claim is for {claimed} but the event belongs to {actual}")]
    UserMismatch { claimed: Address, actual: Address },

    // ---- execution (retryable) ----
    #[error("submission failed on {chain}: {reason}")]
    SubmissionFailed {
        chain: String,
        reason: String,
        /// Hash of the signed transaction, when signing got that far
        tx_hash: Option<B256>,
    },
    #[error("destination transaction {0} reverted")]
    ExecutionReverted(B256),
    #[error("destination transaction {0} not confirmed in time")]
    Timeout(B256),

    // ---- claim intake ----
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),
    #[error("invalid claim: {0}")]
    InvalidClaim(String),
    #[error("duplicate claim: record {existing_id} already tracks this source transaction")]
    DuplicateClaim { existing_id: i64 },
    #[error("no signing identity configured for {0}")]
    MissingSigner(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BridgeError {
    /// Destination-side failures the retry scheduler may re-attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::SubmissionFailed { .. }
                | BridgeError::ExecutionReverted(_)
                | BridgeError::Timeout(_)
        )
    }

    /// The claim itself was rejected by verification; no funds moved
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            BridgeError::TransactionNotFound(_)
                | BridgeError::TransactionReverted(_)
                | BridgeError::NotFinalized { .. }
                | BridgeError::EventNotFound(_)
                | BridgeError::MalformedEvent { .. }
                | BridgeError::AmountMismatch { .. }
                | BridgeError::ZeroAmount
                | BridgeError::UserMismatch { .. }
        )
    }

    /// A rejection that no later resend of the same claim can overturn
    pub fn is_final_rejection(&self) -> bool {
        self.is_rejection() && !self.is_not_yet_confirmed()
    }

    /// Source transaction is real but not final yet; the claim can be sent again later
    pub fn is_not_yet_confirmed(&self) -> bool {
        matches!(
            self,
            BridgeError::TransactionNotFound(_) | BridgeError::NotFinalized { .. }
        )
    }

    /// Destination transaction hash known at the time of failure, if any
    pub fn destination_tx_hash(&self) -> Option<B256> {
        match self {
            BridgeError::SubmissionFailed { tx_hash, .. } => *tx_hash,
            BridgeError::ExecutionReverted(hash) | BridgeError::Timeout(hash) => Some(*hash),
            _ => None,
        }
    }

    /// Short stable label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::TransportFailure { .. } => "transport_failure",
            BridgeError::Rpc { .. } => "rpc_error",
            BridgeError::NotConfirmed { .. } => "not_confirmed",
            BridgeError::TransactionNotFound(_) => "transaction_not_found",
            BridgeError::TransactionReverted(_) => "transaction_reverted",
            BridgeError::NotFinalized { .. } => "not_finalized",
            BridgeError::EventNotFound(_) => "event_not_found",
            BridgeError::MalformedEvent { .. } => "malformed_event",
            BridgeError::AmountMismatch { .. } => "amount_mismatch",
            BridgeError::ZeroAmount => "zero_amount",
            BridgeError::UserMismatch { .. } => "user_mismatch",
            BridgeError::SubmissionFailed { .. } => "submission_failed",
            BridgeError::ExecutionReverted(_) => "execution_reverted",
            BridgeError::Timeout(_) => "timeout",
            BridgeError::UnsupportedNetwork(_) => "unsupported_network",
            BridgeError::InvalidClaim(_) => "invalid_claim",
            BridgeError::DuplicateClaim { .. } => "duplicate_claim",
            BridgeError::MissingSigner(_) => "missing_signer",
            BridgeError::Store(_) => "store",
        }
    }
}
