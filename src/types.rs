//! Common types for bridge reconciliation
//!
//! Status and action enums shared by the record store, the pipeline and the
//! status API, plus the role a chain plays in the bridge.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a reconciliation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Success,
    Failed,
}

impl Status {
    /// Get the status as a lowercase string
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Success => "success",
            Status::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "success" => Ok(Status::Success),
            "failed" => Ok(Status::Failed),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// Direction of a bridge operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BridgeAction {
    /// Native asset locked on the lock chain, wrapped asset minted on a mint chain
    #[serde(rename = "lock-mint")]
    LockMint,
    /// Wrapped asset burned on a mint chain, native asset unlocked on the lock chain
    #[serde(rename = "burn-unlock")]
    BurnUnlock,
}

impl BridgeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeAction::LockMint => "lock-mint",
            BridgeAction::BurnUnlock => "burn-unlock",
        }
    }
}

impl fmt::Display for BridgeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BridgeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lock-mint" => Ok(BridgeAction::LockMint),
            "burn-unlock" => Ok(BridgeAction::BurnUnlock),
            other => Err(format!("unknown bridge action: {}", other)),
        }
    }
}

/// Role a chain plays in the bridge, with the contract that backs it.
///
/// The lock chain holds native collateral; mint chains issue the wrapped asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainRole {
    LockUnlock { contract: Address },
    MintBurn { contract: Address },
}

impl ChainRole {
    /// Bridge contract deployed on this chain
    pub fn contract(&self) -> Address {
        match self {
            ChainRole::LockUnlock { contract } | ChainRole::MintBurn { contract } => *contract,
        }
    }

    /// Compensating entry point invoked when this chain is the destination
    pub fn compensating_method(&self) -> ContractMethod {
        match self {
            ChainRole::LockUnlock { .. } => ContractMethod::Unlock,
            ChainRole::MintBurn { .. } => ContractMethod::Mint,
        }
    }

    pub fn is_lock_unlock(&self) -> bool {
        matches!(self, ChainRole::LockUnlock { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChainRole::LockUnlock { .. } => "lock-unlock",
            ChainRole::MintBurn { .. } => "mint-burn",
        }
    }
}

/// Destination contract entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractMethod {
    Mint,
    Unlock,
}

impl ContractMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractMethod::Mint => "mint",
            ContractMethod::Unlock => "unlock",
        }
    }
}

impl fmt::Display for ContractMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Nonce and gas price a destination transaction was signed with.
///
/// A transaction that may still be pending is only ever replaced at the same
/// nonce, so at most one version of it can be mined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BroadcastSlot {
    pub nonce: u64,
    pub gas_price: u128,
}
