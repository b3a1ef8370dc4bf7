//! Supply audit
//!
//! Collateral held by the lock contract must always cover the wrapped supply
//! minted across every mint chain. The report reads both sides through the
//! gateways and flags any excess minting.

use alloy::primitives::U256;
use futures::future::join_all;
use serde::{Serialize, Serializer};
use tracing::{error, info};

use crate::contracts::{decode_total_supply, encode_total_supply};
use crate::error::BridgeError;
use crate::gateway::ChainGateway;
use crate::metrics;
use crate::registry::ChainRegistry;

fn decimal<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn decimal_opt<S: Serializer>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.collect_str(v),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSupply {
    pub chain: String,
    #[serde(serialize_with = "decimal")]
    pub total_supply: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupplyReport {
    pub lock_chain: String,
    #[serde(serialize_with = "decimal")]
    pub total_locked: U256,
    pub minted: Vec<ChainSupply>,
    #[serde(serialize_with = "decimal")]
    pub total_minted: U256,
    /// Wrapped supply not backed by collateral
    #[serde(serialize_with = "decimal_opt")]
    pub excess_minted: Option<U256>,
}

impl SupplyReport {
    pub fn new(lock_chain: String, total_locked: U256, minted: Vec<ChainSupply>) -> Self {
        let total_minted = minted
            .iter()
            .fold(U256::ZERO, |acc, c| acc.saturating_add(c.total_supply));
        let excess_minted = (total_minted > total_locked).then(|| total_minted - total_locked);
        Self {
            lock_chain,
            total_locked,
            minted,
            total_minted,
            excess_minted,
        }
    }

    pub fn is_backed(&self) -> bool {
        self.excess_minted.is_none()
    }
}

async fn total_supply(gateway: &ChainGateway) -> Result<ChainSupply, BridgeError> {
    let data = gateway
        .eth_call(gateway.role().contract(), encode_total_supply())
        .await?;
    let total_supply = decode_total_supply(&data).map_err(|e| BridgeError::Rpc {
        chain: gateway.name().to_string(),
        code: -32700,
        message: e.to_string(),
    })?;
    Ok(ChainSupply {
        chain: gateway.name().to_string(),
        total_supply,
    })
}

/// Read locked collateral and minted supply on every chain
pub async fn supply_report(registry: &ChainRegistry) -> Result<SupplyReport, BridgeError> {
    let lock_chain = registry.lock_chain();
    let total_locked = lock_chain.balance(lock_chain.role().contract()).await?;

    let minted = join_all(registry.mint_chains().iter().map(|g| total_supply(g)))
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

    let report = SupplyReport::new(lock_chain.name().to_string(), total_locked, minted);

    metrics::record_supply(to_f64(report.total_locked), to_f64(report.total_minted));

    match report.excess_minted {
        Some(excess) => error!(
            total_locked = %report.total_locked,
            total_minted = %report.total_minted,
            excess = %excess,
            "Minted supply exceeds locked collateral"
        ),
        None => info!(
            total_locked = %report.total_locked,
            total_minted = %report.total_minted,
            "Supply audit balanced"
        ),
    }

    Ok(report)
}

fn to_f64(value: U256) -> f64 {
    value.to_string().parse().unwrap_or(f64::MAX)
}
