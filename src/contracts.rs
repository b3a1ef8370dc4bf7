//! Bridge contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe call encoders and event
//! decoders for the two deployed bridge contracts.

use std::str::FromStr;

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};

use crate::types::{ChainRole, ContractMethod};

sol! {
    /// Native-asset vault on the lock chain
    interface ILockUnlock {
        /// Emitted when a user locks native funds for bridging.
        /// `netAmount` is what the user is owed on the mint chain after fees.
        event Locked(address indexed user, uint256 amount, uint256 fee, uint256 netAmount);

        /// Release locked funds back to a user (operator only)
        function unlock(address to, uint256 amount) external;
    }

    /// Wrapped-asset token on each mint chain
    interface IMintBurn {
        /// Mint wrapped tokens to a user (operator only)
        function mint(address to, uint256 amount) external;

        function totalSupply() external view returns (uint256);
    }
}

/// Where the authoritative amount lives in a source event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLayout {
    /// Expected first topic; `None` accepts any log from the contract
    pub topic0: Option<B256>,
    /// Index of the 32-byte data word holding the amount
    pub amount_word: usize,
    /// Indexed topic holding the account that locked or burned; `None` skips
    /// binding it to the claim's user
    pub user_topic: Option<usize>,
}

/// Source event emitted by a chain in `role`, absent explicit configuration.
///
/// The lock contract emits `Locked(user, amount, fee, netAmount)` and the
/// net amount (third data word) is what gets minted. Burns are matched on the
/// emitting contract alone and the first data word is the amount, which fits
/// both a dedicated burn event and the ERC-20 `Transfer(from, 0x0, amount)`.
pub fn default_event_layout(role: &ChainRole) -> EventLayout {
    match role {
        ChainRole::LockUnlock { .. } => EventLayout {
            topic0: Some(ILockUnlock::Locked::SIGNATURE_HASH),
            amount_word: 2,
            user_topic: Some(1),
        },
        ChainRole::MintBurn { .. } => EventLayout {
            topic0: None,
            amount_word: 0,
            user_topic: Some(1),
        },
    }
}

/// Topic for an event signature: either a 0x-prefixed 32-byte hash or a
/// canonical signature such as `Burned(address,uint256)`. Empty or `any`
/// matches every log.
pub fn parse_event_topic(raw: &str) -> eyre::Result<Option<B256>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("any") {
        return Ok(None);
    }
    if raw.starts_with("0x") {
        return B256::from_str(raw)
            .map(Some)
            .map_err(|e| eyre::eyre!("Invalid event topic {}: {}", raw, e));
    }
    if !raw.contains('(') || !raw.ends_with(')') || raw.contains(' ') {
        return Err(eyre::eyre!(
            "Invalid event signature '{}' (expected e.g. Burned(address,uint256))",
            raw
        ));
    }
    Ok(Some(keccak256(raw)))
}

/// Read one 32-byte word out of log data
pub fn decode_amount_word(data: &[u8], word: usize) -> Option<U256> {
    let start = word.checked_mul(32)?;
    let end = start.checked_add(32)?;
    data.get(start..end).map(U256::from_be_slice)
}

/// ABI-encode the compensating call for a destination contract
pub fn encode_compensating_call(method: ContractMethod, to: Address, amount: U256) -> Bytes {
    match method {
        ContractMethod::Mint => IMintBurn::mintCall { to, amount }.abi_encode().into(),
        ContractMethod::Unlock => ILockUnlock::unlockCall { to, amount }.abi_encode().into(),
    }
}

pub fn encode_total_supply() -> Bytes {
    IMintBurn::totalSupplyCall {}.abi_encode().into()
}

pub fn decode_total_supply(data: &[u8]) -> eyre::Result<U256> {
    let ret = IMintBurn::totalSupplyCall::abi_decode_returns(data, true)
        .map_err(|e| eyre::eyre!("Failed to decode totalSupply(): {}", e))?;
    Ok(ret._0)
}
