//! Transaction receipt as returned by `eth_getTransactionReceipt`

use alloy::primitives::{Address, Bytes, B256, U64};
use serde::{Deserialize, Serialize};

/// EVM transaction receipt from RPC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: B256,
    pub block_number: Option<U64>,
    pub status: Option<U64>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

/// One emitted log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
}

impl Receipt {
    /// `Some(true)` for status 1, `Some(false)` for status 0, `None` when the
    /// node did not report a status
    pub fn succeeded(&self) -> Option<bool> {
        self.status.map(|s| s == U64::from(1))
    }

    pub fn block(&self) -> Option<u64> {
        self.block_number.map(|b| b.to::<u64>())
    }
}

impl LogEntry {
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }
}
