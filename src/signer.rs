//! Transaction signing capability
//!
//! The core never holds key material directly; it asks a [`TransactionSigner`]
//! to turn a fully-specified transaction request into raw signed bytes. The
//! local implementation wraps alloy's `PrivateKeySigner`.

use std::fmt;

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{keccak256, Address, Bytes, B256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use eyre::{eyre, Result};
use tracing::info;

/// Signed transaction ready for `eth_sendRawTransaction`
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub raw: Bytes,
    /// Hash of the signed envelope, known before broadcast
    pub hash: B256,
}

impl SignedTransaction {
    pub fn from_raw(raw: Bytes) -> Self {
        let hash = keccak256(&raw);
        Self { raw, hash }
    }
}

/// Per-chain signing identity
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Account that pays for and authorizes destination calls
    fn address(&self) -> Address;

    /// Sign a complete transaction request (nonce, gas, chain id already set)
    async fn sign(&self, tx: TransactionRequest) -> Result<SignedTransaction>;
}

/// Signer backed by an in-process private key
#[derive(Clone)]
pub struct LocalSigner {
    wallet: EthereumWallet,
    address: Address,
}

/// Custom Debug that never prints key material.
impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl LocalSigner {
    /// Create from a 0x-prefixed hex private key
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| eyre!("Invalid private key: {}", e))?;
        let address = signer.address();

        info!(address = %address, "Bridge signer initialized");

        Ok(Self {
            wallet: EthereumWallet::from(signer),
            address,
        })
    }
}

#[async_trait]
impl TransactionSigner for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, tx: TransactionRequest) -> Result<SignedTransaction> {
        let envelope = tx
            .with_from(self.address)
            .build(&self.wallet)
            .await
            .map_err(|e| eyre!("Failed to sign transaction: {}", e))?;

        let raw: Bytes = envelope.encoded_2718().into();
        Ok(SignedTransaction::from_raw(raw))
    }
}
