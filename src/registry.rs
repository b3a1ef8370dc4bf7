//! Chain registry
//!
//! Owns one [`ChainGateway`] per configured chain: exactly one lock/unlock
//! chain and one or more mint/burn chains. Claims name their mint chain by
//! network name; lookups are case-insensitive.

use std::sync::Arc;

use eyre::{eyre, Result};

use crate::config::Config;
use crate::error::BridgeError;
use crate::gateway::{ChainGateway, HttpTransport, RpcTransport};
use crate::signer::{LocalSigner, TransactionSigner};

pub struct ChainRegistry {
    lock_chain: Arc<ChainGateway>,
    mint_chains: Vec<Arc<ChainGateway>>,
}

impl ChainRegistry {
    /// Build from already constructed gateways
    pub fn new(gateways: Vec<ChainGateway>) -> Result<Self> {
        let (locks, mints): (Vec<_>, Vec<_>) = gateways
            .into_iter()
            .map(Arc::new)
            .partition(|g| g.role().is_lock_unlock());

        let mut locks = locks.into_iter();
        let lock_chain = locks
            .next()
            .ok_or_else(|| eyre!("No lock-unlock chain configured"))?;
        if locks.next().is_some() {
            return Err(eyre!("More than one lock-unlock chain configured"));
        }
        if mints.is_empty() {
            return Err(eyre!("No mint-burn chain configured"));
        }

        Ok(Self {
            lock_chain,
            mint_chains: mints,
        })
    }

    /// Build HTTP gateways for every configured chain, sharing one signer
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport: Arc<dyn RpcTransport> =
            Arc::new(HttpTransport::new(config.rpc.request_timeout)?);
        let signer: Arc<dyn TransactionSigner> =
            Arc::new(LocalSigner::from_private_key(&config.signer.private_key)?);

        let gateways = config
            .chains
            .iter()
            .map(|chain| {
                ChainGateway::new(
                    chain.clone(),
                    transport.clone(),
                    Some(signer.clone()),
                    config.rpc.receipt_poll_interval,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(gateways)
    }

    pub fn lock_chain(&self) -> &Arc<ChainGateway> {
        &self.lock_chain
    }

    pub fn mint_chains(&self) -> &[Arc<ChainGateway>] {
        &self.mint_chains
    }

    /// Mint chain a claim names, or `UnsupportedNetwork`
    pub fn mint_chain(&self, network: &str) -> Result<&Arc<ChainGateway>, BridgeError> {
        self.mint_chains
            .iter()
            .find(|g| g.name().eq_ignore_ascii_case(network.trim()))
            .ok_or_else(|| BridgeError::UnsupportedNetwork(network.to_string()))
    }

    /// Any chain by name
    pub fn get(&self, name: &str) -> Option<&Arc<ChainGateway>> {
        self.all().find(|g| g.name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<ChainGateway>> {
        std::iter::once(&self.lock_chain).chain(self.mint_chains.iter())
    }
}
