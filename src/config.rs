//! Configuration loading
//!
//! # Environment Variable Schema
//!
//! ```text
//! DATABASE_URL=postgres://...
//! BRIDGE_PRIVATE_KEY=0x...                      # signing key for all chains
//! BRIDGE_CHAINS_COUNT=4
//! BRIDGE_CHAIN_1_NAME=Cypherium
//! BRIDGE_CHAIN_1_CHAIN_ID=16166
//! BRIDGE_CHAIN_1_ROLE=lock-unlock               # or mint-burn
//! BRIDGE_CHAIN_1_RPC_URL=https://a,https://b    # comma separated, tried in order
//! BRIDGE_CHAIN_1_BACKUP_RPC_URL=https://c       # optional, appended
//! BRIDGE_CHAIN_1_CONTRACT_ADDRESS=0x...
//! BRIDGE_CHAIN_1_FINALITY_BLOCKS=1              # optional
//! BRIDGE_CHAIN_1_GAS_LIMIT=500000               # optional, role default
//! BRIDGE_CHAIN_1_GAS_PRICE_MULTIPLIER_PCT=100   # optional, role default
//! BRIDGE_CHAIN_1_CONFIRMATION_TIMEOUT_SECS=120  # optional
//! BRIDGE_CHAIN_1_EVENT_SIGNATURE=Locked(address,uint256,uint256,uint256)  # optional, role default
//! BRIDGE_CHAIN_1_EVENT_AMOUNT_WORD=2             # optional, role default
//! BRIDGE_CHAIN_1_EVENT_USER_TOPIC=1              # optional, "none" disables
//! ```
//!
//! The event settings describe the source event this chain emits when funds
//! enter the bridge. An event signature of `any` matches every log from the
//! chain's contract.
//!
//! Optional variables fall back to their default only when unset; a set but
//! unparseable value is an error.

use std::collections::HashSet;
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};

use crate::contracts::{default_event_layout, parse_event_topic, EventLayout};
use crate::rpc_fallback::{parse_rpc_urls, redact_url, validate_rpc_url};
use crate::types::ChainRole;

/// Main configuration for the reconciler
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub chains: Vec<ChainConfig>,
    pub signer: SignerConfig,
    pub retry: RetryConfig,
    pub rpc: RpcConfig,
    pub api: ApiConfig,
}

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// Signing identity shared by every chain the bridge writes to
#[derive(Clone)]
pub struct SignerConfig {
    pub private_key: String,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerConfig")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Per-chain configuration
#[derive(Clone)]
pub struct ChainConfig {
    /// Network name used in claims (e.g. "Cypherium", "XDC")
    pub name: String,
    /// Native EVM chain ID
    pub chain_id: u64,
    pub role: ChainRole,
    /// Primary first, then backups
    pub rpc_urls: Vec<String>,
    /// Confirmations required before a source event is trusted
    pub finality_blocks: u64,
    /// Fixed gas ceiling for the compensating call on this chain
    pub gas_limit: u64,
    /// Applied to the network gas price, in percent (150 = x1.5)
    pub gas_price_multiplier_pct: u32,
    /// How long to wait for a destination receipt
    pub confirmation_timeout: Duration,
    /// Source event emitted by this chain's contract
    pub event: EventLayout,
}

/// Custom Debug that redacts endpoint paths (hosted RPC URLs embed API keys).
impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let urls: Vec<String> = self.rpc_urls.iter().map(|u| redact_url(u)).collect();
        f.debug_struct("ChainConfig")
            .field("name", &self.name)
            .field("chain_id", &self.chain_id)
            .field("role", &self.role)
            .field("rpc_urls", &urls)
            .field("finality_blocks", &self.finality_blocks)
            .field("gas_limit", &self.gas_limit)
            .field("gas_price_multiplier_pct", &self.gas_price_multiplier_pct)
            .field("confirmation_timeout", &self.confirmation_timeout)
            .field("event", &self.event)
            .finish()
    }
}

/// Retry scheduler configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Records with this many failed attempts are terminal
    pub max_retries: u32,
    /// Records retried in parallel within one sweep
    pub concurrency: usize,
    /// How long a sweep owns a record before another scheduler may take it
    pub lease_duration: Duration,
}

/// RPC transport configuration
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub request_timeout: Duration,
    pub receipt_poll_interval: Duration,
}

/// Status API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
}

/// Default functions
fn default_finality_blocks() -> u64 {
    1
}

fn default_gas_limit(role: &ChainRole) -> u64 {
    match role {
        ChainRole::LockUnlock { .. } => 500_000,
        ChainRole::MintBurn { .. } => 1_300_000,
    }
}

fn default_gas_price_multiplier_pct(role: &ChainRole) -> u32 {
    match role {
        ChainRole::LockUnlock { .. } => 100,
        ChainRole::MintBurn { .. } => 150,
    }
}

fn default_confirmation_timeout_secs() -> u64 {
    120
}

fn default_retry_interval_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_concurrency() -> usize {
    4
}

fn default_lease_secs() -> u64 {
    600
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

fn default_receipt_poll_ms() -> u64 {
    2_000
}

fn default_api_port() -> u16 {
    9090
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| eyre!("Invalid {}='{}': {}", key, raw, e)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(eyre!("Invalid {}: {}", key, e)),
    }
}

/// `BRIDGE_CHAIN_{N}_EVENT_*` over the role's default layout
fn load_event_layout(prefix: &str, role: &ChainRole) -> Result<EventLayout> {
    let mut layout = default_event_layout(role);

    if let Ok(raw) = env::var(format!("{}_EVENT_SIGNATURE", prefix)) {
        layout.topic0 = parse_event_topic(&raw)
            .wrap_err_with(|| format!("Invalid {}_EVENT_SIGNATURE", prefix))?;
    }
    layout.amount_word = env_or(&format!("{}_EVENT_AMOUNT_WORD", prefix), layout.amount_word)?;

    let user_key = format!("{}_EVENT_USER_TOPIC", prefix);
    if let Ok(raw) = env::var(&user_key) {
        layout.user_topic = match raw.trim().to_lowercase().as_str() {
            "none" | "" => None,
            other => Some(
                other
                    .parse()
                    .map_err(|e| eyre!("Invalid {}='{}': {}", user_key, raw, e))?,
            ),
        };
    }

    Ok(layout)
}

fn required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| eyre!("{} environment variable is required", key))
}

fn parse_role(raw: &str, contract: Address) -> Result<ChainRole> {
    match raw.trim().to_lowercase().as_str() {
        "lock-unlock" | "lock_unlock" | "lock" => Ok(ChainRole::LockUnlock { contract }),
        "mint-burn" | "mint_burn" | "mint" => Ok(ChainRole::MintBurn { contract }),
        other => Err(eyre!(
            "Unknown chain role '{}' (expected lock-unlock or mint-burn)",
            other
        )),
    }
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: required("DATABASE_URL")?,
        };

        let signer = SignerConfig {
            private_key: required("BRIDGE_PRIVATE_KEY")?,
        };

        let count: usize = required("BRIDGE_CHAINS_COUNT")?
            .parse()
            .wrap_err("BRIDGE_CHAINS_COUNT must be a positive integer")?;

        let mut chains = Vec::with_capacity(count);
        for i in 1..=count {
            chains.push(load_chain(i)?);
        }

        let retry = RetryConfig {
            interval: Duration::from_secs(env_or(
                "RETRY_INTERVAL_SECS",
                default_retry_interval_secs(),
            )?),
            max_retries: env_or("MAX_RETRIES", default_max_retries())?,
            concurrency: env_or("RETRY_CONCURRENCY", default_retry_concurrency())?,
            lease_duration: Duration::from_secs(env_or(
                "RETRY_LEASE_SECS",
                default_lease_secs(),
            )?),
        };

        let rpc = RpcConfig {
            request_timeout: Duration::from_millis(env_or(
                "RPC_TIMEOUT_MS",
                default_rpc_timeout_ms(),
            )?),
            receipt_poll_interval: Duration::from_millis(env_or(
                "RECEIPT_POLL_INTERVAL_MS",
                default_receipt_poll_ms(),
            )?),
        };

        let api = ApiConfig {
            port: env_or("API_PORT", default_api_port())?,
        };

        let config = Config {
            database,
            chains,
            signer,
            retry,
            rpc,
            api,
        };

        config.validate()?;
        Ok(config)
    }

    /// The single chain holding native collateral
    pub fn lock_chain(&self) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.role.is_lock_unlock())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        if self.signer.private_key.len() != 66 || !self.signer.private_key.starts_with("0x") {
            return Err(eyre!(
                "BRIDGE_PRIVATE_KEY must be 66 chars (0x + 64 hex chars)"
            ));
        }

        let lock_chains = self
            .chains
            .iter()
            .filter(|c| c.role.is_lock_unlock())
            .count();
        if lock_chains != 1 {
            return Err(eyre!(
                "Exactly one lock-unlock chain must be configured, found {}",
                lock_chains
            ));
        }
        if self.chains.len() < 2 {
            return Err(eyre!("At least one mint-burn chain must be configured"));
        }

        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for chain in &self.chains {
            if !names.insert(chain.name.to_lowercase()) {
                return Err(eyre!("Duplicate chain name: {}", chain.name));
            }
            if !ids.insert(chain.chain_id) {
                return Err(eyre!(
                    "Duplicate chain ID: {} (chain: {})",
                    chain.chain_id,
                    chain.name
                ));
            }
            chain.validate()?;
        }

        if self.retry.max_retries == 0 {
            return Err(eyre!("MAX_RETRIES must be at least 1"));
        }
        if self.retry.concurrency == 0 {
            return Err(eyre!("RETRY_CONCURRENCY must be at least 1"));
        }

        Ok(())
    }
}

impl ChainConfig {
    /// Validate the chain configuration
    pub fn validate(&self) -> Result<()> {
        if self.rpc_urls.is_empty() {
            return Err(eyre!("No RPC URL configured for chain {}", self.name));
        }
        for url in &self.rpc_urls {
            validate_rpc_url(url, &format!("{} RPC URL", self.name))?;
        }
        if self.role.contract() == Address::ZERO {
            return Err(eyre!("Contract address for chain {} is zero", self.name));
        }
        if self.gas_limit == 0 {
            return Err(eyre!("Gas limit for chain {} cannot be 0", self.name));
        }
        if let Some(index) = self.event.user_topic {
            if !(1..=3).contains(&index) {
                return Err(eyre!(
                    "Event user topic for chain {} must be 1, 2 or 3, got {}",
                    self.name,
                    index
                ));
            }
        }
        if self.gas_price_multiplier_pct < 100 {
            return Err(eyre!(
                "Gas price multiplier for chain {} must be at least 100%",
                self.name
            ));
        }
        Ok(())
    }
}

/// Load one `BRIDGE_CHAIN_{N}_*` block
fn load_chain(i: usize) -> Result<ChainConfig> {
    let prefix = format!("BRIDGE_CHAIN_{}", i);

    let name = required(&format!("{}_NAME", prefix))?;

    let chain_id: u64 = required(&format!("{}_CHAIN_ID", prefix))?
        .parse()
        .map_err(|_| eyre!("Invalid {}_CHAIN_ID: must be a u64", prefix))?;

    let contract_raw = required(&format!("{}_CONTRACT_ADDRESS", prefix))?;
    if contract_raw.len() != 42 || !contract_raw.starts_with("0x") {
        return Err(eyre!(
            "Invalid contract address for chain {}: {} (expected 0x-prefixed 42-char hex)",
            name,
            contract_raw
        ));
    }
    let contract = Address::from_str(&contract_raw)
        .wrap_err_with(|| format!("Invalid {}_CONTRACT_ADDRESS", prefix))?;

    let role = parse_role(&required(&format!("{}_ROLE", prefix))?, contract)?;

    let mut rpc_urls = parse_rpc_urls(&required(&format!("{}_RPC_URL", prefix))?);
    if let Ok(backup) = env::var(format!("{}_BACKUP_RPC_URL", prefix)) {
        rpc_urls.extend(parse_rpc_urls(&backup));
    }
    if rpc_urls.is_empty() {
        return Err(eyre!("{}_RPC_URL cannot be empty", prefix));
    }

    Ok(ChainConfig {
        finality_blocks: env_or(
            &format!("{}_FINALITY_BLOCKS", prefix),
            default_finality_blocks(),
        )?,
        gas_limit: env_or(&format!("{}_GAS_LIMIT", prefix), default_gas_limit(&role))?,
        gas_price_multiplier_pct: env_or(
            &format!("{}_GAS_PRICE_MULTIPLIER_PCT", prefix),
            default_gas_price_multiplier_pct(&role),
        )?,
        confirmation_timeout: Duration::from_secs(env_or(
            &format!("{}_CONFIRMATION_TIMEOUT_SECS", prefix),
            default_confirmation_timeout_secs(),
        )?),
        event: load_event_layout(&prefix, &role)?,
        name,
        chain_id,
        role,
        rpc_urls,
    })
}
