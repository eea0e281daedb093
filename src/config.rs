use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::types::ChainName;

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub signer: SignerConfig,
    pub xlayer: EvmChainConfig,
    pub bsc: EvmChainConfig,
    pub solana: SolanaConfig,
    pub sync: SyncConfig,
    pub execution: ExecutionConfig,
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

/// Relayer EVM key: signs attestations and pays for destination transactions
#[derive(Clone)]
pub struct SignerConfig {
    pub private_key: String,
}

impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerConfig")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// One EVM chain with a bridge contract
#[derive(Debug, Clone)]
pub struct EvmChainConfig {
    pub chain: ChainName,
    pub rpc_url: String,
    pub chain_id: u64,
    pub bridge_address: String,
}

/// Solana destination configuration
#[derive(Clone)]
pub struct SolanaConfig {
    pub rpc_url: String,
    pub mint_address: String,
    /// Base58-encoded 64-byte keypair holding mint authority (also fee payer)
    pub mint_authority_keypair: String,
    pub decimals: u8,
}

/// Custom Debug that redacts the mint authority keypair.
impl fmt::Debug for SolanaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SolanaConfig")
            .field("rpc_url", &self.rpc_url)
            .field("mint_address", &self.mint_address)
            .field("mint_authority_keypair", &"<redacted>")
            .field("decimals", &self.decimals)
            .finish()
    }
}

/// Event synchronizer tuning
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Blocks per historical `eth_getLogs` batch
    pub batch_size: u64,
    pub batch_delay_ms: u64,
    /// Window scanned when a chain has no checkpoint yet
    pub initial_lookback_blocks: u64,
    /// Beyond this lag the synchronizer jumps to head instead of scanning
    pub max_lag_blocks: u64,
    pub retry_delay_ms: u64,
    pub live_queue_capacity: usize,
}

impl SyncConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Destination execution and reconciliation timing
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub confirmation_timeout_secs: u64,
    pub receipt_poll_interval_ms: u64,
    pub stuck_processing_timeout_secs: u64,
    pub reconcile_interval_secs: u64,
}

impl ExecutionConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

/// HTTP API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_address: SocketAddr,
}

/// Default functions
fn default_xlayer_rpc_url() -> String {
    "https://rpc.xlayer.tech".to_string()
}

fn default_bsc_rpc_url() -> String {
    "https://bsc-dataseed1.binance.org".to_string()
}

fn default_solana_rpc_url() -> String {
    "https://api.mainnet-beta.solana.com".to_string()
}

fn default_xlayer_chain_id() -> u64 {
    196
}

fn default_bsc_chain_id() -> u64 {
    56
}

fn default_solana_decimals() -> u8 {
    9
}

fn default_batch_size() -> u64 {
    1000
}

fn default_batch_delay_ms() -> u64 {
    500
}

fn default_initial_lookback() -> u64 {
    5000
}

fn default_max_lag() -> u64 {
    200_000
}

fn default_retry_delay() -> u64 {
    5000
}

fn default_live_queue_capacity() -> usize {
    1024
}

fn default_confirmation_timeout() -> u64 {
    120
}

fn default_receipt_poll_interval() -> u64 {
    2000
}

fn default_stuck_processing_timeout() -> u64 {
    900
}

fn default_reconcile_interval() -> u64 {
    60
}

fn default_api_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

/// Read an optional variable, falling back to `default` when unset
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| eyre!("{} has an invalid value: {}", name, raw)),
        Err(_) => Ok(default),
    }
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| eyre!("{} environment variable is required", name))
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
            private_key: required("RELAYER_PRIVATE_KEY")?,
        };

        let xlayer = EvmChainConfig {
            chain: ChainName::XLayer,
            rpc_url: env::var("XLAYER_RPC_URL").unwrap_or_else(|_| default_xlayer_rpc_url()),
            chain_id: env_or("XLAYER_CHAIN_ID", default_xlayer_chain_id())?,
            bridge_address: required("XLAYER_BRIDGE_ADDRESS")?,
        };

        let bsc = EvmChainConfig {
            chain: ChainName::Bsc,
            rpc_url: env::var("BSC_RPC_URL").unwrap_or_else(|_| default_bsc_rpc_url()),
            chain_id: env_or("BSC_CHAIN_ID", default_bsc_chain_id())?,
            bridge_address: required("BSC_BRIDGE_ADDRESS")?,
        };

        let solana = SolanaConfig {
            rpc_url: env::var("SOLANA_RPC_URL").unwrap_or_else(|_| default_solana_rpc_url()),
            mint_address: required("SOLANA_MINT_ADDRESS")?,
            mint_authority_keypair: required("SOLANA_MINT_AUTHORITY_KEYPAIR")?,
            decimals: env_or("SOLANA_DECIMALS", default_solana_decimals())?,
        };

        let sync = SyncConfig {
            batch_size: env_or("SYNC_BATCH_SIZE", default_batch_size())?,
            batch_delay_ms: env_or("SYNC_BATCH_DELAY_MS", default_batch_delay_ms())?,
            initial_lookback_blocks: env_or(
                "SYNC_INITIAL_LOOKBACK_BLOCKS",
                default_initial_lookback(),
            )?,
            max_lag_blocks: env_or("SYNC_MAX_LAG_BLOCKS", default_max_lag())?,
            retry_delay_ms: env_or("SYNC_RETRY_DELAY_MS", default_retry_delay())?,
            live_queue_capacity: env_or("LIVE_QUEUE_CAPACITY", default_live_queue_capacity())?,
        };

        let execution = ExecutionConfig {
            confirmation_timeout_secs: env_or(
                "CONFIRMATION_TIMEOUT_SECS",
                default_confirmation_timeout(),
            )?,
            receipt_poll_interval_ms: env_or(
                "RECEIPT_POLL_INTERVAL_MS",
                default_receipt_poll_interval(),
            )?,
            stuck_processing_timeout_secs: env_or(
                "STUCK_PROCESSING_TIMEOUT_SECS",
                default_stuck_processing_timeout(),
            )?,
            reconcile_interval_secs: env_or(
                "RECONCILE_INTERVAL_SECS",
                default_reconcile_interval(),
            )?,
        };

        let api = ApiConfig {
            bind_address: match env::var("API_BIND_ADDRESS") {
                Ok(raw) => raw
                    .parse()
                    .wrap_err("API_BIND_ADDRESS must be a socket address like 0.0.0.0:9090")?,
                Err(_) => default_api_bind_address(),
            },
        };

        let config = Config {
            database,
            signer,
            xlayer,
            bsc,
            solana,
            sync,
            execution,
            api,
        };

        config.validate()?;
        Ok(config)
    }

    /// The EVM chain config for a source chain
    pub fn evm_chain(&self, chain: ChainName) -> Option<&EvmChainConfig> {
        match chain {
            ChainName::XLayer => Some(&self.xlayer),
            ChainName::Bsc => Some(&self.bsc),
            ChainName::Solana => None,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        if self.signer.private_key.len() != 66 || !self.signer.private_key.starts_with("0x") {
            return Err(eyre!(
                "signer.private_key must be 66 chars (0x + 64 hex chars)"
            ));
        }

        for chain in [&self.xlayer, &self.bsc] {
            if chain.rpc_url.is_empty() {
                return Err(eyre!("{}.rpc_url cannot be empty", chain.chain));
            }
            if chain.bridge_address.len() != 42 || !chain.bridge_address.starts_with("0x") {
                return Err(eyre!(
                    "{}.bridge_address must be a valid hex address (42 chars with 0x prefix)",
                    chain.chain
                ));
            }
        }

        if self.xlayer.chain_id == self.bsc.chain_id {
            return Err(eyre!(
                "xlayer and bsc cannot share chain id {}",
                self.xlayer.chain_id
            ));
        }

        if self.solana.rpc_url.is_empty() {
            return Err(eyre!("solana.rpc_url cannot be empty"));
        }

        let mint = bs58::decode(&self.solana.mint_address)
            .into_vec()
            .map_err(|e| eyre!("solana.mint_address is not valid base58: {}", e))?;
        if mint.len() != 32 {
            return Err(eyre!("solana.mint_address must decode to 32 bytes"));
        }

        // Error text must not echo the keypair
        let keypair = bs58::decode(&self.solana.mint_authority_keypair)
            .into_vec()
            .map_err(|_| eyre!("solana.mint_authority_keypair is not valid base58"))?;
        if keypair.len() != 64 {
            return Err(eyre!("solana.mint_authority_keypair must decode to 64 bytes"));
        }

        if self.solana.decimals > 18 {
            return Err(eyre!("solana.decimals cannot exceed the 18 source decimals"));
        }

        if self.sync.batch_size == 0 {
            return Err(eyre!("sync.batch_size must be greater than zero"));
        }

        if self.sync.live_queue_capacity == 0 {
            return Err(eyre!("sync.live_queue_capacity must be greater than zero"));
        }

        if self.execution.stuck_processing_timeout_secs <= self.execution.confirmation_timeout_secs
        {
            return Err(eyre!(
                "execution.stuck_processing_timeout_secs must exceed confirmation_timeout_secs"
            ));
        }

        Ok(())
    }
}
