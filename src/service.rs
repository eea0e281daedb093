//! Query facade used by the HTTP layer and operators

use std::sync::Arc;

use eyre::Result;
use serde::Serialize;

use crate::config::Config;
use crate::db::{clamp_limit, BridgeRequest, BridgeStats, BridgeStore};
use crate::recovery::{RecoveryError, RecoveryOutcome, RecoveryService};
use crate::types::{format_tx_hash, parse_tx_hash, ChainName};

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const DEFAULT_USER_HISTORY_LIMIT: i64 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmChainInfo {
    pub name: String,
    pub chain_id: u64,
    pub bridge: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaChainInfo {
    pub name: String,
    pub mint: String,
    pub decimals: u8,
}

/// Public description of the bridged chains
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainDirectory {
    pub xlayer: EvmChainInfo,
    pub bsc: EvmChainInfo,
    pub solana: SolanaChainInfo,
}

impl ChainDirectory {
    pub fn from_config(config: &Config) -> Self {
        let evm = |chain: ChainName, chain_id: u64, bridge: &str| EvmChainInfo {
            name: chain.display_name().to_string(),
            chain_id,
            bridge: bridge.to_string(),
        };
        Self {
            xlayer: evm(ChainName::XLayer, config.xlayer.chain_id, &config.xlayer.bridge_address),
            bsc: evm(ChainName::Bsc, config.bsc.chain_id, &config.bsc.bridge_address),
            solana: SolanaChainInfo {
                name: ChainName::Solana.display_name().to_string(),
                mint: config.solana.mint_address.clone(),
                decimals: config.solana.decimals,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeInfo {
    pub chains: ChainDirectory,
    pub stats: BridgeStats,
}

pub struct BridgeService {
    store: Arc<dyn BridgeStore>,
    recovery: RecoveryService,
    chains: ChainDirectory,
}

impl BridgeService {
    pub fn new(
        store: Arc<dyn BridgeStore>,
        recovery: RecoveryService,
        chains: ChainDirectory,
    ) -> Self {
        Self {
            store,
            recovery,
            chains,
        }
    }

    /// Look up a request by source tx hash. Hashes are matched in their
    /// canonical lowercase 0x form, so any casing of a valid hash works.
    pub async fn get_status(&self, source_tx_hash: &str) -> Result<Option<BridgeRequest>> {
        let key = match parse_tx_hash(source_tx_hash) {
            Ok(hash) => format_tx_hash(&hash),
            Err(_) => return Ok(None),
        };
        self.store.get_request(&key).await
    }

    /// Requests still in pending or processing
    pub async fn get_all_pending(&self) -> Result<Vec<BridgeRequest>> {
        self.store.list_in_flight().await
    }

    pub async fn get_history(&self, limit: i64) -> Result<Vec<BridgeRequest>> {
        self.store.list_recent(clamp_limit(limit)).await
    }

    pub async fn get_user_history(&self, address: &str, limit: i64) -> Result<Vec<BridgeRequest>> {
        self.store
            .list_for_address(address.trim(), clamp_limit(limit))
            .await
    }

    pub async fn get_stats(&self) -> Result<BridgeStats> {
        self.store.stats().await
    }

    /// Chain configuration together with the current stats
    pub async fn get_info(&self) -> Result<BridgeInfo> {
        Ok(BridgeInfo {
            chains: self.chains.clone(),
            stats: self.store.stats().await?,
        })
    }

    pub async fn recover(
        &self,
        source_tx_hash: &str,
        source_chain: ChainName,
    ) -> Result<RecoveryOutcome, RecoveryError> {
        self.recovery.recover(source_tx_hash, source_chain).await
    }
}
