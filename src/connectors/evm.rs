//! EVM chain connector
//!
//! Reads bridge logs, heads and receipts, and submits signed transactions.
//! The HTTP implementation is stateless per call and shared between the
//! chain's synchronizer (source side) and executor (destination side).

use std::str::FromStr;
use std::time::Duration;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::{reqwest::Url, Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, info};

use crate::config::{EvmChainConfig, ExecutionConfig};
use crate::events;
use crate::types::ChainName;

#[async_trait]
pub trait EvmConnector: Send + Sync {
    fn chain(&self) -> ChainName;

    /// Address of this chain's bridge contract
    fn bridge_address(&self) -> Address;

    async fn block_number(&self) -> Result<u64>;

    /// Bridge events emitted in `[from_block, to_block]`
    async fn bridge_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>>;

    /// Stream of bridge events from now on
    async fn subscribe_bridge_logs(&self) -> Result<BoxStream<'static, Log>>;

    /// Logs of a mined transaction, `None` when the chain has no receipt for it
    async fn receipt_logs(&self, tx_hash: B256) -> Result<Option<Vec<Log>>>;

    /// Sign and broadcast a call, returning its hash without waiting for inclusion
    async fn send_transaction(&self, to: Address, calldata: Bytes) -> Result<B256>;

    /// `Some(success)` once mined, `None` if not (yet) known
    async fn receipt_status(&self, tx_hash: B256) -> Result<Option<bool>>;

    /// Poll for the receipt until mined or the confirmation timeout elapses
    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<Option<bool>>;
}

/// JSON-RPC over HTTP implementation
pub struct EvmRpcConnector {
    chain: ChainName,
    bridge_address: Address,
    provider: RootProvider<Http<Client>>,
    rpc_url: Url,
    signer: PrivateKeySigner,
    receipt_poll_interval: Duration,
    confirmation_timeout: Duration,
}

impl EvmRpcConnector {
    pub fn new(
        config: &EvmChainConfig,
        execution: &ExecutionConfig,
        private_key: &str,
    ) -> Result<Self> {
        let rpc_url: Url = config
            .rpc_url
            .parse()
            .wrap_err_with(|| format!("Failed to parse {} RPC URL", config.chain))?;
        let provider = ProviderBuilder::new().on_http(rpc_url.clone());

        let bridge_address = Address::from_str(&config.bridge_address)
            .wrap_err_with(|| format!("Invalid {} bridge address", config.chain))?;
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|_| eyre!("Invalid relayer private key"))?;

        info!(
            chain = %config.chain,
            chain_id = config.chain_id,
            bridge = %bridge_address,
            relayer = %signer.address(),
            "EVM connector initialized"
        );

        Ok(Self {
            chain: config.chain,
            bridge_address,
            provider,
            rpc_url,
            signer,
            receipt_poll_interval: execution.receipt_poll_interval(),
            confirmation_timeout: execution.confirmation_timeout(),
        })
    }

    fn bridge_filter(&self) -> Filter {
        Filter::new()
            .address(self.bridge_address)
            .event_signature(events::bridge_event_signatures(self.chain))
    }
}

#[async_trait]
impl EvmConnector for EvmRpcConnector {
    fn chain(&self) -> ChainName {
        self.chain
    }

    fn bridge_address(&self) -> Address {
        self.bridge_address
    }

    async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .wrap_err_with(|| format!("Failed to get {} block number", self.chain))
    }

    async fn bridge_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>> {
        let filter = self.bridge_filter().from_block(from_block).to_block(to_block);

        self.provider.get_logs(&filter).await.wrap_err_with(|| {
            format!(
                "Failed to get {} logs for blocks {}-{}",
                self.chain, from_block, to_block
            )
        })
    }

    async fn subscribe_bridge_logs(&self) -> Result<BoxStream<'static, Log>> {
        let poller = self
            .provider
            .watch_logs(&self.bridge_filter())
            .await
            .wrap_err_with(|| format!("Failed to install {} log filter", self.chain))?;

        Ok(poller.into_stream().flat_map(stream::iter).boxed())
    }

    async fn receipt_logs(&self, tx_hash: B256) -> Result<Option<Vec<Log>>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .wrap_err_with(|| format!("Failed to get {} receipt for {}", self.chain, tx_hash))?;

        Ok(receipt.map(|r| r.inner.logs().to_vec()))
    }

    async fn send_transaction(&self, to: Address, calldata: Bytes) -> Result<B256> {
        // with_recommended_fillers() fills nonce, gas and fees
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url.clone());

        let tx = TransactionRequest::default()
            .with_to(to)
            .with_input(calldata);

        let pending_tx = provider
            .send_transaction(tx)
            .await
            .map_err(|e| eyre!("Failed to send {} transaction: {}", self.chain, e))?;

        let tx_hash = *pending_tx.tx_hash();
        debug!(chain = %self.chain, tx_hash = %tx_hash, "Transaction sent");
        Ok(tx_hash)
    }

    async fn receipt_status(&self, tx_hash: B256) -> Result<Option<bool>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .wrap_err_with(|| format!("Failed to get {} receipt for {}", self.chain, tx_hash))?;

        Ok(receipt.map(|r| r.status()))
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<Option<bool>> {
        let deadline = tokio::time::Instant::now() + self.confirmation_timeout;
        loop {
            if let Some(status) = self.receipt_status(tx_hash).await? {
                return Ok(Some(status));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}
