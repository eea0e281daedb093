//! Destination executors
//!
//! The destination set is fixed, so executors are a closed enum dispatched on
//! the request's `to_chain`. Execution is split into `submit` (returns the
//! destination transaction id, recorded while the row is still processing)
//! and `confirm`, so a crash between the two leaves enough on the row for the
//! reconciliation sweep to decide what happened.

use std::sync::Arc;

use thiserror::Error;

use crate::attestation::{AttestationError, AttestationSigner, DigestLayout};
use crate::config::Config;
use crate::connectors::{EvmConnector, SolanaConnector};
use crate::db::BridgeRequest;
use crate::types::ChainName;

pub mod evm;
pub mod solana;

pub use evm::EvmExecutor;
pub use solana::{convert_amount, SolanaMintExecutor, SOURCE_DECIMALS};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("malformed destination address {address}: {reason}")]
    MalformedDestination { address: String, reason: String },
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Attestation(#[from] AttestationError),
    #[error("submission failed: {0}")]
    Submission(String),
    #[error("destination transaction {0} reverted")]
    Reverted(String),
    #[error("destination transaction {tx} not confirmed: {reason}")]
    Confirmation { tx: String, reason: String },
}

impl ExecutionError {
    /// Metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::MalformedDestination { .. } => "malformed_destination",
            ExecutionError::InvalidAmount(_) => "invalid_amount",
            ExecutionError::InvalidRequest(_) => "invalid_request",
            ExecutionError::Attestation(_) => "attestation",
            ExecutionError::Submission(_) => "submission",
            ExecutionError::Reverted(_) => "reverted",
            ExecutionError::Confirmation { .. } => "confirmation",
        }
    }
}

pub enum DestinationExecutor {
    /// BSC `release`
    EvmRelease(EvmExecutor),
    /// X Layer `bridgeIn`
    EvmBridgeIn(EvmExecutor),
    /// SPL mint on Solana
    SolanaMint(SolanaMintExecutor),
}

impl DestinationExecutor {
    pub fn chain(&self) -> ChainName {
        match self {
            DestinationExecutor::EvmRelease(e) | DestinationExecutor::EvmBridgeIn(e) => e.chain(),
            DestinationExecutor::SolanaMint(_) => ChainName::Solana,
        }
    }

    /// Submit the destination action, returning its transaction id
    pub async fn submit(&self, request: &BridgeRequest) -> Result<String, ExecutionError> {
        match self {
            DestinationExecutor::EvmRelease(e) => e.submit(request, DigestLayout::Release).await,
            DestinationExecutor::EvmBridgeIn(e) => e.submit(request, DigestLayout::BridgeIn).await,
            DestinationExecutor::SolanaMint(m) => m.submit(request).await,
        }
    }

    /// Wait for a submitted transaction to land successfully
    pub async fn confirm(&self, destination_tx: &str) -> Result<(), ExecutionError> {
        match self {
            DestinationExecutor::EvmRelease(e) | DestinationExecutor::EvmBridgeIn(e) => {
                e.confirm(destination_tx).await
            }
            DestinationExecutor::SolanaMint(m) => m.confirm(destination_tx).await,
        }
    }

    /// One-shot status lookup: `Some(success)` if the chain knows the transaction
    pub async fn check_landed(&self, destination_tx: &str) -> eyre::Result<Option<bool>> {
        match self {
            DestinationExecutor::EvmRelease(e) | DestinationExecutor::EvmBridgeIn(e) => {
                e.check_landed(destination_tx).await
            }
            DestinationExecutor::SolanaMint(m) => m.check_landed(destination_tx).await,
        }
    }
}

/// One executor per destination chain
pub struct Executors {
    xlayer: DestinationExecutor,
    bsc: DestinationExecutor,
    solana: DestinationExecutor,
}

impl Executors {
    pub fn new(
        xlayer: DestinationExecutor,
        bsc: DestinationExecutor,
        solana: DestinationExecutor,
    ) -> Self {
        Self {
            xlayer,
            bsc,
            solana,
        }
    }

    /// Wire the three executors from their connectors
    pub fn from_connectors(
        config: &Config,
        signer: Arc<AttestationSigner>,
        xlayer: Arc<dyn EvmConnector>,
        bsc: Arc<dyn EvmConnector>,
        solana: Arc<dyn SolanaConnector>,
    ) -> Self {
        Self::new(
            DestinationExecutor::EvmBridgeIn(EvmExecutor::new(
                xlayer,
                signer.clone(),
                config.xlayer.chain_id,
                ChainName::Bsc,
                config.bsc.chain_id,
            )),
            DestinationExecutor::EvmRelease(EvmExecutor::new(
                bsc,
                signer,
                config.bsc.chain_id,
                ChainName::XLayer,
                config.xlayer.chain_id,
            )),
            DestinationExecutor::SolanaMint(SolanaMintExecutor::new(
                solana,
                config.solana.decimals,
            )),
        )
    }

    pub fn for_chain(&self, chain: ChainName) -> &DestinationExecutor {
        match chain {
            ChainName::XLayer => &self.xlayer,
            ChainName::Bsc => &self.bsc,
            ChainName::Solana => &self.solana,
        }
    }
}
