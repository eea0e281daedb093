//! EVM destination legs
//!
//! Both legs carry the same data (recipient, amount, source nonce, source
//! chain id, attestation); they differ only in entry point, argument order
//! and digest layout.

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use tracing::{debug, info};

use super::ExecutionError;
use crate::attestation::{AttestationRequest, AttestationSigner, DigestLayout};
use crate::connectors::EvmConnector;
use crate::contracts::{BscBridge, XLayerBridge};
use crate::db::BridgeRequest;
use crate::types::{format_tx_hash, parse_tx_hash, ChainName};

pub struct EvmExecutor {
    connector: Arc<dyn EvmConnector>,
    signer: Arc<AttestationSigner>,
    /// This (destination) chain's id
    chain_id: u64,
    /// The only chain that routes here
    source_chain: ChainName,
    source_chain_id: u64,
}

impl EvmExecutor {
    pub fn new(
        connector: Arc<dyn EvmConnector>,
        signer: Arc<AttestationSigner>,
        chain_id: u64,
        source_chain: ChainName,
        source_chain_id: u64,
    ) -> Self {
        Self {
            connector,
            signer,
            chain_id,
            source_chain,
            source_chain_id,
        }
    }

    pub fn chain(&self) -> ChainName {
        self.connector.chain()
    }

    pub(super) async fn submit(
        &self,
        request: &BridgeRequest,
        layout: DigestLayout,
    ) -> Result<String, ExecutionError> {
        if request.from_chain != self.source_chain {
            return Err(ExecutionError::InvalidRequest(format!(
                "{} cannot be credited on {} (expected source {})",
                request.from_chain,
                self.chain(),
                self.source_chain
            )));
        }

        let recipient = Address::from_str(&request.to_address).map_err(|e| {
            ExecutionError::MalformedDestination {
                address: request.to_address.clone(),
                reason: e.to_string(),
            }
        })?;
        if recipient == Address::ZERO {
            return Err(ExecutionError::MalformedDestination {
                address: request.to_address.clone(),
                reason: "zero address".to_string(),
            });
        }

        let amount = U256::from_str_radix(&request.amount, 10)
            .map_err(|e| ExecutionError::InvalidAmount(format!("{}: {}", request.amount, e)))?;
        let source_nonce = u64::try_from(request.nonce)
            .map_err(|_| {
                ExecutionError::InvalidRequest(format!("negative nonce {}", request.nonce))
            })?;

        let bridge = self.connector.bridge_address();
        let attestation = AttestationRequest {
            recipient,
            amount,
            source_nonce,
            source_chain_id: self.source_chain_id,
            destination_chain_id: self.chain_id,
            destination_contract: bridge,
        };
        let signature = self.signer.sign(layout, &attestation)?;

        let calldata = encode_call(layout, &attestation, signature);

        debug!(
            chain = %self.chain(),
            source_tx_hash = %request.source_tx_hash,
            nonce = source_nonce,
            "Submitting destination transaction"
        );

        let tx_hash = self
            .connector
            .send_transaction(bridge, calldata)
            .await
            .map_err(|e| ExecutionError::Submission(format!("{:#}", e)))?;

        let tx_hash = format_tx_hash(&tx_hash);
        info!(
            chain = %self.chain(),
            source_tx_hash = %request.source_tx_hash,
            destination_tx_hash = %tx_hash,
            "Destination transaction sent"
        );
        Ok(tx_hash)
    }

    pub(super) async fn confirm(&self, destination_tx: &str) -> Result<(), ExecutionError> {
        let tx_hash = parse_tx_hash(destination_tx).map_err(|e| ExecutionError::Confirmation {
            tx: destination_tx.to_string(),
            reason: e.to_string(),
        })?;

        match self.connector.wait_for_receipt(tx_hash).await {
            Ok(Some(true)) => Ok(()),
            Ok(Some(false)) => Err(ExecutionError::Reverted(destination_tx.to_string())),
            Ok(None) => Err(ExecutionError::Confirmation {
                tx: destination_tx.to_string(),
                reason: "no receipt before timeout".to_string(),
            }),
            Err(e) => Err(ExecutionError::Confirmation {
                tx: destination_tx.to_string(),
                reason: format!("{:#}", e),
            }),
        }
    }

    pub(super) async fn check_landed(&self, destination_tx: &str) -> eyre::Result<Option<bool>> {
        let tx_hash = parse_tx_hash(destination_tx)?;
        self.connector.receipt_status(tx_hash).await
    }
}

/// ABI-encode the entry point call for `layout`
pub fn encode_call(
    layout: DigestLayout,
    attestation: &AttestationRequest,
    signature: Bytes,
) -> Bytes {
    let encoded = match layout {
        DigestLayout::Release => BscBridge::releaseCall {
            to: attestation.recipient,
            amount: attestation.amount,
            srcNonce: U256::from(attestation.source_nonce),
            srcChainId: U256::from(attestation.source_chain_id),
            signature,
        }
        .abi_encode(),
        DigestLayout::BridgeIn => XLayerBridge::bridgeInCall {
            to: attestation.recipient,
            amount: attestation.amount,
            srcChainId: U256::from(attestation.source_chain_id),
            srcNonce: U256::from(attestation.source_nonce),
            signature,
        }
        .abi_encode(),
    };
    Bytes::from(encoded)
}
