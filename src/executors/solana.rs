//! Solana mint leg

use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::U256;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tracing::info;

use super::ExecutionError;
use crate::connectors::SolanaConnector;
use crate::db::BridgeRequest;

/// Decimals of the token on the EVM side
pub const SOURCE_DECIMALS: u8 = 18;

/// Convert an 18-decimal source amount to `destination_decimals`, truncating.
///
/// Fails only when the result does not fit an SPL `u64` amount.
pub fn convert_amount(amount: U256, destination_decimals: u8) -> Result<u64, ExecutionError> {
    let shift = SOURCE_DECIMALS.saturating_sub(destination_decimals);
    let divisor = U256::from(10u64).pow(U256::from(shift));
    let converted = amount / divisor;
    u64::try_from(converted).map_err(|_| {
        ExecutionError::InvalidAmount(format!(
            "{} exceeds the destination u64 range after conversion",
            amount
        ))
    })
}

pub struct SolanaMintExecutor {
    connector: Arc<dyn SolanaConnector>,
    decimals: u8,
}

impl SolanaMintExecutor {
    pub fn new(connector: Arc<dyn SolanaConnector>, decimals: u8) -> Self {
        Self {
            connector,
            decimals,
        }
    }

    fn parse_owner(address: &str) -> Result<Pubkey, ExecutionError> {
        let owner = Pubkey::from_str(address).map_err(|e| ExecutionError::MalformedDestination {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        if owner == Pubkey::default() {
            return Err(ExecutionError::MalformedDestination {
                address: address.to_string(),
                reason: "all-zero public key".to_string(),
            });
        }
        Ok(owner)
    }

    pub(super) async fn submit(&self, request: &BridgeRequest) -> Result<String, ExecutionError> {
        let owner = Self::parse_owner(&request.to_address)?;

        let source_amount = U256::from_str_radix(&request.amount, 10)
            .map_err(|e| ExecutionError::InvalidAmount(format!("{}: {}", request.amount, e)))?;
        let amount = convert_amount(source_amount, self.decimals)?;
        if amount == 0 {
            return Err(ExecutionError::InvalidAmount(format!(
                "{} is below one destination unit",
                request.amount
            )));
        }

        let token_account = self
            .connector
            .ensure_token_account(&owner)
            .await
            .map_err(|e| ExecutionError::Submission(format!("{:#}", e)))?;

        let signature = self
            .connector
            .submit_mint(&token_account, amount)
            .await
            .map_err(|e| ExecutionError::Submission(format!("{:#}", e)))?;

        info!(
            source_tx_hash = %request.source_tx_hash,
            owner = %owner,
            token_account = %token_account,
            amount,
            signature = %signature,
            "Solana mint sent"
        );
        Ok(signature.to_string())
    }

    pub(super) async fn confirm(&self, destination_tx: &str) -> Result<(), ExecutionError> {
        let signature =
            Signature::from_str(destination_tx).map_err(|e| ExecutionError::Confirmation {
                tx: destination_tx.to_string(),
                reason: e.to_string(),
            })?;

        match self.connector.wait_for_signature(&signature).await {
            Ok(Some(true)) => Ok(()),
            Ok(Some(false)) => Err(ExecutionError::Reverted(destination_tx.to_string())),
            Ok(None) => Err(ExecutionError::Confirmation {
                tx: destination_tx.to_string(),
                reason: "signature not confirmed before timeout".to_string(),
            }),
            Err(e) => Err(ExecutionError::Confirmation {
                tx: destination_tx.to_string(),
                reason: format!("{:#}", e),
            }),
        }
    }

    pub(super) async fn check_landed(&self, destination_tx: &str) -> eyre::Result<Option<bool>> {
        let signature = Signature::from_str(destination_tx)
            .map_err(|e| eyre::eyre!("Invalid Solana signature {}: {}", destination_tx, e))?;
        self.connector.signature_status(&signature).await
    }
}
