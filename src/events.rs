//! Decoding of source-chain bridge events
//!
//! Each EVM bridge emits one event per transfer. X Layer's `BridgeOut` names
//! its destination chain id, BSC's `BridgeInitiated` always targets X Layer,
//! and `BridgeToSolana` (on both) carries a 32-byte Solana owner key.

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use thiserror::Error;

use crate::contracts::{BscBridge, XLayerBridge};
use crate::types::{format_evm_address, format_tx_hash, ChainName};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log has no transaction hash")]
    MissingTxHash,
    #[error("log has no block number")]
    MissingBlockNumber,
    #[error("nonce {0} does not fit in 63 bits")]
    NonceOverflow(U256),
    #[error("malformed {event} log: {reason}")]
    Malformed { event: &'static str, reason: String },
    #[error("{0} has no bridge contract")]
    NotASource(ChainName),
}

/// How the destination is expressed by the source event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationHint {
    /// Explicit EVM chain id (X Layer `BridgeOut`)
    EvmChainId(u64),
    /// The other EVM chain (BSC `BridgeInitiated`)
    Counterpart,
    /// Explicit Solana recipient (`BridgeToSolana`)
    Solana,
}

/// A decoded source event, ready for the request processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeEvent {
    pub source_tx_hash: String,
    pub from_chain: ChainName,
    pub destination: DestinationHint,
    pub from_address: String,
    /// 0x hex for EVM recipients, base58 for Solana recipients
    pub to_address: String,
    pub amount: U256,
    pub fee: U256,
    pub nonce: u64,
    pub block_number: u64,
}

/// topic0 values of the bridge events emitted on `chain`
pub fn bridge_event_signatures(chain: ChainName) -> Vec<B256> {
    match chain {
        ChainName::XLayer => vec![
            XLayerBridge::BridgeOut::SIGNATURE_HASH,
            XLayerBridge::BridgeToSolana::SIGNATURE_HASH,
        ],
        ChainName::Bsc => vec![
            BscBridge::BridgeInitiated::SIGNATURE_HASH,
            BscBridge::BridgeToSolana::SIGNATURE_HASH,
        ],
        ChainName::Solana => Vec::new(),
    }
}

fn to_nonce(value: U256) -> Result<u64, DecodeError> {
    u64::try_from(value)
        .ok()
        .filter(|n| *n <= i64::MAX as u64)
        .ok_or(DecodeError::NonceOverflow(value))
}

fn malformed(event: &'static str, err: impl std::fmt::Display) -> DecodeError {
    DecodeError::Malformed {
        event,
        reason: err.to_string(),
    }
}

fn solana_recipient(recipient: &B256) -> String {
    bs58::encode(recipient.as_slice()).into_string()
}

/// Decode a bridge log emitted on `chain`.
///
/// Returns `Ok(None)` for logs that are not bridge events.
pub fn decode_bridge_log(chain: ChainName, log: &Log) -> Result<Option<BridgeEvent>, DecodeError> {
    let Some(topic0) = log.topic0().copied() else {
        return Ok(None);
    };
    if !bridge_event_signatures(chain).contains(&topic0) {
        return Ok(None);
    }

    let source_tx_hash = log
        .transaction_hash
        .as_ref()
        .map(format_tx_hash)
        .ok_or(DecodeError::MissingTxHash)?;
    let block_number = log.block_number.ok_or(DecodeError::MissingBlockNumber)?;

    let event = match chain {
        ChainName::XLayer if topic0 == XLayerBridge::BridgeOut::SIGNATURE_HASH => {
            let decoded = log
                .log_decode::<XLayerBridge::BridgeOut>()
                .map_err(|e| malformed("BridgeOut", e))?;
            let e = decoded.inner.data;
            let dest_chain_id = u64::try_from(e.destChainId)
                .map_err(|_| {
                    malformed("BridgeOut", format!("destChainId {} out of range", e.destChainId))
                })?;
            BridgeEvent {
                source_tx_hash,
                from_chain: chain,
                destination: DestinationHint::EvmChainId(dest_chain_id),
                from_address: format_evm_address(&e.from),
                to_address: format_evm_address(&e.to),
                amount: e.amount,
                fee: e.fee,
                nonce: to_nonce(e.nonce)?,
                block_number,
            }
        }
        ChainName::Bsc if topic0 == BscBridge::BridgeInitiated::SIGNATURE_HASH => {
            let decoded = log
                .log_decode::<BscBridge::BridgeInitiated>()
                .map_err(|e| malformed("BridgeInitiated", e))?;
            let e = decoded.inner.data;
            BridgeEvent {
                source_tx_hash,
                from_chain: chain,
                destination: DestinationHint::Counterpart,
                from_address: format_evm_address(&e.from),
                to_address: format_evm_address(&e.to),
                amount: e.amount,
                fee: e.fee,
                nonce: to_nonce(e.nonce)?,
                block_number,
            }
        }
        ChainName::XLayer => {
            let decoded = log
                .log_decode::<XLayerBridge::BridgeToSolana>()
                .map_err(|e| malformed("BridgeToSolana", e))?;
            let e = decoded.inner.data;
            BridgeEvent {
                source_tx_hash,
                from_chain: chain,
                destination: DestinationHint::Solana,
                from_address: format_evm_address(&e.from),
                to_address: solana_recipient(&e.recipient),
                amount: e.amount,
                fee: e.fee,
                nonce: to_nonce(e.nonce)?,
                block_number,
            }
        }
        ChainName::Bsc => {
            let decoded = log
                .log_decode::<BscBridge::BridgeToSolana>()
                .map_err(|e| malformed("BridgeToSolana", e))?;
            let e = decoded.inner.data;
            BridgeEvent {
                source_tx_hash,
                from_chain: chain,
                destination: DestinationHint::Solana,
                from_address: format_evm_address(&e.from),
                to_address: solana_recipient(&e.recipient),
                amount: e.amount,
                fee: e.fee,
                nonce: to_nonce(e.nonce)?,
                block_number,
            }
        }
        ChainName::Solana => return Err(DecodeError::NotASource(chain)),
    };

    Ok(Some(event))
}

/// Bridge events in a transaction receipt, restricted to the bridge contract
pub fn decode_receipt_logs(
    chain: ChainName,
    bridge_address: Address,
    logs: &[Log],
) -> Vec<Result<BridgeEvent, DecodeError>> {
    logs.iter()
        .filter(|log| log.address() == bridge_address)
        .filter_map(|log| decode_bridge_log(chain, log).transpose())
        .collect()
}
