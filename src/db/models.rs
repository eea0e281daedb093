use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{ChainName, Status};

/// One observed cross-chain transfer
///
/// Amounts are decimal strings in the source chain's smallest unit; the
/// column is `NUMERIC(78,0)` so the full uint256 range round-trips.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    pub source_tx_hash: String,
    pub from_chain: ChainName,
    pub to_chain: ChainName,
    pub from_address: String,
    pub to_address: String,
    pub amount: String,
    pub fee: String,
    pub nonce: i64,
    pub block_number: i64,
    pub status: Status,
    pub destination_tx_hash: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Insert payload; new rows always start as `pending`
#[derive(Debug, Clone)]
pub struct NewBridgeRequest {
    pub source_tx_hash: String,
    pub from_chain: ChainName,
    pub to_chain: ChainName,
    pub from_address: String,
    pub to_address: String,
    pub amount: String,
    pub fee: String,
    pub nonce: i64,
    pub block_number: i64,
}

impl NewBridgeRequest {
    /// The row as it looks right after insertion
    pub fn into_pending(self, now: DateTime<Utc>) -> BridgeRequest {
        BridgeRequest {
            source_tx_hash: self.source_tx_hash,
            from_chain: self.from_chain,
            to_chain: self.to_chain,
            from_address: self.from_address,
            to_address: self.to_address,
            amount: self.amount,
            fee: self.fee,
            nonce: self.nonce,
            block_number: self.block_number,
            status: Status::Pending,
            destination_tx_hash: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Outcome of an insert attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with this source tx hash already exists
    DuplicateHash,
    /// Another source tx already holds this (from_chain, nonce)
    NonceConflict,
}

/// Transfer count for one route
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePairCount {
    pub from_chain: ChainName,
    pub to_chain: ChainName,
    pub count: i64,
}

/// Aggregate view over all requests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    pub total_transactions: i64,
    pub completed: i64,
    /// pending + processing
    pub pending: i64,
    pub failed: i64,
    pub route_pairs: Vec<RoutePairCount>,
    /// Sum of completed amounts, source smallest unit
    pub total_volume: String,
}
