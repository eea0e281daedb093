//! Shared types for the bridge relayer
//!
//! Chain names and request statuses carry `sqlx::Type` so they can be
//! bound and decoded directly against the `VARCHAR` columns.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, B256};
use eyre::eyre;
use serde::{Deserialize, Serialize};

/// The chains the relayer knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChainName {
    XLayer,
    Bsc,
    Solana,
}

impl ChainName {
    /// Chains with a bridge contract emitting source events
    pub const SOURCES: [ChainName; 2] = [ChainName::XLayer, ChainName::Bsc];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainName::XLayer => "xlayer",
            ChainName::Bsc => "bsc",
            ChainName::Solana => "solana",
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            ChainName::XLayer => "X Layer",
            ChainName::Bsc => "BSC",
            ChainName::Solana => "Solana",
        }
    }
}

impl fmt::Display for ChainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChainName {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "xlayer" | "x-layer" => Ok(ChainName::XLayer),
            "bsc" | "bnb" => Ok(ChainName::Bsc),
            "solana" => Ok(ChainName::Solana),
            other => Err(eyre!("Unknown chain: {}", other)),
        }
    }
}

/// Lifecycle of a bridge request
///
/// pending -> processing -> completed | failed. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Status {
    /// Get the status as a lowercase string
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: Status) -> bool {
        matches!(
            (self, next),
            (Status::Pending, Status::Processing)
                | (Status::Processing, Status::Completed)
                | (Status::Processing, Status::Failed)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical lowercase 0x-prefixed form of an EVM address
pub fn format_evm_address(address: &Address) -> String {
    format!("0x{:x}", address)
}

/// Canonical lowercase 0x-prefixed form of a transaction hash
pub fn format_tx_hash(hash: &B256) -> String {
    format!("0x{:x}", hash)
}

/// Parse a user-supplied transaction hash, accepting any hex casing
pub fn parse_tx_hash(input: &str) -> eyre::Result<B256> {
    let trimmed = input.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if hex_part.len() != 64 {
        return Err(eyre!(
            "Transaction hash must be 32 bytes (64 hex chars), got {} chars",
            hex_part.len()
        ));
    }
    let bytes = hex::decode(hex_part).map_err(|e| eyre!("Invalid transaction hash hex: {}", e))?;
    Ok(B256::from_slice(&bytes))
}
