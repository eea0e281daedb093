//! Operator-triggered reprocessing of a single source transaction
//!
//! Re-derives the bridge event from the transaction receipt and feeds it
//! through the same `observe` path as the watchers, so recovering a hash
//! that is already recorded never executes it a second time.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::connectors::EvmConnector;
use crate::events::decode_receipt_logs;
use crate::processor::{ObserveOutcome, ObservePath, RequestProcessor};
use crate::types::{format_tx_hash, parse_tx_hash, ChainName, Status};

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("{0} is not a source chain")]
    UnsupportedChain(ChainName),
    #[error("invalid transaction hash: {0}")]
    InvalidHash(String),
    #[error(transparent)]
    Internal(#[from] eyre::Report),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    AlreadyExists,
    NotFound,
    NoBridgeEvent,
    Processed {
        #[serde(rename = "requestStatus")]
        request_status: Status,
    },
    Rejected { reason: String },
}

impl RecoveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryOutcome::AlreadyExists => "already_exists",
            RecoveryOutcome::NotFound => "not_found",
            RecoveryOutcome::NoBridgeEvent => "no_bridge_event",
            RecoveryOutcome::Processed { .. } => "processed",
            RecoveryOutcome::Rejected { .. } => "rejected",
        }
    }
}

pub struct RecoveryService {
    connectors: HashMap<ChainName, Arc<dyn EvmConnector>>,
    processor: Arc<RequestProcessor>,
}

impl RecoveryService {
    pub fn new(connectors: Vec<Arc<dyn EvmConnector>>, processor: Arc<RequestProcessor>) -> Self {
        let connectors = connectors
            .into_iter()
            .map(|c| (c.chain(), c))
            .collect();
        Self {
            connectors,
            processor,
        }
    }

    pub async fn recover(
        &self,
        source_tx_hash: &str,
        source_chain: ChainName,
    ) -> Result<RecoveryOutcome, RecoveryError> {
        let connector = self
            .connectors
            .get(&source_chain)
            .ok_or(RecoveryError::UnsupportedChain(source_chain))?;

        let tx_hash =
            parse_tx_hash(source_tx_hash).map_err(|e| RecoveryError::InvalidHash(e.to_string()))?;
        let key = format_tx_hash(&tx_hash);

        info!(chain = %source_chain, source_tx_hash = %key, "Manual recovery requested");

        if let Some(existing) = self.processor.store().get_request(&key).await? {
            if existing.status != Status::Pending {
                return Ok(RecoveryOutcome::AlreadyExists);
            }
            let request_status = self.processor.resume(&existing).await?;
            info!(
                chain = %source_chain,
                source_tx_hash = %key,
                status = %request_status,
                "Resumed pending request"
            );
            return Ok(RecoveryOutcome::Processed { request_status });
        }

        let Some(logs) = connector.receipt_logs(tx_hash).await? else {
            info!(chain = %source_chain, source_tx_hash = %key, "No receipt for recovery hash");
            return Ok(RecoveryOutcome::NotFound);
        };

        let mut events = Vec::new();
        for decoded in decode_receipt_logs(source_chain, connector.bridge_address(), &logs) {
            match decoded {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    chain = %source_chain,
                    source_tx_hash = %key,
                    error = %e,
                    "Undecodable bridge log in recovered receipt"
                ),
            }
        }

        let Some(event) = events.first() else {
            return Ok(RecoveryOutcome::NoBridgeEvent);
        };
        if events.len() > 1 {
            warn!(
                chain = %source_chain,
                source_tx_hash = %key,
                events = events.len(),
                "Transaction emitted several bridge events, recovering the first"
            );
        }

        let outcome = match self.processor.observe(event, ObservePath::Recovery).await? {
            ObserveOutcome::AlreadyExists(_) => RecoveryOutcome::AlreadyExists,
            ObserveOutcome::Processed(status) => RecoveryOutcome::Processed {
                request_status: status,
            },
            ObserveOutcome::Rejected(reason) => RecoveryOutcome::Rejected { reason },
        };

        info!(
            chain = %source_chain,
            source_tx_hash = %key,
            outcome = outcome.as_str(),
            "Manual recovery finished"
        );
        Ok(outcome)
    }
}
