//! Request processor
//!
//! Turns decoded bridge events into persisted requests and drives each one
//! through pending -> processing -> completed | failed. Every ingestion path
//! (historical scan, live subscription, manual recovery) goes through
//! [`RequestProcessor::observe`], and the store's uniqueness on the source tx
//! hash makes repeated observations of one event collapse into one row and
//! one destination attempt.

use std::sync::Arc;
use std::time::Instant;

use eyre::{eyre, Result};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::{BridgeRequest, BridgeStore, InsertOutcome, NewBridgeRequest};
use crate::events::{BridgeEvent, DestinationHint};
use crate::executors::{ExecutionError, Executors};
use crate::metrics;
use crate::types::{ChainName, Status};

const NOTIFICATION_CAPACITY: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("{from} has no route to EVM chain id {chain_id}")]
    UnsupportedDestination { from: ChainName, chain_id: u64 },
    #[error("{0} is not a source chain")]
    NotASource(ChainName),
}

/// Fixed routing table: the two EVM chains route to each other, Solana is
/// reachable from either when the event names a Solana recipient
#[derive(Debug, Clone, Copy)]
pub struct RouteTable {
    xlayer_chain_id: u64,
    bsc_chain_id: u64,
}

impl RouteTable {
    pub fn new(xlayer_chain_id: u64, bsc_chain_id: u64) -> Self {
        Self {
            xlayer_chain_id,
            bsc_chain_id,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.xlayer.chain_id, config.bsc.chain_id)
    }

    pub fn resolve(&self, from: ChainName, hint: DestinationHint) -> Result<ChainName, RouteError> {
        match (from, hint) {
            (ChainName::Solana, _) => Err(RouteError::NotASource(from)),
            (_, DestinationHint::Solana) => Ok(ChainName::Solana),
            (ChainName::XLayer, DestinationHint::Counterpart) => Ok(ChainName::Bsc),
            (ChainName::Bsc, DestinationHint::Counterpart) => Ok(ChainName::XLayer),
            (ChainName::XLayer, DestinationHint::EvmChainId(id)) if id == self.bsc_chain_id => {
                Ok(ChainName::Bsc)
            }
            (ChainName::Bsc, DestinationHint::EvmChainId(id)) if id == self.xlayer_chain_id => {
                Ok(ChainName::XLayer)
            }
            (from, DestinationHint::EvmChainId(chain_id)) => {
                Err(RouteError::UnsupportedDestination { from, chain_id })
            }
        }
    }
}

/// Which ingestion path produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservePath {
    Historical,
    Live,
    Recovery,
}

impl ObservePath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservePath::Historical => "historical",
            ObservePath::Live => "live",
            ObservePath::Recovery => "recovery",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserveOutcome {
    /// A row for this source tx already existed; nothing was done
    AlreadyExists(Status),
    /// The event created a row, which ended in this status
    Processed(Status),
    /// The event was not turned into a request
    Rejected(String),
}

/// Completion/failure notifications for in-process listeners
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeNotification {
    Completed(BridgeRequest),
    Failed(BridgeRequest),
}

pub struct RequestProcessor {
    store: Arc<dyn BridgeStore>,
    executors: Executors,
    routes: RouteTable,
    notifications: broadcast::Sender<BridgeNotification>,
}

impl RequestProcessor {
    pub fn new(store: Arc<dyn BridgeStore>, executors: Executors, routes: RouteTable) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            store,
            executors,
            routes,
            notifications,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeNotification> {
        self.notifications.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn BridgeStore> {
        &self.store
    }

    pub fn executors(&self) -> &Executors {
        &self.executors
    }

    /// Persist and execute a newly observed event.
    ///
    /// Errors are infrastructure failures (storage unavailable); the caller
    /// should retry the event later. Data and on-chain failures end up on the
    /// request row instead.
    pub async fn observe(&self, event: &BridgeEvent, path: ObservePath) -> Result<ObserveOutcome> {
        metrics::record_event_observed(event.from_chain.as_str(), path.as_str());

        if let Some(existing) = self.store.get_request(&event.source_tx_hash).await? {
            if existing.status == Status::Pending {
                // An earlier attempt stored the row but never started execution
                info!(
                    source_tx_hash = %event.source_tx_hash,
                    path = path.as_str(),
                    "Resuming pending bridge request"
                );
                let status = self.execute(&existing).await?;
                return Ok(ObserveOutcome::Processed(status));
            }
            debug!(
                source_tx_hash = %event.source_tx_hash,
                status = %existing.status,
                path = path.as_str(),
                "Bridge event already recorded"
            );
            return Ok(ObserveOutcome::AlreadyExists(existing.status));
        }

        let to_chain = match self.routes.resolve(event.from_chain, event.destination) {
            Ok(chain) => chain,
            Err(e) => {
                warn!(
                    source_tx_hash = %event.source_tx_hash,
                    from_chain = %event.from_chain,
                    nonce = event.nonce,
                    error = %e,
                    "Ignoring unroutable bridge event"
                );
                metrics::record_error(event.from_chain.as_str(), "unroutable");
                return Ok(ObserveOutcome::Rejected(e.to_string()));
            }
        };

        let new_request = NewBridgeRequest {
            source_tx_hash: event.source_tx_hash.clone(),
            from_chain: event.from_chain,
            to_chain,
            from_address: event.from_address.clone(),
            to_address: event.to_address.clone(),
            amount: event.amount.to_string(),
            fee: event.fee.to_string(),
            nonce: i64::try_from(event.nonce)
                .map_err(|_| eyre!("Nonce {} exceeds i64 range", event.nonce))?,
            block_number: i64::try_from(event.block_number)
                .map_err(|_| eyre!("Block {} exceeds i64 range", event.block_number))?,
        };

        match self.store.insert_pending(&new_request).await? {
            InsertOutcome::Inserted => {}
            InsertOutcome::DuplicateHash => {
                // Lost a race with another path between the lookup and the insert
                let status = self
                    .store
                    .get_request(&event.source_tx_hash)
                    .await?
                    .map(|r| r.status)
                    .unwrap_or(Status::Pending);
                return Ok(ObserveOutcome::AlreadyExists(status));
            }
            InsertOutcome::NonceConflict => {
                error!(
                    source_tx_hash = %event.source_tx_hash,
                    from_chain = %event.from_chain,
                    nonce = event.nonce,
                    "Nonce already used by a different source transaction"
                );
                metrics::record_error(event.from_chain.as_str(), "nonce_conflict");
                return Ok(ObserveOutcome::Rejected(format!(
                    "nonce {} already recorded for {}",
                    event.nonce, event.from_chain
                )));
            }
        }

        info!(
            source_tx_hash = %event.source_tx_hash,
            from_chain = %event.from_chain,
            to_chain = %to_chain,
            nonce = event.nonce,
            amount = %event.amount,
            path = path.as_str(),
            "New bridge request"
        );

        let request = self
            .store
            .get_request(&event.source_tx_hash)
            .await?
            .ok_or_else(|| eyre!("Request {} vanished after insert", event.source_tx_hash))?;

        let status = self.execute(&request).await?;
        Ok(ObserveOutcome::Processed(status))
    }

    /// Execute a request left in `pending`; any other status is returned unchanged
    pub async fn resume(&self, request: &BridgeRequest) -> Result<Status> {
        if request.status != Status::Pending {
            return Ok(request.status);
        }
        self.execute(request).await
    }

    /// Drive a pending request to a terminal status
    async fn execute(&self, request: &BridgeRequest) -> Result<Status> {
        let hash = request.source_tx_hash.as_str();

        if !self.store.mark_processing(hash).await? {
            let current = self
                .store
                .get_request(hash)
                .await?
                .map(|r| r.status)
                .unwrap_or(request.status);
            debug!(source_tx_hash = %hash, status = %current, "Request already picked up");
            return Ok(current);
        }

        let started = Instant::now();
        let executor = self.executors.for_chain(request.to_chain);

        let destination_tx = match executor.submit(request).await {
            Ok(tx) => tx,
            Err(e) => return self.fail(request, &e, started).await,
        };

        if let Err(e) = self.store.record_destination_tx(hash, &destination_tx).await {
            // Keep going: mark_completed/mark_failed write the hash again
            warn!(
                source_tx_hash = %hash,
                destination_tx_hash = %destination_tx,
                error = %e,
                "Failed to record destination transaction"
            );
        }

        if let Err(e) = executor.confirm(&destination_tx).await {
            return self.fail(request, &e, started).await;
        }

        if !self.store.mark_completed(hash, &destination_tx).await? {
            warn!(source_tx_hash = %hash, "Request left processing before completion was recorded");
        }

        info!(
            source_tx_hash = %hash,
            from_chain = %request.from_chain,
            to_chain = %request.to_chain,
            destination_tx_hash = %destination_tx,
            "Bridge request completed"
        );
        metrics::record_request_finished(
            request.from_chain.as_str(),
            request.to_chain.as_str(),
            Status::Completed.as_str(),
            started.elapsed().as_secs_f64(),
        );
        self.notify(hash, Status::Completed).await?;
        Ok(Status::Completed)
    }

    async fn fail(
        &self,
        request: &BridgeRequest,
        error: &ExecutionError,
        started: Instant,
    ) -> Result<Status> {
        let hash = request.source_tx_hash.as_str();
        let message = error.to_string();

        error!(
            source_tx_hash = %hash,
            from_chain = %request.from_chain,
            to_chain = %request.to_chain,
            kind = error.kind(),
            error = %message,
            "Bridge request failed"
        );

        self.store.mark_failed(hash, &message).await?;
        metrics::record_execution_failure(request.to_chain.as_str(), error.kind());
        metrics::record_request_finished(
            request.from_chain.as_str(),
            request.to_chain.as_str(),
            Status::Failed.as_str(),
            started.elapsed().as_secs_f64(),
        );
        self.notify(hash, Status::Failed).await?;
        Ok(Status::Failed)
    }

    /// Broadcast the stored row for a request that just reached `status`
    pub(crate) async fn notify(&self, source_tx_hash: &str, status: Status) -> Result<()> {
        let Some(row) = self.store.get_request(source_tx_hash).await? else {
            return Ok(());
        };
        let notification = match status {
            Status::Completed => BridgeNotification::Completed(row),
            Status::Failed => BridgeNotification::Failed(row),
            Status::Pending | Status::Processing => return Ok(()),
        };
        // No listeners is fine
        let _ = self.notifications.send(notification);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes() -> RouteTable {
        RouteTable::new(196, 56)
    }

    #[test]
    fn test_evm_chains_route_to_each_other() {
        let routes = routes();
        assert_eq!(
            routes.resolve(ChainName::XLayer, DestinationHint::EvmChainId(56)),
            Ok(ChainName::Bsc)
        );
        assert_eq!(
            routes.resolve(ChainName::Bsc, DestinationHint::Counterpart),
            Ok(ChainName::XLayer)
        );
    }

    #[test]
    fn test_solana_only_via_explicit_recipient() {
        let routes = routes();
        assert_eq!(
            routes.resolve(ChainName::Bsc, DestinationHint::Solana),
            Ok(ChainName::Solana)
        );
        assert_eq!(
            routes.resolve(ChainName::XLayer, DestinationHint::Solana),
            Ok(ChainName::Solana)
        );
        assert_eq!(
            routes.resolve(ChainName::Solana, DestinationHint::Counterpart),
            Err(RouteError::NotASource(ChainName::Solana))
        );
    }

    #[test]
    fn test_unknown_destination_chain_id() {
        assert_eq!(
            routes().resolve(ChainName::XLayer, DestinationHint::EvmChainId(1)),
            Err(RouteError::UnsupportedDestination {
                from: ChainName::XLayer,
                chain_id: 1
            })
        );
        // X Layer cannot bridge to itself
        assert!(routes()
            .resolve(ChainName::XLayer, DestinationHint::EvmChainId(196))
            .is_err());
    }
}
