//! Reconciliation of requests stuck in `processing`
//!
//! A crash between submitting a destination transaction and recording its
//! outcome leaves the row in `processing`. The tracker periodically looks at
//! rows that have not moved for longer than the stuck timeout and settles
//! them from what the destination chain reports. Nothing is resubmitted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eyre::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ExecutionConfig;
use crate::db::BridgeRequest;
use crate::metrics;
use crate::processor::RequestProcessor;
use crate::types::Status;

pub const NEVER_SUBMITTED: &str = "interrupted before a destination transaction was recorded; \
     verify the destination chain before manual action";

/// What one sweep did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub examined: usize,
    pub completed: usize,
    pub failed: usize,
    /// Rows left alone because the destination lookup errored
    pub deferred: usize,
}

pub struct ConfirmationTracker {
    processor: Arc<RequestProcessor>,
    stuck_after: chrono::Duration,
    interval: Duration,
}

impl ConfirmationTracker {
    pub fn new(processor: Arc<RequestProcessor>, config: &ExecutionConfig) -> Self {
        Self {
            processor,
            stuck_after: chrono::Duration::seconds(config.stuck_processing_timeout_secs as i64),
            interval: Duration::from_secs(config.reconcile_interval_secs),
        }
    }

    /// Run the reconciliation loop
    pub async fn run(&self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        info!(
            interval_secs = self.interval.as_secs(),
            stuck_after_secs = self.stuck_after.num_seconds(),
            "Starting confirmation tracker"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping confirmation tracker");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(err) = self.sweep().await {
                        error!(error = %err, "Error reconciling stuck requests");
                    }
                }
            }
        }

        Ok(())
    }

    /// Settle every processing row older than the stuck timeout
    pub async fn sweep(&self) -> Result<SweepSummary> {
        let store = self.processor.store();
        let cutoff = Utc::now() - self.stuck_after;
        let stuck = store.list_stuck_processing(cutoff).await?;

        let mut summary = SweepSummary {
            examined: stuck.len(),
            ..SweepSummary::default()
        };
        if stuck.is_empty() {
            return Ok(summary);
        }

        warn!(count = stuck.len(), "Found requests stuck in processing");

        for request in stuck {
            match self.settle(&request).await {
                Ok(Some(Status::Completed)) => summary.completed += 1,
                Ok(Some(_)) => summary.failed += 1,
                Ok(None) => summary.deferred += 1,
                Err(err) => {
                    summary.deferred += 1;
                    warn!(
                        source_tx_hash = %request.source_tx_hash,
                        error = %err,
                        "Error reconciling request"
                    );
                }
            }
        }

        info!(
            examined = summary.examined,
            completed = summary.completed,
            failed = summary.failed,
            deferred = summary.deferred,
            "Reconciliation sweep finished"
        );
        Ok(summary)
    }

    /// Returns the status written, or `None` when the row was left as is
    async fn settle(&self, request: &BridgeRequest) -> Result<Option<Status>> {
        let store = self.processor.store();
        let hash = request.source_tx_hash.as_str();

        let Some(destination_tx) = request.destination_tx_hash.as_deref() else {
            return self.demote(request, NEVER_SUBMITTED, "never_submitted").await;
        };

        let executor = self.processor.executors().for_chain(request.to_chain);
        let landed = match executor.check_landed(destination_tx).await {
            Ok(landed) => landed,
            Err(err) => {
                debug!(source_tx_hash = %hash, error = %err, "Destination lookup failed");
                metrics::record_error(request.to_chain.as_str(), "reconcile_lookup");
                return Ok(None);
            }
        };

        match landed {
            Some(true) => {
                if !store.mark_completed(hash, destination_tx).await? {
                    return Ok(None);
                }
                info!(
                    source_tx_hash = %hash,
                    destination_tx_hash = %destination_tx,
                    "Stuck request confirmed on destination"
                );
                metrics::record_reconciled("completed");
                self.finish(request, Status::Completed).await?;
                Ok(Some(Status::Completed))
            }
            Some(false) => {
                let message = format!("destination transaction {} reverted", destination_tx);
                self.demote(request, &message, "reverted").await
            }
            None => {
                let message = format!(
                    "destination transaction {} not found on {}; verify before manual action",
                    destination_tx, request.to_chain
                );
                self.demote(request, &message, "unseen").await
            }
        }
    }

    async fn demote(
        &self,
        request: &BridgeRequest,
        message: &str,
        outcome: &str,
    ) -> Result<Option<Status>> {
        let hash = request.source_tx_hash.as_str();
        if !self.processor.store().mark_failed(hash, message).await? {
            return Ok(None);
        }
        warn!(
            source_tx_hash = %hash,
            to_chain = %request.to_chain,
            reason = outcome,
            "Stuck request marked failed"
        );
        metrics::record_reconciled(outcome);
        self.finish(request, Status::Failed).await?;
        Ok(Some(Status::Failed))
    }

    async fn finish(&self, request: &BridgeRequest, status: Status) -> Result<()> {
        let age = (Utc::now() - request.created_at).num_milliseconds().max(0) as f64 / 1000.0;
        metrics::record_request_finished(
            request.from_chain.as_str(),
            request.to_chain.as_str(),
            status.as_str(),
            age,
        );
        self.processor.notify(&request.source_tx_hash, status).await
    }
}
