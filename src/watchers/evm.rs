use std::sync::Arc;

use alloy::rpc::types::Log;
use eyre::{Result, WrapErr};
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::connectors::EvmConnector;
use crate::db::BridgeStore;
use crate::events::decode_bridge_log;
use crate::metrics;
use crate::processor::{ObservePath, RequestProcessor};
use crate::retry::{classify_error, RetryConfig};
use crate::types::ChainName;

/// Checkpointed bridge event synchronizer for one EVM source chain
pub struct EvmWatcher {
    chain: ChainName,
    connector: Arc<dyn EvmConnector>,
    store: Arc<dyn BridgeStore>,
    processor: Arc<RequestProcessor>,
    sync: SyncConfig,
}

impl EvmWatcher {
    pub fn new(
        connector: Arc<dyn EvmConnector>,
        store: Arc<dyn BridgeStore>,
        processor: Arc<RequestProcessor>,
        sync: SyncConfig,
    ) -> Self {
        Self {
            chain: connector.chain(),
            connector,
            store,
            processor,
            sync,
        }
    }

    pub fn chain(&self) -> ChainName {
        self.chain
    }

    /// Run the watcher loop, restarting failed cycles with backoff
    pub async fn run(&self) -> Result<()> {
        let retry = RetryConfig::with_initial(self.sync.retry_delay());
        let mut attempt: u32 = 0;

        info!(chain = %self.chain, "Starting EVM watcher");

        loop {
            match self.run_cycle().await {
                Ok(()) => {
                    attempt = 0;
                    info!(chain = %self.chain, "Live subscription ended, resubscribing");
                    tokio::time::sleep(self.sync.retry_delay()).await;
                }
                Err(e) => {
                    let class = classify_error(&format!("{:#}", e));
                    metrics::record_error(self.chain.as_str(), class.as_str());
                    let backoff = retry.backoff_for_attempt(attempt);
                    warn!(
                        chain = %self.chain,
                        error = %format!("{:#}", e),
                        error_class = class.as_str(),
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Watcher cycle failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Subscribe, catch up to head, then follow the live stream until it ends.
    ///
    /// The subscription is opened before the head is read so that nothing
    /// emitted during catch-up is missed; those logs wait in a bounded queue
    /// and are handled once the historical scan is done.
    pub async fn run_cycle(&self) -> Result<()> {
        let live = self.connector.subscribe_bridge_logs().await?;
        let (tx, mut rx) = mpsc::channel(self.sync.live_queue_capacity);
        let forwarder = tokio::spawn(forward_logs(live, tx));

        let result = self.catch_up_then_follow(&mut rx).await;

        forwarder.abort();
        result
    }

    async fn catch_up_then_follow(&self, live: &mut mpsc::Receiver<Log>) -> Result<()> {
        self.catch_up().await?;
        while let Some(log) = live.recv().await {
            self.handle_live_log(&log).await?;
        }
        Ok(())
    }

    /// Scan from the persisted checkpoint to the current head.
    ///
    /// Returns the checkpoint after the scan.
    pub async fn catch_up(&self) -> Result<u64> {
        let head = self.connector.block_number().await?;

        let checkpoint = match self.store.get_checkpoint(self.chain).await? {
            Some(block) => block,
            None => {
                let seed = head.saturating_sub(self.sync.initial_lookback_blocks);
                info!(
                    chain = %self.chain,
                    head,
                    seed,
                    "No checkpoint, scanning recent history only"
                );
                seed
            }
        };

        let lag = head.saturating_sub(checkpoint);
        if lag > self.sync.max_lag_blocks {
            warn!(
                chain = %self.chain,
                checkpoint,
                head,
                lag,
                max_lag = self.sync.max_lag_blocks,
                "Checkpoint too far behind, skipping to head"
            );
            let advanced = self.store.advance_checkpoint(self.chain, head).await?;
            metrics::record_checkpoint(self.chain.as_str(), advanced);
            return Ok(advanced);
        }

        let mut current = checkpoint;
        let mut from_block = checkpoint + 1;
        while from_block <= head {
            let to_block = from_block
                .saturating_add(self.sync.batch_size.saturating_sub(1))
                .min(head);

            self.scan_range(from_block, to_block).await?;

            current = self.store.advance_checkpoint(self.chain, to_block).await?;
            metrics::record_batch_scanned(
                self.chain.as_str(),
                to_block - from_block + 1,
                current,
            );

            from_block = to_block + 1;
            if from_block <= head {
                tokio::time::sleep(self.sync.batch_delay()).await;
            }
        }

        Ok(current)
    }

    /// Hand every bridge event in `[from_block, to_block]` to the processor.
    ///
    /// Errors leave the range unscanned; undecodable logs are skipped.
    pub async fn scan_range(&self, from_block: u64, to_block: u64) -> Result<()> {
        debug!(chain = %self.chain, from_block, to_block, "Scanning blocks");

        let logs = self.connector.bridge_logs(from_block, to_block).await?;

        for log in &logs {
            match decode_bridge_log(self.chain, log) {
                Ok(Some(event)) => {
                    self.processor
                        .observe(&event, ObservePath::Historical)
                        .await
                        .wrap_err_with(|| {
                            format!("Failed to process {}", event.source_tx_hash)
                        })?;
                }
                Ok(None) => {}
                Err(e) => self.skip_undecodable(log, &e.to_string()),
            }
        }

        if !logs.is_empty() {
            info!(
                chain = %self.chain,
                from_block,
                to_block,
                logs = logs.len(),
                "Processed bridge logs"
            );
        }
        Ok(())
    }

    /// Process one log from the live subscription.
    ///
    /// The checkpoint only moves to the block before the event: other logs of
    /// the same block may still be queued, and a failure on one of them must
    /// leave the whole block to the next catch-up scan.
    pub async fn handle_live_log(&self, log: &Log) -> Result<()> {
        if log.removed {
            debug!(chain = %self.chain, tx_hash = ?log.transaction_hash, "Ignoring removed log");
            return Ok(());
        }

        match decode_bridge_log(self.chain, log) {
            Ok(Some(event)) => {
                self.processor
                    .observe(&event, ObservePath::Live)
                    .await
                    .wrap_err_with(|| format!("Failed to process {}", event.source_tx_hash))?;
                let checkpoint = self
                    .store
                    .advance_checkpoint(self.chain, event.block_number.saturating_sub(1))
                    .await?;
                metrics::record_checkpoint(self.chain.as_str(), checkpoint);
            }
            Ok(None) => {}
            Err(e) => self.skip_undecodable(log, &e.to_string()),
        }
        Ok(())
    }

    fn skip_undecodable(&self, log: &Log, error: &str) {
        warn!(
            chain = %self.chain,
            tx_hash = ?log.transaction_hash,
            log_index = ?log.log_index,
            error,
            "Skipping undecodable bridge log"
        );
        metrics::record_error(self.chain.as_str(), "decode");
    }
}

/// Move logs from the subscription into the bounded queue until either side closes
async fn forward_logs(mut live: BoxStream<'static, Log>, tx: mpsc::Sender<Log>) {
    while let Some(log) = live.next().await {
        if tx.send(log).await.is_err() {
            break;
        }
    }
}
