use eyre::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub mod evm;

pub use evm::EvmWatcher;

/// Supervises one watcher per source chain
pub struct WatcherManager {
    watchers: Vec<EvmWatcher>,
}

impl WatcherManager {
    pub fn new(watchers: Vec<EvmWatcher>) -> Self {
        let mut seen = std::collections::HashSet::new();
        for watcher in &watchers {
            if !seen.insert(watcher.chain()) {
                warn!(chain = %watcher.chain(), "Duplicate watcher for chain");
            }
        }
        info!(
            watchers = watchers.len(),
            chains = ?watchers.iter().map(|w| w.chain().as_str()).collect::<Vec<_>>(),
            "Watcher manager created"
        );
        Self { watchers }
    }

    /// Run all watchers concurrently
    /// Returns when any watcher fails or shutdown signal received
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let mut join_set = tokio::task::JoinSet::new();

        for watcher in self.watchers {
            join_set.spawn(async move { watcher.run().await });
        }

        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutdown signal received, stopping watchers");
                join_set.abort_all();
                Ok(())
            }
            maybe_done = join_set.join_next() => {
                match maybe_done {
                    Some(Ok(Ok(()))) => {
                        error!("A watcher exited unexpectedly without error");
                        Err(eyre::eyre!("watcher exited unexpectedly"))
                    }
                    Some(Ok(Err(e))) => {
                        error!("A watcher stopped with error: {:?}", e);
                        Err(e)
                    }
                    Some(Err(e)) => {
                        error!("A watcher task panicked: {:?}", e);
                        Err(eyre::eyre!("watcher task panicked: {}", e))
                    }
                    None => {
                        error!("No watcher tasks running");
                        Err(eyre::eyre!("no watcher tasks running"))
                    }
                }
            }
        }
    }
}
