//! EAGLE Bridge Relayer
//!
//! Watches the X Layer and BSC bridge contracts, records every bridge event
//! as a request, and executes the matching release, bridge-in or Solana mint
//! on the destination chain.

use std::collections::HashMap;
use std::sync::Arc;

use eyre::eyre;
use tracing::{error, info, warn};

use eagle_relayer::api;
use eagle_relayer::attestation::AttestationSigner;
use eagle_relayer::config::Config;
use eagle_relayer::confirmation::ConfirmationTracker;
use eagle_relayer::connectors::{EvmConnector, EvmRpcConnector, SolanaConnector, SolanaRpcConnector};
use eagle_relayer::db::{self, BridgeStore, PgStore};
use eagle_relayer::executors::Executors;
use eagle_relayer::processor::{BridgeNotification, RequestProcessor, RouteTable};
use eagle_relayer::recovery::RecoveryService;
use eagle_relayer::service::{BridgeService, ChainDirectory};
use eagle_relayer::types::ChainName;
use eagle_relayer::watchers::{EvmWatcher, WatcherManager};

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    info!("Starting EAGLE Bridge Relayer");

    let config = Config::load()?;
    info!(
        xlayer_chain_id = config.xlayer.chain_id,
        bsc_chain_id = config.bsc.chain_id,
        solana_rpc = %config.solana.rpc_url,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database.url).await?;
    info!("Database connected");

    db::run_migrations(&pool).await?;
    info!("Database migrations complete");

    let store: Arc<dyn BridgeStore> = Arc::new(PgStore::new(pool));

    // Refuse to start without a usable attestation key
    let signer = Arc::new(AttestationSigner::from_private_key(Some(
        &config.signer.private_key,
    ))?);
    info!(signer = %signer.address(), "Attestation signer loaded");

    let mut evm_connectors: HashMap<ChainName, Arc<dyn EvmConnector>> = HashMap::new();
    for chain in ChainName::SOURCES {
        let chain_config = config
            .evm_chain(chain)
            .ok_or_else(|| eyre!("No configuration for {}", chain))?;
        let connector =
            EvmRpcConnector::new(chain_config, &config.execution, &config.signer.private_key)?;
        evm_connectors.insert(chain, Arc::new(connector));
    }
    let connector_for = |chain: ChainName| {
        evm_connectors
            .get(&chain)
            .cloned()
            .ok_or_else(|| eyre!("No connector for {}", chain))
    };
    let solana: Arc<dyn SolanaConnector> =
        Arc::new(SolanaRpcConnector::new(&config.solana, &config.execution)?);

    let executors = Executors::from_connectors(
        &config,
        signer,
        connector_for(ChainName::XLayer)?,
        connector_for(ChainName::Bsc)?,
        solana,
    );
    let processor = Arc::new(RequestProcessor::new(
        store.clone(),
        executors,
        RouteTable::from_config(&config),
    ));

    // Alerting hook: log every terminal transition
    let mut notifications = processor.subscribe();
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(BridgeNotification::Completed(request)) => info!(
                    source_tx_hash = %request.source_tx_hash,
                    route = %format!("{}->{}", request.from_chain, request.to_chain),
                    destination_tx_hash = ?request.destination_tx_hash,
                    "Bridge transfer completed"
                ),
                Ok(BridgeNotification::Failed(request)) => warn!(
                    source_tx_hash = %request.source_tx_hash,
                    route = %format!("{}->{}", request.from_chain, request.to_chain),
                    error = ?request.error_message,
                    "Bridge transfer failed, operator attention required"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notification listener lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let watchers = ChainName::SOURCES
        .into_iter()
        .map(|chain| -> eyre::Result<EvmWatcher> {
            Ok(EvmWatcher::new(
                connector_for(chain)?,
                store.clone(),
                processor.clone(),
                config.sync.clone(),
            ))
        })
        .collect::<eyre::Result<Vec<_>>>()?;
    let watcher_manager = WatcherManager::new(watchers);
    let confirmation_tracker = ConfirmationTracker::new(processor.clone(), &config.execution);

    let recovery =
        RecoveryService::new(evm_connectors.values().cloned().collect(), processor.clone());
    let service = Arc::new(BridgeService::new(
        store.clone(),
        recovery,
        ChainDirectory::from_config(&config),
    ));

    // Create shutdown channels
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let (shutdown_tx2, shutdown_rx2) = tokio::sync::mpsc::channel::<()>(1);

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
        let _ = shutdown_tx2.send(()).await;
    });

    let api_addr = config.api.bind_address;
    tokio::spawn(async move {
        if let Err(e) = api::start_api_server(api_addr, service).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Relayer initialized, starting watchers");

    tokio::select! {
        result = watcher_manager.run(shutdown_rx) => {
            if let Err(e) = result {
                error!(error = %e, "Watcher manager error");
            }
        }
        result = confirmation_tracker.run(shutdown_rx2) => {
            if let Err(e) = result {
                error!(error = %e, "Confirmation tracker error");
            }
        }
    }

    eagle_relayer::metrics::set_up(false);
    info!("EAGLE Bridge Relayer stopped");
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,eagle_relayer=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(filter)
        .init();
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
