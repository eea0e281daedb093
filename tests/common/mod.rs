//! Shared fakes and fixtures for the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use alloy::primitives::{address, Address, Bytes, LogData, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use futures::stream::{self, BoxStream, StreamExt};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tokio::sync::mpsc;

use eagle_relayer::attestation::AttestationSigner;
use eagle_relayer::config::{ExecutionConfig, SyncConfig};
use eagle_relayer::confirmation::ConfirmationTracker;
use eagle_relayer::connectors::solana::associated_token_address;
use eagle_relayer::connectors::{EvmConnector, SolanaConnector};
use eagle_relayer::contracts::{BscBridge, XLayerBridge};
use eagle_relayer::db::{
    BridgeRequest, BridgeStats, BridgeStore, InsertOutcome, MemoryStore, NewBridgeRequest,
};
use eagle_relayer::executors::{DestinationExecutor, EvmExecutor, Executors, SolanaMintExecutor};
use eagle_relayer::processor::{RequestProcessor, RouteTable};
use eagle_relayer::recovery::RecoveryService;
use eagle_relayer::service::{BridgeService, ChainDirectory, EvmChainInfo, SolanaChainInfo};
use eagle_relayer::types::{format_evm_address, format_tx_hash, ChainName};
use eagle_relayer::watchers::EvmWatcher;

pub const XLAYER_CHAIN_ID: u64 = 196;
pub const BSC_CHAIN_ID: u64 = 56;

pub const XLAYER_BRIDGE: Address = address!("63A65A216c213f636e06D4aD10e1b2995b19e82F");
pub const BSC_BRIDGE: Address = address!("0985DB9C2FA117152941521991E06AAfA03c82F3");

pub const SOLANA_MINT: &str = "EagLe1111111111111111111111111111111111111";

pub const SENDER: Address = address!("1111111111111111111111111111111111111111");
pub const RECIPIENT: Address = address!("2222222222222222222222222222222222222222");

/// Hardhat account #0; only ever used against fakes
pub const TEST_PRIVATE_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

#[derive(Default)]
struct FakeEvmState {
    head: u64,
    logs: Vec<Log>,
    receipts: HashMap<B256, Vec<Log>>,
    tx_status: HashMap<B256, bool>,
    sent: Vec<(Address, Bytes)>,
    fail_send: bool,
    /// Override for `wait_for_receipt`
    wait_result: Option<Option<bool>>,
    failing_ranges: HashSet<u64>,
    requested_ranges: Vec<(u64, u64)>,
    sent_counter: u8,
}

/// In-memory EVM chain: a fixed set of bridge logs, receipts keyed by hash,
/// and a recorded list of submitted transactions
pub struct FakeEvmConnector {
    chain: ChainName,
    bridge: Address,
    state: Mutex<FakeEvmState>,
    live_tx: Mutex<Option<mpsc::UnboundedSender<Log>>>,
    live_rx: Mutex<Option<mpsc::UnboundedReceiver<Log>>>,
}

impl FakeEvmConnector {
    pub fn new(chain: ChainName, bridge: Address) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            chain,
            bridge,
            state: Mutex::new(FakeEvmState::default()),
            live_tx: Mutex::new(Some(tx)),
            live_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    /// Add a mined bridge log; it shows up in range queries and in its receipt
    pub fn add_log(&self, log: Log) {
        let mut state = self.state.lock().unwrap();
        if let Some(hash) = log.transaction_hash {
            state.receipts.entry(hash).or_default().push(log.clone());
            state.tx_status.insert(hash, true);
        }
        state.logs.push(log);
    }

    /// A mined transaction with only the given logs, invisible to range scans
    pub fn add_receipt(&self, tx_hash: B256, logs: Vec<Log>) {
        let mut state = self.state.lock().unwrap();
        state.receipts.insert(tx_hash, logs);
        state.tx_status.insert(tx_hash, true);
    }

    pub fn set_tx_status(&self, tx_hash: B256, success: bool) {
        self.state.lock().unwrap().tx_status.insert(tx_hash, success);
    }

    pub fn push_live(&self, log: Log) {
        if let Some(tx) = self.live_tx.lock().unwrap().as_ref() {
            let _ = tx.send(log);
        }
    }

    /// End the live stream once the queued logs are drained
    pub fn close_live(&self) {
        self.live_tx.lock().unwrap().take();
    }

    pub fn fail_send(&self, fail: bool) {
        self.state.lock().unwrap().fail_send = fail;
    }

    pub fn set_wait_result(&self, result: Option<bool>) {
        self.state.lock().unwrap().wait_result = Some(result);
    }

    pub fn fail_range_from(&self, from_block: u64) {
        self.state.lock().unwrap().failing_ranges.insert(from_block);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failing_ranges.clear();
    }

    pub fn sent(&self) -> Vec<(Address, Bytes)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn requested_ranges(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().requested_ranges.clone()
    }
}

#[async_trait]
impl EvmConnector for FakeEvmConnector {
    fn chain(&self) -> ChainName {
        self.chain
    }

    fn bridge_address(&self) -> Address {
        self.bridge
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.state.lock().unwrap().head)
    }

    async fn bridge_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>> {
        let mut state = self.state.lock().unwrap();
        state.requested_ranges.push((from_block, to_block));
        if state.failing_ranges.contains(&from_block) {
            return Err(eyre!("connection reset while fetching logs"));
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                log.block_number
                    .map(|b| b >= from_block && b <= to_block)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn subscribe_bridge_logs(&self) -> Result<BoxStream<'static, Log>> {
        match self.live_rx.lock().unwrap().take() {
            Some(rx) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|log| (log, rx))
            })
            .boxed()),
            None => Ok(stream::empty().boxed()),
        }
    }

    async fn receipt_logs(&self, tx_hash: B256) -> Result<Option<Vec<Log>>> {
        Ok(self.state.lock().unwrap().receipts.get(&tx_hash).cloned())
    }

    async fn send_transaction(&self, to: Address, calldata: Bytes) -> Result<B256> {
        let mut state = self.state.lock().unwrap();
        if state.fail_send {
            return Err(eyre!("connection refused: destination RPC unavailable"));
        }
        state.sent.push((to, calldata));
        state.sent_counter += 1;
        let mut hash = B256::repeat_byte(0xd0);
        hash.0[0] = state.sent_counter;
        state.tx_status.insert(hash, true);
        Ok(hash)
    }

    async fn receipt_status(&self, tx_hash: B256) -> Result<Option<bool>> {
        Ok(self.state.lock().unwrap().tx_status.get(&tx_hash).copied())
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<Option<bool>> {
        let state = self.state.lock().unwrap();
        if let Some(result) = state.wait_result {
            return Ok(result);
        }
        Ok(state.tx_status.get(&tx_hash).copied())
    }
}

#[derive(Default)]
struct FakeSolanaState {
    created_accounts: Vec<Pubkey>,
    mints: Vec<(Pubkey, u64)>,
    statuses: HashMap<Signature, bool>,
}

pub struct FakeSolanaConnector {
    mint: Pubkey,
    state: Mutex<FakeSolanaState>,
}

impl FakeSolanaConnector {
    pub fn new() -> Self {
        Self {
            mint: Pubkey::new_unique(),
            state: Mutex::new(FakeSolanaState::default()),
        }
    }

    pub fn mints(&self) -> Vec<(Pubkey, u64)> {
        self.state.lock().unwrap().mints.clone()
    }

    pub fn created_accounts(&self) -> Vec<Pubkey> {
        self.state.lock().unwrap().created_accounts.clone()
    }
}

#[async_trait]
impl SolanaConnector for FakeSolanaConnector {
    fn mint(&self) -> Pubkey {
        self.mint
    }

    async fn ensure_token_account(&self, owner: &Pubkey) -> Result<Pubkey> {
        let ata = associated_token_address(owner, &self.mint);
        let mut state = self.state.lock().unwrap();
        if !state.created_accounts.contains(&ata) {
            state.created_accounts.push(ata);
        }
        Ok(ata)
    }

    async fn submit_mint(&self, token_account: &Pubkey, amount: u64) -> Result<Signature> {
        let signature = Signature::new_unique();
        let mut state = self.state.lock().unwrap();
        state.mints.push((*token_account, amount));
        state.statuses.insert(signature, true);
        Ok(signature)
    }

    async fn signature_status(&self, signature: &Signature) -> Result<Option<bool>> {
        Ok(self.state.lock().unwrap().statuses.get(signature).copied())
    }

    async fn wait_for_signature(&self, signature: &Signature) -> Result<Option<bool>> {
        self.signature_status(signature).await
    }
}

/// Store operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    InsertPending,
    GetRequest,
    MarkProcessing,
    AdvanceCheckpoint,
}

/// `MemoryStore` wrapper that fails selected calls once, like a dropped
/// database connection
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    /// (operation, source tx hash filter)
    faults: Mutex<Vec<(StoreOp, Option<String>)>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next call of `op`, whatever its arguments
    pub fn fail_once(&self, op: StoreOp) {
        self.faults.lock().unwrap().push((op, None));
    }

    /// Fail the next call of `op` concerning `source_tx_hash`
    pub fn fail_once_for(&self, op: StoreOp, source_tx_hash: &str) {
        self.faults
            .lock()
            .unwrap()
            .push((op, Some(source_tx_hash.to_string())));
    }

    fn check(&self, op: StoreOp, source_tx_hash: Option<&str>) -> Result<()> {
        let mut faults = self.faults.lock().unwrap();
        let hit = faults.iter().position(|(fault_op, filter)| {
            *fault_op == op
                && match filter {
                    Some(hash) => source_tx_hash == Some(hash.as_str()),
                    None => true,
                }
        });
        match hit {
            Some(idx) => {
                faults.remove(idx);
                Err(eyre!("pool timed out while waiting for an open connection"))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BridgeStore for FlakyStore {
    async fn insert_pending(&self, request: &NewBridgeRequest) -> Result<InsertOutcome> {
        self.check(StoreOp::InsertPending, Some(&request.source_tx_hash))?;
        self.inner.insert_pending(request).await
    }

    async fn get_request(&self, source_tx_hash: &str) -> Result<Option<BridgeRequest>> {
        self.check(StoreOp::GetRequest, Some(source_tx_hash))?;
        self.inner.get_request(source_tx_hash).await
    }

    async fn mark_processing(&self, source_tx_hash: &str) -> Result<bool> {
        self.check(StoreOp::MarkProcessing, Some(source_tx_hash))?;
        self.inner.mark_processing(source_tx_hash).await
    }

    async fn record_destination_tx(
        &self,
        source_tx_hash: &str,
        destination_tx_hash: &str,
    ) -> Result<bool> {
        self.inner
            .record_destination_tx(source_tx_hash, destination_tx_hash)
            .await
    }

    async fn mark_completed(
        &self,
        source_tx_hash: &str,
        destination_tx_hash: &str,
    ) -> Result<bool> {
        self.inner.mark_completed(source_tx_hash, destination_tx_hash).await
    }

    async fn mark_failed(&self, source_tx_hash: &str, error_message: &str) -> Result<bool> {
        self.inner.mark_failed(source_tx_hash, error_message).await
    }

    async fn list_in_flight(&self) -> Result<Vec<BridgeRequest>> {
        self.inner.list_in_flight().await
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<BridgeRequest>> {
        self.inner.list_recent(limit).await
    }

    async fn list_for_address(&self, address: &str, limit: i64) -> Result<Vec<BridgeRequest>> {
        self.inner.list_for_address(address, limit).await
    }

    async fn list_stuck_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<BridgeRequest>> {
        self.inner.list_stuck_processing(older_than).await
    }

    async fn stats(&self) -> Result<BridgeStats> {
        self.inner.stats().await
    }

    async fn get_checkpoint(&self, chain: ChainName) -> Result<Option<u64>> {
        self.inner.get_checkpoint(chain).await
    }

    async fn advance_checkpoint(&self, chain: ChainName, block: u64) -> Result<u64> {
        self.check(StoreOp::AdvanceCheckpoint, None)?;
        self.inner.advance_checkpoint(chain, block).await
    }
}

pub fn sync_config() -> SyncConfig {
    SyncConfig {
        batch_size: 100,
        batch_delay_ms: 0,
        initial_lookback_blocks: 500,
        max_lag_blocks: 10_000,
        retry_delay_ms: 10,
        live_queue_capacity: 64,
    }
}

pub fn execution_config() -> ExecutionConfig {
    ExecutionConfig {
        confirmation_timeout_secs: 1,
        receipt_poll_interval_ms: 10,
        stuck_processing_timeout_secs: 600,
        reconcile_interval_secs: 60,
    }
}

/// Processor wired to fakes and an in-memory store
pub struct Harness {
    /// Backing rows, for assertions
    pub store: Arc<MemoryStore>,
    /// What the processor, watchers and recovery talk to
    backend: Arc<dyn BridgeStore>,
    pub xlayer: Arc<FakeEvmConnector>,
    pub bsc: Arc<FakeEvmConnector>,
    pub solana: Arc<FakeSolanaConnector>,
    pub processor: Arc<RequestProcessor>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::with_backend(store.clone(), store)
    }

    /// Harness whose storage calls go through a `FlakyStore`
    pub fn flaky() -> (Self, Arc<FlakyStore>) {
        let store = Arc::new(MemoryStore::new());
        let flaky = Arc::new(FlakyStore::new(store.clone()));
        (Self::with_backend(store, flaky.clone()), flaky)
    }

    fn with_backend(store: Arc<MemoryStore>, backend: Arc<dyn BridgeStore>) -> Self {
        let xlayer = Arc::new(FakeEvmConnector::new(ChainName::XLayer, XLAYER_BRIDGE));
        let bsc = Arc::new(FakeEvmConnector::new(ChainName::Bsc, BSC_BRIDGE));
        let solana = Arc::new(FakeSolanaConnector::new());
        let signer = Arc::new(AttestationSigner::from_private_key(Some(TEST_PRIVATE_KEY)).unwrap());

        let executors = Executors::new(
            DestinationExecutor::EvmBridgeIn(EvmExecutor::new(
                xlayer.clone(),
                signer.clone(),
                XLAYER_CHAIN_ID,
                ChainName::Bsc,
                BSC_CHAIN_ID,
            )),
            DestinationExecutor::EvmRelease(EvmExecutor::new(
                bsc.clone(),
                signer,
                BSC_CHAIN_ID,
                ChainName::XLayer,
                XLAYER_CHAIN_ID,
            )),
            DestinationExecutor::SolanaMint(SolanaMintExecutor::new(solana.clone(), 9)),
        );

        let processor = Arc::new(RequestProcessor::new(
            backend.clone(),
            executors,
            RouteTable::new(XLAYER_CHAIN_ID, BSC_CHAIN_ID),
        ));

        Self {
            store,
            backend,
            xlayer,
            bsc,
            solana,
            processor,
        }
    }

    pub fn dyn_store(&self) -> Arc<dyn BridgeStore> {
        self.backend.clone()
    }

    pub fn connector(&self, chain: ChainName) -> Arc<FakeEvmConnector> {
        match chain {
            ChainName::XLayer => self.xlayer.clone(),
            ChainName::Bsc => self.bsc.clone(),
            ChainName::Solana => panic!("solana has no EVM connector"),
        }
    }

    pub fn watcher(&self, chain: ChainName) -> EvmWatcher {
        EvmWatcher::new(
            self.connector(chain),
            self.dyn_store(),
            self.processor.clone(),
            sync_config(),
        )
    }

    pub fn recovery(&self) -> RecoveryService {
        RecoveryService::new(
            vec![
                self.xlayer.clone() as Arc<dyn EvmConnector>,
                self.bsc.clone() as Arc<dyn EvmConnector>,
            ],
            self.processor.clone(),
        )
    }

    pub fn service(&self) -> BridgeService {
        BridgeService::new(self.dyn_store(), self.recovery(), chain_directory())
    }

    pub fn tracker(&self) -> ConfirmationTracker {
        ConfirmationTracker::new(self.processor.clone(), &execution_config())
    }
}

pub fn chain_directory() -> ChainDirectory {
    ChainDirectory {
        xlayer: EvmChainInfo {
            name: "X Layer".to_string(),
            chain_id: XLAYER_CHAIN_ID,
            bridge: format_evm_address(&XLAYER_BRIDGE),
        },
        bsc: EvmChainInfo {
            name: "BSC".to_string(),
            chain_id: BSC_CHAIN_ID,
            bridge: format_evm_address(&BSC_BRIDGE),
        },
        solana: SolanaChainInfo {
            name: "Solana".to_string(),
            mint: SOLANA_MINT.to_string(),
            decimals: 9,
        },
    }
}

pub fn tx_hash(n: u64) -> B256 {
    B256::from(U256::from(n))
}

pub fn rpc_log(bridge: Address, data: LogData, tx_hash: B256, block: u64) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address: bridge,
            data,
        },
        block_hash: None,
        block_number: Some(block),
        block_timestamp: None,
        transaction_hash: Some(tx_hash),
        transaction_index: Some(0),
        log_index: Some(0),
        removed: false,
    }
}

/// X Layer `BridgeOut` towards `dest_chain_id`
pub fn bridge_out_log(
    tx_hash: B256,
    block: u64,
    nonce: u64,
    amount: u64,
    dest_chain_id: u64,
) -> Log {
    let data = XLayerBridge::BridgeOut {
        from: SENDER,
        to: RECIPIENT,
        amount: U256::from(amount),
        fee: U256::from(1u64),
        destChainId: U256::from(dest_chain_id),
        nonce: U256::from(nonce),
        timestamp: U256::from(1_700_000_000u64),
    }
    .encode_log_data();
    rpc_log(XLAYER_BRIDGE, data, tx_hash, block)
}

/// BSC `BridgeInitiated` towards X Layer
pub fn bridge_initiated_log(tx_hash: B256, block: u64, nonce: u64, amount: u64) -> Log {
    let data = BscBridge::BridgeInitiated {
        from: SENDER,
        to: RECIPIENT,
        amount: U256::from(amount),
        fee: U256::ZERO,
        nonce: U256::from(nonce),
        timestamp: U256::from(1_700_000_000u64),
    }
    .encode_log_data();
    rpc_log(BSC_BRIDGE, data, tx_hash, block)
}

/// `BridgeToSolana` from X Layer
pub fn bridge_to_solana_log(
    tx_hash: B256,
    block: u64,
    nonce: u64,
    amount: U256,
    recipient: [u8; 32],
) -> Log {
    let data = XLayerBridge::BridgeToSolana {
        from: SENDER,
        recipient: B256::from(recipient),
        amount,
        fee: U256::ZERO,
        nonce: U256::from(nonce),
        timestamp: U256::from(1_700_000_000u64),
    }
    .encode_log_data();
    rpc_log(XLAYER_BRIDGE, data, tx_hash, block)
}

pub fn hash_str(hash: B256) -> String {
    format_tx_hash(&hash)
}
