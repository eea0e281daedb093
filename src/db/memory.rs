//! In-process `BridgeStore`
//!
//! Mirrors the Postgres constraints: unique source tx hash, unique
//! (from_chain, nonce), conditional status transitions and a checkpoint
//! that only moves forward.

use std::collections::HashMap;

use alloy::primitives::U256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{eyre, Result};
use tokio::sync::RwLock;

use super::{
    clamp_limit, BridgeStats, BridgeStore, InsertOutcome, NewBridgeRequest, RoutePairCount,
};
use crate::db::BridgeRequest;
use crate::types::{ChainName, Status};

#[derive(Default)]
struct MemoryState {
    /// Insertion order doubles as creation order
    requests: Vec<BridgeRequest>,
    by_hash: HashMap<String, usize>,
    by_nonce: HashMap<(ChainName, i64), usize>,
    checkpoints: HashMap<ChainName, u64>,
}

impl MemoryState {
    fn get_mut(&mut self, source_tx_hash: &str) -> Option<&mut BridgeRequest> {
        let idx = *self.by_hash.get(source_tx_hash)?;
        self.requests.get_mut(idx)
    }

    /// Move the row to `to` and apply `update`, only if the move is a legal transition
    fn transition(
        &mut self,
        source_tx_hash: &str,
        to: Status,
        update: impl FnOnce(&mut BridgeRequest),
    ) -> bool {
        match self.get_mut(source_tx_hash) {
            Some(row) if row.status.can_transition_to(to) => {
                row.status = to;
                update(row);
                row.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backdate a row's `updated_at`; used to simulate rows left behind by a crash
    pub async fn set_updated_at(&self, source_tx_hash: &str, at: DateTime<Utc>) -> bool {
        let mut state = self.state.write().await;
        match state.get_mut(source_tx_hash) {
            Some(row) => {
                row.updated_at = at;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl BridgeStore for MemoryStore {
    async fn insert_pending(&self, request: &NewBridgeRequest) -> Result<InsertOutcome> {
        let mut state = self.state.write().await;
        if state.by_hash.contains_key(&request.source_tx_hash) {
            return Ok(InsertOutcome::DuplicateHash);
        }
        let nonce_key = (request.from_chain, request.nonce);
        if state.by_nonce.contains_key(&nonce_key) {
            return Ok(InsertOutcome::NonceConflict);
        }

        let idx = state.requests.len();
        state.requests.push(request.clone().into_pending(Utc::now()));
        state.by_hash.insert(request.source_tx_hash.clone(), idx);
        state.by_nonce.insert(nonce_key, idx);
        Ok(InsertOutcome::Inserted)
    }

    async fn get_request(&self, source_tx_hash: &str) -> Result<Option<BridgeRequest>> {
        let state = self.state.read().await;
        Ok(state
            .by_hash
            .get(source_tx_hash)
            .and_then(|idx| state.requests.get(*idx))
            .cloned())
    }

    async fn mark_processing(&self, source_tx_hash: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.transition(source_tx_hash, Status::Processing, |_| {}))
    }

    async fn record_destination_tx(
        &self,
        source_tx_hash: &str,
        destination_tx_hash: &str,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.get_mut(source_tx_hash) {
            Some(row) if row.status == Status::Processing => {
                row.destination_tx_hash = Some(destination_tx_hash.to_string());
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_completed(
        &self,
        source_tx_hash: &str,
        destination_tx_hash: &str,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.transition(source_tx_hash, Status::Completed, |row| {
            row.destination_tx_hash = Some(destination_tx_hash.to_string());
            row.completed_at = Some(Utc::now());
        }))
    }

    async fn mark_failed(&self, source_tx_hash: &str, error_message: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        Ok(state.transition(source_tx_hash, Status::Failed, |row| {
            row.error_message = Some(error_message.to_string());
        }))
    }

    async fn list_in_flight(&self) -> Result<Vec<BridgeRequest>> {
        let state = self.state.read().await;
        Ok(state
            .requests
            .iter()
            .filter(|r| matches!(r.status, Status::Pending | Status::Processing))
            .cloned()
            .collect())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<BridgeRequest>> {
        let state = self.state.read().await;
        Ok(state
            .requests
            .iter()
            .rev()
            .take(clamp_limit(limit) as usize)
            .cloned()
            .collect())
    }

    async fn list_for_address(&self, address: &str, limit: i64) -> Result<Vec<BridgeRequest>> {
        let needle = address.trim().to_lowercase();
        let state = self.state.read().await;
        Ok(state
            .requests
            .iter()
            .rev()
            .filter(|r| {
                r.from_address.to_lowercase() == needle || r.to_address.to_lowercase() == needle
            })
            .take(clamp_limit(limit) as usize)
            .cloned()
            .collect())
    }

    async fn list_stuck_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<BridgeRequest>> {
        let state = self.state.read().await;
        let mut stuck: Vec<BridgeRequest> = state
            .requests
            .iter()
            .filter(|r| r.status == Status::Processing && r.updated_at < older_than)
            .cloned()
            .collect();
        stuck.sort_by_key(|r| r.updated_at);
        Ok(stuck)
    }

    async fn stats(&self) -> Result<BridgeStats> {
        let state = self.state.read().await;
        let mut stats = BridgeStats::default();
        let mut volume = U256::ZERO;
        let mut pairs: Vec<RoutePairCount> = Vec::new();

        for request in &state.requests {
            stats.total_transactions += 1;
            match request.status {
                Status::Completed => {
                    stats.completed += 1;
                    let amount = U256::from_str_radix(&request.amount, 10)
                        .map_err(|e| {
                            eyre!("Stored amount {} is not decimal: {}", request.amount, e)
                        })?;
                    volume = volume.saturating_add(amount);
                }
                Status::Pending | Status::Processing => stats.pending += 1,
                Status::Failed => stats.failed += 1,
            }

            match pairs
                .iter_mut()
                .find(|p| p.from_chain == request.from_chain && p.to_chain == request.to_chain)
            {
                Some(pair) => pair.count += 1,
                None => pairs.push(RoutePairCount {
                    from_chain: request.from_chain,
                    to_chain: request.to_chain,
                    count: 1,
                }),
            }
        }

        pairs.sort_by(|a, b| {
            let key = |p: &RoutePairCount| (p.from_chain.as_str(), p.to_chain.as_str());
            key(a).cmp(&key(b))
        });
        stats.route_pairs = pairs;
        stats.total_volume = volume.to_string();
        Ok(stats)
    }

    async fn get_checkpoint(&self, chain: ChainName) -> Result<Option<u64>> {
        Ok(self.state.read().await.checkpoints.get(&chain).copied())
    }

    async fn advance_checkpoint(&self, chain: ChainName, block: u64) -> Result<u64> {
        let mut state = self.state.write().await;
        let entry = state.checkpoints.entry(chain).or_insert(block);
        *entry = (*entry).max(block);
        Ok(*entry)
    }
}
