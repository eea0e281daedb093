//! Persistence layer
//!
//! `BridgeStore` is the seam the processor, synchronizers and query facade
//! depend on. `PgStore` backs it with Postgres; `MemoryStore` keeps the same
//! semantics in process for tests and dry runs.
//!
//! Status updates are conditional on the current status, so a row can only
//! move pending -> processing -> completed | failed and never leaves a
//! terminal state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{eyre, Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::error;

use crate::types::ChainName;

pub mod memory;
pub mod models;

pub use memory::MemoryStore;
pub use models::*;

/// Upper bound on list queries
pub const MAX_LIST_LIMIT: i64 = 500;

/// Clamp a caller-supplied limit into 1..=MAX_LIST_LIMIT
pub fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, MAX_LIST_LIMIT)
}

#[async_trait]
pub trait BridgeStore: Send + Sync {
    /// Insert a new pending request. Never overwrites an existing row.
    async fn insert_pending(&self, request: &NewBridgeRequest) -> Result<InsertOutcome>;

    async fn get_request(&self, source_tx_hash: &str) -> Result<Option<BridgeRequest>>;

    /// pending -> processing. Returns false if the row was not pending.
    async fn mark_processing(&self, source_tx_hash: &str) -> Result<bool>;

    /// Attach the submitted destination tx while the row is processing
    async fn record_destination_tx(&self, source_tx_hash: &str, destination_tx_hash: &str)
        -> Result<bool>;

    /// processing -> completed
    async fn mark_completed(&self, source_tx_hash: &str, destination_tx_hash: &str)
        -> Result<bool>;

    /// processing -> failed
    async fn mark_failed(&self, source_tx_hash: &str, error_message: &str) -> Result<bool>;

    /// Requests in pending or processing, oldest first
    async fn list_in_flight(&self) -> Result<Vec<BridgeRequest>>;

    /// Most recent requests, newest first
    async fn list_recent(&self, limit: i64) -> Result<Vec<BridgeRequest>>;

    /// Requests where `address` is sender or recipient (case-insensitive), newest first
    async fn list_for_address(&self, address: &str, limit: i64) -> Result<Vec<BridgeRequest>>;

    /// Processing rows not touched since `older_than`
    async fn list_stuck_processing(&self, older_than: DateTime<Utc>)
        -> Result<Vec<BridgeRequest>>;

    async fn stats(&self) -> Result<BridgeStats>;

    async fn get_checkpoint(&self, chain: ChainName) -> Result<Option<u64>>;

    /// Move the checkpoint forward. Lower values are ignored; returns the stored value.
    async fn advance_checkpoint(&self, chain: ChainName, block: u64) -> Result<u64>;
}

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

// amount/fee are NUMERIC(78,0); sqlx can't decode NUMERIC into String, so cast to TEXT
const REQUEST_COLUMNS: &str = "source_tx_hash, from_chain, to_chain, from_address, to_address, \
     amount::TEXT AS amount, fee::TEXT AS fee, nonce, block_number, status, \
     destination_tx_hash, error_message, created_at, updated_at, completed_at";

fn to_db_block(block: u64) -> Result<i64> {
    i64::try_from(block).map_err(|_| eyre!("Block number {} exceeds i64 range", block))
}

/// Postgres-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BridgeStore for PgStore {
    async fn insert_pending(&self, request: &NewBridgeRequest) -> Result<InsertOutcome> {
        // Both the primary key and UNIQUE(from_chain, nonce) make a racing insert a no-op
        let inserted = sqlx::query_as::<_, (String,)>(
            r#"
            INSERT INTO bridge_requests (source_tx_hash, from_chain, to_chain, from_address,
                to_address, amount, fee, nonce, block_number, status)
            VALUES ($1, $2, $3, $4, $5, $6::NUMERIC, $7::NUMERIC, $8, $9, 'pending')
            ON CONFLICT DO NOTHING
            RETURNING source_tx_hash
            "#,
        )
        .bind(&request.source_tx_hash)
        .bind(request.from_chain.as_str())
        .bind(request.to_chain.as_str())
        .bind(&request.from_address)
        .bind(&request.to_address)
        .bind(&request.amount)
        .bind(&request.fee)
        .bind(request.nonce)
        .bind(request.block_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("SQL error inserting bridge request: {:?}", e);
            e
        })
        .wrap_err("Failed to insert bridge request")?;

        if inserted.is_some() {
            return Ok(InsertOutcome::Inserted);
        }

        let hash_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM bridge_requests WHERE source_tx_hash = $1)",
        )
        .bind(&request.source_tx_hash)
        .fetch_one(&self.pool)
        .await
        .wrap_err("Failed to check bridge request existence")?;

        Ok(if hash_exists {
            InsertOutcome::DuplicateHash
        } else {
            InsertOutcome::NonceConflict
        })
    }

    async fn get_request(&self, source_tx_hash: &str) -> Result<Option<BridgeRequest>> {
        let sql = format!(
            "SELECT {} FROM bridge_requests WHERE source_tx_hash = $1",
            REQUEST_COLUMNS
        );
        sqlx::query_as::<_, BridgeRequest>(&sql)
            .bind(source_tx_hash)
            .fetch_optional(&self.pool)
            .await
            .wrap_err("Failed to get bridge request")
    }

    async fn mark_processing(&self, source_tx_hash: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE bridge_requests SET status = 'processing', updated_at = NOW()
               WHERE source_tx_hash = $1 AND status = 'pending'"#,
        )
        .bind(source_tx_hash)
        .execute(&self.pool)
        .await
        .wrap_err("Failed to mark bridge request processing")?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_destination_tx(
        &self,
        source_tx_hash: &str,
        destination_tx_hash: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE bridge_requests SET destination_tx_hash = $2, updated_at = NOW()
               WHERE source_tx_hash = $1 AND status = 'processing'"#,
        )
        .bind(source_tx_hash)
        .bind(destination_tx_hash)
        .execute(&self.pool)
        .await
        .wrap_err("Failed to record destination transaction")?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(
        &self,
        source_tx_hash: &str,
        destination_tx_hash: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE bridge_requests
               SET status = 'completed', destination_tx_hash = $2,
                   completed_at = NOW(), updated_at = NOW()
               WHERE source_tx_hash = $1 AND status = 'processing'"#,
        )
        .bind(source_tx_hash)
        .bind(destination_tx_hash)
        .execute(&self.pool)
        .await
        .wrap_err("Failed to mark bridge request completed")?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, source_tx_hash: &str, error_message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE bridge_requests
               SET status = 'failed', error_message = $2, updated_at = NOW()
               WHERE source_tx_hash = $1 AND status = 'processing'"#,
        )
        .bind(source_tx_hash)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .wrap_err("Failed to mark bridge request failed")?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_in_flight(&self) -> Result<Vec<BridgeRequest>> {
        let sql = format!(
            "SELECT {} FROM bridge_requests WHERE status IN ('pending', 'processing') \
             ORDER BY created_at ASC",
            REQUEST_COLUMNS
        );
        sqlx::query_as::<_, BridgeRequest>(&sql)
            .fetch_all(&self.pool)
            .await
            .wrap_err("Failed to list in-flight bridge requests")
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<BridgeRequest>> {
        let sql = format!(
            "SELECT {} FROM bridge_requests ORDER BY created_at DESC LIMIT $1",
            REQUEST_COLUMNS
        );
        sqlx::query_as::<_, BridgeRequest>(&sql)
            .bind(clamp_limit(limit))
            .fetch_all(&self.pool)
            .await
            .wrap_err("Failed to list recent bridge requests")
    }

    async fn list_for_address(&self, address: &str, limit: i64) -> Result<Vec<BridgeRequest>> {
        let sql = format!(
            "SELECT {} FROM bridge_requests \
             WHERE LOWER(from_address) = LOWER($1) OR LOWER(to_address) = LOWER($1) \
             ORDER BY created_at DESC LIMIT $2",
            REQUEST_COLUMNS
        );
        sqlx::query_as::<_, BridgeRequest>(&sql)
            .bind(address.trim())
            .bind(clamp_limit(limit))
            .fetch_all(&self.pool)
            .await
            .wrap_err("Failed to list bridge requests for address")
    }

    async fn list_stuck_processing(&self, older_than: DateTime<Utc>) -> Result<Vec<BridgeRequest>> {
        let sql = format!(
            "SELECT {} FROM bridge_requests WHERE status = 'processing' AND updated_at < $1 \
             ORDER BY updated_at ASC",
            REQUEST_COLUMNS
        );
        sqlx::query_as::<_, BridgeRequest>(&sql)
            .bind(older_than)
            .fetch_all(&self.pool)
            .await
            .wrap_err("Failed to list stuck bridge requests")
    }

    async fn stats(&self) -> Result<BridgeStats> {
        let (total_transactions, completed, pending, failed, total_volume) =
            sqlx::query_as::<_, (i64, i64, i64, i64, String)>(
                r#"
                SELECT
                    COUNT(*),
                    COUNT(*) FILTER (WHERE status = 'completed'),
                    COUNT(*) FILTER (WHERE status IN ('pending', 'processing')),
                    COUNT(*) FILTER (WHERE status = 'failed'),
                    COALESCE(SUM(amount) FILTER (WHERE status = 'completed'), 0)::TEXT
                FROM bridge_requests
                "#,
            )
            .fetch_one(&self.pool)
            .await
            .wrap_err("Failed to compute bridge stats")?;

        let route_pairs = sqlx::query_as::<_, RoutePairCount>(
            r#"SELECT from_chain, to_chain, COUNT(*) AS count FROM bridge_requests
               GROUP BY from_chain, to_chain ORDER BY from_chain, to_chain"#,
        )
        .fetch_all(&self.pool)
        .await
        .wrap_err("Failed to compute route pair counts")?;

        Ok(BridgeStats {
            total_transactions,
            completed,
            pending,
            failed,
            route_pairs,
            total_volume,
        })
    }

    async fn get_checkpoint(&self, chain: ChainName) -> Result<Option<u64>> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT last_block FROM sync_checkpoints WHERE chain = $1",
        )
        .bind(chain.as_str())
        .fetch_optional(&self.pool)
        .await
        .wrap_err("Failed to get sync checkpoint")?;

        Ok(row.map(|(block,)| block.max(0) as u64))
    }

    async fn advance_checkpoint(&self, chain: ChainName, block: u64) -> Result<u64> {
        let (stored,) = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO sync_checkpoints (chain, last_block, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (chain) DO UPDATE
            SET last_block = GREATEST(sync_checkpoints.last_block, EXCLUDED.last_block),
                updated_at = NOW()
            RETURNING last_block
            "#,
        )
        .bind(chain.as_str())
        .bind(to_db_block(block)?)
        .fetch_one(&self.pool)
        .await
        .wrap_err("Failed to advance sync checkpoint")?;

        Ok(stored.max(0) as u64)
    }
}
