//! Reconciliation record store
//!
//! [`RecordStore`] is what the pipeline and the retry scheduler need from
//! persistence. [`PgRecordStore`] is the production implementation;
//! [`MemoryRecordStore`] has the same semantics and backs the tests.
//!
//! Two guarantees matter beyond plain CRUD:
//! - `(action, source_tx_hash)` is unique, so a source event can never own two
//!   records and therefore never two compensating transactions.
//! - `try_lease` gives one scheduler at a time ownership of a failed record.

use std::time::Duration;

use alloy::primitives::B256;
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::error;

use crate::error::StoreError;
use crate::types::BridgeAction;

pub mod memory;
pub mod models;

pub use memory::MemoryRecordStore;
pub use models::*;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a pending record. Fails with `Duplicate` if the source event is
    /// already tracked for this action.
    async fn create(&self, record: &NewBridgeTransaction) -> Result<i64, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<BridgeTransaction>, StoreError>;

    async fn find_by_source(
        &self,
        action: BridgeAction,
        source_tx_hash: B256,
    ) -> Result<Option<BridgeTransaction>, StoreError>;

    async fn update(&self, id: i64, update: &RecordUpdate) -> Result<(), StoreError>;

    /// Put a failed, never-verified record back to pending with the new
    /// claim's fields. A rejected record is only reopened by a claim naming a
    /// different user or amount. Returns false if the record is not in that
    /// state.
    async fn reopen_unverified(
        &self,
        id: i64,
        claim: &NewBridgeTransaction,
    ) -> Result<bool, StoreError>;

    /// Verified failed records with fewer than `max_retries` attempts and no
    /// live lease, oldest first
    async fn query_failed_retryable(
        &self,
        max_retries: u32,
    ) -> Result<Vec<BridgeTransaction>, StoreError>;

    /// Take ownership of a failed record for `ttl`. Returns false if another
    /// owner holds a live lease or the record is no longer failed.
    async fn try_lease(&self, id: i64, owner: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn release_lease(&self, id: i64, owner: &str) -> Result<(), StoreError>;

    async fn status_counts(&self, max_retries: u32) -> Result<StatusCounts, StoreError>;
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

const SELECT_COLUMNS: &str = r#"SELECT id, user_address, source_network, destination_network, action,
           amount::TEXT as amount, source_tx_hash, destination_tx_hash, superseded_tx_hashes,
           destination_nonce, destination_gas_price::TEXT as destination_gas_price, status,
           retries, last_error, rejected, verified_block, created_at, updated_at
    FROM bridge_transactions"#;

/// PostgreSQL-backed record store
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn convert(rows: Vec<BridgeTransactionRow>) -> Result<Vec<BridgeTransaction>, StoreError> {
    rows.into_iter().map(BridgeTransaction::try_from).collect()
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create(&self, record: &NewBridgeTransaction) -> Result<i64, StoreError> {
        // Note: amount is stored as NUMERIC(78,0), so the decimal text is cast
        let inserted = sqlx::query(
            r#"
            INSERT INTO bridge_transactions (user_address, source_network, destination_network,
                action, amount, source_tx_hash, status)
            VALUES ($1, $2, $3, $4, $5::NUMERIC, $6, 'pending')
            ON CONFLICT (action, source_tx_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.user.to_string())
        .bind(&record.source_network)
        .bind(&record.destination_network)
        .bind(record.action.as_str())
        .bind(record.amount.map(|a| a.to_string()))
        .bind(record.source_tx_hash.to_string())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(row.get("id"));
        }

        let existing: (i64,) = sqlx::query_as(
            r#"SELECT id FROM bridge_transactions WHERE action = $1 AND source_tx_hash = $2"#,
        )
        .bind(record.action.as_str())
        .bind(record.source_tx_hash.to_string())
        .fetch_one(&self.pool)
        .await?;

        Err(StoreError::Duplicate {
            existing_id: existing.0,
        })
    }

    async fn get(&self, id: i64) -> Result<Option<BridgeTransaction>, StoreError> {
        let row = sqlx::query_as::<_, BridgeTransactionRow>(&format!(
            "{} WHERE id = $1",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BridgeTransaction::try_from).transpose()
    }

    async fn find_by_source(
        &self,
        action: BridgeAction,
        source_tx_hash: B256,
    ) -> Result<Option<BridgeTransaction>, StoreError> {
        let row = sqlx::query_as::<_, BridgeTransactionRow>(&format!(
            "{} WHERE action = $1 AND source_tx_hash = $2",
            SELECT_COLUMNS
        ))
        .bind(action.as_str())
        .bind(source_tx_hash.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(BridgeTransaction::try_from).transpose()
    }

    async fn update(&self, id: i64, update: &RecordUpdate) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE bridge_transactions SET
                status = COALESCE($2, status),
                amount = COALESCE($3::NUMERIC, amount),
                verified_block = COALESCE($4, verified_block),
                destination_tx_hash = COALESCE($5, destination_tx_hash),
                superseded_tx_hashes = array_remove(CASE
                    WHEN $5 IS NOT NULL AND destination_tx_hash IS NOT NULL
                         AND destination_tx_hash <> $5
                    THEN array_append(superseded_tx_hashes, destination_tx_hash::TEXT)
                    ELSE superseded_tx_hashes END, $5),
                destination_nonce = COALESCE($9, destination_nonce),
                destination_gas_price = COALESCE($10::NUMERIC, destination_gas_price),
                last_error = CASE WHEN $6 THEN NULL ELSE COALESCE($7, last_error) END,
                retries = retries + $8,
                rejected = rejected OR $11,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.amount.map(|a| a.to_string()))
        .bind(update.verified_block.map(|b| b as i64))
        .bind(update.destination_tx_hash.map(|h| h.to_string()))
        .bind(update.clear_error)
        .bind(update.last_error.as_deref())
        .bind(if update.increment_retries { 1i32 } else { 0i32 })
        .bind(update.broadcast_slot.map(|s| s.nonce as i64))
        .bind(update.broadcast_slot.map(|s| s.gas_price.to_string()))
        .bind(update.rejected)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(record_id = id, "SQL error updating bridge transaction: {:?}", e);
            e
        })?;

        match updated {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn reopen_unverified(
        &self,
        id: i64,
        claim: &NewBridgeTransaction,
    ) -> Result<bool, StoreError> {
        let reopened = sqlx::query(
            r#"
            UPDATE bridge_transactions SET
                status = 'pending',
                user_address = $2,
                destination_network = $3,
                amount = $4::NUMERIC,
                last_error = NULL,
                rejected = FALSE,
                updated_at = NOW()
            WHERE id = $1 AND status = 'failed' AND verified_block IS NULL
              AND (NOT rejected OR user_address <> $2 OR amount IS DISTINCT FROM $4::NUMERIC)
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(claim.user.to_string())
        .bind(&claim.destination_network)
        .bind(claim.amount.map(|a| a.to_string()))
        .fetch_optional(&self.pool)
        .await?;

        Ok(reopened.is_some())
    }

    async fn query_failed_retryable(
        &self,
        max_retries: u32,
    ) -> Result<Vec<BridgeTransaction>, StoreError> {
        let rows = sqlx::query_as::<_, BridgeTransactionRow>(&format!(
            r#"{} WHERE status = 'failed' AND retries < $1 AND verified_block IS NOT NULL
                 AND (leased_until IS NULL OR leased_until < NOW())
               ORDER BY id"#,
            SELECT_COLUMNS
        ))
        .bind(max_retries as i32)
        .fetch_all(&self.pool)
        .await?;

        convert(rows)
    }

    async fn try_lease(&self, id: i64, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        let leased = sqlx::query(
            r#"
            UPDATE bridge_transactions SET
                lease_owner = $2,
                leased_until = NOW() + ($3::DOUBLE PRECISION * INTERVAL '1 second')
            WHERE id = $1 AND status = 'failed'
              AND (leased_until IS NULL OR leased_until < NOW() OR lease_owner = $2)
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(leased.is_some())
    }

    async fn release_lease(&self, id: i64, owner: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"UPDATE bridge_transactions SET lease_owner = NULL, leased_until = NULL
               WHERE id = $1 AND lease_owner = $2"#,
        )
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn status_counts(&self, max_retries: u32) -> Result<StatusCounts, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'success') AS success,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'failed' AND retries < $1
                                 AND verified_block IS NOT NULL) AS retryable
            FROM bridge_transactions
            "#,
        )
        .bind(max_retries as i32)
        .fetch_one(&self.pool)
        .await?;

        Ok(StatusCounts {
            pending: row.get("pending"),
            success: row.get("success"),
            failed: row.get("failed"),
            retryable: row.get("retryable"),
        })
    }
}
