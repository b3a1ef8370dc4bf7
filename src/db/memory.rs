//! In-memory record store
//!
//! Same semantics as the PostgreSQL store, including the uniqueness
//! constraint and leases. Used by tests and local dry runs.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use alloy::primitives::B256;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{BridgeTransaction, NewBridgeTransaction, RecordStore, RecordUpdate, StatusCounts};
use crate::error::StoreError;
use crate::types::{BridgeAction, Status};

#[derive(Debug)]
struct Lease {
    owner: String,
    until: Instant,
}

#[derive(Debug)]
struct Entry {
    record: BridgeTransaction,
    lease: Option<Lease>,
}

impl Entry {
    fn leased_by_other(&self, owner: Option<&str>, now: Instant) -> bool {
        match &self.lease {
            Some(lease) if lease.until > now => Some(lease.owner.as_str()) != owner,
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    entries: BTreeMap<i64, Entry>,
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    inner: Mutex<Inner>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed record, bypassing the pipeline (test setup)
    pub async fn insert(&self, mut record: BridgeTransaction) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.entries.values().find(|e| {
            e.record.action == record.action && e.record.source_tx_hash == record.source_tx_hash
        }) {
            return Err(StoreError::Duplicate {
                existing_id: existing.record.id,
            });
        }
        inner.next_id += 1;
        record.id = inner.next_id;
        let id = record.id;
        inner.entries.insert(
            id,
            Entry {
                record,
                lease: None,
            },
        );
        Ok(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, record: &NewBridgeTransaction) -> Result<i64, StoreError> {
        let now = Utc::now();
        self.insert(BridgeTransaction {
            id: 0,
            user: record.user,
            source_network: record.source_network.clone(),
            destination_network: record.destination_network.clone(),
            action: record.action,
            amount: record.amount,
            source_tx_hash: record.source_tx_hash,
            destination_tx_hash: None,
            superseded_tx_hashes: Vec::new(),
            destination_nonce: None,
            destination_gas_price: None,
            status: Status::Pending,
            retries: 0,
            last_error: None,
            rejected: false,
            verified_block: None,
            created_at: now,
            updated_at: now,
        })
        .await
    }

    async fn get(&self, id: i64) -> Result<Option<BridgeTransaction>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.entries.get(&id).map(|e| e.record.clone()))
    }

    async fn find_by_source(
        &self,
        action: BridgeAction,
        source_tx_hash: B256,
    ) -> Result<Option<BridgeTransaction>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .values()
            .find(|e| e.record.action == action && e.record.source_tx_hash == source_tx_hash)
            .map(|e| e.record.clone()))
    }

    async fn update(&self, id: i64, update: &RecordUpdate) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let record = &mut entry.record;

        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(amount) = update.amount {
            record.amount = Some(amount);
        }
        if let Some(block) = update.verified_block {
            record.verified_block = Some(block);
        }
        if let Some(hash) = update.destination_tx_hash {
            if let Some(previous) = record.destination_tx_hash.filter(|p| *p != hash) {
                record.superseded_tx_hashes.push(previous);
            }
            record.superseded_tx_hashes.retain(|h| *h != hash);
            record.destination_tx_hash = Some(hash);
        }
        if let Some(slot) = update.broadcast_slot {
            record.destination_nonce = Some(slot.nonce);
            record.destination_gas_price = Some(slot.gas_price);
        }
        record.rejected |= update.rejected;
        if update.clear_error {
            record.last_error = None;
        } else if let Some(error) = &update.last_error {
            record.last_error = Some(error.clone());
        }
        if update.increment_retries {
            record.retries += 1;
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn reopen_unverified(
        &self,
        id: i64,
        claim: &NewBridgeTransaction,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let record = &mut entry.record;

        if record.status != Status::Failed || record.verified_block.is_some() {
            return Ok(false);
        }
        if record.rejected && record.user == claim.user && record.amount == claim.amount {
            return Ok(false);
        }

        record.status = Status::Pending;
        record.user = claim.user;
        record.destination_network = claim.destination_network.clone();
        record.amount = claim.amount;
        record.last_error = None;
        record.rejected = false;
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn query_failed_retryable(
        &self,
        max_retries: u32,
    ) -> Result<Vec<BridgeTransaction>, StoreError> {
        let now = Instant::now();
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .values()
            .filter(|e| e.record.is_retryable(max_retries) && !e.leased_by_other(None, now))
            .map(|e| e.record.clone())
            .collect())
    }

    async fn try_lease(&self, id: i64, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let entry = match inner.entries.get_mut(&id) {
            Some(entry) => entry,
            None => return Ok(false),
        };

        if entry.record.status != Status::Failed || entry.leased_by_other(Some(owner), now) {
            return Ok(false);
        }

        entry.lease = Some(Lease {
            owner: owner.to_string(),
            until: now + ttl,
        });
        Ok(true)
    }

    async fn release_lease(&self, id: i64, owner: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.entries.get_mut(&id) {
            if entry.lease.as_ref().map(|l| l.owner.as_str()) == Some(owner) {
                entry.lease = None;
            }
        }
        Ok(())
    }

    async fn status_counts(&self, max_retries: u32) -> Result<StatusCounts, StoreError> {
        let inner = self.inner.lock().await;
        let mut counts = StatusCounts::default();
        for entry in inner.entries.values() {
            match entry.record.status {
                Status::Pending => counts.pending += 1,
                Status::Success => counts.success += 1,
                Status::Failed => counts.failed += 1,
            }
            if entry.record.is_retryable(max_retries) {
                counts.retryable += 1;
            }
        }
        Ok(counts)
    }
}
