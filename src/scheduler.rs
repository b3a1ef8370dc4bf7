//! Retry scheduler
//!
//! Sweeps the record store on a fixed interval and re-attempts the
//! destination side of verified, failed records with bounded concurrency.
//! Sweeps within one process never overlap (missed ticks are skipped); across
//! processes each record is leased before it is touched.
//!
//! A sweep is never cancelled part-way: shutdown is only observed between
//! sweeps, so a broadcast transaction is always waited out.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::error::BridgeError;
use crate::metrics;
use crate::reconciler::{Reconciler, RetryOutcome};

/// Tally of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub candidates: usize,
    pub executed: usize,
    pub recovered: usize,
    pub failed: usize,
    /// Leased elsewhere or no longer eligible
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Executed,
    Recovered,
    Failed,
    Skipped,
}

pub struct RetryScheduler {
    reconciler: Arc<Reconciler>,
    config: RetryConfig,
    owner: String,
}

impl RetryScheduler {
    pub fn new(reconciler: Arc<Reconciler>, config: RetryConfig) -> Self {
        let owner = format!(
            "scheduler-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_millis()
        );
        Self::with_owner(reconciler, config, owner)
    }

    /// Use an explicit lease owner id
    pub fn with_owner(reconciler: Arc<Reconciler>, config: RetryConfig, owner: String) -> Self {
        Self {
            reconciler,
            config,
            owner,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Sweep every interval until a shutdown message arrives
    pub async fn run(&self, mut shutdown: mpsc::Receiver<()>) -> eyre::Result<()> {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.config.interval.as_secs(),
            max_retries = self.config.max_retries,
            concurrency = self.config.concurrency,
            owner = %self.owner,
            "Retry scheduler starting"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping retry scheduler");
                    return Ok(());
                }
            }

            match self.sweep().await {
                Ok(summary) if summary.candidates > 0 => {
                    info!(
                        candidates = summary.candidates,
                        executed = summary.executed,
                        recovered = summary.recovered,
                        failed = summary.failed,
                        skipped = summary.skipped,
                        "Retry sweep complete"
                    );
                }
                Ok(_) => debug!("Retry sweep found nothing to do"),
                Err(e) => error!(error = %e, "Retry sweep failed"),
            }
        }
    }

    /// One pass over the retryable records
    pub async fn sweep(&self) -> Result<SweepSummary, BridgeError> {
        let records = self
            .reconciler
            .store()
            .query_failed_retryable(self.config.max_retries)
            .await?;
        metrics::record_sweep();

        let mut summary = SweepSummary {
            candidates: records.len(),
            ..Default::default()
        };

        let attempts: Vec<Attempt> = stream::iter(records)
            .map(|record| self.attempt(record.id))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for attempt in attempts {
            match attempt {
                Attempt::Executed => summary.executed += 1,
                Attempt::Recovered => summary.recovered += 1,
                Attempt::Failed => summary.failed += 1,
                Attempt::Skipped => summary.skipped += 1,
            }
        }

        Ok(summary)
    }

    async fn attempt(&self, id: i64) -> Attempt {
        let store = self.reconciler.store();

        match store
            .try_lease(id, &self.owner, self.config.lease_duration)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(record_id = id, "Record leased elsewhere, skipping");
                return Attempt::Skipped;
            }
            Err(e) => {
                warn!(record_id = id, error = %e, "Failed to lease record");
                return Attempt::Skipped;
            }
        }

        let result = self.reconciler.retry_record(id).await;

        if let Err(e) = store.release_lease(id, &self.owner).await {
            warn!(record_id = id, error = %e, "Failed to release lease");
        }

        match result {
            Ok(RetryOutcome::Executed(_)) => Attempt::Executed,
            Ok(RetryOutcome::Recovered(_)) => Attempt::Recovered,
            Ok(RetryOutcome::Skipped) => Attempt::Skipped,
            Err(e) => {
                debug!(record_id = id, error = %e, "Retry attempt failed");
                Attempt::Failed
            }
        }
    }
}
