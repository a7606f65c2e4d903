//! Anchor Cycle
//!
//! Two-phase commit of queued leaf hashes to the ledger:
//! peek the queue head, build the root, submit, persist the record, and only
//! then trim the anchored entries. A failure at any step before the trim
//! leaves the queue exactly as it was, so the next tick retries the batch.
//!
//! At most one cycle may run against a queue at a time. The in-process guard
//! only covers this process; cross-process exclusion is the scheduler's job.

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::anchor::ledger::{Ledger, TxStatus};
use crate::anchor::record::{AnchorRecord, PendingAnchor, TxConfirmation};
use crate::error::{AnchorError, Retryable};
use crate::merkle::root_from_leaf_hashes;
use crate::retry::{retry, RetryPolicy};
use crate::store::{AnchorQueue, AnchorRecordStore, QueueEntry};

/// Most unconfirmed records polled by one [`AnchorCycle::refresh_pending`].
pub const REFRESH_LIMIT: usize = 100;

/// Progress of a single cycle, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleState {
    Idle,
    Fetched,
    Built,
    Submitted,
    Confirmed,
    Unchanged,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "IDLE",
            CycleState::Fetched => "FETCHED",
            CycleState::Built => "BUILT",
            CycleState::Submitted => "SUBMITTED",
            CycleState::Confirmed => "CONFIRMED",
            CycleState::Unchanged => "UNCHANGED",
        };
        f.write_str(name)
    }
}

/// How a call to [`AnchorCycle::run_once`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Queue was empty.
    Idle,
    /// Another cycle was already running in this process.
    Skipped,
    /// Batch anchored, recorded and trimmed.
    Confirmed(AnchorRecord),
    /// Head of the queue was already anchored by an earlier cycle that
    /// stopped before trimming; only the trim was redone.
    Recovered(AnchorRecord),
    /// Ledger failed within its retry budget; queue untouched.
    Unchanged { merkle_root: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub checked: usize,
    pub confirmed: usize,
    pub pending: usize,
    pub resubmitted: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnchorStats {
    pub queue_depth: usize,
    pub records: usize,
    pub leaves_anchored: usize,
    pub unconfirmed: usize,
}

pub struct AnchorCycle {
    queue: Arc<dyn AnchorQueue>,
    records: Arc<dyn AnchorRecordStore>,
    ledger: Arc<dyn Ledger>,
    batch_size: usize,
    retry_policy: RetryPolicy,
    running: Mutex<()>,
}

impl AnchorCycle {
    pub fn new(
        queue: Arc<dyn AnchorQueue>,
        records: Arc<dyn AnchorRecordStore>,
        ledger: Arc<dyn Ledger>,
        batch_size: usize,
    ) -> Self {
        Self {
            queue,
            records,
            ledger,
            batch_size: batch_size.max(1),
            retry_policy: RetryPolicy::ledger(),
            running: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run one anchoring cycle.
    pub async fn run_once(&self) -> Result<CycleOutcome, AnchorError> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("Anchor cycle already running, skipping");
            return Ok(CycleOutcome::Skipped);
        };

        let batch = self.queue.peek(self.batch_size).await?;
        if batch.is_empty() {
            debug!(state = %CycleState::Idle, "Anchor queue empty");
            return Ok(CycleOutcome::Idle);
        }
        debug!(state = %CycleState::Fetched, count = batch.len(), "Fetched pending leaves");

        if let Some(record) = self.already_anchored_prefix(&batch).await? {
            return Ok(CycleOutcome::Recovered(record));
        }

        let hashes: Vec<String> = batch.iter().map(|e| e.leaf_hash.clone()).collect();
        let merkle_root = root_from_leaf_hashes(&hashes)?;
        debug!(state = %CycleState::Built, merkle_root = %merkle_root, "Built batch root");

        if let Some(existing) = self.records.find_by_root(&merkle_root).await? {
            warn!(
                merkle_root = %merkle_root,
                "Root already recorded, confirming queue without resubmitting"
            );
            self.confirm(batch.len()).await?;
            return Ok(CycleOutcome::Recovered(existing));
        }

        let submit = || self.ledger.submit(&merkle_root);
        let submission = match retry("ledger_submit", &self.retry_policy, submit).await {
            Ok(submission) => submission,
            Err(e) if e.is_retryable() => {
                warn!(
                    state = %CycleState::Unchanged,
                    merkle_root = %merkle_root,
                    count = batch.len(),
                    "Anchor cycle failed, will retry next tick: {}",
                    e
                );
                return Ok(CycleOutcome::Unchanged {
                    merkle_root,
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                error!(merkle_root = %merkle_root, "Ledger rejected anchor: {}", e);
                return Err(e.into());
            }
        };
        debug!(
            state = %CycleState::Submitted,
            transaction_id = %submission.transaction_id,
            "Ledger accepted root"
        );

        let record = AnchorRecord::new(
            merkle_root,
            &batch,
            submission.transaction_id,
            self.ledger.network().to_string(),
            submission.status,
        );
        // Record first: a crash before the trim is repaired by the next cycle
        self.records.save_record(&record).await?;
        self.confirm(batch.len()).await?;

        info!(
            state = %CycleState::Confirmed,
            merkle_root = %record.merkle_root,
            transaction_id = %record.transaction_id,
            count = record.leaf_count(),
            "Anchored batch"
        );
        Ok(CycleOutcome::Confirmed(record))
    }

    /// Queue head entries at or below the last anchored position were
    /// recorded but never trimmed.
    async fn already_anchored_prefix(
        &self,
        batch: &[QueueEntry],
    ) -> Result<Option<AnchorRecord>, AnchorError> {
        let Some(latest) = self.records.latest_record().await? else {
            return Ok(None);
        };
        let stale = batch
            .iter()
            .take_while(|e| e.enqueue_order <= latest.last_enqueue_order)
            .count();
        if stale == 0 {
            return Ok(None);
        }

        warn!(
            merkle_root = %latest.merkle_root,
            count = stale,
            "Queue head already anchored, trimming"
        );
        self.confirm(stale).await?;
        Ok(Some(latest))
    }

    async fn confirm(&self, count: usize) -> Result<(), AnchorError> {
        let removed = self.queue.trim(count).await?;
        if removed != count {
            warn!(expected = count, removed, "Queue trim removed fewer entries than anchored");
        }
        Ok(())
    }

    /// Poll the ledger for records that are not yet confirmed, oldest
    /// first and at most [`REFRESH_LIMIT`] per call. Failed transactions are
    /// resubmitted with the same root.
    pub async fn refresh_pending(&self) -> Result<RefreshReport, AnchorError> {
        let mut report = RefreshReport::default();

        for pending in self.records.unconfirmed_records(REFRESH_LIMIT).await? {
            report.checked += 1;
            let PendingAnchor {
                merkle_root,
                transaction_id,
            } = pending;

            let status = match self.ledger.status(&transaction_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(transaction_id = %transaction_id, "Failed to fetch ledger status: {}", e);
                    report.errors += 1;
                    continue;
                }
            };

            let (transaction_id, status) = match status {
                TxStatus::Failed { reason } => {
                    warn!(
                        merkle_root = %merkle_root,
                        "Anchor transaction failed ({}), resubmitting",
                        reason
                    );
                    match self.ledger.submit(&merkle_root).await {
                        Ok(submission) => {
                            report.resubmitted += 1;
                            (submission.transaction_id, submission.status)
                        }
                        Err(e) => {
                            warn!(merkle_root = %merkle_root, "Resubmission failed: {}", e);
                            report.errors += 1;
                            (transaction_id, TxStatus::Failed { reason })
                        }
                    }
                }
                other => (transaction_id, other),
            };

            match &status {
                TxStatus::Confirmed { block_number, .. } => {
                    info!(merkle_root = %merkle_root, block_number, "Anchor confirmed");
                    report.confirmed += 1;
                }
                _ => report.pending += 1,
            }

            self.records
                .upsert_confirmation(&TxConfirmation {
                    merkle_root,
                    transaction_id,
                    status,
                    updated_at: Utc::now(),
                })
                .await?;
        }

        Ok(report)
    }

    pub async fn stats(&self) -> Result<AnchorStats, AnchorError> {
        let summary = self.records.record_summary().await?;
        Ok(AnchorStats {
            queue_depth: self.queue.len().await?,
            records: summary.records,
            leaves_anchored: summary.leaves_anchored,
            unconfirmed: summary.unconfirmed,
        })
    }
}
