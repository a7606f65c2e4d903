//! In-process store used by tests and single-instance runs.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use crate::anchor::record::{AnchorRecord, PendingAnchor, RecordSummary, TxConfirmation};
use crate::audit::entry::GENESIS_HASH;
use crate::error::StoreError;
use crate::store::{AnchorQueue, AnchorRecordStore, CasOutcome, ChainStore, QueueEntry};

#[derive(Debug)]
struct Inner {
    queue: VecDeque<QueueEntry>,
    next_order: u64,
    records: Vec<AnchorRecord>,
    confirmations: HashMap<String, TxConfirmation>,
    head: String,
    events: Vec<String>,
}

impl Inner {
    fn is_confirmed(&self, record: &AnchorRecord) -> bool {
        record.submission_status.is_confirmed()
            || self
                .confirmations
                .get(&record.merkle_root)
                .is_some_and(|c| c.status.is_confirmed())
    }
}

/// All state behind one mutex, so every trait operation is atomic.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                next_order: 1,
                records: Vec::new(),
                confirmations: HashMap::new(),
                head: GENESIS_HASH.to_string(),
                events: Vec::new(),
            }),
        }
    }

    /// Overwrite a stored event in place. Only for tamper simulations.
    pub async fn overwrite_event(&self, index: usize, event_json: String) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.events.get_mut(index) {
            Some(slot) => {
                *slot = event_json;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl AnchorQueue for MemoryStore {
    async fn push(&self, leaf_hash: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let order = inner.next_order;
        inner.next_order += 1;
        inner.queue.push_back(QueueEntry {
            leaf_hash: leaf_hash.to_string(),
            enqueue_order: order,
        });
        Ok(order)
    }

    async fn push_many(&self, leaf_hashes: &[String]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        for hash in leaf_hashes {
            let order = inner.next_order;
            inner.next_order += 1;
            inner.queue.push_back(QueueEntry {
                leaf_hash: hash.clone(),
                enqueue_order: order,
            });
        }
        Ok(())
    }

    async fn peek(&self, limit: usize) -> Result<Vec<QueueEntry>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.queue.iter().take(limit).cloned().collect())
    }

    async fn trim(&self, count: usize) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock().await;
        let removed = count.min(inner.queue.len());
        inner.queue.drain(..removed);
        Ok(removed)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.inner.lock().await.queue.len())
    }
}

#[async_trait]
impl AnchorRecordStore for MemoryStore {
    async fn save_record(&self, record: &AnchorRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.records.iter().any(|r| r.merkle_root == record.merkle_root) {
            return Err(StoreError::Conflict(format!(
                "Anchor record already exists for root {}",
                record.merkle_root
            )));
        }
        inner.records.push(record.clone());
        Ok(())
    }

    async fn find_by_root(&self, merkle_root: &str) -> Result<Option<AnchorRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.records.iter().find(|r| r.merkle_root == merkle_root).cloned())
    }

    async fn latest_record(&self) -> Result<Option<AnchorRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.records.iter().max_by_key(|r| r.last_enqueue_order).cloned())
    }

    async fn list_records(&self) -> Result<Vec<AnchorRecord>, StoreError> {
        Ok(self.inner.lock().await.records.clone())
    }

    async fn unconfirmed_records(&self, limit: usize) -> Result<Vec<PendingAnchor>, StoreError> {
        let inner = self.inner.lock().await;
        let mut pending: Vec<&AnchorRecord> =
            inner.records.iter().filter(|r| !inner.is_confirmed(r)).collect();
        pending.sort_by_key(|r| r.first_enqueue_order);

        Ok(pending
            .into_iter()
            .take(limit)
            .map(|r| PendingAnchor {
                merkle_root: r.merkle_root.clone(),
                transaction_id: inner
                    .confirmations
                    .get(&r.merkle_root)
                    .map(|c| c.transaction_id.clone())
                    .unwrap_or_else(|| r.transaction_id.clone()),
            })
            .collect())
    }

    async fn record_summary(&self) -> Result<RecordSummary, StoreError> {
        let inner = self.inner.lock().await;
        Ok(RecordSummary {
            records: inner.records.len(),
            leaves_anchored: inner.records.iter().map(|r| r.leaf_count()).sum(),
            unconfirmed: inner.records.iter().filter(|r| !inner.is_confirmed(r)).count(),
        })
    }

    async fn upsert_confirmation(&self, confirmation: &TxConfirmation) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .confirmations
            .insert(confirmation.merkle_root.clone(), confirmation.clone());
        Ok(())
    }

    async fn confirmation(&self, merkle_root: &str) -> Result<Option<TxConfirmation>, StoreError> {
        Ok(self.inner.lock().await.confirmations.get(merkle_root).cloned())
    }
}

#[async_trait]
impl ChainStore for MemoryStore {
    async fn head(&self) -> Result<String, StoreError> {
        Ok(self.inner.lock().await.head.clone())
    }

    async fn cas_and_append(
        &self,
        expected_prev: &str,
        new_head: &str,
        event_json: &str,
    ) -> Result<CasOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.head != expected_prev {
            return Ok(CasOutcome::Mismatch {
                actual: inner.head.clone(),
            });
        }
        inner.head = new_head.to_string();
        inner.events.push(event_json.to_string());
        Ok(CasOutcome::Applied)
    }

    async fn load_events(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.lock().await.events.clone())
    }

    async fn event_count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.lock().await.events.len())
    }
}
