//! Durable Store
//!
//! Traits for the shared state behind the pipeline: the anchor queue, the
//! anchor record log and the audit chain pointer plus event log. Every
//! mutation is a single atomic operation on the backing store.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::anchor::record::{AnchorRecord, PendingAnchor, RecordSummary, TxConfirmation};
use crate::error::StoreError;
use crate::merkle::hash_leaf;

pub use memory::MemoryStore;
pub use sqlite::Database;

/// One pending leaf hash and its position in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub leaf_hash: String,
    pub enqueue_order: u64,
}

/// Durable FIFO of leaf hashes awaiting anchoring.
#[async_trait]
pub trait AnchorQueue: Send + Sync {
    /// Append one leaf hash at the tail.
    async fn push(&self, leaf_hash: &str) -> Result<u64, StoreError>;

    /// Append several leaf hashes at the tail, all or none.
    async fn push_many(&self, leaf_hashes: &[String]) -> Result<(), StoreError>;

    /// Read up to `limit` entries from the head without removing them.
    async fn peek(&self, limit: usize) -> Result<Vec<QueueEntry>, StoreError>;

    /// Remove exactly the first `count` entries from the head. Returns the
    /// number actually removed, which is smaller only if the queue is shorter.
    async fn trim(&self, count: usize) -> Result<usize, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;
}

/// Append-only log of anchor records plus their latest ledger status.
#[async_trait]
pub trait AnchorRecordStore: Send + Sync {
    /// Persist a new record. A second record for the same root is a `Conflict`.
    async fn save_record(&self, record: &AnchorRecord) -> Result<(), StoreError>;

    async fn find_by_root(&self, merkle_root: &str) -> Result<Option<AnchorRecord>, StoreError>;

    /// Most recently anchored record by queue position.
    async fn latest_record(&self) -> Result<Option<AnchorRecord>, StoreError>;

    /// All records, oldest first.
    async fn list_records(&self) -> Result<Vec<AnchorRecord>, StoreError>;

    /// Up to `limit` records, oldest first, confirmed neither at submission
    /// nor by a later confirmation. Leaf lists are not loaded.
    async fn unconfirmed_records(&self, limit: usize) -> Result<Vec<PendingAnchor>, StoreError>;

    /// Record, leaf and unconfirmed counts without loading any record.
    async fn record_summary(&self) -> Result<RecordSummary, StoreError>;

    async fn upsert_confirmation(&self, confirmation: &TxConfirmation) -> Result<(), StoreError>;

    async fn confirmation(&self, merkle_root: &str) -> Result<Option<TxConfirmation>, StoreError>;
}

/// Result of a compare-and-swap on the chain pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    Mismatch { actual: String },
}

/// Chain pointer and ordered event log of the audit chain.
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Current head of the chain (genesis hash when empty).
    async fn head(&self) -> Result<String, StoreError>;

    /// Swap the head from `expected_prev` to `new_head` and append
    /// `event_json` to the log, both or neither.
    async fn cas_and_append(
        &self,
        expected_prev: &str,
        new_head: &str,
        event_json: &str,
    ) -> Result<CasOutcome, StoreError>;

    /// Serialized events in append order.
    async fn load_events(&self) -> Result<Vec<String>, StoreError>;

    async fn event_count(&self) -> Result<usize, StoreError>;
}

/// Hash product identifiers and queue them as one batch.
pub async fn enqueue_identifiers<Q, S>(queue: &Q, identifiers: &[S]) -> Result<usize, StoreError>
where
    Q: AnchorQueue + ?Sized,
    S: AsRef<str>,
{
    let hashes: Vec<String> = identifiers.iter().map(|id| hash_leaf(id.as_ref())).collect();
    queue.push_many(&hashes).await?;
    Ok(hashes.len())
}
