//! Anchor records: one per successful cycle, never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::anchor::ledger::TxStatus;
use crate::error::MerkleError;
use crate::merkle::{hash_leaf, proof_from_leaf_hashes, InclusionProof};
use crate::store::QueueEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub id: Uuid,
    pub merkle_root: String,
    /// Leaf hashes in queue order, exactly as committed under the root.
    pub anchored_leaf_ids: Vec<String>,
    pub first_enqueue_order: u64,
    pub last_enqueue_order: u64,
    pub transaction_id: String,
    pub network: String,
    /// Ledger status at submission time. Later updates go to `TxConfirmation`.
    pub submission_status: TxStatus,
    pub created_at: DateTime<Utc>,
}

impl AnchorRecord {
    pub fn new(
        merkle_root: String,
        batch: &[QueueEntry],
        transaction_id: String,
        network: String,
        submission_status: TxStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            merkle_root,
            anchored_leaf_ids: batch.iter().map(|e| e.leaf_hash.clone()).collect(),
            first_enqueue_order: batch.first().map(|e| e.enqueue_order).unwrap_or_default(),
            last_enqueue_order: batch.last().map(|e| e.enqueue_order).unwrap_or_default(),
            transaction_id,
            network,
            submission_status,
            created_at: Utc::now(),
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.anchored_leaf_ids.len()
    }

    pub fn contains(&self, leaf_hash: &str) -> bool {
        self.anchored_leaf_ids.iter().any(|h| h == leaf_hash)
    }

    /// Inclusion proof for a leaf hash anchored by this record, if present.
    pub fn proof_for(&self, leaf_hash: &str) -> Result<Option<InclusionProof>, MerkleError> {
        let Some(index) = self.anchored_leaf_ids.iter().position(|h| h == leaf_hash) else {
            return Ok(None);
        };
        let steps = proof_from_leaf_hashes(&self.anchored_leaf_ids, index)?;
        Ok(Some(InclusionProof {
            leaf_hash: leaf_hash.to_string(),
            steps,
            merkle_root: self.merkle_root.clone(),
        }))
    }
}

/// Latest known ledger status for an anchored root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxConfirmation {
    pub merkle_root: String,
    pub transaction_id: String,
    pub status: TxStatus,
    pub updated_at: DateTime<Utc>,
}

/// An anchored root still waiting for ledger confirmation, with the
/// transaction currently tracked for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAnchor {
    pub merkle_root: String,
    pub transaction_id: String,
}

/// Aggregate counts over the record log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub records: usize,
    pub leaves_anchored: usize,
    pub unconfirmed: usize,
}

/// Find the record that anchored `product_id` and its inclusion proof.
pub fn locate_leaf<'a>(
    records: &'a [AnchorRecord],
    product_id: &str,
) -> Result<Option<(&'a AnchorRecord, InclusionProof)>, MerkleError> {
    let leaf_hash = hash_leaf(product_id);
    for record in records {
        if let Some(proof) = record.proof_for(&leaf_hash)? {
            return Ok(Some((record, proof)));
        }
    }
    Ok(None)
}
