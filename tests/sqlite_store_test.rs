mod common;

use chrono::Utc;

use voketag_anchor::anchor::{AnchorRecord, RecordSummary, TxConfirmation, TxStatus};
use voketag_anchor::audit::GENESIS_HASH;
use voketag_anchor::error::StoreError;
use voketag_anchor::merkle::{hash_leaf, root_from_leaf_hashes};
use voketag_anchor::store::{
    enqueue_identifiers, AnchorQueue, AnchorRecordStore, CasOutcome, ChainStore,
};

use common::{product_ids, setup_file_db, setup_test_db};

async fn anchored_record(db: &voketag_anchor::store::Database, count: usize) -> AnchorRecord {
    let batch = db.peek(count).await.unwrap();
    let hashes: Vec<String> = batch.iter().map(|e| e.leaf_hash.clone()).collect();
    let root = root_from_leaf_hashes(&hashes).unwrap();
    AnchorRecord::new(
        root.clone(),
        &batch,
        format!("0x{}", root),
        "polygon-amoy".to_string(),
        TxStatus::Pending,
    )
}

#[tokio::test]
async fn test_enqueue_identifiers_hashes_in_order() {
    let db = setup_test_db().await;
    let ids = product_ids(3);
    assert_eq!(enqueue_identifiers(&db, &ids).await.unwrap(), 3);

    let entries = db.peek(10).await.unwrap();
    let hashes: Vec<String> = entries.iter().map(|e| e.leaf_hash.clone()).collect();
    assert_eq!(hashes, ids.iter().map(|id| hash_leaf(id)).collect::<Vec<_>>());
    assert!(entries.windows(2).all(|w| w[0].enqueue_order < w[1].enqueue_order));
}

#[tokio::test]
async fn test_large_batch_push() {
    let db = setup_test_db().await;
    let ids = product_ids(1_234);
    enqueue_identifiers(&db, &ids).await.unwrap();
    assert_eq!(db.len().await.unwrap(), 1_234);
    assert_eq!(db.peek(1_000).await.unwrap().len(), 1_000);
}

#[tokio::test]
async fn test_record_round_trip_and_duplicate_root() {
    let db = setup_test_db().await;
    enqueue_identifiers(&db, &product_ids(4)).await.unwrap();
    let record = anchored_record(&db, 4).await;

    db.save_record(&record).await.unwrap();
    let loaded = db.find_by_root(&record.merkle_root).await.unwrap().unwrap();
    assert_eq!(loaded.id, record.id);
    assert_eq!(loaded.anchored_leaf_ids, record.anchored_leaf_ids);
    assert_eq!(loaded.submission_status, TxStatus::Pending);
    assert_eq!(loaded.last_enqueue_order, record.last_enqueue_order);
    assert_eq!(loaded.created_at, record.created_at);

    let mut duplicate = record.clone();
    duplicate.id = uuid::Uuid::new_v4();
    assert!(matches!(db.save_record(&duplicate).await, Err(StoreError::Conflict(_))));

    assert_eq!(db.latest_record().await.unwrap().unwrap().id, record.id);
    assert_eq!(db.list_records().await.unwrap().len(), 1);
    assert!(db.find_by_root(GENESIS_HASH).await.unwrap().is_none());
}

#[tokio::test]
async fn test_confirmation_upsert() {
    let db = setup_test_db().await;
    enqueue_identifiers(&db, &product_ids(2)).await.unwrap();
    let record = anchored_record(&db, 2).await;
    db.save_record(&record).await.unwrap();

    assert!(db.confirmation(&record.merkle_root).await.unwrap().is_none());

    let mut confirmation = TxConfirmation {
        merkle_root: record.merkle_root.clone(),
        transaction_id: "0xreplacement".to_string(),
        status: TxStatus::Pending,
        updated_at: Utc::now(),
    };
    db.upsert_confirmation(&confirmation).await.unwrap();

    let pending = db.unconfirmed_records(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].merkle_root, record.merkle_root);
    assert_eq!(pending[0].transaction_id, "0xreplacement");

    confirmation.status = TxStatus::Confirmed {
        block_number: 77,
        gas_used: 50_000,
    };
    db.upsert_confirmation(&confirmation).await.unwrap();

    let stored = db.confirmation(&record.merkle_root).await.unwrap().unwrap();
    assert_eq!(stored.status.block_number(), Some(77));
    assert!(db.unconfirmed_records(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_record_summary_and_unconfirmed_order() {
    let db = setup_test_db().await;
    assert_eq!(db.record_summary().await.unwrap(), RecordSummary::default());

    enqueue_identifiers(&db, &product_ids(6)).await.unwrap();
    let statuses = [
        TxStatus::Pending,
        TxStatus::Confirmed {
            block_number: 9,
            gas_used: 21_000,
        },
        TxStatus::Pending,
    ];
    let mut roots = Vec::new();
    for status in statuses {
        let mut record = anchored_record(&db, 2).await;
        record.submission_status = status;
        db.save_record(&record).await.unwrap();
        db.trim(2).await.unwrap();
        roots.push(record.merkle_root);
    }

    let pending: Vec<String> = db
        .unconfirmed_records(10)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.merkle_root)
        .collect();
    assert_eq!(pending, vec![roots[0].clone(), roots[2].clone()]);
    assert_eq!(db.unconfirmed_records(1).await.unwrap().len(), 1);

    assert_eq!(
        db.record_summary().await.unwrap(),
        RecordSummary {
            records: 3,
            leaves_anchored: 6,
            unconfirmed: 2,
        }
    );
}

#[tokio::test]
async fn test_queue_and_chain_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("anchor.db");

    {
        let db = setup_file_db(&path).await;
        enqueue_identifiers(&db, &product_ids(5)).await.unwrap();
        db.trim(2).await.unwrap();
        assert_eq!(db.cas_and_append(GENESIS_HASH, "h1", "{}").await.unwrap(), CasOutcome::Applied);
    }

    let db = setup_file_db(&path).await;
    assert_eq!(db.len().await.unwrap(), 3);
    assert_eq!(db.peek(1).await.unwrap()[0].leaf_hash, hash_leaf("VT-PRODUCT-00002"));
    assert_eq!(db.head().await.unwrap(), "h1");
    assert_eq!(db.event_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_failed_cas_appends_nothing() {
    let db = setup_test_db().await;
    db.cas_and_append(GENESIS_HASH, "h1", r#"{"n":1}"#).await.unwrap();

    let outcome = db.cas_and_append("stale", "h2", r#"{"n":2}"#).await.unwrap();
    assert_eq!(outcome, CasOutcome::Mismatch { actual: "h1".to_string() });
    assert_eq!(db.event_count().await.unwrap(), 1);
    assert_eq!(db.head().await.unwrap(), "h1");
}
