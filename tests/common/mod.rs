#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use voketag_anchor::anchor::{Ledger, Submission, TxStatus};
use voketag_anchor::audit::GENESIS_HASH;
use voketag_anchor::error::{LedgerError, StoreError};
use voketag_anchor::store::{CasOutcome, ChainStore, Database};

/// Setup an in-memory SQLite database for testing
pub async fn setup_test_db() -> Database {
    let db = Database::new_in_memory().await.expect("Failed to create test database");
    db.run_migrations().await.expect("Failed to run migrations");
    db
}

/// Open a migrated SQLite database file
pub async fn setup_file_db(path: &Path) -> Database {
    let db = Database::open_file(path).await.expect("Failed to open test database");
    db.run_migrations().await.expect("Failed to run migrations");
    db
}

pub fn product_ids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("VT-PRODUCT-{:05}", i)).collect()
}

/// Ledger that plays back scripted submission results, then confirms.
pub struct ScriptedLedger {
    script: Mutex<VecDeque<Result<Submission, LedgerError>>>,
    submissions: AtomicUsize,
    status_calls: AtomicUsize,
    statuses: Mutex<VecDeque<TxStatus>>,
}

impl ScriptedLedger {
    pub fn new(script: Vec<Result<Submission, LedgerError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            submissions: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            statuses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn failing(error: LedgerError, times: usize) -> Self {
        Self::new(vec![Err(error); times])
    }

    pub fn with_statuses(self, statuses: Vec<TxStatus>) -> Self {
        *self.statuses.lock().unwrap() = statuses.into();
        self
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn status_call_count(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ledger for ScriptedLedger {
    fn network(&self) -> &str {
        "scripted"
    }

    async fn submit(&self, merkle_root: &str) -> Result<Submission, LedgerError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(Submission {
                transaction_id: format!("0x{}-{}", &merkle_root[..16], n),
                status: TxStatus::Confirmed {
                    block_number: 500 + n as u64,
                    gas_used: 42_000,
                },
            })
        })
    }

    async fn status(&self, _transaction_id: &str) -> Result<TxStatus, LedgerError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TxStatus::Confirmed {
                block_number: 900,
                gas_used: 42_000,
            }))
    }
}

/// Chain store whose pointer always moves before the swap lands.
#[derive(Default)]
pub struct ContendedChainStore {
    pub cas_calls: AtomicUsize,
}

#[async_trait]
impl ChainStore for ContendedChainStore {
    async fn head(&self) -> Result<String, StoreError> {
        Ok(GENESIS_HASH.to_string())
    }

    async fn cas_and_append(
        &self,
        _expected: &str,
        _new_head: &str,
        _json: &str,
    ) -> Result<CasOutcome, StoreError> {
        let n = self.cas_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CasOutcome::Mismatch {
            actual: format!("{:064x}", n + 1),
        })
    }

    async fn load_events(&self) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }

    async fn event_count(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}
