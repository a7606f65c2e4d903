//! SQLite-backed durable store.
//!
//! Shared by every process pointed at the same database file. The audit
//! compare-and-swap runs inside one transaction whose first statement is the
//! conditional pointer update, so SQLite's write lock is taken before any
//! read and concurrent appenders serialize on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::anchor::ledger::TxStatus;
use crate::anchor::record::{AnchorRecord, PendingAnchor, RecordSummary, TxConfirmation};
use crate::error::StoreError;
use crate::store::{AnchorQueue, AnchorRecordStore, CasOutcome, ChainStore, QueueEntry};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to a database URL such as `sqlite://anchor.db`.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        info!("Connected to SQLite database: {}", database_url);
        Ok(Self { pool })
    }

    /// Open (creating if needed) a database file.
    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection that never expires,
    /// since each new connection would see an empty database.
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(include_str!("../../migrations/001_anchor_queue.sql"))
            .execute(&self.pool)
            .await?;

        sqlx::raw_sql(include_str!("../../migrations/002_audit_chain.sql"))
            .execute(&self.pool)
            .await?;

        debug!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn record_from_row(row: &SqliteRow) -> Result<AnchorRecord, StoreError> {
        let id: String = row.try_get("id")?;
        let leaves: String = row.try_get("anchored_leaf_ids")?;
        let status: String = row.try_get("submission_status")?;
        let created_at: String = row.try_get("created_at")?;
        let first: i64 = row.try_get("first_enqueue_order")?;
        let last: i64 = row.try_get("last_enqueue_order")?;

        Ok(AnchorRecord {
            id: Uuid::parse_str(&id)
                .map_err(|e| StoreError::Corrupt(format!("Bad record id {}: {}", id, e)))?,
            merkle_root: row.try_get("merkle_root")?,
            anchored_leaf_ids: serde_json::from_str(&leaves)?,
            first_enqueue_order: first as u64,
            last_enqueue_order: last as u64,
            transaction_id: row.try_get("transaction_id")?,
            network: row.try_get("network")?,
            submission_status: serde_json::from_str(&status)?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("Bad timestamp {}: {}", value, e)))
}

#[async_trait]
impl AnchorQueue for Database {
    async fn push(&self, leaf_hash: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("INSERT INTO anchor_queue (leaf_hash) VALUES (?)")
            .bind(leaf_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid() as u64)
    }

    async fn push_many(&self, leaf_hashes: &[String]) -> Result<(), StoreError> {
        if leaf_hashes.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        // SQLite caps bound parameters per statement
        for chunk in leaf_hashes.chunks(500) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO anchor_queue (leaf_hash) ");
            builder.push_values(chunk, |mut b, hash| {
                b.push_bind(hash);
            });
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn peek(&self, limit: usize) -> Result<Vec<QueueEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT enqueue_order, leaf_hash FROM anchor_queue ORDER BY enqueue_order ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<QueueEntry, StoreError> {
                let order: i64 = row.try_get("enqueue_order")?;
                Ok(QueueEntry {
                    leaf_hash: row.try_get("leaf_hash")?,
                    enqueue_order: order as u64,
                })
            })
            .collect()
    }

    async fn trim(&self, count: usize) -> Result<usize, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM anchor_queue
            WHERE enqueue_order IN (
                SELECT enqueue_order FROM anchor_queue ORDER BY enqueue_order ASC LIMIT ?
            )
            "#,
        )
        .bind(count as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM anchor_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[async_trait]
impl AnchorRecordStore for Database {
    async fn save_record(&self, record: &AnchorRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO anchor_records (
                id, merkle_root, anchored_leaf_ids, leaf_count, first_enqueue_order,
                last_enqueue_order, transaction_id, network, submission_status, confirmed,
                created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.merkle_root)
        .bind(serde_json::to_string(&record.anchored_leaf_ids)?)
        .bind(record.leaf_count() as i64)
        .bind(record.first_enqueue_order as i64)
        .bind(record.last_enqueue_order as i64)
        .bind(&record.transaction_id)
        .bind(&record.network)
        .bind(serde_json::to_string(&record.submission_status)?)
        .bind(record.submission_status.is_confirmed())
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_root(&self, merkle_root: &str) -> Result<Option<AnchorRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM anchor_records WHERE merkle_root = ?")
            .bind(merkle_root)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn latest_record(&self) -> Result<Option<AnchorRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM anchor_records ORDER BY last_enqueue_order DESC LIMIT 1",
        )
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn list_records(&self) -> Result<Vec<AnchorRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM anchor_records ORDER BY first_enqueue_order ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::record_from_row).collect()
    }

    async fn unconfirmed_records(&self, limit: usize) -> Result<Vec<PendingAnchor>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT r.merkle_root, COALESCE(c.transaction_id, r.transaction_id) AS transaction_id
            FROM anchor_records r
            LEFT JOIN anchor_confirmations c ON c.merkle_root = r.merkle_root
            WHERE r.confirmed = 0 AND COALESCE(c.confirmed, 0) = 0
            ORDER BY r.first_enqueue_order ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<PendingAnchor, StoreError> {
                Ok(PendingAnchor {
                    merkle_root: row.try_get("merkle_root")?,
                    transaction_id: row.try_get("transaction_id")?,
                })
            })
            .collect()
    }

    async fn record_summary(&self) -> Result<RecordSummary, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS records,
                COALESCE(SUM(r.leaf_count), 0) AS leaves_anchored,
                COALESCE(SUM(r.confirmed = 0 AND COALESCE(c.confirmed, 0) = 0), 0) AS unconfirmed
            FROM anchor_records r
            LEFT JOIN anchor_confirmations c ON c.merkle_root = r.merkle_root
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let records: i64 = row.try_get("records")?;
        let leaves_anchored: i64 = row.try_get("leaves_anchored")?;
        let unconfirmed: i64 = row.try_get("unconfirmed")?;
        Ok(RecordSummary {
            records: records as usize,
            leaves_anchored: leaves_anchored as usize,
            unconfirmed: unconfirmed as usize,
        })
    }

    async fn upsert_confirmation(&self, confirmation: &TxConfirmation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO anchor_confirmations (
                merkle_root, transaction_id, status, confirmed, updated_at
            )
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (merkle_root) DO UPDATE SET
                transaction_id = excluded.transaction_id,
                status = excluded.status,
                confirmed = excluded.confirmed,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&confirmation.merkle_root)
        .bind(&confirmation.transaction_id)
        .bind(serde_json::to_string(&confirmation.status)?)
        .bind(confirmation.status.is_confirmed())
        .bind(confirmation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn confirmation(&self, merkle_root: &str) -> Result<Option<TxConfirmation>, StoreError> {
        let row = sqlx::query("SELECT * FROM anchor_confirmations WHERE merkle_root = ?")
            .bind(merkle_root)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let status: String = row.try_get("status")?;
                let updated_at: String = row.try_get("updated_at")?;
                Ok(Some(TxConfirmation {
                    merkle_root: row.try_get("merkle_root")?,
                    transaction_id: row.try_get("transaction_id")?,
                    status: serde_json::from_str::<TxStatus>(&status)?,
                    updated_at: parse_timestamp(&updated_at)?,
                }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ChainStore for Database {
    async fn head(&self) -> Result<String, StoreError> {
        let head: String = sqlx::query_scalar("SELECT head FROM audit_chain_pointer WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(head)
    }

    async fn cas_and_append(
        &self,
        expected_prev: &str,
        new_head: &str,
        event_json: &str,
    ) -> Result<CasOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let swapped =
            sqlx::query("UPDATE audit_chain_pointer SET head = ? WHERE id = 1 AND head = ?")
            .bind(new_head)
            .bind(expected_prev)
            .execute(&mut *tx)
            .await?;

        if swapped.rows_affected() == 0 {
            let actual: String =
                sqlx::query_scalar("SELECT head FROM audit_chain_pointer WHERE id = 1")
                .fetch_one(&mut *tx)
                .await?;
            tx.rollback().await?;
            return Ok(CasOutcome::Mismatch { actual });
        }

        sqlx::query(
            "INSERT INTO audit_events (previous_hash, current_hash, event_json) VALUES (?, ?, ?)",
        )
            .bind(expected_prev)
            .bind(new_head)
            .bind(event_json)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(CasOutcome::Applied)
    }

    async fn load_events(&self) -> Result<Vec<String>, StoreError> {
        let events: Vec<String> =
            sqlx::query_scalar("SELECT event_json FROM audit_events ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(events)
    }

    async fn event_count(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
