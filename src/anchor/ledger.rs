//! Ledger Client
//!
//! The external ledger is an opaque collaborator: it takes a Merkle root and
//! hands back a transaction identifier whose status may settle later.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::LedgerError;

/// Status of an anchoring transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed { block_number: u64, gas_used: u64 },
    Failed { reason: String },
}

impl TxStatus {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, TxStatus::Confirmed { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, TxStatus::Pending)
    }

    pub fn block_number(&self) -> Option<u64> {
        match self {
            TxStatus::Confirmed { block_number, .. } => Some(*block_number),
            _ => None,
        }
    }
}

/// Ledger's answer to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub transaction_id: String,
    pub status: TxStatus,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Network label recorded alongside each anchor.
    fn network(&self) -> &str;

    async fn submit(&self, merkle_root: &str) -> Result<Submission, LedgerError>;

    async fn status(&self, transaction_id: &str) -> Result<TxStatus, LedgerError>;
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    merkle_root: &'a str,
    network: &'a str,
}

/// JSON-over-HTTP ledger gateway.
pub struct HttpLedgerClient {
    endpoint: String,
    network: String,
    http_client: Client,
}

impl HttpLedgerClient {
    pub fn new(endpoint: String, network: String, timeout: Duration) -> Result<Self, LedgerError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                LedgerError::InvalidResponse(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            network,
            http_client,
        })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, LedgerError> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(LedgerError::Transient(format!("Ledger returned {}", status)));
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected(format!("Ledger returned {}: {}", status, body)));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))
    }
}

fn map_request_error(err: reqwest::Error) -> LedgerError {
    if err.is_timeout() {
        LedgerError::Timeout(err.to_string())
    } else if err.is_decode() {
        LedgerError::InvalidResponse(err.to_string())
    } else {
        LedgerError::Transient(err.to_string())
    }
}

#[async_trait]
impl Ledger for HttpLedgerClient {
    fn network(&self) -> &str {
        &self.network
    }

    async fn submit(&self, merkle_root: &str) -> Result<Submission, LedgerError> {
        debug!(merkle_root = %merkle_root, "Submitting root to ledger at {}", self.endpoint);

        let response = self
            .http_client
            .post(format!("{}/v1/anchors", self.endpoint))
            .json(&SubmitRequest {
                merkle_root,
                network: &self.network,
            })
            .send()
            .await
            .map_err(map_request_error)?;

        let submission: Submission = Self::read_json(response).await?;
        if submission.transaction_id.is_empty() {
            return Err(LedgerError::InvalidResponse("Empty transaction id".to_string()));
        }

        info!(
            merkle_root = %merkle_root,
            transaction_id = %submission.transaction_id,
            "Ledger accepted anchor"
        );
        Ok(submission)
    }

    async fn status(&self, transaction_id: &str) -> Result<TxStatus, LedgerError> {
        let response = self
            .http_client
            .get(format!("{}/v1/transactions/{}", self.endpoint, transaction_id))
            .send()
            .await
            .map_err(map_request_error)?;

        Self::read_json(response).await
    }
}

/// In-process ledger used when no endpoint is configured.
pub struct MockLedger {
    network: String,
    settle_later: bool,
    submissions: AtomicUsize,
}

impl MockLedger {
    /// Confirms every submission immediately.
    pub fn new() -> Self {
        Self {
            network: "mock".to_string(),
            settle_later: false,
            submissions: AtomicUsize::new(0),
        }
    }

    /// Reports submissions as pending; `status` then confirms them.
    pub fn pending() -> Self {
        Self {
            settle_later: true,
            ..Self::new()
        }
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    fn confirmed(&self, sequence: usize) -> TxStatus {
        TxStatus::Confirmed {
            block_number: 1_000_000 + sequence as u64,
            gas_used: 50_000,
        }
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for MockLedger {
    fn network(&self) -> &str {
        &self.network
    }

    async fn submit(&self, merkle_root: &str) -> Result<Submission, LedgerError> {
        let sequence = self.submissions.fetch_add(1, Ordering::SeqCst);
        let status = if self.settle_later {
            TxStatus::Pending
        } else {
            self.confirmed(sequence)
        };
        Ok(Submission {
            transaction_id: format!("0x{}", merkle_root),
            status,
        })
    }

    async fn status(&self, _transaction_id: &str) -> Result<TxStatus, LedgerError> {
        Ok(self.confirmed(self.submission_count()))
    }
}
