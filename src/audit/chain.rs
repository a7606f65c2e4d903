//! Audit Chain
//!
//! Appends events to the single global hash chain held by a shared store.
//! Every append is one compare-and-swap on the chain pointer combined with
//! the event insert; a writer that loses the race re-reads the head and
//! tries again, up to the retry policy's attempt budget.

use chrono::Utc;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::audit::entry::{AuditEvent, NewAuditEvent};
use crate::audit::signing::{AuditKeyring, AuditSigner};
use crate::audit::verify::{verify_serialized_chain, ChainVerification};
use crate::error::{AuditError, Retryable, StoreError};
use crate::retry::RetryPolicy;
use crate::store::{CasOutcome, ChainStore};

pub struct AuditChain {
    store: Arc<dyn ChainStore>,
    signer: Option<AuditSigner>,
    retry_policy: RetryPolicy,
}

impl AuditChain {
    pub fn new(store: Arc<dyn ChainStore>) -> Self {
        Self {
            store,
            signer: None,
            retry_policy: RetryPolicy::audit_append(),
        }
    }

    #[must_use]
    pub fn with_signer(mut self, signer: AuditSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Append an event after the current head.
    ///
    /// Returns `AuditError::Dropped` once the attempt budget is spent on
    /// contention or transient store errors. The chain itself is never left
    /// half-written.
    pub async fn append(&self, fields: NewAuditEvent) -> Result<AuditEvent, AuditError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.try_append(&fields).await {
                Ok(Some(event)) => {
                    debug!(
                        action = %event.action,
                        current_hash = %event.current_hash,
                        attempt,
                        "Audit event appended"
                    );
                    return Ok(event);
                }
                Ok(None) => {}
                Err(AuditError::Store(e)) if e.is_retryable() => {
                    warn!(attempt, "Audit store unavailable: {}", e);
                }
                Err(e) => return Err(e),
            }

            if attempt < max_attempts {
                sleep(self.retry_policy.delay_for(attempt)).await;
            }
        }

        error!(
            severity = "CRITICAL",
            action = %fields.action,
            resource_type = %fields.resource_type,
            request_id = ?fields.request_id,
            attempts = max_attempts,
            "Audit event dropped after exhausting append attempts"
        );
        Err(AuditError::Dropped {
            attempts: max_attempts,
        })
    }

    /// One read-head, build, compare-and-swap round. `None` when another
    /// writer moved the head first.
    async fn try_append(&self, fields: &NewAuditEvent) -> Result<Option<AuditEvent>, AuditError> {
        let previous_hash = self.store.head().await?;
        let mut event = AuditEvent::chained(fields.clone(), previous_hash, Utc::now());
        if let Some(signer) = &self.signer {
            signer.sign_event(&mut event)?;
        }
        let event_json = serde_json::to_string(&event).map_err(StoreError::from)?;

        match self
            .store
            .cas_and_append(&event.previous_hash, &event.current_hash, &event_json)
            .await?
        {
            CasOutcome::Applied => Ok(Some(event)),
            CasOutcome::Mismatch { actual } => {
                debug!(
                    expected = %event.previous_hash,
                    actual = %actual,
                    "Audit chain head moved, retrying"
                );
                Ok(None)
            }
        }
    }

    pub async fn head(&self) -> Result<String, AuditError> {
        Ok(self.store.head().await?)
    }

    pub async fn len(&self) -> Result<usize, AuditError> {
        Ok(self.store.event_count().await?)
    }

    /// All events in chain order.
    pub async fn events(&self) -> Result<Vec<AuditEvent>, AuditError> {
        let raw = self.store.load_events().await?;
        raw.iter()
            .enumerate()
            .map(|(i, json)| {
                serde_json::from_str(json).map_err(|e| {
                    AuditError::Store(StoreError::Corrupt(format!("Audit event {}: {}", i, e)))
                })
            })
            .collect()
    }

    /// Verify the stored chain against the live pointer.
    pub async fn verify(
        &self,
        keyring: Option<&AuditKeyring>,
    ) -> Result<ChainVerification, AuditError> {
        let raw = self.store.load_events().await?;
        let head = self.store.head().await?;
        Ok(verify_serialized_chain(&raw, Some(&head), keyring))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::GENESIS_HASH;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_append_links_events() {
        let chain = AuditChain::new(Arc::new(MemoryStore::new()));
        let first = chain.append(NewAuditEvent::new("create", "product")).await.unwrap();
        let second = chain.append(NewAuditEvent::new("update", "product")).await.unwrap();

        assert_eq!(first.previous_hash, GENESIS_HASH);
        assert_eq!(second.previous_hash, first.current_hash);
        assert_eq!(chain.head().await.unwrap(), second.current_hash);
        assert_eq!(chain.len().await.unwrap(), 2);
        assert_eq!(chain.events().await.unwrap(), vec![first, second]);
        assert!(chain.verify(None).await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_signed_append() {
        let signer = AuditSigner::generate("v1");
        let mut keyring = AuditKeyring::new();
        keyring.insert("v1", signer.public_key());

        let chain = AuditChain::new(Arc::new(MemoryStore::new())).with_signer(signer);
        let event = chain
            .append(NewAuditEvent::new("login", "session").user("admin"))
            .await
            .unwrap();
        assert_eq!(event.key_version.as_deref(), Some("v1"));
        assert!(chain.verify(Some(&keyring)).await.unwrap().is_valid);
    }
}
