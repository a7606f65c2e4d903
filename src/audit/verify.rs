//! Audit Chain Verification
//!
//! Walks the chain from the genesis hash, stopping at the first broken link,
//! then checks the final hash against the live chain pointer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::audit::entry::{AuditEvent, GENESIS_HASH};
use crate::audit::signing::{AuditKeyring, SignatureCheck};
use crate::error::AuditError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainFailure {
    PreviousHashMismatch { expected: String, found: String },
    PayloadHashMismatch { expected: String, found: String },
    CurrentHashMismatch { expected: String, found: String },
    Signature { detail: String },
    HeadMismatch { computed: String, live: String },
    Unparseable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub is_valid: bool,
    /// Events that passed every check.
    pub checked: usize,
    /// Index of the first bad event. `None` for a head mismatch.
    pub first_bad_index: Option<usize>,
    pub failure: Option<ChainFailure>,
    /// Running hash after the last good event.
    pub final_hash: String,
}

impl ChainVerification {
    fn broken(index: usize, running: String, failure: ChainFailure) -> Self {
        warn!("Audit chain broken at event {}: {:?}", index, failure);
        Self {
            is_valid: false,
            checked: index,
            first_bad_index: Some(index),
            failure: Some(failure),
            final_hash: running,
        }
    }
}

fn check_event(
    event: &AuditEvent,
    running: &str,
    keyring: Option<&AuditKeyring>,
) -> Option<ChainFailure> {
    if event.previous_hash != running {
        return Some(ChainFailure::PreviousHashMismatch {
            expected: running.to_string(),
            found: event.previous_hash.clone(),
        });
    }

    let payload_hash = event.calculate_payload_hash();
    if event.payload_hash != payload_hash {
        return Some(ChainFailure::PayloadHashMismatch {
            expected: payload_hash,
            found: event.payload_hash.clone(),
        });
    }

    let current_hash = event.calculate_hash();
    if event.current_hash != current_hash {
        return Some(ChainFailure::CurrentHashMismatch {
            expected: current_hash,
            found: event.current_hash.clone(),
        });
    }

    // key_version is hashed, so a stripped signature shows up here
    if event.signature.is_some() != event.key_version.is_some() {
        return Some(ChainFailure::Signature {
            detail: "Signature and key version must be present together".to_string(),
        });
    }

    let keyring = keyring?;
    match keyring.verify(event) {
        SignatureCheck::Valid => None,
        SignatureCheck::Invalid(detail) => Some(ChainFailure::Signature { detail }),
        SignatureCheck::UnknownKeyVersion(version) => Some(ChainFailure::Signature {
            detail: format!("No public key for key version '{}'", version),
        }),
        SignatureCheck::Unsigned => Some(ChainFailure::Signature {
            detail: "Event is unsigned".to_string(),
        }),
    }
}

fn finish(checked: usize, running: String, live_head: Option<&str>) -> ChainVerification {
    if let Some(live) = live_head {
        if live != running {
            warn!("Audit chain head mismatch: computed {}, live {}", running, live);
            return ChainVerification {
                is_valid: false,
                checked,
                first_bad_index: None,
                failure: Some(ChainFailure::HeadMismatch {
                    computed: running.clone(),
                    live: live.to_string(),
                }),
                final_hash: running,
            };
        }
    }

    info!("Audit chain verification successful: {} events", checked);
    ChainVerification {
        is_valid: true,
        checked,
        first_bad_index: None,
        failure: None,
        final_hash: running,
    }
}

fn verify_events(
    events: &[AuditEvent],
    live_head: Option<&str>,
    keyring: Option<&AuditKeyring>,
) -> ChainVerification {
    let mut running = GENESIS_HASH.to_string();
    for (i, event) in events.iter().enumerate() {
        if let Some(failure) = check_event(event, &running, keyring) {
            return ChainVerification::broken(i, running, failure);
        }
        running = event.current_hash.clone();
    }
    finish(events.len(), running, live_head)
}

/// Verify the hash links of `events`, and the final hash against `live_head`
/// when given.
pub fn verify_chain(events: &[AuditEvent], live_head: Option<&str>) -> ChainVerification {
    verify_events(events, live_head, None)
}

/// As [`verify_chain`], also requiring every event to carry a valid
/// signature under the key for its recorded key version.
pub fn verify_chain_with_keys(
    events: &[AuditEvent],
    live_head: Option<&str>,
    keyring: &AuditKeyring,
) -> ChainVerification {
    verify_events(events, live_head, Some(keyring))
}

/// Verify events as stored, so an unparseable row is reported at its index.
pub fn verify_serialized_chain(
    raw_events: &[String],
    live_head: Option<&str>,
    keyring: Option<&AuditKeyring>,
) -> ChainVerification {
    let mut running = GENESIS_HASH.to_string();
    for (i, raw) in raw_events.iter().enumerate() {
        let event: AuditEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(e) => {
                return ChainVerification::broken(
                    i,
                    running,
                    ChainFailure::Unparseable { reason: e.to_string() },
                )
            }
        };
        if let Some(failure) = check_event(&event, &running, keyring) {
            return ChainVerification::broken(i, running, failure);
        }
        running = event.current_hash;
    }
    finish(raw_events.len(), running, live_head)
}

/// Indices of events whose own hashes no longer recompute, independent of
/// their links.
pub fn find_tampered(events: &[AuditEvent]) -> Vec<usize> {
    events
        .iter()
        .enumerate()
        .filter(|(_, e)| !e.verify_payload_hash() || !e.verify_hash())
        .map(|(i, _)| i)
        .collect()
}

#[derive(Serialize)]
struct ChainExport<'a> {
    exported_at: DateTime<Utc>,
    event_count: usize,
    verification: &'a ChainVerification,
    events: &'a [AuditEvent],
}

/// Write events and their verification verdict as pretty JSON.
pub fn export_chain(
    events: &[AuditEvent],
    verification: &ChainVerification,
    path: impl AsRef<Path>,
) -> Result<(), AuditError> {
    let export = ChainExport {
        exported_at: Utc::now(),
        event_count: events.len(),
        verification,
        events,
    };
    let json = serde_json::to_string_pretty(&export)
        .map_err(|e| AuditError::Export(format!("Failed to serialize export: {}", e)))?;
    std::fs::write(path.as_ref(), json).map_err(|e| {
        AuditError::Export(format!("Failed to write {}: {}", path.as_ref().display(), e))
    })?;

    debug!("Exported {} audit events to {}", events.len(), path.as_ref().display());
    Ok(())
}
