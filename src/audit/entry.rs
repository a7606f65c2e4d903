//! Audit Event
//!
//! One link of the hash chain. `payload_hash` covers the canonical payload,
//! `current_hash` covers the previous link plus the canonical core fields.
//! Signatures sit outside the hashed fields.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Sentinel preceding the first event of every chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Fields supplied by the caller of `AuditChain::append`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewAuditEvent {
    pub user_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub payload: BTreeMap<String, Value>,
    pub request_id: Option<String>,
    pub ip_address: Option<String>,
}

impl NewAuditEvent {
    pub fn new(action: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            ..Default::default()
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub user_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub payload: BTreeMap<String, Value>,
    pub request_id: Option<String>,
    pub ip_address: Option<String>,
    pub previous_hash: String,
    pub payload_hash: String,
    pub current_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_version: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Link `fields` after `previous_hash`. The timestamp is truncated to
    /// microseconds so it survives storage round trips unchanged.
    pub fn chained(fields: NewAuditEvent, previous_hash: String, timestamp: DateTime<Utc>) -> Self {
        let mut event = Self {
            user_id: fields.user_id,
            action: fields.action,
            resource_type: fields.resource_type,
            resource_id: fields.resource_id,
            payload: fields.payload,
            request_id: fields.request_id,
            ip_address: fields.ip_address,
            previous_hash,
            payload_hash: String::new(),
            current_hash: String::new(),
            signature: None,
            key_version: None,
            timestamp: timestamp.trunc_subsecs(6),
        };
        event.payload_hash = event.calculate_payload_hash();
        event.current_hash = event.calculate_hash();
        event
    }

    pub fn timestamp_string(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn calculate_payload_hash(&self) -> String {
        let payload: Map<String, Value> = self.payload.clone().into_iter().collect();
        sha256_hex(&canonical_json(&Value::Object(payload)))
    }

    /// Canonical form of the hashed core fields. A signed event's key
    /// version is part of the core, so it cannot be stripped or swapped
    /// without breaking `current_hash`.
    pub fn canonical_core(&self) -> String {
        let mut core = json!({
            "user_id": self.user_id,
            "action": self.action,
            "resource_type": self.resource_type,
            "resource_id": self.resource_id,
            "payload_hash": self.payload_hash,
            "request_id": self.request_id,
            "ip_address": self.ip_address,
            "timestamp": self.timestamp_string(),
        });
        if let (Some(version), Value::Object(map)) = (&self.key_version, &mut core) {
            map.insert("key_version".to_string(), Value::String(version.clone()));
        }
        canonical_json(&core)
    }

    /// `H(previous_hash || canonical(core))`
    pub fn calculate_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.previous_hash.as_bytes());
        hasher.update(self.canonical_core().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn verify_payload_hash(&self) -> bool {
        self.payload_hash == self.calculate_payload_hash()
    }

    pub fn verify_hash(&self) -> bool {
        self.current_hash == self.calculate_hash()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} {}/{} by {} at {}",
            self.action,
            self.resource_type,
            self.resource_id.as_deref().unwrap_or("-"),
            self.user_id.as_deref().unwrap_or("system"),
            self.timestamp_string()
        )
    }
}

fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
