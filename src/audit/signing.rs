//! Audit event signatures.
//!
//! Each event's `current_hash` is signed with secp256k1 ECDSA under a named
//! key version. Verifiers look the public key up by the version recorded on
//! the event, so rotating the signing key keeps old signatures valid.

use secp256k1::{ecdsa::Signature, All, Message, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::audit::entry::AuditEvent;
use crate::error::AuditError;

fn message_for(current_hash: &str) -> Result<Message, AuditError> {
    let digest = Sha256::digest(current_hash.as_bytes());
    Message::from_digest_slice(&digest)
        .map_err(|e| AuditError::Signing(format!("Invalid message hash: {}", e)))
}

/// Env var holding the key material for a version, e.g. `AUDIT_SIGNING_KEY_V1`.
pub fn key_env_var(prefix: &str, key_version: &str) -> String {
    let suffix: String = key_version
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{}_{}", prefix, suffix)
}

pub struct AuditSigner {
    key_version: String,
    secret_key: SecretKey,
    secp: Secp256k1<All>,
}

impl AuditSigner {
    pub fn new(key_version: impl Into<String>, secret_key: SecretKey) -> Self {
        Self {
            key_version: key_version.into(),
            secret_key,
            secp: Secp256k1::new(),
        }
    }

    /// Fresh random key, mostly for tests and key ceremonies.
    pub fn generate(key_version: impl Into<String>) -> Self {
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        Self::new(key_version, secret_key)
    }

    pub fn from_hex(key_version: impl Into<String>, secret_hex: &str) -> Result<Self, AuditError> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| AuditError::Signing(format!("Invalid secret key hex: {}", e)))?;
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|e| AuditError::Signing(format!("Invalid secret key: {}", e)))?;
        Ok(Self::new(key_version, secret_key))
    }

    /// Load from `AUDIT_SIGNING_KEY_<VERSION>`.
    pub fn from_env(key_version: &str) -> Result<Self, AuditError> {
        let var = key_env_var("AUDIT_SIGNING_KEY", key_version);
        let secret_hex =
            std::env::var(&var).map_err(|_| AuditError::Signing(format!("{} is not set", var)))?;
        Self::from_hex(key_version, &secret_hex)
    }

    pub fn key_version(&self) -> &str {
        &self.key_version
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_secret_key(&self.secp, &self.secret_key)
    }

    /// Hex of the compact signature over `SHA256(current_hash)`.
    pub fn sign(&self, current_hash: &str) -> Result<String, AuditError> {
        let message = message_for(current_hash)?;
        let signature = self.secp.sign_ecdsa(&message, &self.secret_key);
        Ok(hex::encode(signature.serialize_compact()))
    }

    /// Stamp the key version into the event's hashed core, then sign the
    /// resulting `current_hash`.
    pub fn sign_event(&self, event: &mut AuditEvent) -> Result<(), AuditError> {
        event.key_version = Some(self.key_version.clone());
        event.current_hash = event.calculate_hash();
        event.signature = Some(self.sign(&event.current_hash)?);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureCheck {
    Valid,
    Invalid(String),
    UnknownKeyVersion(String),
    Unsigned,
}

impl SignatureCheck {
    /// Only a verified signature satisfies a keyring check.
    pub fn is_acceptable(&self) -> bool {
        matches!(self, SignatureCheck::Valid)
    }
}

/// Public keys by key version.
#[derive(Debug, Clone, Default)]
pub struct AuditKeyring {
    keys: BTreeMap<String, PublicKey>,
    secp: Secp256k1<All>,
}

impl AuditKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key_version: impl Into<String>, public_key: PublicKey) {
        self.keys.insert(key_version.into(), public_key);
    }

    pub fn insert_hex(
        &mut self,
        key_version: impl Into<String>,
        public_hex: &str,
    ) -> Result<(), AuditError> {
        let bytes = hex::decode(public_hex.trim())
            .map_err(|e| AuditError::Signing(format!("Invalid public key hex: {}", e)))?;
        let public_key = PublicKey::from_slice(&bytes)
            .map_err(|e| AuditError::Signing(format!("Invalid public key: {}", e)))?;
        self.insert(key_version, public_key);
        Ok(())
    }

    /// Load `AUDIT_VERIFY_KEY_<VERSION>` for each version.
    pub fn from_env<S: AsRef<str>>(versions: &[S]) -> Result<Self, AuditError> {
        let mut keyring = Self::new();
        for version in versions {
            let var = key_env_var("AUDIT_VERIFY_KEY", version.as_ref());
            let public_hex = std::env::var(&var)
                .map_err(|_| AuditError::Signing(format!("{} is not set", var)))?;
            keyring.insert_hex(version.as_ref(), &public_hex)?;
        }
        Ok(keyring)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn verify(&self, event: &AuditEvent) -> SignatureCheck {
        let Some(signature_hex) = &event.signature else {
            return SignatureCheck::Unsigned;
        };
        let version = event.key_version.clone().unwrap_or_default();
        let Some(public_key) = self.keys.get(&version) else {
            return SignatureCheck::UnknownKeyVersion(version);
        };

        let signature = match hex::decode(signature_hex)
            .ok()
            .and_then(|bytes| Signature::from_compact(&bytes).ok())
        {
            Some(signature) => signature,
            None => return SignatureCheck::Invalid("Malformed signature".to_string()),
        };
        let message = match message_for(&event.current_hash) {
            Ok(message) => message,
            Err(e) => return SignatureCheck::Invalid(e.to_string()),
        };

        match self.secp.verify_ecdsa(&message, &signature, public_key) {
            Ok(()) => SignatureCheck::Valid,
            Err(e) => SignatureCheck::Invalid(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::{NewAuditEvent, GENESIS_HASH};
    use chrono::Utc;

    fn signed_event(signer: &AuditSigner) -> AuditEvent {
        let mut event = AuditEvent::chained(
            NewAuditEvent::new("rotate", "key"),
            GENESIS_HASH.to_string(),
            Utc::now(),
        );
        signer.sign_event(&mut event).unwrap();
        event
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = AuditSigner::generate("v1");
        let event = signed_event(&signer);
        assert_eq!(event.key_version.as_deref(), Some("v1"));
        assert_eq!(event.signature.as_ref().unwrap().len(), 128);

        let mut keyring = AuditKeyring::new();
        keyring.insert("v1", signer.public_key());
        assert_eq!(keyring.verify(&event), SignatureCheck::Valid);
    }

    #[test]
    fn test_key_rotation_keeps_old_signatures() {
        let old = AuditSigner::generate("v1");
        let new = AuditSigner::generate("v2");
        let old_event = signed_event(&old);
        let new_event = signed_event(&new);

        let mut keyring = AuditKeyring::new();
        keyring.insert("v1", old.public_key());
        keyring.insert("v2", new.public_key());
        assert_eq!(keyring.verify(&old_event), SignatureCheck::Valid);
        assert_eq!(keyring.verify(&new_event), SignatureCheck::Valid);
        assert_eq!(keyring.versions().collect::<Vec<_>>(), vec!["v1", "v2"]);
    }

    #[test]
    fn test_wrong_key_or_tampered_hash_fails() {
        let signer = AuditSigner::generate("v1");
        let other = AuditSigner::generate("v1");
        let mut event = signed_event(&signer);

        let mut keyring = AuditKeyring::new();
        keyring.insert("v1", other.public_key());
        assert!(matches!(keyring.verify(&event), SignatureCheck::Invalid(_)));

        keyring.insert("v1", signer.public_key());
        event.current_hash = GENESIS_HASH.to_string();
        assert!(matches!(keyring.verify(&event), SignatureCheck::Invalid(_)));
    }

    #[test]
    fn test_unknown_version_and_unsigned() {
        let signer = AuditSigner::generate("v9");
        let event = signed_event(&signer);
        let keyring = AuditKeyring::new();
        assert_eq!(keyring.verify(&event), SignatureCheck::UnknownKeyVersion("v9".to_string()));

        let unsigned = AuditEvent::chained(
            NewAuditEvent::new("a", "r"),
            GENESIS_HASH.to_string(),
            Utc::now(),
        );
        assert_eq!(keyring.verify(&unsigned), SignatureCheck::Unsigned);
        assert!(!SignatureCheck::Unsigned.is_acceptable());
    }

    #[test]
    fn test_signing_binds_key_version_into_hash() {
        let signer = AuditSigner::generate("v1");
        let unsigned = AuditEvent::chained(
            NewAuditEvent::new("rotate", "key"),
            GENESIS_HASH.to_string(),
            Utc::now(),
        );
        let mut signed = unsigned.clone();
        signer.sign_event(&mut signed).unwrap();

        assert_ne!(signed.current_hash, unsigned.current_hash);
        assert!(signed.verify_hash());

        signed.key_version = Some("v2".to_string());
        assert!(!signed.verify_hash());
        signed.key_version = None;
        assert!(!signed.verify_hash());
    }

    #[test]
    fn test_from_hex_round_trip() {
        let secret = "0101010101010101010101010101010101010101010101010101010101010101";
        let signer = AuditSigner::from_hex("v1", secret).unwrap();
        let mut keyring = AuditKeyring::new();
        keyring
            .insert_hex("v1", &hex::encode(signer.public_key().serialize()))
            .unwrap();
        assert_eq!(keyring.verify(&signed_event(&signer)), SignatureCheck::Valid);
        assert!(AuditSigner::from_hex("v1", "zz").is_err());
        assert_eq!(key_env_var("AUDIT_SIGNING_KEY", "v1.2"), "AUDIT_SIGNING_KEY_V1_2");
    }
}
