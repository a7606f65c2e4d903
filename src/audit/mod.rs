//! Audit Log System
//!
//! Append-only, hash-chained log of administrative actions, persisted
//! through an atomic compare-and-swap so concurrent writers and restarted
//! processes extend one chain.

pub mod chain;
pub mod entry;
pub mod signing;
pub mod verify;

pub use chain::AuditChain;
pub use entry::{canonical_json, AuditEvent, NewAuditEvent, GENESIS_HASH};
pub use signing::{AuditKeyring, AuditSigner, SignatureCheck};
pub use verify::{
    export_chain, find_tampered, verify_chain, verify_chain_with_keys, verify_serialized_chain,
    ChainFailure,
    ChainVerification,
};
