//! Verifiable commitment pipeline for VokeTag product authentication:
//! deterministic Merkle commitments, crash-safe ledger anchoring, and a
//! hash-chained audit log.

pub mod anchor;
pub mod audit;
pub mod config;
pub mod error;
pub mod merkle;
pub mod retry;
pub mod store;

pub use error::AnchorError;
