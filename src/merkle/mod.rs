//! Merkle Commitment Engine
//!
//! Deterministic SHA-256 Merkle trees over product identifiers. Every
//! service that commits or verifies batches must produce byte-identical
//! roots, so the pairing rule lives here and nowhere else.

pub mod proof;
pub mod tree;

pub use proof::{
    generate_proof, proof_from_leaf_hashes, verify_proof, verify_proof_from_hash, InclusionProof,
    Position, ProofStep,
};
pub use tree::{
    build_root, build_tree, hash_leaf, hash_pair, is_valid_hash, root_from_leaf_hashes,
    MerkleNode, HASH_HEX_LEN, PAIR_SEPARATOR,
};
