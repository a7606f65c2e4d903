//! Merkle Tree Construction
//!
//! Leaves are hashed as `SHA256(utf8(value))`, internal nodes as
//! `SHA256(left "|" right)`. An odd node at the end of a level is paired
//! with itself, and a single leaf is self-paired so the root always comes
//! out of at least one pairing round.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::MerkleError;

/// Length of a hex-encoded SHA-256 digest.
pub const HASH_HEX_LEN: usize = 64;

/// Separator between the two children of an internal node. Without it
/// `H("a" || "bc") == H("ab" || "c")`.
pub const PAIR_SEPARATOR: &str = "|";

/// Merkle tree node, suitable for rendering a batch tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleNode {
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leaf_value: Option<String>,
    pub left: Option<Box<MerkleNode>>,
    pub right: Option<Box<MerkleNode>>,
}

impl MerkleNode {
    fn leaf(hash: String, leaf_value: String) -> Self {
        Self {
            hash,
            leaf_value: Some(leaf_value),
            left: None,
            right: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

/// Hash a leaf identifier (e.g. a product ID).
pub fn hash_leaf(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Hash two child digests into their parent.
pub fn hash_pair(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(PAIR_SEPARATOR.as_bytes());
    hasher.update(right.as_bytes());
    hex::encode(hasher.finalize())
}

/// True for a 64-char lowercase hex digest, the only form `hash_leaf` emits.
pub fn is_valid_hash(value: &str) -> bool {
    value.len() == HASH_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

pub(crate) fn validate_leaf_hashes<S: AsRef<str>>(hashes: &[S]) -> Result<(), MerkleError> {
    match hashes.iter().find(|h| !is_valid_hash(h.as_ref())) {
        Some(bad) => Err(MerkleError::MalformedHash(bad.as_ref().to_string())),
        None => Ok(()),
    }
}

fn next_level(level: &[String]) -> Vec<String> {
    level
        .chunks(2)
        .map(|pair| {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            hash_pair(left, right)
        })
        .collect()
}

/// All levels from the leaf hashes (index 0) up to the root level.
/// Callers guarantee `leaf_hashes` is non-empty.
pub(crate) fn build_levels(leaf_hashes: Vec<String>) -> Vec<Vec<String>> {
    let mut levels = vec![leaf_hashes];
    loop {
        let current = &levels[levels.len() - 1];
        if current.len() == 1 && levels.len() > 1 {
            break;
        }
        let next = next_level(current);
        levels.push(next);
    }
    levels
}

fn root_of(levels: &[Vec<String>]) -> String {
    levels
        .last()
        .and_then(|level| level.first())
        .cloned()
        .unwrap_or_default()
}

/// Root over already-hashed leaves, as held by the anchor queue.
pub fn root_from_leaf_hashes<S: AsRef<str>>(leaf_hashes: &[S]) -> Result<String, MerkleError> {
    if leaf_hashes.is_empty() {
        return Err(MerkleError::EmptyInput);
    }
    validate_leaf_hashes(leaf_hashes)?;

    let hashes = leaf_hashes.iter().map(|h| h.as_ref().to_string()).collect();
    let root = root_of(&build_levels(hashes));
    debug!(leaves = leaf_hashes.len(), merkle_root = %root, "Computed Merkle root");
    Ok(root)
}

/// Root over raw leaf identifiers.
pub fn build_root<S: AsRef<str>>(leaves: &[S]) -> Result<String, MerkleError> {
    if leaves.is_empty() {
        return Err(MerkleError::EmptyInput);
    }
    let hashes = leaves.iter().map(|l| hash_leaf(l.as_ref())).collect();
    Ok(root_of(&build_levels(hashes)))
}

/// Full tree over raw leaf identifiers. Duplicated odd nodes appear as
/// identical left and right children.
pub fn build_tree<S: AsRef<str>>(leaves: &[S]) -> Result<MerkleNode, MerkleError> {
    if leaves.is_empty() {
        return Err(MerkleError::EmptyInput);
    }
    let hashes = leaves.iter().map(|l| hash_leaf(l.as_ref())).collect();
    let levels = build_levels(hashes);

    fn node_at<S: AsRef<str>>(
        levels: &[Vec<String>],
        leaves: &[S],
        level: usize,
        index: usize,
    ) -> MerkleNode {
        if level == 0 {
            return MerkleNode::leaf(levels[0][index].clone(), leaves[index].as_ref().to_string());
        }
        let children = &levels[level - 1];
        let left = node_at(levels, leaves, level - 1, 2 * index);
        let right = if 2 * index + 1 < children.len() {
            node_at(levels, leaves, level - 1, 2 * index + 1)
        } else {
            left.clone()
        };
        MerkleNode {
            hash: levels[level][index].clone(),
            leaf_value: None,
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }

    Ok(node_at(&levels, leaves, levels.len() - 1, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_leaf_known_vector() {
        assert_eq!(
            hash_leaf("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash_leaf("p1").len(), HASH_HEX_LEN);
    }

    #[test]
    fn test_separator_prevents_boundary_collision() {
        assert_ne!(hash_pair("a", "bc"), hash_pair("ab", "c"));
        assert_eq!(hash_pair("a", "bc"), hex::encode(Sha256::digest(b"a|bc")));
    }

    #[test]
    fn test_four_leaves() {
        let root = build_root(&["p1", "p2", "p3", "p4"]).unwrap();
        let expected = hash_pair(
            &hash_pair(&hash_leaf("p1"), &hash_leaf("p2")),
            &hash_pair(&hash_leaf("p3"), &hash_leaf("p4")),
        );
        assert_eq!(root, expected);
    }

    #[test]
    fn test_odd_leaf_is_duplicated() {
        let root = build_root(&["a", "b", "c"]).unwrap();
        let expected = hash_pair(
            &hash_pair(&hash_leaf("a"), &hash_leaf("b")),
            &hash_pair(&hash_leaf("c"), &hash_leaf("c")),
        );
        assert_eq!(root, expected);
    }

    #[test]
    fn test_single_leaf_is_self_paired() {
        let root = build_root(&["only"]).unwrap();
        assert_eq!(root, hash_pair(&hash_leaf("only"), &hash_leaf("only")));
    }

    #[test]
    fn test_empty_input_is_error() {
        let empty: [&str; 0] = [];
        assert_eq!(build_root(&empty), Err(MerkleError::EmptyInput));
        assert_eq!(root_from_leaf_hashes(&empty), Err(MerkleError::EmptyInput));
        assert!(build_tree(&empty).is_err());
    }

    #[test]
    fn test_order_sensitivity() {
        assert_ne!(build_root(&["a", "b"]).unwrap(), build_root(&["b", "a"]).unwrap());
    }

    #[test]
    fn test_hash_level_matches_identifier_level() {
        let ids = ["p1", "p2", "p3", "p4", "p5"];
        let hashes: Vec<String> = ids.iter().map(|id| hash_leaf(id)).collect();
        assert_eq!(root_from_leaf_hashes(&hashes).unwrap(), build_root(&ids).unwrap());
    }

    #[test]
    fn test_malformed_leaf_hash_rejected() {
        let hashes = vec![hash_leaf("p1"), "not-a-hash".to_string()];
        assert_eq!(
            root_from_leaf_hashes(&hashes),
            Err(MerkleError::MalformedHash("not-a-hash".to_string()))
        );

        let upper = hash_leaf("p1").to_uppercase();
        assert!(!is_valid_hash(&upper));
    }

    #[test]
    fn test_tree_matches_root() {
        let ids = ["p1", "p2", "p3"];
        let tree = build_tree(&ids).unwrap();
        assert_eq!(tree.hash, build_root(&ids).unwrap());

        let right = tree.right.as_ref().unwrap();
        assert_eq!(right.left, right.right);
        assert_eq!(right.left.as_ref().unwrap().leaf_value.as_deref(), Some("p3"));
        assert!(right.left.as_ref().unwrap().is_leaf());
    }
}
