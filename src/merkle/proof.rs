//! Merkle Inclusion Proofs
//!
//! Proofs walk the same level construction as the root builder and record
//! the sibling at each level. Wire format: `[{"hash": "...", "position": "left"|"right"}]`.

use serde::{Deserialize, Serialize};

use crate::error::MerkleError;
use crate::merkle::tree::{build_levels, hash_leaf, hash_pair, validate_leaf_hashes};

/// Side of the current node on which a sibling sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub hash: String,
    pub position: Position,
}

/// Proof that one leaf is committed under a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub leaf_hash: String,
    pub steps: Vec<ProofStep>,
    pub merkle_root: String,
}

impl InclusionProof {
    /// Verify this proof
    pub fn verify(&self) -> bool {
        verify_proof_from_hash(&self.leaf_hash, &self.steps, &self.merkle_root)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Merkle proof: {} steps, leaf: {}, root: {}",
            self.steps.len(),
            self.leaf_hash,
            self.merkle_root
        )
    }
}

fn proof_over(leaf_hashes: Vec<String>, index: usize) -> Vec<ProofStep> {
    let levels = build_levels(leaf_hashes);
    let mut steps = Vec::with_capacity(levels.len() - 1);
    let mut index = index;

    for level in &levels[..levels.len() - 1] {
        let step = if index % 2 == 1 {
            ProofStep {
                hash: level[index - 1].clone(),
                position: Position::Left,
            }
        } else {
            ProofStep {
                hash: level.get(index + 1).unwrap_or(&level[index]).clone(),
                position: Position::Right,
            }
        };
        steps.push(step);
        index /= 2;
    }

    steps
}

/// Sibling path for `leaf_hashes[index]`.
pub fn proof_from_leaf_hashes<S: AsRef<str>>(
    leaf_hashes: &[S],
    index: usize,
) -> Result<Vec<ProofStep>, MerkleError> {
    if index >= leaf_hashes.len() {
        return Err(MerkleError::IndexOutOfRange {
            index,
            len: leaf_hashes.len(),
        });
    }
    validate_leaf_hashes(leaf_hashes)?;

    let hashes = leaf_hashes.iter().map(|h| h.as_ref().to_string()).collect();
    Ok(proof_over(hashes, index))
}

/// Sibling path for the raw identifier `leaves[index]`.
pub fn generate_proof<S: AsRef<str>>(
    leaves: &[S],
    index: usize,
) -> Result<Vec<ProofStep>, MerkleError> {
    if index >= leaves.len() {
        return Err(MerkleError::IndexOutOfRange {
            index,
            len: leaves.len(),
        });
    }
    let hashes = leaves.iter().map(|l| hash_leaf(l.as_ref())).collect();
    Ok(proof_over(hashes, index))
}

/// Fold a proof starting from an already-hashed leaf.
pub fn verify_proof_from_hash(leaf_hash: &str, proof: &[ProofStep], root: &str) -> bool {
    let computed = proof.iter().fold(leaf_hash.to_string(), |current, step| match step.position {
        Position::Left => hash_pair(&step.hash, &current),
        Position::Right => hash_pair(&current, &step.hash),
    });
    computed == root
}

/// Verify that the raw identifier `leaf` is committed under `root`.
pub fn verify_proof(leaf: &str, proof: &[ProofStep], root: &str) -> bool {
    verify_proof_from_hash(&hash_leaf(leaf), proof, root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::tree::build_root;

    #[test]
    fn test_proof_for_every_index() {
        for n in 1..=9 {
            let leaves: Vec<String> = (0..n).map(|i| format!("product-{}", i)).collect();
            let root = build_root(&leaves).unwrap();
            for (i, leaf) in leaves.iter().enumerate() {
                let proof = generate_proof(&leaves, i).unwrap();
                assert!(verify_proof(leaf, &proof, &root), "n={} i={}", n, i);
            }
        }
    }

    #[test]
    fn test_proof_length() {
        let leaves: Vec<String> = (0..5).map(|i| i.to_string()).collect();
        assert_eq!(generate_proof(&leaves, 0).unwrap().len(), 3);
        let four = ["a", "b", "c", "d"];
        assert_eq!(generate_proof(&four, 3).unwrap().len(), 2);
        // single leaf carries its self-sibling
        assert_eq!(generate_proof(&["a"], 0).unwrap().len(), 1);
    }

    #[test]
    fn test_sibling_positions() {
        let leaves = ["p1", "p2", "p3"];
        let proof = generate_proof(&leaves, 2).unwrap();
        assert_eq!(
            proof[0],
            ProofStep {
                hash: hash_leaf("p3"),
                position: Position::Right
            }
        );
        assert_eq!(
            proof[1],
            ProofStep {
                hash: hash_pair(&hash_leaf("p1"), &hash_leaf("p2")),
                position: Position::Left
            }
        );
    }

    #[test]
    fn test_out_of_range_index() {
        let leaves = ["a", "b"];
        assert_eq!(
            generate_proof(&leaves, 2),
            Err(MerkleError::IndexOutOfRange { index: 2, len: 2 })
        );
        let empty: [&str; 0] = [];
        assert!(proof_from_leaf_hashes(&empty, 0).is_err());
    }

    #[test]
    fn test_tampered_proof_fails() {
        let leaves = ["a", "b", "c", "d"];
        let root = build_root(&leaves).unwrap();
        let mut proof = generate_proof(&leaves, 1).unwrap();
        assert!(verify_proof("b", &proof, &root));
        assert!(!verify_proof("x", &proof, &root));

        proof[1].hash = hash_leaf("tampered");
        assert!(!verify_proof("b", &proof, &root));
    }

    #[test]
    fn test_wire_format() {
        let step = ProofStep {
            hash: hash_leaf("a"),
            position: Position::Left,
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["position"], "left");
        assert_eq!(json["hash"].as_str().unwrap().len(), 64);

        let parsed: Vec<ProofStep> =
            serde_json::from_str(&format!(
                r#"[{{"hash":"{}","position":"right"}}]"#,
                hash_leaf("b")
            ))
            .unwrap();
        assert_eq!(parsed[0].position, Position::Right);
    }

    #[test]
    fn test_inclusion_proof_bundle() {
        let hashes: Vec<String> = ["a", "b", "c"].iter().map(|l| hash_leaf(l)).collect();
        let steps = proof_from_leaf_hashes(&hashes, 0).unwrap();
        let proof = InclusionProof {
            leaf_hash: hashes[0].clone(),
            steps,
            merkle_root: build_root(&["a", "b", "c"]).unwrap(),
        };
        assert!(proof.verify());
        assert_eq!(proof.len(), 2);
        assert!(proof.summary().contains("2 steps"));
    }
}
