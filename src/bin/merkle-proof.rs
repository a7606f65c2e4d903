//! Merkle Proof CLI Tool
//!
//! Computes batch roots, inclusion proofs and proof verification for
//! product identifiers, using the same pairing rule as the anchor service.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs;

use voketag_anchor::merkle::{
    build_root, build_tree, generate_proof, hash_leaf, verify_proof, ProofStep,
};

#[derive(Parser)]
#[command(name = "merkle-proof")]
#[command(about = "Compute and verify VokeTag Merkle commitments")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the Merkle root of a list of identifiers
    Root {
        /// Identifiers in batch order
        ids: Vec<String>,

        /// File with one identifier per line
        #[arg(short, long)]
        file: Option<String>,
    },
    /// Print the full tree as JSON
    Tree {
        ids: Vec<String>,

        #[arg(short, long)]
        file: Option<String>,
    },
    /// Print the inclusion proof for one identifier
    Proof {
        /// Position of the identifier in the batch
        #[arg(short, long)]
        index: usize,

        ids: Vec<String>,

        #[arg(short, long)]
        file: Option<String>,
    },
    /// Check a proof against a root
    Verify {
        /// Raw identifier (hashed before folding)
        #[arg(short, long)]
        leaf: String,

        /// Expected Merkle root
        #[arg(short, long)]
        root: String,

        /// Proof JSON, or @path to read it from a file
        #[arg(short, long)]
        proof: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Root { ids, file } => {
            let ids = collect_ids(ids, file)?;
            let root = build_root(&ids)?;
            println!("{}", json!({ "leaf_count": ids.len(), "merkle_root": root }));
        }
        Commands::Tree { ids, file } => {
            let ids = collect_ids(ids, file)?;
            let tree = build_tree(&ids)?;
            println!("{}", serde_json::to_string_pretty(&tree)?);
        }
        Commands::Proof { index, ids, file } => {
            let ids = collect_ids(ids, file)?;
            let proof = generate_proof(&ids, index)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "leaf": ids[index],
                    "leaf_hash": hash_leaf(&ids[index]),
                    "merkle_root": build_root(&ids)?,
                    "proof": proof,
                }))?
            );
        }
        Commands::Verify { leaf, root, proof } => {
            let proof_json = match proof.strip_prefix('@') {
                Some(path) => fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path))?,
                None => proof,
            };
            let steps: Vec<ProofStep> =
                serde_json::from_str(&proof_json).context("Invalid proof JSON")?;
            if verify_proof(&leaf, &steps, &root) {
                println!("✓ {} is included under {}", leaf, root);
            } else {
                eprintln!("✗ Proof does not verify for {}", leaf);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn collect_ids(mut ids: Vec<String>, file: Option<String>) -> Result<Vec<String>> {
    if let Some(path) = file {
        let content =
            fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path))?;
        ids.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from),
        );
    }
    if ids.is_empty() {
        return Err(anyhow!("No identifiers given"));
    }
    Ok(ids)
}
