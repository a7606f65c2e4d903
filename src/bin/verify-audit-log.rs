use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::collections::BTreeMap;
use tracing::{error, info};

use voketag_anchor::audit::{
    export_chain, find_tampered, verify_serialized_chain, AuditEvent, AuditKeyring,
    ChainVerification,
};
use voketag_anchor::store::{ChainStore, Database};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("verify-audit-log")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Verify VokeTag audit chain integrity against the live chain pointer")
        .arg(
            Arg::new("database")
                .short('d')
                .long("database")
                .value_name("URL")
                .env("DATABASE_URL")
                .default_value("sqlite://voketag-anchor.db")
                .help("Database holding the audit chain"),
        )
        .arg(
            Arg::new("export")
                .short('e')
                .long("export")
                .value_name("PATH")
                .help("Write events and verdict as JSON"),
        )
        .arg(
            Arg::new("key-version")
                .short('k')
                .long("key-version")
                .value_name("VERSION")
                .action(ArgAction::Append)
                .help("Require valid signatures under AUDIT_VERIFY_KEY_<VERSION> (repeatable)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppress output except errors"),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    // Set log level based on flags
    let level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let database_url = matches
        .get_one::<String>("database")
        .ok_or_else(|| anyhow!("--database is required"))?;
    let versions: Vec<String> = matches
        .get_many::<String>("key-version")
        .map(|v| v.cloned().collect())
        .unwrap_or_default();
    let keyring = if versions.is_empty() {
        None
    } else {
        Some(AuditKeyring::from_env(&versions)?)
    };

    let export_path = matches.get_one::<String>("export");
    let verification = match verify_database(database_url, keyring.as_ref(), export_path, verbose)
        .await
    {
        Ok(verification) => verification,
        Err(e) => {
            error!("Audit chain verification failed: {}", e);
            std::process::exit(2);
        }
    };

    if !verification.is_valid {
        error!(
            "Audit chain INVALID at event {:?}: {:?}",
            verification.first_bad_index, verification.failure
        );
        std::process::exit(1);
    }

    if !quiet {
        println!("✓ Audit chain verified: {} events", verification.checked);
    }
    Ok(())
}

async fn verify_database(
    database_url: &str,
    keyring: Option<&AuditKeyring>,
    export_path: Option<&String>,
    verbose: bool,
) -> Result<ChainVerification> {
    info!("Verifying audit chain in {}", database_url);

    let database = Database::connect(database_url).await?;
    let raw = database.load_events().await?;
    let head = database.head().await?;

    if verbose {
        println!("Loaded {} audit events", raw.len());
        println!("Live chain head: {}", head);
    }

    let verification = verify_serialized_chain(&raw, Some(&head), keyring);

    let events: Vec<AuditEvent> = raw
        .iter()
        .filter_map(|json| serde_json::from_str(json).ok())
        .collect();
    if verbose {
        print_summary(&events);
        let tampered = find_tampered(&events);
        if !tampered.is_empty() {
            println!("⚠ Events whose hashes do not recompute: {:?}", tampered);
        }
    }

    if let Some(path) = export_path {
        export_chain(&events, &verification, path)?;
        info!("Exported audit chain to {}", path);
    }

    Ok(verification)
}

fn print_summary(events: &[AuditEvent]) {
    let (Some(first), Some(last)) = (events.first(), events.last()) else {
        return;
    };

    println!("\nAudit Chain Summary:");
    println!("  Total events: {}", events.len());
    println!("  First event: {}", first.timestamp_string());
    println!("  Last event: {}", last.timestamp_string());
    println!("  Head hash: {}", last.current_hash);

    let mut actions = BTreeMap::new();
    for event in events {
        *actions.entry(event.action.as_str()).or_insert(0usize) += 1;
    }
    println!("\nAction distribution:");
    for (action, count) in actions {
        println!("  {}: {}", action, count);
    }
}
