use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voketag_anchor::anchor::{run_scheduler, AnchorCycle, HttpLedgerClient, Ledger, MockLedger};
use voketag_anchor::audit::{AuditChain, AuditSigner, NewAuditEvent};
use voketag_anchor::config::AppConfig;
use voketag_anchor::store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voketag_anchor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting VokeTag anchor service");

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!("Configuration loaded");

    let database = Arc::new(
        Database::connect(&config.database_url)
            .await
            .context("Failed to connect to database")?,
    );
    database.run_migrations().await.context("Failed to run migrations")?;
    info!("Database migrations completed");

    let ledger: Arc<dyn Ledger> = if config.anchor.uses_mock_ledger() {
        warn!("No ledger endpoint configured, using mock ledger");
        Arc::new(MockLedger::new())
    } else {
        Arc::new(HttpLedgerClient::new(
            config.anchor.ledger_endpoint.clone(),
            config.anchor.network.clone(),
            config.anchor.ledger_timeout(),
        )?)
    };

    let cycle = Arc::new(
        AnchorCycle::new(database.clone(), database.clone(), ledger, config.anchor.batch_size)
            .with_retry_policy(config.ledger_retry.to_policy()),
    );

    let mut audit = AuditChain::new(database.clone()).with_retry_policy(config.audit.to_policy());
    if config.audit.signing_enabled {
        audit = audit.with_signer(AuditSigner::from_env(&config.audit.key_version)?);
        info!("Audit signing enabled (key version {})", config.audit.key_version);
    }
    info!("Audit chain head: {}", audit.head().await?);

    let started = NewAuditEvent::new("service_start", "anchor_service")
        .user("system")
        .with("batch_size", config.anchor.batch_size)
        .with("network", config.anchor.network.clone());
    if let Err(e) = audit.append(started).await {
        error!("Failed to record service start: {}", e);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(run_scheduler(
        cycle.clone(),
        config.anchor.interval(),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    if shutdown_tx.send(true).is_err() {
        warn!("Anchor scheduler already stopped before shutdown signal");
    }
    if let Err(e) = scheduler.await {
        error!("Anchor scheduler task failed: {}", e);
    }

    let stats = cycle.stats().await?;
    info!(
        queue_depth = stats.queue_depth,
        records = stats.records,
        leaves_anchored = stats.leaves_anchored,
        "Anchor service stopped"
    );
    Ok(())
}
