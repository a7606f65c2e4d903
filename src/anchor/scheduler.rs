//! Periodic driver for the anchor cycle.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::anchor::cycle::{AnchorCycle, CycleOutcome};

/// Run the cycle every `period` until `shutdown` flips to `true`.
///
/// Ticks missed while a cycle is still running are skipped rather than
/// queued, so cycles never overlap.
pub async fn run_scheduler(
    cycle: Arc<AnchorCycle>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Anchor scheduler started (every {:?})", period);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match cycle.run_once().await {
            Ok(CycleOutcome::Confirmed(record)) | Ok(CycleOutcome::Recovered(record)) => {
                info!(
                    merkle_root = %record.merkle_root,
                    count = record.leaf_count(),
                    "Anchor tick committed batch"
                );
            }
            Ok(_) => {}
            Err(e) => error!("Anchor cycle failed: {}", e),
        }

        if let Err(e) = cycle.refresh_pending().await {
            error!("Failed to refresh pending anchors: {}", e);
        }
    }

    info!("Anchor scheduler stopped");
}
