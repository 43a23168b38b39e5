//! Background housekeeping
//!
//! Periodically expires stale ringing and negotiating calls and forgets old
//! tombstones. The task only holds a `Weak` reference and exits once the
//! orchestrator is dropped.

use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::coordinator::CallOrchestrator;

/// Spawn the sweeper on the current runtime, ticking every
/// `sweep_interval_ms`. Abort the returned handle to stop it early.
pub fn spawn_sweeper(orchestrator: &Arc<CallOrchestrator>) -> JoinHandle<()> {
    let period = orchestrator.config().sweep_interval();
    let weak = Arc::downgrade(orchestrator);
    info!("Starting call sweeper every {:?}", period);
    tokio::spawn(sweep_loop(weak, period))
}

async fn sweep_loop(orchestrator: Weak<CallOrchestrator>, period: std::time::Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let Some(orchestrator) = orchestrator.upgrade() else {
            debug!("Orchestrator dropped, stopping call sweeper");
            return;
        };
        let report = orchestrator.run_sweep().await;
        if !report.is_empty() {
            debug!(
                "Sweep: {} missed, {} failed, {} tombstones pruned",
                report.missed.len(),
                report.failed.len(),
                report.pruned
            );
        }
    }
}
