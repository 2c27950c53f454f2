//! Periodic holdover expiry
//!
//! Samples already force expired holdovers to FREERUN, but a process that
//! stops printing produces no samples. This scan covers that case.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

use lp_core::ClockStateTracker;

pub async fn run_holdover_scanner(tracker: Arc<ClockStateTracker>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let expired = tracker.expire_holdovers(Instant::now().into_std());
                if !expired.is_empty() {
                    debug!(count = expired.len(), "Holdover scan expired clocks");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("Holdover scanner stopped");
}
