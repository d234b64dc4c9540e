//! Tokio task that ticks an engine at its configured interval.

use crate::engine::LacpEngine;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Spawns the tick loop. It runs until `shutdown` is cancelled. Missed
/// ticks are delayed, not bursted.
pub fn spawn_ticker(engine: Arc<LacpEngine>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(engine.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = engine.tick_interval().as_millis() as u64,
            "LACP ticker started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("LACP ticker stopping");
                    break;
                }
                _ = interval.tick() => engine.tick(),
            }
        }
    })
}
