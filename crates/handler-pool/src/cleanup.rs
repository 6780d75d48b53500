//! Background cleanup sweep
//!
//! Spawns a periodic task that asks the pool to retire expired generations.
//! The task only retires; handler creation stays on the borrow path. It holds
//! a weak reference so it never keeps a dropped pool alive, and it is aborted
//! when its owning factory goes away.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::entry::Handler;
use crate::pool::{GenerationPool, SweepReport};

/// Handle to the running sweep task. Dropping it stops the task.
#[derive(Debug)]
pub struct CleanupScheduler {
    handle: JoinHandle<()>,
    interval: Duration,
}

impl CleanupScheduler {
    /// Spawn the sweep task on the current tokio runtime.
    ///
    /// Sweeps every `interval`, skipping the immediate first tick (a fresh
    /// pool has nothing to retire). Exits on its own once the pool is dropped.
    pub fn start<H: Handler>(pool: Weak<GenerationPool<H>>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    debug!("handler pool dropped, cleanup scheduler exiting");
                    break;
                };
                sweep_cycle(&pool);
            }
        });

        Self { handle, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CleanupScheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Run one sweep and log what it did.
fn sweep_cycle<H: Handler>(pool: &GenerationPool<H>) -> SweepReport {
    let report = pool.sweep(Instant::now());
    if report.retired.is_empty() {
        debug!(pending_drain = report.pending_drain, "cleanup sweep retired nothing");
    } else {
        info!(
            retired = ?report.retired,
            pending_drain = report.pending_drain,
            "cleanup sweep retired generations"
        );
    }
    report
}
