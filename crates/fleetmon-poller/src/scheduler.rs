//! Scheduling loop for periodic collection cycles.

use crate::poller::Poller;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::info;

/// Ticks at the configured poll interval and runs one collection cycle per
/// tick, starting immediately. A cycle is awaited before the next tick is
/// taken, so cycles never overlap within one process.
pub struct Scheduler {
    poller: Poller,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(poller: Poller, poll_interval: Duration) -> Self {
        Self { poller, poll_interval }
    }

    /// Run until the shutdown signal flips. Shutdown stops ticking without
    /// interrupting an in-flight cycle; tasks finish on their own timeout
    /// horizon.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);

        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Starting collection scheduler"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poller.run_cycle().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Collection scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }
}
