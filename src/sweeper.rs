//! Liveness sweeper.
//!
//! Periodically demotes `online` devices whose last heartbeat is older than
//! the relay's offline threshold.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::relay::DeviceRelay;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Background task running [`DeviceRelay::sweep`] on a fixed tick.
pub struct LivenessSweeper {
    relay: Arc<DeviceRelay>,
    interval: Duration,
}

impl LivenessSweeper {
    pub fn new(relay: Arc<DeviceRelay>) -> Self {
        Self {
            relay,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Builder: override the sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start the sweep loop. It stops once `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = self.interval.as_secs(),
                threshold_secs = self.relay.offline_threshold().num_seconds(),
                "Liveness sweeper started"
            );

            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {
                        let demoted = self.relay.sweep().await;
                        if !demoted.is_empty() {
                            tracing::debug!(count = demoted.len(), "Sweep demoted devices");
                        }
                    }
                }
            }

            tracing::info!("Liveness sweeper stopped");
        })
    }
}
