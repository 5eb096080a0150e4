//! Background tick driver.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::manager::InMemoryAudienceManager;

/// Drives [`InMemoryAudienceManager::tick`] on a fixed interval.
pub struct TickLoop;

impl TickLoop {
    /// Spawn the loop at the manager's configured interval. Must be called
    /// from within a tokio runtime.
    pub fn spawn(manager: Arc<InMemoryAudienceManager>) -> TickHandle {
        let period = manager.config().tick_interval;
        Self::spawn_with_interval(manager, period)
    }

    pub fn spawn_with_interval(
        manager: Arc<InMemoryAudienceManager>,
        period: Duration,
    ) -> TickHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_ms = period.as_millis() as u64, "Tick loop started");

            let mut ticks = 0u64;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        manager.tick();
                        ticks += 1;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!(ticks, "Tick loop stopped");
            ticks
        });

        TickHandle {
            shutdown_tx,
            task,
        }
    }
}

/// Handle to a running [`TickLoop`].
pub struct TickHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl TickHandle {
    /// Stop the loop and wait for it to finish. Returns the number of ticks run.
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown_tx.send(true);
        match self.task.await {
            Ok(ticks) => ticks,
            Err(error) => {
                debug!(error = %error, "Tick loop ended abnormally");
                0
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
