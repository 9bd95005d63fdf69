use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{status_api::StatusSink, utils::clock::Clock};

use super::{storage::task_storage::TaskStorage, wake::WakeScheduler};

/// The coarse counterpart of the ticker. The host wakes it no sooner than every
/// `wake_interval`, and each wake folds in everything that elapsed since the last
/// reconciliation, whether the process spent that time ticking or suspended. The anchor makes
/// the overlap with the ticker harmless.
pub struct BackgroundReconciler<S> {
    storage: S,
    scheduler: Box<dyn WakeScheduler>,
    sink: Box<dyn StatusSink>,
    wake_interval: Duration,
    shutdown: CancellationToken,
    clock: Box<dyn Clock>,
}

impl<S: TaskStorage> BackgroundReconciler<S> {
    pub fn new(
        storage: S,
        scheduler: Box<dyn WakeScheduler>,
        sink: Box<dyn StatusSink>,
        wake_interval: Duration,
        shutdown: CancellationToken,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            scheduler,
            sink,
            wake_interval,
            shutdown,
            clock,
        }
    }

    /// Executes the background job loop.
    pub async fn run(mut self) -> Result<()> {
        let interval = chrono::Duration::from_std(self.wake_interval)?;
        self.scheduler.schedule(self.clock.now() + interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                result = self.scheduler.wake() => result?,
            }

            // The next wake goes on the books before any work happens, a failing pass must not
            // stall the schedule.
            self.scheduler.schedule(self.clock.now() + interval);

            let success = match self.pass().await {
                Ok(reconciled) => {
                    info!("Background pass reconciled {reconciled} running targets");
                    true
                }
                Err(e) => {
                    error!("Background pass failed {:?}", e);
                    false
                }
            };
            self.scheduler.report(success);
        }
    }

    async fn pass(&mut self) -> Result<usize> {
        let now = self.clock.now();
        let updated = self
            .storage
            .transact(move |set| {
                let mut updated = Vec::new();
                for task in set.running_mut() {
                    task.resume(now);
                    updated.push(task.clone());
                }
                Ok(updated)
            })
            .await?;

        if let Some(task) = updated.first() {
            if let Err(e) = self.sink.update(&task.name, task.accumulated) {
                warn!("Failed to update the live status display {e:?}");
            }
        }

        // Journal maintenance rides along with the coarse schedule.
        self.storage.compact().await?;

        Ok(updated.len())
    }
}
