use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{status_api::StatusSink, utils::clock::Clock};

use super::storage::{entities::TaskEntity, task_storage::TaskStorage};

/// The per-second driver behind the live display. While at least one target is running it keeps
/// folding the second that just passed into the stored totals and mirrors the result to the
/// status sink. Its very first pass absorbs however long the targets ran while the daemon was
/// down, through the same anchor mechanism as every later pass.
pub struct ForegroundTicker<S> {
    storage: S,
    sink: Box<dyn StatusSink>,
    shutdown: CancellationToken,
    tick_interval: Duration,
    clock: Box<dyn Clock>,
    // Starts out true so a display left over from a previous daemon run gets taken down.
    displaying: bool,
}

impl<S: TaskStorage> ForegroundTicker<S> {
    pub fn new(
        storage: S,
        sink: Box<dyn StatusSink>,
        shutdown: CancellationToken,
        tick_interval: Duration,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            sink,
            shutdown,
            tick_interval,
            clock,
            displaying: true,
        }
    }

    /// Executes the ticker event loop.
    pub async fn run(mut self) -> Result<()> {
        let tick = chrono::Duration::from_std(self.tick_interval)?;
        let mut resumed = false;
        let mut tick_point = self.clock.now();
        loop {
            let first = !std::mem::replace(&mut resumed, true);
            if let Err(e) = self.pass(first).await {
                error!("Encountered an error during a ticker pass {:?}", e);
            }

            // Ticks are anchored to wall-clock moments, a delayed wakeup shortens the next
            // sleep instead of shifting every following tick.
            tick_point = tick_point + tick;
            tokio::select! {
                // Cancelation means we stop execution of the event loop.
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                _ = self.clock.sleep_until(tick_point) => ()
            }
        }
    }

    /// One reconciliation pass over every running target. `resuming` marks the startup pass
    /// that folds in the unobserved gap.
    async fn pass(&mut self, resuming: bool) -> Result<()> {
        let now = self.clock.now();
        let updated = self
            .storage
            .transact(move |set| {
                let mut updated = Vec::new();
                for task in set.running_mut() {
                    if resuming {
                        task.resume(now);
                    } else {
                        task.reconcile(now);
                    }
                    updated.push(task.clone());
                }
                Ok(updated)
            })
            .await?;

        debug!("Reconciled {} running targets", updated.len());
        self.push_status(&updated);
        Ok(())
    }

    fn push_status(&mut self, running: &[TaskEntity]) {
        match running.first() {
            Some(task) => {
                self.displaying = true;
                if let Err(e) = self.sink.update(&task.name, task.accumulated) {
                    warn!("Failed to update the live status display {e:?}");
                }
            }
            None if self.displaying => {
                self.displaying = false;
                if let Err(e) = self.sink.end() {
                    warn!("Failed to end the live status display {e:?}");
                }
            }
            None => (),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::{anyhow, Result};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::storage::{
            entities::TaskEntity,
            task_storage::{TaskStorage, TaskStorageImpl},
        },
        daemon::ticker::ForegroundTicker,
        status_api::MockStatusSink,
        utils::{
            clock::{test_support::TestClock, Clock},
            logging::TEST_LOGGING,
        },
    };

    fn test_clock() -> TestClock {
        TestClock::new(Utc.with_ymd_and_hms(2018, 7, 4, 0, 0, 0).unwrap())
    }

    async fn seed_running(storage: &TaskStorageImpl, clock: &TestClock) -> Result<()> {
        let now = clock.now();
        storage
            .transact(move |set| {
                let mut task = TaskEntity::new("reading".into(), now);
                task.toggle(now);
                set.insert(task);
                Ok(())
            })
            .await
    }

    fn ticker(
        storage: Arc<TaskStorageImpl>,
        sink: MockStatusSink,
        shutdown: &CancellationToken,
        clock: &TestClock,
    ) -> ForegroundTicker<Arc<TaskStorageImpl>> {
        ForegroundTicker::new(
            storage,
            Box::new(sink),
            shutdown.clone(),
            Duration::from_secs(1),
            Box::new(clock.clone()),
        )
    }

    #[tokio::test]
    async fn test_ticker_advances_running_target() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let storage = Arc::new(TaskStorageImpl::new(dir.path().to_owned())?);
        let clock = test_clock();
        seed_running(&storage, &clock).await?;

        let mut sink = MockStatusSink::new();
        sink.expect_update().times(2..).returning(|_, _| Ok(()));

        let shutdown = CancellationToken::new();
        let ticker = ticker(storage.clone(), sink, &shutdown, &clock);

        let (_, run_result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(2600)).await;
                shutdown.cancel()
            },
            ticker.run(),
        );
        run_result?;

        let task = storage
            .load_all()
            .await?
            .pop()
            .ok_or_else(|| anyhow!("target disappeared"))?;
        assert!(task.is_running());
        let seconds = task.accumulated.num_seconds();
        assert!((2..=5).contains(&seconds), "accumulated {seconds}s");
        Ok(())
    }

    #[tokio::test]
    async fn test_ticker_first_pass_absorbs_gap() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let storage = Arc::new(TaskStorageImpl::new(dir.path().to_owned())?);
        let clock = test_clock();
        seed_running(&storage, &clock).await?;

        // The daemon was down for an hour while the timer kept conceptually running.
        clock.advance(chrono::Duration::hours(1));

        let mut sink = MockStatusSink::new();
        sink.expect_update().times(1..).returning(|_, _| Ok(()));

        let shutdown = CancellationToken::new();
        let ticker = ticker(storage.clone(), sink, &shutdown, &clock);

        let (_, run_result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                shutdown.cancel()
            },
            ticker.run(),
        );
        run_result?;

        let task = storage
            .load_all()
            .await?
            .pop()
            .ok_or_else(|| anyhow!("target disappeared"))?;
        assert!(task.accumulated >= chrono::Duration::hours(1));
        // The gap must land exactly once, not once per pass.
        assert!(task.accumulated < chrono::Duration::hours(1) + chrono::Duration::seconds(5));
        Ok(())
    }

    #[tokio::test]
    async fn test_ticker_ends_display_when_last_timer_stops() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let storage = Arc::new(TaskStorageImpl::new(dir.path().to_owned())?);
        let clock = test_clock();
        seed_running(&storage, &clock).await?;

        let mut sink = MockStatusSink::new();
        sink.expect_update().times(1..).returning(|_, _| Ok(()));
        // Exactly one end signal no matter how many idle ticks follow the stop.
        sink.expect_end().times(1).returning(|| Ok(()));

        let shutdown = CancellationToken::new();
        let ticker = ticker(storage.clone(), sink, &shutdown, &clock);

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(1300)).await;
            let now = clock.now();
            storage
                .transact(move |set| {
                    for task in set.running_mut() {
                        task.toggle(now);
                    }
                    Ok(())
                })
                .await?;
            tokio::time::sleep(Duration::from_millis(2200)).await;
            shutdown.cancel();
            Ok::<_, anyhow::Error>(())
        };

        let (stop_result, run_result) = tokio::join!(stopper, ticker.run());
        stop_result?;
        run_result?;

        let task = storage
            .load_all()
            .await?
            .pop()
            .ok_or_else(|| anyhow!("target disappeared"))?;
        assert!(!task.is_running());
        Ok(())
    }
}
