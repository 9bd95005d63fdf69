use std::future::pending;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::utils::clock::Clock;

/// Contract of the host facility that wakes the background job at coarse intervals. The job
/// schedules its next wake, waits for it, and reports how the run went. Whatever retry policy
/// exists lives behind this seam, the job itself never retries.
#[async_trait]
pub trait WakeScheduler: Send {
    /// Registers the earliest moment the next wake may fire. A newer schedule replaces an
    /// older one.
    fn schedule(&mut self, earliest: DateTime<Utc>);

    /// Resolves once the scheduled moment arrives. Pends forever when nothing is scheduled.
    async fn wake(&mut self) -> Result<()>;

    /// Reports the outcome of the run the last wake triggered.
    fn report(&mut self, success: bool);
}

/// In-process [WakeScheduler] that sleeps on the injected clock until the scheduled moment.
pub struct ClockWakeScheduler {
    clock: Box<dyn Clock>,
    next: Option<DateTime<Utc>>,
}

impl ClockWakeScheduler {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        Self { clock, next: None }
    }
}

#[async_trait]
impl WakeScheduler for ClockWakeScheduler {
    fn schedule(&mut self, earliest: DateTime<Utc>) {
        self.next = Some(earliest);
    }

    async fn wake(&mut self) -> Result<()> {
        match self.next.take() {
            Some(moment) => {
                self.clock.sleep_until(moment).await;
                Ok(())
            }
            None => pending().await,
        }
    }

    fn report(&mut self, success: bool) {
        if success {
            debug!("Background pass finished");
        } else {
            warn!("Background pass failed, leaving the retry decision to the next wake");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use anyhow::Result;
    use chrono::{TimeZone, Utc};

    use crate::{
        daemon::wake::{ClockWakeScheduler, WakeScheduler},
        utils::clock::{test_support::TestClock, Clock},
    };

    #[tokio::test]
    async fn test_wake_waits_for_scheduled_moment() -> Result<()> {
        let clock = TestClock::new(Utc.with_ymd_and_hms(2018, 7, 4, 0, 0, 0).unwrap());
        let mut scheduler = ClockWakeScheduler::new(Box::new(clock.clone()));

        scheduler.schedule(clock.now() + chrono::Duration::milliseconds(80));

        let started = Instant::now();
        scheduler.wake().await?;
        assert!(started.elapsed() >= Duration::from_millis(50));
        Ok(())
    }

    #[tokio::test]
    async fn test_wake_with_past_moment_fires_immediately() -> Result<()> {
        let clock = TestClock::new(Utc.with_ymd_and_hms(2018, 7, 4, 0, 0, 0).unwrap());
        let mut scheduler = ClockWakeScheduler::new(Box::new(clock.clone()));

        scheduler.schedule(clock.now() - chrono::Duration::seconds(30));

        let started = Instant::now();
        scheduler.wake().await?;
        assert!(started.elapsed() < Duration::from_millis(100));
        Ok(())
    }
}
