use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Represents an entity responsible for providing dates across application. This can allow it to
/// be used for testing.
///
/// All scheduling goes through wall-clock moments rather than monotonic instants, because
/// reconciliation is anchored on wall-clock time and has to survive the process being suspended
/// between ticks.
#[async_trait]
pub trait Clock: Sync + Send + 'static {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);

    /// Sleeps until `moment` arrives. A moment in the past returns immediately.
    async fn sleep_until(&self, moment: DateTime<Utc>) {
        let delta = moment - self.now();
        match delta.to_std() {
            Ok(v) => self.sleep(v).await,
            // Negative delta, the moment has already passed.
            Err(_) => (),
        }
    }
}

#[derive(Clone)]
pub struct DefaultClock;

#[async_trait]
impl Clock for DefaultClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
