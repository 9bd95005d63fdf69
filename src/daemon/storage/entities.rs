use std::sync::Arc;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

/// State of a target's timer. A target owns at most one open running interval at a time, toggling
/// is the only way in and out of [TimerState::Running].
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    #[default]
    Stopped,
    Running,
}

/// The durable record for one target. `accumulated` only ever grows, and it grows through
/// [TaskEntity::reconcile] alone: every observer folds in the wall-clock time that passed since
/// `last_reconciled_at` and moves that anchor forward. Because each observer only adds the delta
/// since the last anchor update, any number of them can watch the same running target without an
/// interval being counted twice.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct TaskEntity {
    pub id: Uuid,
    pub name: Arc<str>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub timer: TimerState,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub timer_started_at: Option<DateTime<Utc>>,
    #[serde(with = "duration_ser")]
    pub accumulated: Duration,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub last_reconciled_at: Option<DateTime<Utc>>,
}

impl TaskEntity {
    pub fn new(name: Arc<str>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            created_at,
            timer: TimerState::Stopped,
            timer_started_at: None,
            accumulated: Duration::zero(),
            last_reconciled_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer == TimerState::Running
    }

    /// Starts the timer when stopped, stops it when running. Stopping folds in the tail of the
    /// open interval first, so no time is lost between the last reconciliation and the stop.
    pub fn toggle(&mut self, now: DateTime<Utc>) {
        match self.timer {
            TimerState::Stopped => {
                self.timer = TimerState::Running;
                self.timer_started_at = Some(now);
                self.last_reconciled_at = Some(now);
            }
            TimerState::Running => {
                self.reconcile(now);
                self.timer = TimerState::Stopped;
                self.timer_started_at = None;
            }
        }
    }

    /// Folds wall-clock time elapsed since the last reconciliation into `accumulated` and moves
    /// the anchor up to `now`. Does nothing for a stopped timer. Calling this twice with the same
    /// `now` adds zero the second time.
    ///
    /// A `now` behind the anchor (clock skew, unsynchronized sources) contributes zero and leaves
    /// the anchor where it was, the counter never moves backwards.
    pub fn reconcile(&mut self, now: DateTime<Utc>) -> Duration {
        if self.timer != TimerState::Running {
            return Duration::zero();
        }
        // A running timer always has an anchor, it's set on toggle. Falling back to `now` keeps a
        // malformed record from counting time that was never observed.
        let anchor = self.last_reconciled_at.unwrap_or(now);
        let delta = now - anchor;
        if delta < Duration::zero() {
            warn!(
                "Clock went backwards for '{}': now is {}s behind the last reconciliation",
                self.name,
                -delta.num_seconds()
            );
            return Duration::zero();
        }
        self.accumulated += delta;
        self.last_reconciled_at = Some(now);
        delta
    }

    /// Absorbs however long the target ran while nobody was watching. Called once whenever a new
    /// observer starts up (daemon restart, background wake after suspension). The gap is folded
    /// in through the anchor, not the stale `timer_started_at`, so it lands exactly once no
    /// matter how many observers come back.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Duration {
        self.reconcile(now)
    }

    /// Duration for display purposes only: accumulated total plus the not-yet-reconciled tail of
    /// the open interval. Leaves the record untouched, which lets read-only views show a live
    /// figure without a write.
    pub fn display_duration(&self, now: DateTime<Utc>) -> Duration {
        let mut copy = self.clone();
        copy.reconcile(now);
        copy.accumulated
    }
}

mod duration_ser {
    use chrono::Duration;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = i64::deserialize(deserializer)?;
        let duration = Duration::seconds(s);
        Ok(duration)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

    use super::{TaskEntity, TimerState};

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN);

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.from_utc_datetime(&TEST_START_DATE) + Duration::seconds(seconds)
    }

    fn task() -> TaskEntity {
        TaskEntity::new("reading".into(), at(0))
    }

    #[test]
    fn test_toggle_starts_and_stops() {
        let mut task = task();
        assert_eq!(task.timer, TimerState::Stopped);

        task.toggle(at(0));
        assert_eq!(task.timer, TimerState::Running);
        assert_eq!(task.timer_started_at, Some(at(0)));
        assert_eq!(task.last_reconciled_at, Some(at(0)));

        task.toggle(at(7));
        assert_eq!(task.timer, TimerState::Stopped);
        assert_eq!(task.timer_started_at, None);
        assert_eq!(task.accumulated, Duration::seconds(7));
    }

    #[test]
    fn test_instant_toggle_adds_nothing() {
        let mut task = task();
        task.toggle(at(3));
        task.toggle(at(3));
        assert_eq!(task.accumulated, Duration::zero());
        assert_eq!(task.timer, TimerState::Stopped);
    }

    #[test]
    fn test_reconcile_is_noop_when_stopped() {
        let mut task = task();
        assert_eq!(task.reconcile(at(100)), Duration::zero());
        assert_eq!(task.accumulated, Duration::zero());
        assert_eq!(task.last_reconciled_at, None);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut task = task();
        task.toggle(at(0));

        assert_eq!(task.reconcile(at(10)), Duration::seconds(10));
        assert_eq!(task.reconcile(at(10)), Duration::zero());
        assert_eq!(task.accumulated, Duration::seconds(10));
    }

    /// Two independent observers firing for the same moment must not count the interval twice.
    #[test]
    fn test_concurrent_observers_count_once() {
        let mut task = task();
        task.toggle(at(0));

        // Ticker and background job both wake up at t=10.
        task.reconcile(at(10));
        task.resume(at(10));

        assert_eq!(task.accumulated, Duration::seconds(10));
    }

    #[test]
    fn test_resume_absorbs_suspension_gap() {
        let mut task = task();
        task.toggle(at(0));

        task.reconcile(at(10));
        assert_eq!(task.accumulated, Duration::seconds(10));
        assert_eq!(task.last_reconciled_at, Some(at(10)));

        // Process was suspended between t=10 and t=25, a fresh observer folds the gap in.
        task.resume(at(25));
        assert_eq!(task.accumulated, Duration::seconds(25));

        task.toggle(at(30));
        assert_eq!(task.accumulated, Duration::seconds(30));
        assert_eq!(task.timer, TimerState::Stopped);
    }

    #[test]
    fn test_clock_skew_contributes_zero() {
        let mut task = task();
        task.toggle(at(0));
        task.reconcile(at(10));

        // Clock jumped backwards by a second. Nothing is added and the anchor stays put.
        assert_eq!(task.reconcile(at(9)), Duration::zero());
        assert_eq!(task.accumulated, Duration::seconds(10));
        assert_eq!(task.last_reconciled_at, Some(at(10)));

        // Once the clock catches up again only the time past the anchor counts.
        task.reconcile(at(12));
        assert_eq!(task.accumulated, Duration::seconds(12));
    }

    #[test]
    fn test_accumulation_across_intervals() {
        let mut task = task();

        task.toggle(at(0));
        task.toggle(at(5));

        task.toggle(at(100));
        task.reconcile(at(103));
        task.toggle(at(110));

        assert_eq!(task.accumulated, Duration::seconds(5 + 10));
    }

    #[test]
    fn test_display_duration_does_not_persist() {
        let mut task = task();
        task.toggle(at(0));
        task.reconcile(at(4));

        assert_eq!(task.display_duration(at(9)), Duration::seconds(9));
        // The record itself is unchanged.
        assert_eq!(task.accumulated, Duration::seconds(4));
        assert_eq!(task.last_reconciled_at, Some(at(4)));
    }

    #[test]
    fn test_serde_round_trip() -> Result<()> {
        let mut task = task();
        task.toggle(at(0));
        task.reconcile(at(42));

        let line = serde_json::to_string(&task)?;
        let parsed = serde_json::from_str::<TaskEntity>(&line)?;
        assert_eq!(parsed, task);
        Ok(())
    }

    /// Records written before the timer fields existed come back as stopped targets.
    #[test]
    fn test_serde_defaults_for_missing_timer_fields() -> Result<()> {
        let line = format!(
            r#"{{"id":"{}","name":"reading","created_at":0,"accumulated":15}}"#,
            uuid::Uuid::new_v4()
        );
        let parsed = serde_json::from_str::<TaskEntity>(&line)?;
        assert_eq!(parsed.timer, TimerState::Stopped);
        assert_eq!(parsed.timer_started_at, None);
        assert_eq!(parsed.accumulated, Duration::seconds(15));
        Ok(())
    }
}
