use chrono::{DateTime, Utc};

use crate::{
    daemon::storage::entities::{TaskEntity, TimerState},
    utils::time::format_hms,
};

/// Renders the target table shown by `list`. Durations of running targets include the live,
/// not yet persisted tail of the open interval.
pub fn render_targets(tasks: &[TaskEntity], now: DateTime<Utc>) -> String {
    let name_width = tasks
        .iter()
        .map(|v| v.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());

    let mut out = String::new();
    out.push_str(&format!(
        "{:<name_width$}  {:>9}  {:<7}  CREATED\n",
        "NAME", "TOTAL", "STATE"
    ));
    for task in tasks {
        out.push_str(&format!(
            "{:<name_width$}  {:>9}  {:<7}  {}\n",
            task.name,
            format_hms(task.display_duration(now)),
            state_label(task.timer),
            task.created_at.format("%Y-%m-%d"),
        ));
    }
    out
}

/// Renders the rows shown by `status`, one running target per line.
pub fn render_status(running: &[TaskEntity], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    for task in running {
        out.push_str(&format!(
            "{}  {}\n",
            format_hms(task.display_duration(now)),
            task.name
        ));
    }
    out
}

fn state_label(state: TimerState) -> &'static str {
    match state {
        TimerState::Running => "running",
        TimerState::Stopped => "stopped",
    }
}
