use chrono::Duration;

/// This is the standard way of displaying an accumulated duration in stint.
/// Hours grow past two digits instead of rolling over into days.
pub fn format_hms(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = total % 3600 / 60;
    let seconds = total % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
