use chrono::{DateTime, NaiveDate, Utc};

/// Key used for per-day buckets in analytics. Matches ISO dates the dashboard expects.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Whole seconds between `start` and `now`. A start in the future counts as zero.
pub fn elapsed_seconds(start: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - start).num_seconds().max(0) as u64
}

/// Formats seconds the way the floating timer shows them: `1h 1m 1s`, `2m 5s`, `0m`.
///
/// Seconds are dropped when `show_seconds` is off, and also for round hours (`1h 0m`).
pub fn format_time(seconds: i64, show_seconds: bool) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let remaining_seconds = seconds % 60;

    let mut formatted = String::new();
    if hours > 0 {
        formatted += &format!("{hours}h ");
    }
    formatted += &format!("{minutes}m");
    if show_seconds && (hours == 0 || remaining_seconds > 0) {
        formatted += &format!(" {remaining_seconds}s");
    }
    formatted
}

/// Pomodoro countdown format, `MM:SS`. Minutes aren't capped at 59.
pub fn format_countdown(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
