use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike};

/// This is the standard way of converting a date to a day key in sitewatch.
pub fn date_to_record_name(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Returns start of the next hour. Works on any timezone, the caller decides whether the hour is
/// local or not.
pub fn next_hour_start<Tz: TimeZone>(date: DateTime<Tz>) -> DateTime<Tz> {
    let truncated = date
        .with_minute(0)
        .and_then(|v| v.with_second(0))
        .and_then(|v| v.with_nanosecond(0))
        .unwrap_or(date);
    truncated + Duration::hours(1)
}

/// Human readable duration used by the reports, e.g. `1h 5m`, `3m 20s`, `42s`.
pub fn format_duration_ms(ms: u64) -> String {
    let seconds = ms / 1000;
    let minutes = seconds / 60;
    let hours = minutes / 60;

    if hours > 0 {
        format!("{hours}h {}m", minutes % 60)
    } else if minutes > 0 {
        format!("{minutes}m {}s", seconds % 60)
    } else {
        format!("{seconds}s")
    }
}
