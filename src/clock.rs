//! UTC day arithmetic for quota windows and prompt timestamps.

use chrono::{DateTime, Datelike, Utc};

const SECONDS_PER_DAY: i64 = 86_400;

/// Start of the UTC day following `now`, as epoch seconds.
pub fn next_refresh(now: DateTime<Utc>) -> i64 {
    let tomorrow = now.timestamp() + SECONDS_PER_DAY;
    tomorrow - tomorrow.rem_euclid(SECONDS_PER_DAY)
}

/// Hours and minutes left until `refresh_time`; zero once it has passed.
pub fn time_until(refresh_time: i64, now: DateTime<Utc>) -> (i64, i64) {
    let left = (refresh_time - now.timestamp()).max(0);
    (left / 3600, (left % 3600) / 60)
}

/// The date written out, e.g. `Monday, January 1st 2024`.
pub fn written_date(now: DateTime<Utc>) -> String {
    let day = now.day();
    format!(
        "{}, {} {}{} {}",
        now.format("%A"),
        now.format("%B"),
        day,
        ordinal_suffix(day),
        now.year()
    )
}

/// `HH:MM` in UTC.
pub fn clock_time(now: DateTime<Utc>) -> String {
    now.format("%H:%M").to_string()
}

fn ordinal_suffix(day: u32) -> &'static str {
    if (10..20).contains(&day) {
        return "th";
    }
    match day % 10 {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}
