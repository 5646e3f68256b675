use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::domain::Sort;

/// Parses the lower bound of a collection window.
///
/// Accepts RFC 3339, a bare date (midnight UTC), Unix seconds, and whatever
/// else `dateparser` understands.
pub fn parse_since(input: &str) -> Result<DateTime<Utc>, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty date".to_string());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    // dateparser would read a bare date as midnight in the local timezone
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }

    dateparser::parse(input).map_err(|err| format!("could not parse `{input}` as a date: {err}"))
}

/// Renders Unix seconds as `YYYY-MM-DD HH:MM:SS UTC`, or the raw number if out of range.
pub fn format_epoch(secs: i64) -> String {
    match Utc.timestamp_opt(secs, 0).single() {
        Some(dt) => format_timestamp(&dt),
        None => secs.to_string(),
    }
}

pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Strips `/r/`-style prefixes and whitespace from a subreddit name.
/// Returns `None` when nothing is left.
pub fn normalize_channel(name: &str) -> Option<String> {
    let trimmed = name
        .trim()
        .trim_start_matches('/')
        .trim_start_matches("r/")
        .trim_end_matches('/')
        .trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// File name for the per-run snapshot of new records.
pub fn snapshot_file_name(sort: Sort, at: &DateTime<Utc>) -> String {
    format!("reddit_posts_{}_{}.jsonl", sort, at.format("%Y%m%d_%H%M%S"))
}
