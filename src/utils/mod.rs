//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

pub mod error;
pub mod retry;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};
use std::time::Duration;
use url::Url;

/// Return `value` when it is strictly greater than `default`, else `default`
///
/// Configured sizes and periods below the built-in default are treated as unset.
pub fn at_least_or_default<T: PartialOrd>(value: T, default: T) -> T {
    if value <= default {
        default
    } else {
        value
    }
}

/// Parse a duration such as `300ms`, `30s`, `5m`, `24h`, `1h30m` or bare seconds
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(input).with_context(|| format!("invalid duration {input:?}"))
}

/// Seconds east of UTC of the default zone (Almaty)
pub const DEFAULT_UTC_OFFSET_SECS: i32 = 5 * 3600;

/// The default zone as an offset
pub fn default_utc_offset() -> FixedOffset {
    FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Parse a fixed UTC offset: `UTC`, `Z`, `+06:00`, `-0330`, `+5`
pub fn parse_utc_offset(input: &str) -> Result<FixedOffset> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("utc") || input == "Z" {
        return FixedOffset::east_opt(0).context("zero offset");
    }

    let (sign, body) = match input.as_bytes().first() {
        Some(b'+') => (1, &input[1..]),
        Some(b'-') => (-1, &input[1..]),
        _ if input.contains('/') => anyhow::bail!(
            "named time zone {input:?} is not supported, use a fixed offset such as +05:00"
        ),
        _ => anyhow::bail!("timezone offset {input:?} must start with + or -"),
    };

    let (hours, minutes) = match body.split_once(':') {
        Some((h, m)) => (h, m),
        None if body.len() == 4 => body.split_at(2),
        None => (body, "0"),
    };
    let hours: i32 = hours
        .parse()
        .with_context(|| format!("invalid hours in offset {input:?}"))?;
    let minutes: i32 = minutes
        .parse()
        .with_context(|| format!("invalid minutes in offset {input:?}"))?;
    if hours > 23 || minutes > 59 {
        anyhow::bail!("timezone offset {input:?} out of range");
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .with_context(|| format!("timezone offset {input:?} out of range"))
}

/// Render an offset the way `parse_utc_offset` reads it back
pub fn format_utc_offset(offset: &FixedOffset) -> String {
    let secs = offset.local_minus_utc();
    let sign = if secs < 0 { '-' } else { '+' };
    let secs = secs.abs();
    format!("{sign}{:02}:{:02}", secs / 3600, (secs % 3600) / 60)
}

/// Render a duration in a form `parse_duration` reads back
pub fn format_duration(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

/// Midnight of the day `now` falls on, in the zone of `now`
pub fn start_of_day(now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let tz = *now.offset();
    let midnight = now.date_naive().and_time(chrono::NaiveTime::MIN);
    tz.from_local_datetime(&midnight).single().unwrap_or(now)
}

/// Midnight of the current day in the given zone
pub fn today(tz: &FixedOffset) -> DateTime<FixedOffset> {
    start_of_day(Utc::now().with_timezone(tz))
}

/// Extract host from URL
pub fn extract_host(url: &str) -> Result<String> {
    let parsed = Url::parse(url).context("Invalid URL")?;

    parsed
        .host_str()
        .map(|s| s.to_string())
        .context("No host in URL")
}
