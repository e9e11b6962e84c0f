//! Shared utility functions.
//!
//! Size and duration strings follow the ecosystem file conventions: sizes take
//! `K`, `M` or `G` suffixes with power-of-two multipliers, durations take `ms`,
//! `s`, `m` or `h` and bare integers are milliseconds.

use std::time::Duration;

const KB: u64 = 1024;
const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * 1024 * 1024;
const TB: u64 = 1024 * 1024 * 1024 * 1024;

/// Parse a size string such as `"1G"`, `"512M"`, `"64kb"` or `"1048576"`.
///
/// # Examples
///
/// ```
/// use keeper::utils::parse_size;
///
/// assert_eq!(parse_size("1G"), Ok(1024 * 1024 * 1024));
/// assert_eq!(parse_size("512m"), Ok(512 * 1024 * 1024));
/// assert_eq!(parse_size("2048"), Ok(2048));
/// ```
///
/// # Errors
///
/// Returns a human-readable reason when the string is empty, has an unknown
/// suffix, has a non-numeric amount, or overflows `u64`.
pub fn parse_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("size cannot be empty".to_string());
    }

    let upper = trimmed.to_ascii_uppercase();
    let without_b = match upper.strip_suffix('B') {
        Some(rest) if !rest.is_empty() => rest,
        _ => upper.as_str(),
    };

    let (digits, multiplier) = match without_b.chars().last() {
        Some('K') => (&without_b[..without_b.len() - 1], KB),
        Some('M') => (&without_b[..without_b.len() - 1], MB),
        Some('G') => (&without_b[..without_b.len() - 1], GB),
        Some(c) if c.is_ascii_digit() => (without_b, 1),
        _ => {
            return Err(format!(
                "invalid size '{trimmed}' (expected a number with optional K, M or G suffix)"
            ));
        },
    };

    let amount: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid size amount in '{trimmed}'"))?;

    amount
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{trimmed}' is too large"))
}

/// Parse a duration string such as `"10s"`, `"250ms"`, `"5m"`, `"1h"` or `"4000"`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use keeper::utils::parse_duration;
///
/// assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
/// assert_eq!(parse_duration("4000"), Ok(Duration::from_millis(4000)));
/// ```
///
/// # Errors
///
/// Returns a human-readable reason when the string cannot be parsed.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let trimmed = input.trim().to_ascii_lowercase();
    if trimmed.is_empty() {
        return Err("duration cannot be empty".to_string());
    }

    // `ms` must be checked before `m` and `s`.
    let (digits, unit_ms): (&str, u64) = if let Some(rest) = trimmed.strip_suffix("ms") {
        (rest, 1)
    } else if let Some(rest) = trimmed.strip_suffix('s') {
        (rest, 1_000)
    } else if let Some(rest) = trimmed.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = trimmed.strip_suffix('h') {
        (rest, 3_600_000)
    } else {
        (trimmed.as_str(), 1)
    };

    let amount: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration '{}' (expected e.g. 500ms, 10s, 5m, 1h)", input.trim()))?;

    amount
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration '{}' is too large", input.trim()))
}

/// Format bytes in human-readable form.
///
/// # Examples
///
/// ```
/// use keeper::utils::format_bytes;
///
/// assert_eq!(format_bytes(0), "0 bytes");
/// assert_eq!(format_bytes(1024), "1.0 KB");
/// assert_eq!(format_bytes(1048576), "1.0 MB");
/// ```
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        "0 bytes".to_string()
    } else if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} bytes")
    }
}

/// Format a duration in human-readable form.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use keeper::utils::format_duration;
///
/// assert_eq!(format_duration(Duration::from_secs(30)), "30s");
/// assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
/// assert_eq!(format_duration(Duration::from_secs(3660)), "1h 1m");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}
