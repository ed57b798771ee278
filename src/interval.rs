//! Parsing of human-entered durations for the poll interval and read timeout.

use std::time::Duration;

/// Parse a strictly positive duration.
///
/// A bare number is interpreted as seconds and may be fractional. The
/// following suffixes are also accepted:
/// - `ms`: milliseconds
/// - `s`: seconds
/// - `m`: minutes
/// - `h`: hours
///
/// Zero, negative, non-finite and non-numeric values are rejected.
///
/// # Examples
/// ```
/// use geiger_exporter::interval::parse_interval;
/// use std::time::Duration;
///
/// assert_eq!(parse_interval("60").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_interval("0.5").unwrap(), Duration::from_millis(500));
/// assert_eq!(parse_interval("2m").unwrap(), Duration::from_secs(120));
/// assert!(parse_interval("0").is_err());
/// ```
pub fn parse_interval(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty interval".to_string());
    }

    // "ms" must be checked before "m" and "s"
    let (num, scale, unit) = if let Some(num) = src.strip_suffix("ms") {
        (num, 0.001, "milliseconds")
    } else if let Some(num) = src.strip_suffix('h') {
        (num, 3600.0, "hours")
    } else if let Some(num) = src.strip_suffix('m') {
        (num, 60.0, "minutes")
    } else if let Some(num) = src.strip_suffix('s') {
        (num, 1.0, "seconds")
    } else {
        (src, 1.0, "seconds")
    };

    let value: f64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid {}: {}", unit, num.trim()))?;

    let secs = value * scale;
    if !secs.is_finite() {
        return Err(format!("interval must be finite: {}", src));
    }
    if secs <= 0.0 {
        return Err(format!("interval must be positive: {}", src));
    }

    let duration = Duration::try_from_secs_f64(secs)
        .map_err(|e| format!("interval out of range: {} ({})", src, e))?;
    if duration.is_zero() {
        return Err(format!("interval too small: {}", src));
    }
    Ok(duration)
}
