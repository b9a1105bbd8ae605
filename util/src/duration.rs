use std::time::Duration;

use crate::UnitParseError;

/// Parse a human duration such as `1h30m`, `2d 4h`, `45s`, `1.5h` or `250ms`.
/// A bare number is taken as milliseconds.
pub fn parse_duration(s: &str) -> Result<Duration, UnitParseError> {
    let err = || UnitParseError::Duration(s.to_owned());
    let text = s.trim();
    if text.is_empty() {
        return Err(err());
    }
    if let Ok(millis) = text.parse::<u64>() {
        return Ok(Duration::from_millis(millis));
    }

    let mut total_ms = 0f64;
    let mut rest = text;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(err)?;
        if num_end == 0 {
            return Err(err());
        }
        let num: f64 = rest[..num_end].parse().map_err(|_| err())?;
        rest = rest[num_end..].trim_start();

        let unit_end = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let millis = match &rest[..unit_end] {
            "ms" | "milli" | "millis" => 1.0,
            "s" | "sec" | "second" | "seconds" => 1_000.0,
            "m" | "min" | "minute" | "minutes" => 60_000.0,
            "h" | "hour" | "hours" => 3_600_000.0,
            "d" | "day" | "days" => 86_400_000.0,
            _ => return Err(err()),
        };
        total_ms += num * millis;
        rest = rest[unit_end..].trim_start();
    }
    Ok(Duration::from_micros((total_ms * 1000.0).round() as u64))
}

/// `HH:mm:ss`; hours are not wrapped at 24.
pub fn format_hms(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// `HH:mm`, rounding partial minutes up.
pub fn format_hm(d: Duration) -> String {
    let mins = d.as_secs().div_ceil(60);
    format!("{:02}:{:02}", mins / 60, mins % 60)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("2d 4h"), Ok(Duration::from_secs(187_200)));
        assert_eq!(parse_duration("45s"), Ok(Duration::from_secs(45)));
        assert_eq!(parse_duration("1.5h"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("250"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("3 fortnights").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_format() {
        assert_eq!(format_hms(Duration::from_secs(5400)), "01:30:00");
        assert_eq!(format_hms(Duration::from_secs(48 * 3600 + 5)), "48:00:05");
        assert_eq!(format_hm(Duration::from_secs(5400)), "01:30");
        assert_eq!(format_hm(Duration::from_secs(61)), "00:02");
    }
}
