//! Duration strings such as `600`, `10m`, `1h 30m` or `1.5d`.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

const MINUTE: f64 = 60.0;
const HOUR: f64 = 60.0 * MINUTE;
const DAY: f64 = 24.0 * HOUR;
const WEEK: f64 = 7.0 * DAY;
// Average Julian year, months are a twelfth of it.
const YEAR: f64 = (365.0 * 3.0 + 366.0) * DAY / 4.0;
const MONTH: f64 = YEAR / 12.0;

lazy_static! {
    static ref TERM_RE: Regex =
        Regex::new(r"^\s*([+-]?(?:\d+(?:\.\d*)?|\.\d+))\s*([A-Za-z]*)").expect("valid term regex");
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DurationParseError {
    #[error("empty duration")]
    Empty,
    #[error("unexpected input {0:?} in duration")]
    Syntax(String),
    #[error("unknown time unit {0:?}")]
    UnknownUnit(String),
    #[error("duration must not be negative")]
    Negative,
}

fn unit_seconds(unit: &str) -> Option<f64> {
    let seconds = match unit.to_ascii_lowercase().as_str() {
        "" | "s" | "ss" | "sec" | "secs" | "second" | "seconds" => 1.0,
        "m" | "mm" | "mi" | "min" | "mins" | "minute" | "minutes" => MINUTE,
        "h" | "hh" | "hou" | "hour" | "hours" => HOUR,
        "d" | "dd" | "da" | "day" | "days" => DAY,
        "w" | "ww" | "we" | "wee" | "week" | "weeks" => WEEK,
        "mo" | "mon" | "month" | "months" => MONTH,
        "y" | "yy" | "yea" | "year" | "years" => YEAR,
        _ => return None,
    };
    Some(seconds)
}

/// Sum of `<number><unit>` terms in seconds. The result may be negative.
pub fn parse_seconds(input: &str) -> Result<f64, DurationParseError> {
    if input.trim().is_empty() {
        return Err(DurationParseError::Empty);
    }

    let mut rest = input;
    let mut total = 0.0;
    while !rest.trim().is_empty() {
        let caps = TERM_RE
            .captures(rest)
            .ok_or_else(|| DurationParseError::Syntax(rest.trim().to_string()))?;
        let value: f64 = caps[1]
            .parse()
            .map_err(|_| DurationParseError::Syntax(caps[1].to_string()))?;
        let unit = &caps[2];
        let scale = unit_seconds(unit).ok_or_else(|| DurationParseError::UnknownUnit(unit.into()))?;
        total += value * scale;
        rest = &rest[caps[0].len()..];
    }
    Ok(total)
}

/// Like [`parse_seconds`] but rejects negative totals.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let seconds = parse_seconds(input)?;
    if seconds < 0.0 {
        return Err(DurationParseError::Negative);
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| DurationParseError::Syntax(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_seconds() {
        assert_eq!(parse_seconds("600"), Ok(600.0));
        assert_eq!(parse_seconds(" -1 "), Ok(-1.0));
    }

    #[test]
    fn unit_terms_are_summed() {
        assert_eq!(parse_seconds("10m"), Ok(600.0));
        assert_eq!(parse_seconds("1h 30m"), Ok(5400.0));
        assert_eq!(parse_seconds("1h30m15"), Ok(5415.0));
        assert_eq!(parse_seconds("1.5d"), Ok(1.5 * DAY));
        assert_eq!(parse_seconds("2 weeks"), Ok(2.0 * WEEK));
        assert_eq!(parse_seconds("1mo"), Ok(MONTH));
        assert_eq!(parse_seconds("1y"), Ok(YEAR));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_seconds(""), Err(DurationParseError::Empty));
        assert!(matches!(
            parse_seconds("10 fortnights"),
            Err(DurationParseError::UnknownUnit(_))
        ));
        assert!(matches!(
            parse_seconds("ten minutes"),
            Err(DurationParseError::Syntax(_))
        ));
    }

    #[test]
    fn durations_must_be_positive() {
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("-1"), Err(DurationParseError::Negative));
    }
}
