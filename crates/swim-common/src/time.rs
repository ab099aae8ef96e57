//! Swim time and calendar date parsing.
//!
//! Results files and result pages write times as `SS.hh`, `MM:SS.hh` or
//! `HH:MM:SS.hh` (a comma may stand in for the decimal point). Everything is
//! stored as integer hundredths of a second. Non-times such as `NT` or `DNS`
//! parse to `None`; the caller records the status separately.

use crate::error::{Result, SwimError};
use chrono::NaiveDate;

/// Tokens that occupy a time field without being a time.
const NON_TIME_TOKENS: &[&str] = &["NT", "DNS", "DSQ", "DQ", "SCR", "DNF", "VL", "-"];

/// Result status tokens recognised in free text, in match priority order.
pub const STATUS_TOKENS: &[&str] = &["DNS", "DSQ", "DQ", "DNF", "SCR", "NT"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"];

/// Parse a swim time into hundredths of a second.
///
/// Returns `Ok(None)` for empty input and for non-time tokens, and an error
/// for anything else that does not follow one of the three layouts.
pub fn parse_swim_time(raw: &str) -> Result<Option<i32>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || is_non_time(trimmed) {
        return Ok(None);
    }

    let normalized = trimmed.replace(',', ".");
    let parts: Vec<&str> = normalized.split(':').collect();
    let invalid = || SwimError::InvalidTime(raw.to_string());

    let (hours, minutes, seconds) = match parts.as_slice() {
        [sec] => ("0", "0", *sec),
        [min, sec] => ("0", *min, *sec),
        [hrs, min, sec] => (*hrs, *min, *sec),
        _ => return Err(invalid()),
    };

    let hours: i32 = hours.trim().parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.trim().parse().map_err(|_| invalid())?;

    let (whole, fraction) = match seconds.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (seconds, ""),
    };
    let whole: i32 = whole.trim().parse().map_err(|_| invalid())?;
    let hundredths = hundredths_from_fraction(fraction).ok_or_else(invalid)?;

    if hours < 0 || minutes < 0 || whole < 0 {
        return Err(invalid());
    }

    hours
        .checked_mul(360_000)
        .zip(minutes.checked_mul(6_000))
        .zip(whole.checked_mul(100))
        .and_then(|((h, m), s)| h.checked_add(m)?.checked_add(s)?.checked_add(hundredths))
        .map(Some)
        .ok_or_else(invalid)
}

/// Parse a reaction time such as `+0.65`, `0.71` or `-0.02`.
pub fn parse_reaction_time(raw: &str) -> Result<Option<i32>> {
    let trimmed = raw.trim();
    let (sign, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    Ok(parse_swim_time(rest)?.map(|value| sign * value))
}

/// Parse a calendar date written in any of the formats seen in results data.
/// Only the first ten characters are considered, so timestamps are accepted.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let head: String = trimmed.chars().take(10).collect();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&head, format).ok())
}

/// Parse `YYYY-MM-DD - YYYY-MM-DD`.
pub fn parse_date_range(raw: &str) -> Option<(NaiveDate, NaiveDate)> {
    let (from, to) = raw.split_once(" - ")?;
    Some((parse_date(from)?, parse_date(to)?))
}

/// First status token contained in `text`, case-insensitively.
pub fn find_status_token(text: &str) -> Option<&'static str> {
    let upper = text.to_uppercase();
    STATUS_TOKENS.iter().copied().find(|token| upper.contains(token))
}

/// Render hundredths back as `M:SS.hh` (or `SS.hh` under a minute).
pub fn format_hundredths(value: i32) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let value = value.abs();
    let minutes = value / 6_000;
    let seconds = (value % 6_000) / 100;
    let hundredths = value % 100;
    if minutes > 0 {
        format!("{sign}{minutes}:{seconds:02}.{hundredths:02}")
    } else {
        format!("{sign}{seconds}.{hundredths:02}")
    }
}

fn is_non_time(value: &str) -> bool {
    NON_TIME_TOKENS
        .iter()
        .any(|token| value.eq_ignore_ascii_case(token))
}

// Pads or truncates to two digits: ".5" is 50, ".123" is 12.
fn hundredths_from_fraction(fraction: &str) -> Option<i32> {
    if fraction.is_empty() {
        return Some(0);
    }
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let padded: String = fraction.chars().chain("00".chars()).take(2).collect();
    padded.parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_three_layouts() {
        assert_eq!(parse_swim_time("40.09").unwrap(), Some(4009));
        assert_eq!(parse_swim_time("1:23.45").unwrap(), Some(8345));
        assert_eq!(parse_swim_time("00:16:02.11").unwrap(), Some(96211));
        assert_eq!(parse_swim_time("01:00:00.00").unwrap(), Some(360_000));
    }

    #[test]
    fn test_fraction_padding_and_comma() {
        assert_eq!(parse_swim_time("59,5").unwrap(), Some(5950));
        assert_eq!(parse_swim_time("28.123").unwrap(), Some(2812));
        assert_eq!(parse_swim_time("31").unwrap(), Some(3100));
    }

    #[test]
    fn test_non_times() {
        for token in ["", "  ", "NT", "dns", "DSQ", "DQ", "SCR", "-"] {
            assert_eq!(parse_swim_time(token).unwrap(), None, "{token:?}");
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(parse_swim_time("abc").is_err());
        assert!(parse_swim_time("1:2:3:4.00").is_err());
        assert!(parse_swim_time("1:2x.00").is_err());
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        for raw in ["2000000000.00", "99999:00:00.00", "0:40000000:00.00"] {
            assert!(
                matches!(parse_swim_time(raw), Err(SwimError::InvalidTime(_))),
                "{raw:?}"
            );
        }
        assert_eq!(parse_swim_time("5965:13:56.47").unwrap(), Some(2_147_483_647));
    }

    #[test]
    fn test_reaction_time_sign() {
        assert_eq!(parse_reaction_time("+0.65").unwrap(), Some(65));
        assert_eq!(parse_reaction_time("-0.02").unwrap(), Some(-2));
        assert_eq!(parse_reaction_time("0.71").unwrap(), Some(71));
        assert_eq!(parse_reaction_time("").unwrap(), None);
    }

    #[test]
    fn test_dates() {
        let expected = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        assert_eq!(parse_date("2023-06-01"), Some(expected));
        assert_eq!(parse_date("01.06.2023"), Some(expected));
        assert_eq!(parse_date("01/06/2023"), Some(expected));
        assert_eq!(parse_date("2023-06-01T09:00:00"), Some(expected));
        assert_eq!(parse_date("June 1st"), None);
    }

    #[test]
    fn test_date_range() {
        let (from, to) = parse_date_range("2026-06-13 - 2026-06-14").unwrap();
        assert_eq!(from, NaiveDate::from_ymd_opt(2026, 6, 13).unwrap());
        assert_eq!(to, NaiveDate::from_ymd_opt(2026, 6, 14).unwrap());
        assert!(parse_date_range("2026-06-13").is_none());
    }

    #[test]
    fn test_status_token_priority() {
        assert_eq!(find_status_token("dsq 1:02.00"), Some("DSQ"));
        assert_eq!(find_status_token("DNS"), Some("DNS"));
        assert_eq!(find_status_token("1:02.00"), None);
    }

    #[test]
    fn test_format_hundredths() {
        assert_eq!(format_hundredths(8345), "1:23.45");
        assert_eq!(format_hundredths(2812), "28.12");
        assert_eq!(format_hundredths(-2), "-0.02");
    }
}
