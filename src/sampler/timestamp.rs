//! Scraped post time → UTC instant.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::fmt;

/// What a post's time element offered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTimestamp {
    /// Machine-readable `datetime` attribute.
    pub machine: Option<String>,
    /// Visible text, e.g. "3h" or "May 21".
    pub display: Option<String>,
}

impl RawTimestamp {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self { machine: None, display: Some(text.into()) }
    }

    /// The string worth showing to a human.
    pub fn shown(&self) -> Option<&str> {
        self.display
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.machine.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unparsable {
    pub input: String,
}

impl fmt::Display for Unparsable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognised timestamp {:?}", self.input)
    }
}

/// Machine attribute first, visible text only if the attribute is absent or
/// unusable. Relative text resolves against `now`.
pub fn extract(raw: &RawTimestamp, now: DateTime<Utc>) -> Result<DateTime<Utc>, Unparsable> {
    if let Some(instant) = raw.machine.as_deref().and_then(parse_machine) {
        return Ok(instant);
    }
    if let Some(instant) = raw.display.as_deref().and_then(|t| parse_display(t, now)) {
        return Ok(instant);
    }
    Err(Unparsable {
        input: raw
            .display
            .clone()
            .or_else(|| raw.machine.clone())
            .unwrap_or_default(),
    })
}

// ── Machine-readable ──────────────────────────────────────────────────────────

/// "2024-05-21T10:00:00.000Z" | "2024-05-21T10:00:00" | "1716285600"
pub fn parse_machine(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if s.len() >= 9 && s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    }
    None
}

// ── Human-readable ────────────────────────────────────────────────────────────

pub fn parse_display(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let s = s.trim().trim_end_matches('•').trim();
    if s.is_empty() {
        return None;
    }
    parse_relative(s, now)
        .or_else(|| parse_absolute(s))
        .or_else(|| parse_yearless(s, now))
}

/// "just now" | "yesterday" | "45m" | "3h" | "2d" | "24w" | "3 hours ago" | "an hour ago"
fn parse_relative(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = s.to_lowercase();
    match lower.as_str() {
        "now" | "just now" => return Some(now),
        "yesterday" => return Some(now - Duration::days(1)),
        _ => {}
    }

    let body = lower.strip_suffix("ago").unwrap_or(&lower).trim();

    // Compact form: digits immediately followed by a unit letter.
    let digits: String = body.chars().take_while(|c| c.is_ascii_digit()).collect();
    let (count, unit) = if digits.is_empty() {
        let (article, rest) = body.split_once(' ')?;
        if article != "a" && article != "an" {
            return None;
        }
        (1i64, rest.trim())
    } else {
        (digits.parse().ok()?, body[digits.len()..].trim())
    };

    // Captions can hold any number, so out-of-range spans are simply not dates.
    let span = match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Duration::try_seconds(count)?,
        "m" | "min" | "mins" | "minute" | "minutes" => Duration::try_minutes(count)?,
        "h" | "hr" | "hrs" | "hour" | "hours" => Duration::try_hours(count)?,
        "d" | "day" | "days" => Duration::try_days(count)?,
        "w" | "wk" | "week" | "weeks" => Duration::try_weeks(count)?,
        "y" | "yr" | "year" | "years" => Duration::try_days(count.checked_mul(365)?)?,
        _ => return None,
    };
    now.checked_sub_signed(span)
}

/// "May 21, 2024" | "21 May 2024" | "2024-05-21" | "2024-05-21 10:00:00"
fn parse_absolute(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    for fmt in ["%B %d, %Y", "%b %d, %Y", "%Y-%m-%d", "%d %B %Y", "%d %b %Y", "%d/%m/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(midnight(d));
        }
    }
    None
}

/// "May 21": the latest such date not after `now`. "February 29" walks
/// back to the last leap year.
fn parse_yearless(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    // 2000 is a leap year, so every month/day pair parses.
    let (month, day) = ["%B %d %Y", "%b %d %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&format!("{} 2000", s), fmt).ok())
        .map(|d| (d.month(), d.day()))?;

    (0..=8)
        .filter_map(|back| NaiveDate::from_ymd_opt(now.year() - back, month, day))
        .map(midnight)
        .find(|t| *t <= now)
}

fn midnight(d: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap_or_default())
}

/// Whether free text looks like a post date at all ("May 21", "24w", "2025-05-21").
pub fn looks_like_date(text: &str, now: DateTime<Utc>) -> bool {
    let t = text.trim();
    !t.is_empty() && t.len() <= 40 && parse_display(t, now).is_some()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_machine_attribute_wins_over_text() {
        let raw = RawTimestamp {
            machine: Some("2024-05-21T10:00:00.000Z".into()),
            display: Some("3h".into()),
        };
        assert_eq!(extract(&raw, now()).unwrap(), Utc.with_ymd_and_hms(2024, 5, 21, 10, 0, 0).unwrap());
        assert_eq!(raw.shown(), Some("3h"));
    }

    #[test]
    fn test_offsets_normalise_to_utc() {
        let t = parse_machine("2024-05-21T12:00:00+02:00").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 5, 21, 10, 0, 0).unwrap());
        assert_eq!(parse_machine("1716285600"), Some(Utc.with_ymd_and_hms(2024, 5, 21, 10, 0, 0).unwrap()));
    }

    #[test]
    fn test_bad_attribute_falls_back_to_text() {
        let raw = RawTimestamp {
            machine: Some("garbage".into()),
            display: Some("2d".into()),
        };
        assert_eq!(extract(&raw, now()).unwrap(), now() - Duration::days(2));
    }

    #[test]
    fn test_relative_forms() {
        assert_eq!(parse_display("45m", now()), Some(now() - Duration::minutes(45)));
        assert_eq!(parse_display("3h", now()), Some(now() - Duration::hours(3)));
        assert_eq!(parse_display("24w", now()), Some(now() - Duration::weeks(24)));
        assert_eq!(parse_display("3 hours ago", now()), Some(now() - Duration::hours(3)));
        assert_eq!(parse_display("an hour ago", now()), Some(now() - Duration::hours(1)));
        assert_eq!(parse_display("Just now", now()), Some(now()));
        assert_eq!(parse_display("yesterday", now()), Some(now() - Duration::days(1)));
    }

    #[test]
    fn test_absolute_forms() {
        let may21 = Utc.with_ymd_and_hms(2024, 5, 21, 0, 0, 0).unwrap();
        assert_eq!(parse_display("May 21, 2024", now()), Some(may21));
        assert_eq!(parse_display("21 May 2024", now()), Some(may21));
        assert_eq!(parse_display("2024-05-21", now()), Some(may21));
        assert_eq!(
            parse_display("2024-05-21 08:15:00", now()),
            Some(Utc.with_ymd_and_hms(2024, 5, 21, 8, 15, 0).unwrap())
        );
    }

    #[test]
    fn test_yearless_dates_never_land_in_the_future() {
        assert_eq!(parse_display("March 2", now()), Some(Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap()));
        assert_eq!(parse_display("May 21", now()), Some(Utc.with_ymd_and_hms(2024, 5, 21, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_february_29_walks_back_to_a_leap_year() {
        assert_eq!(parse_display("February 29", now()), Some(Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()));

        let new_year_2024 = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(
            parse_display("Feb 29", new_year_2024),
            Some(Utc.with_ymd_and_hms(2020, 2, 29, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_huge_counts_are_not_dates() {
        assert_eq!(parse_display("99999999999999d", now()), None);
        assert_eq!(parse_display("99999999999999 years ago", now()), None);
        assert_eq!(parse_display("9223372036854775807w", now()), None);
        assert_eq!(parse_display("99999999999999999999h", now()), None);
        assert!(!looks_like_date("99999999999999d", now()));
    }

    #[test]
    fn test_unparsable_is_a_value_not_a_panic() {
        let err = extract(&RawTimestamp::from_text("Liked by 42 others"), now()).unwrap_err();
        assert_eq!(err.input, "Liked by 42 others");
        assert!(extract(&RawTimestamp::default(), now()).is_err());
        assert!(!looks_like_date("Follow", now()));
        assert!(looks_like_date("5d", now()));
    }
}
