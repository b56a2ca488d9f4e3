//! Temporal values: dates, times, datetimes and ISO 8601 durations.
//!
//! Each variant knows the Cypher constructor that rebuilds it
//! (`date`, `time`, `localtime`, `datetime`, `localdatetime`, `duration`)
//! and its canonical ISO literal. `Display` renders the full constructor
//! call, e.g. `date('2020-01-02')`.

use std::fmt;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc};

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// The four temporal families a property can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemporalKind {
    Date,
    Time,
    DateTime,
    Duration,
}

/// ISO 8601 duration (months, days, seconds, nanoseconds).
///
/// Always normalized so that `0 <= nanoseconds < 1_000_000_000`; the sign of
/// a sub-second negative duration lives in `seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IsoDuration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanoseconds: i32,
}

/// A temporal property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Temporal {
    Date(NaiveDate),
    /// `offset: None` is a `LocalTime`.
    Time { time: NaiveTime, offset: Option<FixedOffset> },
    /// `offset: None` is a `LocalDateTime`.
    DateTime { datetime: NaiveDateTime, offset: Option<FixedOffset> },
    Duration(IsoDuration),
}

impl Temporal {
    pub fn kind(&self) -> TemporalKind {
        match self {
            Temporal::Date(_) => TemporalKind::Date,
            Temporal::Time { .. } => TemporalKind::Time,
            Temporal::DateTime { .. } => TemporalKind::DateTime,
            Temporal::Duration(_) => TemporalKind::Duration,
        }
    }

    /// Name of the Cypher function that constructs this value.
    pub fn constructor(&self) -> &'static str {
        match self {
            Temporal::Date(_) => "date",
            Temporal::Time { offset: Some(_), .. } => "time",
            Temporal::Time { offset: None, .. } => "localtime",
            Temporal::DateTime { offset: Some(_), .. } => "datetime",
            Temporal::DateTime { offset: None, .. } => "localdatetime",
            Temporal::Duration(_) => "duration",
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Temporal::Date(_) => "DATE",
            Temporal::Time { offset: Some(_), .. } => "TIME",
            Temporal::Time { offset: None, .. } => "LOCAL_TIME",
            Temporal::DateTime { offset: Some(_), .. } => "DATETIME",
            Temporal::DateTime { offset: None, .. } => "LOCAL_DATETIME",
            Temporal::Duration(_) => "DURATION",
        }
    }

    /// The ISO text passed to the constructor.
    pub fn canonical_literal(&self) -> String {
        match self {
            Temporal::Date(d) => d.format("%Y-%m-%d").to_string(),
            Temporal::Time { time, offset } => {
                let mut s = time.format("%H:%M:%S%.f").to_string();
                if let Some(offset) = offset {
                    s.push_str(&offset.to_string());
                }
                s
            }
            Temporal::DateTime { datetime, offset } => {
                let mut s = datetime.format("%Y-%m-%dT%H:%M:%S%.f").to_string();
                if let Some(offset) = offset {
                    s.push_str(&offset.to_string());
                }
                s
            }
            Temporal::Duration(d) => d.to_string(),
        }
    }

    /// Build a temporal from a constructor name and its ISO argument.
    ///
    /// Zoned constructors given text without an offset default to UTC,
    /// which is what the server does for a database without a configured
    /// default time zone.
    pub fn parse(constructor: &str, text: &str) -> std::result::Result<Self, String> {
        let text = text.trim();
        match constructor.to_ascii_lowercase().as_str() {
            "date" => NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(Temporal::Date)
                .map_err(|e| format!("invalid date '{text}': {e}")),
            "localtime" => parse_time(text).map(|time| Temporal::Time { time, offset: None }),
            "time" => {
                let (time_part, offset) = split_offset(text, 0)?;
                let time = parse_time(time_part)?;
                Ok(Temporal::Time { time, offset: Some(offset.unwrap_or_else(utc)) })
            }
            "localdatetime" => parse_datetime(text)
                .map(|datetime| Temporal::DateTime { datetime, offset: None }),
            "datetime" => {
                let t = text.find('T').ok_or_else(|| format!("invalid datetime '{text}': missing 'T'"))?;
                let (dt_part, offset) = split_offset(text, t)?;
                let datetime = parse_datetime(dt_part)?;
                Ok(Temporal::DateTime { datetime, offset: Some(offset.unwrap_or_else(utc)) })
            }
            "duration" => IsoDuration::parse(text).map(Temporal::Duration),
            other => Err(format!("unknown temporal constructor '{other}'")),
        }
    }
}

impl fmt::Display for Temporal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}('{}')", self.constructor(), self.canonical_literal())
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

fn parse_time(text: &str) -> std::result::Result<NaiveTime, String> {
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .map_err(|e| format!("invalid time '{text}': {e}"))
}

fn parse_datetime(text: &str) -> std::result::Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M"))
        .map_err(|e| format!("invalid datetime '{text}': {e}"))
}

/// Split a trailing UTC offset (`Z`, `+HH:MM`, `-HHMM`, `+HH`) off `text`.
/// Only characters at or after `search_from` are considered, so the dashes
/// of a date part are never mistaken for a negative offset.
fn split_offset(
    text: &str,
    search_from: usize,
) -> std::result::Result<(&str, Option<FixedOffset>), String> {
    if text.ends_with(']') {
        return Err(format!("named time zones are not supported: '{text}'"));
    }
    if let Some(stripped) = text.strip_suffix('Z').or_else(|| text.strip_suffix('z')) {
        return Ok((stripped, Some(utc())));
    }
    let tail = &text[search_from..];
    let Some(rel) = tail.rfind(['+', '-']) else {
        return Ok((text, None));
    };
    let at = search_from + rel;
    let (body, offset) = text.split_at(at);
    let sign = if offset.starts_with('-') { -1 } else { 1 };
    let digits: String = offset[1..].chars().filter(|c| *c != ':').collect();
    let (hours, minutes) = match digits.len() {
        2 => (&digits[..2], "0"),
        4 => (&digits[..2], &digits[2..]),
        _ => return Err(format!("invalid UTC offset '{offset}'")),
    };
    let hours: i32 = hours.parse().map_err(|_| format!("invalid UTC offset '{offset}'"))?;
    let minutes: i32 = minutes.parse().map_err(|_| format!("invalid UTC offset '{offset}'"))?;
    let fixed = FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| format!("UTC offset out of range '{offset}'"))?;
    Ok((body, Some(fixed)))
}

// ============================================================================
// IsoDuration
// ============================================================================

impl IsoDuration {
    /// Create a duration, carrying excess nanoseconds into seconds.
    pub fn new(months: i64, days: i64, seconds: i64, nanoseconds: i64) -> Self {
        let carry = nanoseconds.div_euclid(NANOS_PER_SECOND as i64);
        Self {
            months,
            days,
            seconds: seconds.saturating_add(carry),
            nanoseconds: nanoseconds.rem_euclid(NANOS_PER_SECOND as i64) as i32,
        }
    }

    /// `None` when the whole seconds do not fit in an `i64`.
    fn from_parts(months: i64, days: i64, total_nanos: i128) -> Option<Self> {
        Some(Self {
            months,
            days,
            seconds: i64::try_from(total_nanos.div_euclid(NANOS_PER_SECOND)).ok()?,
            nanoseconds: total_nanos.rem_euclid(NANOS_PER_SECOND) as i32,
        })
    }

    fn total_nanos(&self) -> i128 {
        self.seconds as i128 * NANOS_PER_SECOND + self.nanoseconds as i128
    }

    /// Parse an ISO 8601 duration such as `P1Y2M3W4DT5H6M7.5S`.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let err = || format!("invalid duration '{text}'");
        let (negate, body) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let body = body.strip_prefix(['P', 'p']).ok_or_else(err)?;
        let (date_part, time_part) = match body.find(['T', 't']) {
            Some(i) => (&body[..i], Some(&body[i + 1..])),
            None => (body, None),
        };

        let range = || format!("duration out of range '{text}'");
        let mut months: i64 = 0;
        let mut days: i64 = 0;
        let mut nanos: i128 = 0;

        for (number, unit) in components(date_part).map_err(|_| err())? {
            let n: i128 = number.parse().map_err(|_| err())?;
            let n = i64::try_from(n).map_err(|_| range())?;
            let (total, n) = match unit {
                'Y' => (&mut months, n.checked_mul(12)),
                'M' => (&mut months, Some(n)),
                'W' => (&mut days, n.checked_mul(7)),
                'D' => (&mut days, Some(n)),
                _ => return Err(err()),
            };
            let current = *total;
            *total = n.and_then(|n| current.checked_add(n)).ok_or_else(range)?;
        }
        if let Some(time_part) = time_part {
            if time_part.is_empty() {
                return Err(err());
            }
            for (number, unit) in components(time_part).map_err(|_| err())? {
                let n = match unit {
                    'H' | 'M' => {
                        let per = if unit == 'H' { 3600 } else { 60 };
                        let n: i128 = number.parse().map_err(|_| err())?;
                        n.checked_mul(per * NANOS_PER_SECOND)
                    }
                    'S' => Some(parse_seconds(number).ok_or_else(err)?),
                    _ => return Err(err()),
                };
                nanos = n.and_then(|n| nanos.checked_add(n)).ok_or_else(range)?;
            }
        }
        if date_part.is_empty() && time_part.is_none() {
            return Err(err());
        }

        if negate {
            months = months.checked_neg().ok_or_else(range)?;
            days = days.checked_neg().ok_or_else(range)?;
            nanos = nanos.checked_neg().ok_or_else(range)?;
        }
        Self::from_parts(months, days, nanos).ok_or_else(range)
    }
}

/// Split `3Y-2M4.5S` style text into `(number, designator)` pairs.
fn components(text: &str) -> std::result::Result<Vec<(&str, char)>, ()> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if c.is_ascii_alphabetic() {
            let number = &text[start..i];
            if number.is_empty() || number == "-" {
                return Err(());
            }
            out.push((number, c.to_ascii_uppercase()));
            start = i + c.len_utf8();
        }
    }
    if start != text.len() {
        return Err(());
    }
    Ok(out)
}

/// Seconds with an optional fraction of up to nine digits, as nanoseconds.
fn parse_seconds(text: &str) -> Option<i128> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (whole, frac) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };
    if frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: i128 = whole.parse().ok()?;
    let frac: i128 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<9}").parse().ok()?
    };
    let total = whole.checked_mul(NANOS_PER_SECOND)?.checked_add(frac)?;
    Some(if negative { -total } else { total })
}

impl fmt::Display for IsoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.total_nanos();
        let sign = if total < 0 { "-" } else { "" };
        let abs = total.abs();
        let whole = abs / NANOS_PER_SECOND;
        let frac = abs % NANOS_PER_SECOND;
        write!(f, "P{}M{}DT{}{}", self.months, self.days, sign, whole)?;
        if frac != 0 {
            let frac = format!("{frac:09}");
            write!(f, ".{}", frac.trim_end_matches('0'))?;
        }
        write!(f, "S")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_literal() {
        let d = Temporal::Date(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap());
        assert_eq!(d.to_string(), "date('2020-01-02')");
        assert_eq!(Temporal::parse("date", "2020-01-02").unwrap(), d);
    }

    #[test]
    fn test_zoned_time_keeps_offset() {
        let t = Temporal::parse("time", "10:15:30.5+01:00").unwrap();
        assert_eq!(t.kind(), TemporalKind::Time);
        assert_eq!(t.to_string(), "time('10:15:30.500+01:00')");
        assert_eq!(Temporal::parse("time", &t.canonical_literal()).unwrap(), t);
    }

    #[test]
    fn test_local_and_zoned_datetime_differ() {
        let local = Temporal::parse("localdatetime", "2021-06-01T12:00:00").unwrap();
        let zoned = Temporal::parse("datetime", "2021-06-01T12:00:00Z").unwrap();
        assert_ne!(local, zoned);
        assert_eq!(local.constructor(), "localdatetime");
        assert_eq!(zoned.constructor(), "datetime");
        assert_eq!(zoned.canonical_literal(), "2021-06-01T12:00:00+00:00");
    }

    #[test]
    fn test_negative_offset_not_confused_with_date_dash() {
        let t = Temporal::parse("datetime", "2021-06-01T12:00:00-05:30").unwrap();
        let Temporal::DateTime { offset, .. } = t else { panic!("not a datetime") };
        assert_eq!(offset, FixedOffset::west_opt(5 * 3600 + 30 * 60));
    }

    #[test]
    fn test_named_zone_rejected() {
        assert!(Temporal::parse("datetime", "2021-06-01T12:00:00[Europe/Berlin]").is_err());
    }

    #[test]
    fn test_duration_parse_and_display() {
        let d = IsoDuration::parse("P1Y2M3W4DT5H6M7.25S").unwrap();
        assert_eq!(d.months, 14);
        assert_eq!(d.days, 25);
        assert_eq!(d.seconds, 5 * 3600 + 6 * 60 + 7);
        assert_eq!(d.nanoseconds, 250_000_000);
        assert_eq!(d.to_string(), "P14M25DT18367.25S");
        assert_eq!(IsoDuration::parse(&d.to_string()).unwrap(), d);
    }

    #[test]
    fn test_negative_subsecond_duration() {
        let d = IsoDuration::new(0, 0, -2, 500_000_000);
        assert_eq!(d.to_string(), "P0M0DT-1.5S");
        assert_eq!(IsoDuration::parse("P0M0DT-1.5S").unwrap(), d);
    }

    #[test]
    fn test_duration_rejects_garbage() {
        assert!(IsoDuration::parse("1D").is_err());
        assert!(IsoDuration::parse("P").is_err());
        assert!(IsoDuration::parse("PT").is_err());
        assert!(IsoDuration::parse("P1X").is_err());
        assert!(IsoDuration::parse("PT1.0000000001S").is_err());
    }

    #[test]
    fn test_duration_overflow_is_error() {
        for text in [
            "P9223372036854775807Y",
            "P9223372036854775807W",
            "P9223372036854775807M1M",
            "-P-9223372036854775808D",
            "PT9223372036854775807H",
            "PT99999999999999999999999999999999H",
            "PT99999999999999999999999999999999S",
        ] {
            let err = IsoDuration::parse(text).unwrap_err();
            assert!(err.contains(text), "{err}");
        }
        let max = IsoDuration::parse("PT9223372036854775807S").unwrap();
        assert_eq!(max.seconds, i64::MAX);
    }
}
