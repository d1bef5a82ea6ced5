//! Dimension typing: canonical value parsing and range expansion.
//!
//! Every dimension value is stored in canonical string form inside aggregate
//! keys: integers as plain decimals, strings trimmed, all calendar types as
//! `YYYYMMDD` (weeks snapped back to Monday, months to the 1st, years to
//! Jan 1). Slice parameters arrive as range expressions: comma-separated
//! groups, each either a single value or an inclusive `A..B` range.

use std::collections::BTreeSet;

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const RANGE_OPERATOR: &str = "..";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("Invalid date '{0}'")]
    InvalidDate(String),
    #[error("invalid integer '{0}'")]
    InvalidInteger(String),
    #[error("invalid value for string ('{0}'), ':' is not allowed")]
    ColonNotAllowed(String),
    #[error("integer range '{0}' not parseable")]
    IntegerRangeNotParseable(String),
    #[error("range operator is not supported for string ('{0}')")]
    RangeNotSupported(String),
    #[error("expected a scalar value, got {0}")]
    NotScalar(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionType {
    Integer,
    String,
    Date,
    Week,
    Month,
    Year,
}

impl DimensionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "integer" => Some(Self::Integer),
            "string" => Some(Self::String),
            "date" => Some(Self::Date),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "year" => Some(Self::Year),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::String => "string",
            Self::Date => "date",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Normalize a raw transaction value to the canonical string form used
    /// inside aggregate keys.
    pub fn parse_value(&self, value: &Value) -> Result<String, ValueError> {
        self.parse_str(&scalar_to_string(value)?)
    }

    /// Same as [`parse_value`](Self::parse_value), for values already in
    /// string form (slice expression groups).
    pub fn parse_str(&self, raw: &str) -> Result<String, ValueError> {
        match self {
            Self::Integer => parse_integer(raw).map(|n| n.to_string()),
            Self::String => parse_string(raw),
            Self::Date => parse_date(raw).map(fmt_date),
            Self::Week => parse_date(raw).map(|d| fmt_date(monday_of(d))),
            Self::Month => parse_date(raw).map(|d| fmt_date(first_of_month(d))),
            Self::Year => parse_date(raw).map(|d| fmt_date(first_of_year(d))),
        }
    }

    /// Expand a slice range expression into the set of canonical values it
    /// denotes. Groups are comma-separated; `A..B` is inclusive and
    /// direction-agnostic.
    pub fn expand(&self, expr: &str) -> Result<BTreeSet<String>, ValueError> {
        match self {
            Self::Integer => expand_integer(expr),
            Self::String => expand_string(expr),
            Self::Date | Self::Week | Self::Month | Self::Year => self.expand_calendar(expr),
        }
    }

    fn expand_calendar(&self, expr: &str) -> Result<BTreeSet<String>, ValueError> {
        let mut out = BTreeSet::new();
        for group in expr.split(',') {
            if let Some((start, end)) = group.split_once(RANGE_OPERATOR) {
                let start = parse_date(start.trim())?;
                let end = parse_date(end.trim())?;
                out.extend(self.iter_range(start, end).into_iter().map(fmt_date));
            } else {
                out.insert(self.parse_str(group.trim())?);
            }
        }
        Ok(out)
    }

    /// Inclusive calendar sequence between two dates, stepping by this
    /// type's unit. Endpoints are snapped to the unit boundary first.
    /// Reversed endpoints iterate backwards and yield the same set.
    fn iter_range(&self, from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
        match self {
            Self::Date => day_steps(from, to, 1),
            Self::Week => day_steps(monday_of(from), monday_of(to), 7),
            Self::Month => month_steps(first_of_month(from), first_of_month(to)),
            Self::Year => year_steps(first_of_year(from), first_of_year(to)),
            Self::Integer | Self::String => Vec::new(),
        }
    }
}

/// Render a JSON scalar the way it appears in transaction payloads.
pub fn scalar_to_string(value: &Value) -> Result<String, ValueError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(ValueError::NotScalar(other.to_string())),
    }
}

fn parse_integer(raw: &str) -> Result<i64, ValueError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ValueError::InvalidInteger(raw.to_string()))
}

fn parse_string(raw: &str) -> Result<String, ValueError> {
    if raw.contains(':') {
        return Err(ValueError::ColonNotAllowed(raw.to_string()));
    }
    Ok(raw.trim().to_string())
}

pub fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y%m%d%H%M%S"];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y%m%d",
    "%d-%b-%Y",
    "%d %b %Y",
    "%b %d %Y",
    "%b-%d %Y",
    "%b-%d-%Y",
    "%d/%m/%Y",
];

// Month/year and bare-year forms; the day (and month) default to 1 by
// prefixing before parsing.
const PARTIAL_FORMATS: &[&str] = &["%d-%m/%Y", "%d-%b-%Y", "%d-%b %Y"];

/// Parse a calendar date out of any supported human form. Calendar-invalid
/// inputs (Feb 29 outside leap years, Feb 30, ...) fail.
pub fn parse_date(raw: &str) -> Result<NaiveDate, ValueError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(ValueError::InvalidDate(raw.to_string()));
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(dt.date_naive());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }
    if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) {
        if let Some(d) = s.parse().ok().and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1)) {
            return Ok(d);
        }
    }
    let with_day = format!("1-{s}");
    for fmt in PARTIAL_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(&with_day, fmt) {
            return Ok(d);
        }
    }
    Err(ValueError::InvalidDate(raw.to_string()))
}

fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn first_of_year(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date)
}

fn day_steps(from: NaiveDate, to: NaiveDate, days: i64) -> Vec<NaiveDate> {
    let step = Duration::days(days);
    let mut out = Vec::new();
    if from > to {
        let mut cur = from;
        while cur >= to {
            out.push(cur);
            cur = cur - step;
        }
    } else {
        let mut cur = from;
        while cur <= to {
            out.push(cur);
            cur = cur + step;
        }
    }
    out
}

fn month_steps(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let one = Months::new(1);
    let mut out = Vec::new();
    let mut cur = from;
    if from > to {
        while cur >= to {
            out.push(cur);
            match cur.checked_sub_months(one) {
                Some(prev) => cur = prev,
                None => break,
            }
        }
    } else {
        while cur <= to {
            out.push(cur);
            match cur.checked_add_months(one) {
                Some(next) => cur = next,
                None => break,
            }
        }
    }
    out
}

fn year_steps(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    let mut cur = from;
    if from > to {
        while cur >= to {
            out.push(cur);
            match NaiveDate::from_ymd_opt(cur.year() - 1, 1, 1) {
                Some(prev) => cur = prev,
                None => break,
            }
        }
    } else {
        while cur <= to {
            out.push(cur);
            match NaiveDate::from_ymd_opt(cur.year() + 1, 1, 1) {
                Some(next) => cur = next,
                None => break,
            }
        }
    }
    out
}

fn expand_integer(expr: &str) -> Result<BTreeSet<String>, ValueError> {
    let not_parseable = || ValueError::IntegerRangeNotParseable(expr.to_string());
    let mut out = BTreeSet::new();
    for group in expr.split(',') {
        if let Some((start, end)) = group.split_once(RANGE_OPERATOR) {
            let start = parse_integer(start).map_err(|_| not_parseable())?;
            let end = parse_integer(end).map_err(|_| not_parseable())?;
            let (lo, hi) = if start > end { (end, start) } else { (start, end) };
            for n in lo..=hi {
                out.insert(n.to_string());
            }
        } else {
            out.insert(parse_integer(group).map_err(|_| not_parseable())?.to_string());
        }
    }
    Ok(out)
}

fn expand_string(expr: &str) -> Result<BTreeSet<String>, ValueError> {
    if expr.contains(RANGE_OPERATOR) {
        return Err(ValueError::RangeNotSupported(expr.to_string()));
    }
    expr.split(',').map(parse_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn parse_date_accepts_common_forms() {
        assert_eq!(DimensionType::Date.parse_str("20111021").unwrap(), "20111021");
        assert_eq!(
            DimensionType::Date.parse_str("2011-02-01 10:02:00").unwrap(),
            "20110201"
        );
        assert_eq!(DimensionType::Date.parse_str("21-Sep-2011").unwrap(), "20110921");
        assert_eq!(DimensionType::Date.parse_str("Aug-1 2011").unwrap(), "20110801");
    }

    #[test]
    fn parse_date_is_idempotent() {
        let once = DimensionType::Date.parse_str("2011-08-01 10:02:00").unwrap();
        let twice = DimensionType::Date.parse_str(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn parse_date_rejects_garbage_and_invalid_calendar_days() {
        assert!(DimensionType::Date.parse_str("guess me!").is_err());
        assert!(DimensionType::Date.parse_str("").is_err());
        // Feb 29 of a non-leap year
        assert!(DimensionType::Date.parse_str("2011-02-29 10:30:00").is_err());
        assert!(DimensionType::Date.parse_str("20110230").is_err());
    }

    #[test]
    fn parse_week_snaps_to_monday() {
        assert_eq!(DimensionType::Week.parse_str("21-Sep-2011").unwrap(), "20110919");
        assert_eq!(DimensionType::Week.parse_str("19/9/2011").unwrap(), "20110919");
        let snapped = DimensionType::Week.parse_str("2011-09-01").unwrap();
        let date = NaiveDate::parse_from_str(&snapped, "%Y%m%d").unwrap();
        assert_eq!(date.weekday(), chrono::Weekday::Mon);
    }

    #[test]
    fn parse_month_and_year_truncate() {
        assert_eq!(DimensionType::Month.parse_str("23/2/2011").unwrap(), "20110201");
        assert_eq!(DimensionType::Month.parse_str("2/2011").unwrap(), "20110201");
        assert!(DimensionType::Month.parse_str("29-Feb-2011").is_err());
        assert_eq!(DimensionType::Year.parse_str("1-Feb-2011").unwrap(), "20110101");
        assert_eq!(DimensionType::Year.parse_str("2002").unwrap(), "20020101");
    }

    #[test]
    fn parse_string_trims_and_rejects_colon() {
        assert_eq!(DimensionType::String.parse_str("  sparse string ").unwrap(), "sparse string");
        assert_eq!(
            DimensionType::String.parse_str("a:b"),
            Err(ValueError::ColonNotAllowed("a:b".to_string()))
        );
    }

    #[test]
    fn parse_integer_canonicalizes() {
        assert_eq!(DimensionType::Integer.parse_str(" 012 ").unwrap(), "12");
        assert!(DimensionType::Integer.parse_str("twelve").is_err());
    }

    #[test]
    fn parse_value_accepts_json_numbers() {
        assert_eq!(DimensionType::Integer.parse_value(&Value::from(7)).unwrap(), "7");
        assert_eq!(DimensionType::String.parse_value(&Value::from(1)).unwrap(), "1");
        assert!(DimensionType::Integer.parse_value(&serde_json::json!({})).is_err());
    }

    #[test]
    fn expand_integer_groups_and_ranges() {
        assert_eq!(DimensionType::Integer.expand("1").unwrap(), set(&["1"]));
        assert_eq!(
            DimensionType::Integer.expand("1..5,10").unwrap(),
            set(&["1", "2", "3", "4", "5", "10"])
        );
        assert_eq!(
            DimensionType::Integer.expand("1..5,8..3").unwrap(),
            set(&["1", "2", "3", "4", "5", "6", "7", "8"])
        );
    }

    #[test]
    fn expand_integer_is_symmetric() {
        assert_eq!(
            DimensionType::Integer.expand("9..3").unwrap(),
            DimensionType::Integer.expand("3..9").unwrap()
        );
        assert_eq!(
            DimensionType::Integer.expand("2..10").unwrap(),
            set(&["2", "3", "4", "5", "6", "7", "8", "9", "10"])
        );
    }

    #[test]
    fn expand_integer_rejects_garbage() {
        assert_eq!(
            DimensionType::Integer.expand("try me"),
            Err(ValueError::IntegerRangeNotParseable("try me".to_string()))
        );
        assert_eq!(
            DimensionType::Integer.expand("1..a"),
            Err(ValueError::IntegerRangeNotParseable("1..a".to_string()))
        );
    }

    #[test]
    fn expand_string_splits_commas() {
        assert_eq!(DimensionType::String.expand("a,b,c").unwrap(), set(&["a", "b", "c"]));
        assert_eq!(
            DimensionType::String.expand("alpha, beta, gamma").unwrap(),
            set(&["alpha", "beta", "gamma"])
        );
        assert_eq!(DimensionType::String.expand("try me").unwrap(), set(&["try me"]));
    }

    #[test]
    fn expand_string_rejects_ranges_and_colons() {
        assert_eq!(
            DimensionType::String.expand("a..z"),
            Err(ValueError::RangeNotSupported("a..z".to_string()))
        );
        assert!(DimensionType::String.expand("has:colon, innocent").is_err());
    }

    #[test]
    fn expand_date_ranges() {
        assert_eq!(DimensionType::Date.expand("Aug-1 2011").unwrap(), set(&["20110801"]));
        assert_eq!(
            DimensionType::Date.expand("20110709..20110712").unwrap(),
            set(&["20110709", "20110710", "20110711", "20110712"])
        );
        // month boundary
        assert_eq!(
            DimensionType::Date.expand("20110228..20110302").unwrap(),
            set(&["20110228", "20110301", "20110302"])
        );
        assert!(DimensionType::Date.expand("20110230").is_err());
    }

    #[test]
    fn expand_date_reversed_range_yields_same_set() {
        assert_eq!(
            DimensionType::Date.expand("2011-8-4..2011-8-2").unwrap(),
            DimensionType::Date.expand("2011-8-2..2011-8-4").unwrap()
        );
    }

    #[test]
    fn expand_week_snaps_endpoints() {
        assert_eq!(DimensionType::Week.expand("Sep-1 2011").unwrap(), set(&["20110829"]));
        assert_eq!(
            DimensionType::Week.expand("20110901..20110914").unwrap(),
            set(&["20110829", "20110905", "20110912"])
        );
    }

    #[test]
    fn expand_month_steps_calendar_months() {
        assert_eq!(
            DimensionType::Month.expand("Sep-2011..Feb-2012").unwrap(),
            set(&["20110901", "20111001", "20111101", "20111201", "20120101", "20120201"])
        );
    }

    #[test]
    fn expand_year_steps_years() {
        assert_eq!(
            DimensionType::Year.expand("2011..2014").unwrap(),
            set(&["20110101", "20120101", "20130101", "20140101"])
        );
        assert_eq!(
            DimensionType::Year.expand("2011..2009").unwrap(),
            set(&["20090101", "20100101", "20110101"])
        );
    }
}
