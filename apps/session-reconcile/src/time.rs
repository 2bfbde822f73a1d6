use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;

/// Inclusive calendar-date range, interpreted in the configured reporting time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ReconcileError> {
        if end < start {
            return Err(ReconcileError::InvalidRange(format!(
                "end date {end} is before start date {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Accepts `YYYY-MM-DD` or the compact `YYYYMMDD` form used by analytics exports.
    pub fn parse(start: &str, end: &str) -> Result<Self, ReconcileError> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn days(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|day| *day <= self.end)
            .collect()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, ReconcileError> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y%m%d"))
        .map_err(|_| ReconcileError::InvalidRange(format!("unparseable date `{raw}`")))
}

/// UTC instants bounding a [`DateRange`] in a local time zone: `[start_utc, end_utc)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    pub range: DateRange,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub warnings: Vec<String>,
}

impl FetchWindow {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start_utc && ts < self.end_utc
    }
}

/// Resolves the first local midnight of the range and the local midnight after its last day.
///
/// Midnights that fall into a DST gap resolve to the next valid local instant; repeated
/// midnights resolve to the earlier instant. Either case is reported in `warnings`.
pub fn resolve_fetch_window<Tz: TimeZone>(
    tz: &Tz,
    range: DateRange,
) -> Result<FetchWindow, ReconcileError> {
    let end_exclusive = range
        .end
        .succ_opt()
        .ok_or_else(|| ReconcileError::InvalidRange(format!("end date {} overflows", range.end)))?;

    let mut warnings = Vec::new();
    let start_utc = resolve_local_instant(tz, range.start.and_time(chrono::NaiveTime::MIN), &mut warnings)?;
    let end_utc = resolve_local_instant(tz, end_exclusive.and_time(chrono::NaiveTime::MIN), &mut warnings)?;
    if end_utc <= start_utc {
        return Err(ReconcileError::InvalidRange(format!(
            "range {range} resolves to an empty UTC window"
        )));
    }

    Ok(FetchWindow {
        range,
        start_utc,
        end_utc,
        warnings,
    })
}

fn resolve_local_instant<Tz: TimeZone>(
    tz: &Tz,
    naive: NaiveDateTime,
    warnings: &mut Vec<String>,
) -> Result<DateTime<Utc>, ReconcileError> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        chrono::LocalResult::Ambiguous(a, b) => {
            let earlier = a.with_timezone(&Utc).min(b.with_timezone(&Utc));
            warnings.push(format!(
                "Ambiguous local datetime {naive} resolved to earlier instance {}",
                earlier.to_rfc3339()
            ));
            Ok(earlier)
        }
        chrono::LocalResult::None => {
            const SEARCH_MINUTES: i64 = 180;
            let next = find_next_valid_local(tz, naive, SEARCH_MINUTES).ok_or_else(|| {
                ReconcileError::InvalidRange(format!("no valid local datetime found after {naive}"))
            })?;
            warnings.push(format!(
                "Local datetime {naive} falls in a DST gap; using next valid instant {}",
                next.to_rfc3339()
            ));
            Ok(next)
        }
    }
}

fn find_next_valid_local<Tz: TimeZone>(
    tz: &Tz,
    naive: NaiveDateTime,
    search_minutes: i64,
) -> Option<DateTime<Utc>> {
    (1..=search_minutes).find_map(|minutes| {
        tz.from_local_datetime(&(naive + Duration::minutes(minutes)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Local calendar position of a UTC instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalParts {
    pub date: NaiveDate,
    pub hour: u32,
    pub weekday: Weekday,
}

impl LocalParts {
    pub fn is_weekend(&self) -> bool {
        matches!(self.weekday, Weekday::Sat | Weekday::Sun)
    }
}

pub fn local_parts<Tz: TimeZone>(tz: &Tz, ts: DateTime<Utc>) -> LocalParts {
    let local = ts.with_timezone(tz);
    LocalParts {
        date: local.date_naive(),
        hour: local.hour(),
        weekday: local.weekday(),
    }
}
