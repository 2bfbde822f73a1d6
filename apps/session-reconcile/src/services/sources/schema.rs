//! Boundary parsing from loosely typed adapter batches into session summaries.
//!
//! Adapters hand over columns of optional strings. Column names are resolved through an
//! alias table (warehouse exports name the same field several ways), then each row is
//! type-checked. A missing required column or an unparseable required value fails the
//! whole batch; there is no partial output.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;
use crate::services::reconcile::aggregate::aggregate_sessions;
use crate::services::reconcile::dimensions::{
    classify_user_agent, country_display_name, dimension_or_not_set, is_bot_user_agent,
};
use crate::services::reconcile::types::{DeviceCategory, RawEvent, SessionSummary, SourceSide};
use crate::time::{DateRange, FetchWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grain {
    /// One row per analytics event; folded into sessions by the aggregator.
    Events,
    /// One row per session, already aggregated upstream.
    Sessions,
}

impl Grain {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::Sessions => "sessions",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TabularBatch {
    pub grain: Grain,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl TabularBatch {
    pub fn new(grain: Grain, columns: Vec<String>) -> Self {
        Self {
            grain,
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row<I, S>(&mut self, values: I)
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        self.rows.push(values.into_iter().map(|value| value.map(Into::into)).collect());
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Column {
    SessionId,
    StartTimestamp,
    EventTimestamp,
    EventName,
    DeviceCategory,
    OperatingSystem,
    Browser,
    Country,
    TrafficSource,
    EventCount,
    HasPurchase,
    EngagementTime,
    UserAgent,
}

impl Column {
    fn canonical(self) -> &'static str {
        self.aliases()[0]
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::SessionId => &["session_id", "ga_session_id"],
            Self::StartTimestamp => &["start_timestamp", "session_start_ts", "session_start"],
            Self::EventTimestamp => &["event_timestamp", "timestamp", "event_ts"],
            Self::EventName => &["event_name"],
            Self::DeviceCategory => &["device_category", "device"],
            Self::OperatingSystem => &["operating_system", "device_operating_system", "os"],
            Self::Browser => &["browser", "device_browser"],
            Self::Country => &["country", "geo_country", "geo_country_code"],
            Self::TrafficSource => &["traffic_source", "session_source", "source"],
            Self::EventCount => &["event_count", "events"],
            Self::HasPurchase => &["has_purchase", "purchase", "is_purchase"],
            Self::EngagementTime => &["engagement_time", "engagement_time_msec", "engagement_msec"],
            Self::UserAgent => &["user_agent"],
        }
    }
}

struct ColumnIndex {
    positions: HashMap<Column, usize>,
    available: String,
}

impl ColumnIndex {
    fn resolve(columns: &[String]) -> Self {
        let normalized: Vec<String> = columns.iter().map(|c| c.trim().to_ascii_lowercase()).collect();
        let all = [
            Column::SessionId,
            Column::StartTimestamp,
            Column::EventTimestamp,
            Column::EventName,
            Column::DeviceCategory,
            Column::OperatingSystem,
            Column::Browser,
            Column::Country,
            Column::TrafficSource,
            Column::EventCount,
            Column::HasPurchase,
            Column::EngagementTime,
            Column::UserAgent,
        ];
        let positions = all
            .into_iter()
            .filter_map(|column| {
                column
                    .aliases()
                    .iter()
                    .find_map(|alias| normalized.iter().position(|name| name == alias))
                    .map(|pos| (column, pos))
            })
            .collect();
        Self {
            positions,
            available: columns.join(", "),
        }
    }

    fn get(&self, column: Column) -> Option<usize> {
        self.positions.get(&column).copied()
    }
}

/// Batch-level context for error reporting.
struct BatchContext<'a> {
    side: SourceSide,
    label: &'a str,
    range: Option<DateRange>,
    index: ColumnIndex,
}

impl BatchContext<'_> {
    fn require(&self, column: Column) -> Result<usize, ReconcileError> {
        self.index.get(column).ok_or_else(|| ReconcileError::SchemaMismatch {
            side: self.side,
            label: self.label.to_string(),
            range: self.range,
            column: column.canonical().to_string(),
            available: self.index.available.clone(),
        })
    }

    fn invalid(&self, row: usize, column: Column, reason: impl Into<String>) -> ReconcileError {
        ReconcileError::InvalidRow {
            side: self.side,
            label: self.label.to_string(),
            range: self.range,
            row: row + 1,
            column: column.canonical().to_string(),
            reason: reason.into(),
        }
    }
}

fn cell(row: &[Option<String>], pos: Option<usize>) -> Option<&str> {
    pos.and_then(|p| row.get(p))
        .and_then(|value| value.as_deref())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.trim_start_matches('-').bytes().all(|b| b.is_ascii_digit()) {
        let micros: i64 = trimmed
            .parse()
            .map_err(|_| format!("epoch value `{trimmed}` out of range"))?;
        return DateTime::<Utc>::from_timestamp_micros(micros)
            .ok_or_else(|| format!("epoch microseconds `{trimmed}` out of range"));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, format) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!("unrecognized timestamp `{trimmed}`"))
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Some(true),
        "false" | "f" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// Engagement in milliseconds; missing, malformed or negative values count as zero.
pub fn parse_engagement_ms(raw: Option<&str>) -> Duration {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        .map(|ms| Duration::from_micros((ms * 1000.0).round() as u64))
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct ParseOptions<'a> {
    pub purchase_event_name: &'a str,
    pub exclude_bot_user_agents: bool,
    pub window: Option<&'a FetchWindow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    pub rows: u64,
    pub bot_rows_excluded: u64,
    pub empty_session_ids: u64,
    pub duplicate_sessions: u64,
    pub out_of_window: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSessions {
    pub sessions: Vec<SessionSummary>,
    pub stats: ParseStats,
}

/// Attribute columns shared by both grains, with user-agent classification filling any
/// device/OS/browser column the batch does not carry.
struct Attributes {
    device: Option<usize>,
    os: Option<usize>,
    browser: Option<usize>,
    country: usize,
    traffic_source: Option<usize>,
    user_agent: Option<usize>,
}

impl Attributes {
    fn resolve(ctx: &BatchContext<'_>) -> Result<Self, ReconcileError> {
        let user_agent = ctx.index.get(Column::UserAgent);
        let device = ctx.index.get(Column::DeviceCategory);
        let os = ctx.index.get(Column::OperatingSystem);
        let browser = ctx.index.get(Column::Browser);
        if user_agent.is_none() {
            ctx.require(Column::DeviceCategory)?;
            ctx.require(Column::OperatingSystem)?;
            ctx.require(Column::Browser)?;
        }
        Ok(Self {
            device,
            os,
            browser,
            country: ctx.require(Column::Country)?,
            traffic_source: ctx.index.get(Column::TrafficSource),
            user_agent,
        })
    }

    fn read(
        &self,
        ctx: &BatchContext<'_>,
        row_idx: usize,
        row: &[Option<String>],
    ) -> Result<(DeviceCategory, String, String, String, Option<String>), ReconcileError> {
        let ua = (self.device.is_none() || self.os.is_none() || self.browser.is_none())
            .then(|| classify_user_agent(cell(row, self.user_agent)));

        let device = match (self.device, &ua) {
            (Some(pos), _) => {
                let raw = cell(row, Some(pos))
                    .ok_or_else(|| ctx.invalid(row_idx, Column::DeviceCategory, "missing value"))?;
                DeviceCategory::parse(raw).ok_or_else(|| {
                    ctx.invalid(
                        row_idx,
                        Column::DeviceCategory,
                        format!("`{raw}` is not one of desktop, mobile, tablet"),
                    )
                })?
            }
            (None, Some(class)) => class.device_category,
            (None, None) => return Err(ctx.invalid(row_idx, Column::DeviceCategory, "missing value")),
        };
        let os = match (self.os, &ua) {
            (Some(pos), _) => dimension_or_not_set(cell(row, Some(pos))),
            (None, Some(class)) => class.operating_system.clone(),
            (None, None) => dimension_or_not_set(None),
        };
        let browser = match (self.browser, &ua) {
            (Some(pos), _) => dimension_or_not_set(cell(row, Some(pos))),
            (None, Some(class)) => class.browser.clone(),
            (None, None) => dimension_or_not_set(None),
        };
        let country = country_display_name(cell(row, Some(self.country)));
        let traffic_source = cell(row, self.traffic_source).map(str::to_string);
        Ok((device, os, browser, country, traffic_source))
    }

    fn is_bot(&self, row: &[Option<String>]) -> bool {
        cell(row, self.user_agent).is_some_and(is_bot_user_agent)
    }
}

fn in_window(window: Option<&FetchWindow>, ts: DateTime<Utc>) -> bool {
    window.map_or(true, |w| w.contains(ts))
}

/// Parses an event-grain batch. Rows with an empty session id are skipped and counted.
pub fn parse_events(
    side: SourceSide,
    label: &str,
    batch: &TabularBatch,
    options: &ParseOptions<'_>,
) -> Result<(Vec<RawEvent>, ParseStats), ReconcileError> {
    let ctx = BatchContext {
        side,
        label,
        range: options.window.map(|window| window.range),
        index: ColumnIndex::resolve(&batch.columns),
    };
    let session_id = ctx.require(Column::SessionId)?;
    let timestamp = ctx.require(Column::EventTimestamp)?;
    let purchase = ctx.index.get(Column::HasPurchase);
    let event_name = if purchase.is_some() {
        ctx.index.get(Column::EventName)
    } else {
        Some(ctx.require(Column::EventName)?)
    };
    let engagement = ctx.index.get(Column::EngagementTime);
    let attributes = Attributes::resolve(&ctx)?;

    let mut stats = ParseStats::default();
    let mut events = Vec::with_capacity(batch.len());
    for (row_idx, row) in batch.rows.iter().enumerate() {
        stats.rows += 1;
        if options.exclude_bot_user_agents && attributes.is_bot(row) {
            stats.bot_rows_excluded += 1;
            continue;
        }
        let Some(id) = cell(row, Some(session_id)) else {
            stats.empty_session_ids += 1;
            continue;
        };
        let raw_ts = cell(row, Some(timestamp))
            .ok_or_else(|| ctx.invalid(row_idx, Column::EventTimestamp, "missing value"))?;
        let ts = parse_timestamp(raw_ts).map_err(|reason| ctx.invalid(row_idx, Column::EventTimestamp, reason))?;
        if !in_window(options.window, ts) {
            stats.out_of_window += 1;
            continue;
        }
        let purchase_flag = match cell(row, purchase) {
            Some(raw) => parse_bool(raw)
                .ok_or_else(|| ctx.invalid(row_idx, Column::HasPurchase, format!("`{raw}` is not a boolean")))?,
            None => false,
        };
        let (device_category, operating_system, browser, country, traffic_source) =
            attributes.read(&ctx, row_idx, row)?;

        events.push(RawEvent {
            side,
            session_id: id.to_string(),
            timestamp: ts,
            event_name: cell(row, event_name).unwrap_or_default().to_string(),
            device_category,
            operating_system,
            browser,
            country,
            traffic_source,
            purchase: purchase_flag,
            engagement_time: parse_engagement_ms(cell(row, engagement)),
        });
    }
    Ok((events, stats))
}

/// Parses a session-grain batch. Every row must carry a session id; repeated ids keep the
/// first row.
pub fn parse_sessions(
    side: SourceSide,
    label: &str,
    batch: &TabularBatch,
    options: &ParseOptions<'_>,
) -> Result<ParsedSessions, ReconcileError> {
    let ctx = BatchContext {
        side,
        label,
        range: options.window.map(|window| window.range),
        index: ColumnIndex::resolve(&batch.columns),
    };
    let session_id = ctx.require(Column::SessionId)?;
    let start = ctx.require(Column::StartTimestamp)?;
    let attributes = Attributes::resolve(&ctx)?;
    ctx.require(Column::TrafficSource)?;
    let event_count = ctx.require(Column::EventCount)?;
    let has_purchase = ctx.require(Column::HasPurchase)?;
    let engagement = ctx.require(Column::EngagementTime)?;

    let mut stats = ParseStats::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut sessions = Vec::with_capacity(batch.len());
    for (row_idx, row) in batch.rows.iter().enumerate() {
        stats.rows += 1;
        if options.exclude_bot_user_agents && attributes.is_bot(row) {
            stats.bot_rows_excluded += 1;
            continue;
        }
        let id = cell(row, Some(session_id))
            .ok_or_else(|| ctx.invalid(row_idx, Column::SessionId, "missing value"))?;
        let raw_ts = cell(row, Some(start))
            .ok_or_else(|| ctx.invalid(row_idx, Column::StartTimestamp, "missing value"))?;
        let ts = parse_timestamp(raw_ts).map_err(|reason| ctx.invalid(row_idx, Column::StartTimestamp, reason))?;
        if !in_window(options.window, ts) {
            stats.out_of_window += 1;
            continue;
        }
        let events = match cell(row, Some(event_count)) {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| ctx.invalid(row_idx, Column::EventCount, format!("`{raw}` is not a count")))?,
            None => 0,
        };
        let purchased = match cell(row, Some(has_purchase)) {
            Some(raw) => parse_bool(raw)
                .ok_or_else(|| ctx.invalid(row_idx, Column::HasPurchase, format!("`{raw}` is not a boolean")))?,
            None => false,
        };
        let (device_category, operating_system, browser, country, traffic_source) =
            attributes.read(&ctx, row_idx, row)?;

        if !seen.insert(id.to_string()) {
            stats.duplicate_sessions += 1;
            continue;
        }
        sessions.push(SessionSummary {
            side,
            session_id: id.to_string(),
            start_timestamp: ts,
            device_category,
            operating_system,
            browser,
            country,
            traffic_source,
            event_count: events,
            has_purchase: purchased,
            engagement_time: parse_engagement_ms(cell(row, Some(engagement))),
        });
    }

    if stats.duplicate_sessions > 0 {
        tracing::warn!(
            side = %side,
            source = label,
            duplicates = stats.duplicate_sessions,
            "duplicate session rows ignored; first occurrence kept"
        );
    }
    Ok(ParsedSessions { sessions, stats })
}

/// Parses a batch of either grain into one summary per session.
pub fn to_session_summaries(
    side: SourceSide,
    label: &str,
    batch: &TabularBatch,
    options: &ParseOptions<'_>,
) -> Result<ParsedSessions, ReconcileError> {
    let parsed = match batch.grain {
        Grain::Sessions => parse_sessions(side, label, batch, options)?,
        Grain::Events => {
            let (events, stats) = parse_events(side, label, batch, options)?;
            ParsedSessions {
                sessions: aggregate_sessions(side, &events, options.purchase_event_name),
                stats,
            }
        }
    };

    if parsed.stats.bot_rows_excluded > 0 || parsed.stats.empty_session_ids > 0 {
        tracing::info!(
            side = %side,
            source = label,
            bot_rows = parsed.stats.bot_rows_excluded,
            empty_session_ids = parsed.stats.empty_session_ids,
            "rows skipped while parsing"
        );
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{resolve_fetch_window, DateRange};
    use chrono::{NaiveDate, TimeZone};

    fn options() -> ParseOptions<'static> {
        ParseOptions {
            purchase_event_name: "purchase",
            exclude_bot_user_agents: true,
            window: None,
        }
    }

    fn session_batch() -> TabularBatch {
        TabularBatch::new(
            Grain::Sessions,
            [
                "ga_session_id",
                "session_start_ts",
                "device_category",
                "device_operating_system",
                "device_browser",
                "geo_country",
                "traffic_source",
                "event_count",
                "has_purchase",
                "engagement_time_msec",
            ]
            .map(String::from)
            .to_vec(),
        )
    }

    #[test]
    fn parses_timestamps_in_supported_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 6, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2026-01-06T10:00:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-01-06 21:00:00+11:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-01-06 10:00:00+00").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-01-06 10:00:00").unwrap(), expected);
        assert_eq!(
            parse_timestamp("1767693600000000").unwrap(),
            expected
        );
        assert_eq!(
            parse_timestamp("2026-01-06 10:00:00.250").unwrap().timestamp_subsec_millis(),
            250
        );
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn engagement_defaults_to_zero() {
        assert_eq!(parse_engagement_ms(Some("1500")), Duration::from_millis(1500));
        assert_eq!(parse_engagement_ms(Some("12.5")), Duration::from_micros(12_500));
        assert_eq!(parse_engagement_ms(Some("-3")), Duration::ZERO);
        assert_eq!(parse_engagement_ms(Some("n/a")), Duration::ZERO);
        assert_eq!(parse_engagement_ms(None), Duration::ZERO);
    }

    #[test]
    fn parses_session_rows_through_aliases() {
        let mut batch = session_batch();
        batch.push_row([
            Some("s1"),
            Some("2026-01-06 10:00:00"),
            Some("Desktop"),
            Some("Windows"),
            Some("Chrome"),
            Some("AU"),
            None,
            Some("4"),
            Some("true"),
            Some("2500"),
        ]);
        let parsed = parse_sessions(SourceSide::A, "sst", &batch, &options()).unwrap();
        let s = &parsed.sessions[0];
        assert_eq!(s.device_category, DeviceCategory::Desktop);
        assert_eq!(s.country, "Australia");
        assert_eq!(s.traffic_source, None);
        assert_eq!(s.event_count, 4);
        assert!(s.has_purchase);
        assert_eq!(s.engagement_time, Duration::from_millis(2500));
    }

    #[test]
    fn missing_column_is_schema_mismatch() {
        let batch = TabularBatch::new(
            Grain::Sessions,
            vec!["session_id".to_string(), "country".to_string()],
        );
        let err = parse_sessions(SourceSide::B, "direct", &batch, &options()).unwrap_err();
        match err {
            ReconcileError::SchemaMismatch { column, available, .. } => {
                assert_eq!(column, "start_timestamp");
                assert_eq!(available, "session_id, country");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn bad_device_fails_with_row_context() {
        let mut batch = session_batch();
        batch.push_row([
            Some("s1"),
            Some("2026-01-06 10:00:00"),
            Some("smart-tv"),
            Some("Windows"),
            Some("Chrome"),
            Some("AU"),
            None,
            Some("1"),
            Some("false"),
            None,
        ]);
        let err = parse_sessions(SourceSide::A, "sst", &batch, &options()).unwrap_err();
        match err {
            ReconcileError::InvalidRow { row, column, .. } => {
                assert_eq!(row, 1);
                assert_eq!(column, "device_category");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn duplicate_session_rows_keep_first() {
        let mut batch = session_batch();
        for os in ["Windows", "Linux"] {
            batch.push_row([
                Some("s1"),
                Some("2026-01-06 10:00:00"),
                Some("desktop"),
                Some(os),
                Some("Chrome"),
                Some("AU"),
                None,
                Some("1"),
                Some("0"),
                None,
            ]);
        }
        let parsed = parse_sessions(SourceSide::A, "sst", &batch, &options()).unwrap();
        assert_eq!(parsed.sessions.len(), 1);
        assert_eq!(parsed.sessions[0].operating_system, "Windows");
        assert_eq!(parsed.stats.duplicate_sessions, 1);
    }

    #[test]
    fn event_rows_classify_user_agents_and_drop_bots() {
        let mut batch = TabularBatch::new(
            Grain::Events,
            ["ga_session_id", "timestamp", "event_name", "user_agent", "geo_country_code"]
                .map(String::from)
                .to_vec(),
        );
        let iphone = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1";
        batch.push_row([Some("s1"), Some("1767693600000000"), Some("page_view"), Some(iphone), Some("NZ")]);
        batch.push_row([Some("s1"), Some("1767693605000000"), Some("purchase"), Some(iphone), Some("NZ")]);
        batch.push_row([Some("s2"), Some("1767693600000000"), Some("page_view"), Some("Googlebot/2.1"), Some("US")]);
        batch.push_row([Some(""), Some("1767693600000000"), Some("page_view"), Some(iphone), Some("NZ")]);

        let parsed = to_session_summaries(SourceSide::A, "sst", &batch, &options()).unwrap();
        assert_eq!(parsed.sessions.len(), 1);
        let s = &parsed.sessions[0];
        assert_eq!(s.device_category, DeviceCategory::Mobile);
        assert_eq!(s.operating_system, "iOS");
        assert_eq!(s.browser, "Safari");
        assert_eq!(s.country, "New Zealand");
        assert_eq!(s.event_count, 2);
        assert!(s.has_purchase);
        assert_eq!(parsed.stats.bot_rows_excluded, 1);
        assert_eq!(parsed.stats.empty_session_ids, 1);
    }

    #[test]
    fn rows_outside_window_are_filtered() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2026, 1, 6).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 6).unwrap(),
        )
        .unwrap();
        let window = resolve_fetch_window(&Utc, range).unwrap();
        let mut batch = session_batch();
        for (id, ts) in [("in", "2026-01-06 23:59:59"), ("out", "2026-01-07 00:00:00")] {
            batch.push_row([
                Some(id),
                Some(ts),
                Some("mobile"),
                Some("Android"),
                Some("Chrome"),
                Some("Australia"),
                Some("google"),
                Some("1"),
                Some("no"),
                Some("10"),
            ]);
        }
        let opts = ParseOptions {
            window: Some(&window),
            ..options()
        };
        let parsed = parse_sessions(SourceSide::B, "direct", &batch, &opts).unwrap();
        assert_eq!(parsed.sessions.len(), 1);
        assert_eq!(parsed.sessions[0].session_id, "in");
        assert_eq!(parsed.stats.out_of_window, 1);
    }
}
