use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::time::DateRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSide {
    A,
    B,
}

impl SourceSide {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

impl fmt::Display for SourceSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceCategory {
    pub const ALL: [DeviceCategory; 3] = [Self::Desktop, Self::Mobile, Self::Tablet];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "desktop" => Some(Self::Desktop),
            "mobile" => Some(Self::Mobile),
            "tablet" => Some(Self::Tablet),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One analytics event row, already normalized by a source adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub side: SourceSide,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_name: String,
    pub device_category: DeviceCategory,
    pub operating_system: String,
    pub browser: String,
    /// Country display name ("United States"), never an ISO code.
    pub country: String,
    pub traffic_source: Option<String>,
    pub purchase: bool,
    pub engagement_time: Duration,
}

/// One row per session per source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub side: SourceSide,
    pub session_id: String,
    pub start_timestamp: DateTime<Utc>,
    pub device_category: DeviceCategory,
    pub operating_system: String,
    pub browser: String,
    pub country: String,
    pub traffic_source: Option<String>,
    pub event_count: u64,
    pub has_purchase: bool,
    #[serde(with = "duration_millis")]
    pub engagement_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionCategory {
    Both,
    AOnly,
    BOnly,
}

impl SessionCategory {
    pub const ALL: [SessionCategory; 3] = [Self::Both, Self::AOnly, Self::BOnly];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Both => "both",
            Self::AOnly => "a_only",
            Self::BOnly => "b_only",
        }
    }

    pub fn only(side: SourceSide) -> Self {
        match side {
            SourceSide::A => Self::AOnly,
            SourceSide::B => Self::BOnly,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "both" => Some(Self::Both),
            "a_only" | "a-only" => Some(Self::AOnly),
            "b_only" | "b-only" => Some(Self::BOnly),
            _ => None,
        }
    }
}

impl fmt::Display for SessionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session with its category. For `Both`, attributes come from the canonical side and
/// `counterpart_id` holds the other side's session id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSession {
    pub category: SessionCategory,
    pub session: SessionSummary,
    pub counterpart_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub both: u64,
    pub a_only: u64,
    pub b_only: u64,
    pub total: u64,
}

impl CategoryTotals {
    pub fn get(&self, category: SessionCategory) -> u64 {
        match category {
            SessionCategory::Both => self.both,
            SessionCategory::AOnly => self.a_only,
            SessionCategory::BOnly => self.b_only,
        }
    }

    pub fn share_pct(&self, category: SessionCategory) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.get(category) as f64 / self.total as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub both: u64,
    pub a_only: u64,
    pub b_only: u64,
}

impl CategoryCounts {
    pub fn increment(&mut self, category: SessionCategory) {
        match category {
            SessionCategory::Both => self.both += 1,
            SessionCategory::AOnly => self.a_only += 1,
            SessionCategory::BOnly => self.b_only += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.both + self.a_only + self.b_only
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub counts: CategoryCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyCount {
    pub hour: u32,
    #[serde(flatten)]
    pub counts: CategoryCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLabels {
    pub a: String,
    pub b: String,
}

impl SourceLabels {
    pub fn get(&self, side: SourceSide) -> &str {
        match side {
            SourceSide::A => &self.a,
            SourceSide::B => &self.b,
        }
    }
}

/// Content fingerprints of the two inputs. An empty fingerprint means the source could
/// not describe its content and is identified by label alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceFingerprints {
    pub a: String,
    pub b: String,
}

/// Parameters a result was computed with; part of the cache identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    pub time_window_seconds: u64,
    pub timezone: String,
    pub canonical_side: SourceSide,
    pub purchase_event_name: String,
    #[serde(default)]
    pub exclude_bot_user_agents: bool,
    #[serde(default)]
    pub business_hours_start: u32,
    #[serde(default)]
    pub business_hours_end: u32,
    /// Sorted by name, so the order specs were configured in does not matter.
    #[serde(default)]
    pub composites: Vec<super::profile::CompositeShareSpec>,
}

/// Row-level anomalies observed while aggregating, kept alongside the result for audit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub a_rows: u64,
    pub b_rows: u64,
    pub a_sessions: u64,
    pub b_sessions: u64,
    pub bot_rows_excluded: u64,
    pub empty_session_ids: u64,
    pub out_of_range_rows: u64,
    pub ties: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub range: DateRange,
    pub labels: SourceLabels,
    pub params: RunParams,
    pub totals: CategoryTotals,
    pub profiles: BTreeMap<SessionCategory, super::profile::CategoryProfile>,
    pub daily: Vec<DailyCount>,
    pub hourly: Vec<HourlyCount>,
    pub hourly_weekday: Vec<HourlyCount>,
    pub hourly_weekend: Vec<HourlyCount>,
    pub parity: super::parity::ParityReport,
    pub diagnostics: Diagnostics,
    pub computed_at: DateTime<Utc>,
}

impl ReconciliationResult {
    pub fn profile(&self, category: SessionCategory) -> Option<&super::profile::CategoryProfile> {
        self.profiles.get(&category)
    }
}

/// Full output of one run: the summary plus every labelled session.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub result: ReconciliationResult,
    pub sessions: Vec<LabeledSession>,
}

pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
