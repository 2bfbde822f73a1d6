use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::categorize::CategorizedSessions;
use super::dimensions::{country_key, dimension_key, NOT_SET};
use super::types::{SessionCategory, SessionSummary};
use crate::time::local_parts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Device,
    OperatingSystem,
    Browser,
    Country,
    TrafficSource,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Self::Device,
        Self::OperatingSystem,
        Self::Browser,
        Self::Country,
        Self::TrafficSource,
    ];

    fn prefix(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::OperatingSystem => "os",
            Self::Browser => "browser",
            Self::Country => "country",
            Self::TrafficSource => "traffic_source",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|dim| dim.prefix() == prefix)
    }

    pub fn value_of(self, session: &SessionSummary) -> &str {
        match self {
            Self::Device => session.device_category.as_str(),
            Self::OperatingSystem => &session.operating_system,
            Self::Browser => &session.browser,
            Self::Country => &session.country,
            Self::TrafficSource => session.traffic_source.as_deref().unwrap_or(NOT_SET),
        }
    }

    fn key(self, value: &str) -> String {
        match self {
            Self::Country => country_key(value),
            _ => dimension_key(value),
        }
    }
}

/// Addressable profile metric, written as e.g. `os_pct.windows`, `country_count.china`,
/// `purchase_rate` or `composite_pct.desktop_windows`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MetricKey {
    Sessions,
    Share(Dimension, String),
    Count(Dimension, String),
    PurchaseRate,
    AvgEngagementSec,
    AvgEventCount,
    BusinessHoursPct,
    Composite(String),
}

impl MetricKey {
    pub fn share(dimension: Dimension, value: &str) -> Self {
        Self::Share(dimension, value.to_string())
    }

    pub fn count(dimension: Dimension, value: &str) -> Self {
        Self::Count(dimension, value.to_string())
    }

    /// Count form of a share metric; other metrics are returned unchanged.
    pub fn as_count(&self) -> Self {
        match self {
            Self::Share(dim, value) => Self::Count(*dim, value.clone()),
            other => other.clone(),
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sessions => f.write_str("sessions"),
            Self::Share(dim, value) => write!(f, "{}_pct.{}", dim.prefix(), dim.key(value)),
            Self::Count(dim, value) => write!(f, "{}_count.{}", dim.prefix(), dim.key(value)),
            Self::PurchaseRate => f.write_str("purchase_rate"),
            Self::AvgEngagementSec => f.write_str("avg_engagement_sec"),
            Self::AvgEventCount => f.write_str("avg_event_count"),
            Self::BusinessHoursPct => f.write_str("business_hours_pct"),
            Self::Composite(name) => write!(f, "composite_pct.{name}"),
        }
    }
}

impl FromStr for MetricKey {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        match trimmed {
            "sessions" => return Ok(Self::Sessions),
            "purchase_rate" => return Ok(Self::PurchaseRate),
            "avg_engagement_sec" => return Ok(Self::AvgEngagementSec),
            "avg_event_count" => return Ok(Self::AvgEventCount),
            "business_hours_pct" => return Ok(Self::BusinessHoursPct),
            _ => {}
        }
        let (head, value) = trimmed
            .split_once('.')
            .ok_or_else(|| format!("unknown metric `{raw}`"))?;
        if value.is_empty() {
            return Err(format!("metric `{raw}` is missing a value"));
        }
        if head == "composite_pct" {
            return Ok(Self::Composite(value.to_string()));
        }
        if let Some(prefix) = head.strip_suffix("_pct") {
            if let Some(dim) = Dimension::from_prefix(prefix) {
                return Ok(Self::Share(dim, value.to_string()));
            }
        }
        if let Some(prefix) = head.strip_suffix("_count") {
            if let Some(dim) = Dimension::from_prefix(prefix) {
                return Ok(Self::Count(dim, value.to_string()));
            }
        }
        Err(format!("unknown metric `{raw}`"))
    }
}

impl TryFrom<String> for MetricKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MetricKey> for String {
    fn from(value: MetricKey) -> Self {
        value.to_string()
    }
}

/// A named share of sessions whose attributes all fall in the listed value sets.
/// Unset lists do not constrain; comparison is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompositeShareSpec {
    pub name: String,
    #[serde(default)]
    pub device_categories: Option<Vec<String>>,
    #[serde(default)]
    pub operating_systems: Option<Vec<String>>,
    #[serde(default)]
    pub browsers: Option<Vec<String>>,
}

impl CompositeShareSpec {
    pub fn extension_capable_browser(browsers: &[String]) -> Self {
        Self {
            name: "extension_capable_browser".to_string(),
            device_categories: None,
            operating_systems: None,
            browsers: Some(browsers.to_vec()),
        }
    }

    pub fn desktop_windows() -> Self {
        Self {
            name: "desktop_windows".to_string(),
            device_categories: Some(vec!["desktop".to_string()]),
            operating_systems: Some(vec!["Windows".to_string()]),
            browsers: None,
        }
    }

    pub fn matches(&self, session: &SessionSummary) -> bool {
        fn allowed(set: &Option<Vec<String>>, value: &str) -> bool {
            set.as_ref().map_or(true, |values| {
                let key = dimension_key(value);
                values.iter().any(|candidate| dimension_key(candidate) == key)
            })
        }
        allowed(&self.device_categories, session.device_category.as_str())
            && allowed(&self.operating_systems, &session.operating_system)
            && allowed(&self.browsers, &session.browser)
    }
}

#[derive(Debug, Clone)]
pub struct ProfileOptions {
    pub timezone: Tz,
    pub business_hours_start: u32,
    pub business_hours_end: u32,
    pub composites: Vec<CompositeShareSpec>,
}

impl ProfileOptions {
    fn is_business_hour(&self, hour: u32) -> bool {
        if self.business_hours_start <= self.business_hours_end {
            hour >= self.business_hours_start && hour < self.business_hours_end
        } else {
            hour >= self.business_hours_start || hour < self.business_hours_end
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub count: u64,
    pub pct: f64,
}

/// Distribution of one dimension, keyed by display value. Values that differ only in case
/// (or, for countries, code versus name) share one entry.
pub type Distribution = BTreeMap<String, Share>;

/// Distributional statistics of one session category. An empty category has every metric
/// at zero and empty distributions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryProfile {
    pub sessions: u64,
    pub device: Distribution,
    pub operating_system: Distribution,
    pub browser: Distribution,
    pub country: Distribution,
    pub traffic_source: Distribution,
    pub purchase_rate: f64,
    pub avg_engagement_sec: f64,
    pub avg_event_count: f64,
    pub business_hours_pct: f64,
    pub composite_pct: BTreeMap<String, f64>,
}

impl CategoryProfile {
    pub fn is_empty(&self) -> bool {
        self.sessions == 0
    }

    pub fn distribution(&self, dimension: Dimension) -> &Distribution {
        match dimension {
            Dimension::Device => &self.device,
            Dimension::OperatingSystem => &self.operating_system,
            Dimension::Browser => &self.browser,
            Dimension::Country => &self.country,
            Dimension::TrafficSource => &self.traffic_source,
        }
    }

    fn share_of(&self, dimension: Dimension, value: &str) -> Share {
        let key = dimension.key(value);
        self.distribution(dimension)
            .iter()
            .find(|(label, _)| dimension.key(label) == key)
            .map(|(_, share)| *share)
            .unwrap_or_default()
    }

    /// Looks up one metric; absent values (unseen dimension values, unknown composites) are 0.
    pub fn metric(&self, key: &MetricKey) -> f64 {
        match key {
            MetricKey::Sessions => self.sessions as f64,
            MetricKey::Share(dim, value) => self.share_of(*dim, value).pct,
            MetricKey::Count(dim, value) => self.share_of(*dim, value).count as f64,
            MetricKey::PurchaseRate => self.purchase_rate,
            MetricKey::AvgEngagementSec => self.avg_engagement_sec,
            MetricKey::AvgEventCount => self.avg_event_count,
            MetricKey::BusinessHoursPct => self.business_hours_pct,
            MetricKey::Composite(name) => self.composite_pct.get(name).copied().unwrap_or(0.0),
        }
    }

    /// Flat `metric name -> value` view of every metric present in this profile.
    pub fn to_metric_map(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        out.insert(MetricKey::Sessions.to_string(), self.sessions as f64);
        for dim in Dimension::ALL {
            for (value, share) in self.distribution(dim) {
                out.insert(MetricKey::share(dim, value).to_string(), share.pct);
                out.insert(MetricKey::count(dim, value).to_string(), share.count as f64);
            }
        }
        out.insert(MetricKey::PurchaseRate.to_string(), self.purchase_rate);
        out.insert(MetricKey::AvgEngagementSec.to_string(), self.avg_engagement_sec);
        out.insert(MetricKey::AvgEventCount.to_string(), self.avg_event_count);
        out.insert(MetricKey::BusinessHoursPct.to_string(), self.business_hours_pct);
        for (name, pct) in &self.composite_pct {
            out.insert(MetricKey::Composite(name.clone()).to_string(), *pct);
        }
        out
    }
}

fn pct(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

fn mean(sum: f64, n: u64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    sum / n as f64
}

pub fn build_profile<'a, I>(sessions: I, options: &ProfileOptions) -> CategoryProfile
where
    I: IntoIterator<Item = &'a SessionSummary>,
{
    // Bucketed by comparison key; the first display value seen labels the bucket.
    let mut counts: BTreeMap<Dimension, BTreeMap<String, (String, u64)>> = BTreeMap::new();
    let mut composite_hits: BTreeMap<String, u64> = options
        .composites
        .iter()
        .map(|spec| (spec.name.clone(), 0))
        .collect();
    let mut n = 0u64;
    let mut purchases = 0u64;
    let mut business_hours = 0u64;
    let mut engagement_ms = 0f64;
    let mut events = 0f64;

    for session in sessions {
        n += 1;
        for dim in Dimension::ALL {
            let value = dim.value_of(session);
            counts
                .entry(dim)
                .or_default()
                .entry(dim.key(value))
                .or_insert_with(|| (value.to_string(), 0))
                .1 += 1;
        }
        purchases += u64::from(session.has_purchase);
        engagement_ms += session.engagement_time.as_millis() as f64;
        events += session.event_count as f64;
        let local = local_parts(&options.timezone, session.start_timestamp);
        business_hours += u64::from(options.is_business_hour(local.hour));
        for spec in &options.composites {
            if spec.matches(session) {
                *composite_hits.entry(spec.name.clone()).or_default() += 1;
            }
        }
    }

    let mut distribution = |dim: Dimension| -> Distribution {
        counts
            .remove(&dim)
            .unwrap_or_default()
            .into_values()
            .map(|(label, count)| {
                (
                    label,
                    Share {
                        count,
                        pct: pct(count, n),
                    },
                )
            })
            .collect()
    };

    CategoryProfile {
        sessions: n,
        device: distribution(Dimension::Device),
        operating_system: distribution(Dimension::OperatingSystem),
        browser: distribution(Dimension::Browser),
        country: distribution(Dimension::Country),
        traffic_source: distribution(Dimension::TrafficSource),
        purchase_rate: pct(purchases, n),
        avg_engagement_sec: mean(engagement_ms / 1000.0, n),
        avg_event_count: mean(events, n),
        business_hours_pct: pct(business_hours, n),
        composite_pct: composite_hits
            .into_iter()
            .map(|(name, hits)| (name, pct(hits, n)))
            .collect(),
    }
}

/// One profile per category; every category is present even when empty.
pub fn build_profiles(
    categorized: &CategorizedSessions,
    options: &ProfileOptions,
) -> BTreeMap<SessionCategory, CategoryProfile> {
    SessionCategory::ALL
        .into_iter()
        .map(|category| {
            let sessions = categorized.get(category).iter().map(|labeled| &labeled.session);
            (category, build_profile(sessions, options))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::reconcile::types::{DeviceCategory, SourceSide};
    use crate::test_support::{profile_options, session};
    use std::time::Duration;

    #[test]
    fn computes_shares_and_means() {
        let mut s1 = session(SourceSide::A, "1", 10 * 3600, DeviceCategory::Desktop, "Australia");
        s1.has_purchase = true;
        s1.engagement_time = Duration::from_millis(30_000);
        s1.event_count = 4;
        let mut s2 = session(SourceSide::A, "2", 20 * 3600, DeviceCategory::Mobile, "Australia");
        s2.operating_system = "iOS".to_string();
        s2.browser = "Safari".to_string();
        s2.engagement_time = Duration::from_millis(10_000);
        s2.event_count = 2;

        let profile = build_profile([&s1, &s2], &profile_options());
        assert_eq!(profile.sessions, 2);
        assert_eq!(profile.metric(&MetricKey::share(Dimension::Device, "desktop")), 50.0);
        assert_eq!(profile.metric(&MetricKey::share(Dimension::OperatingSystem, "WINDOWS")), 50.0);
        assert_eq!(profile.metric(&MetricKey::count(Dimension::Country, "AU")), 2.0);
        assert_eq!(profile.purchase_rate, 50.0);
        assert_eq!(profile.avg_engagement_sec, 20.0);
        assert_eq!(profile.avg_event_count, 3.0);
        assert_eq!(profile.business_hours_pct, 50.0);
        assert_eq!(profile.metric(&MetricKey::Composite("extension_capable_browser".into())), 50.0);
        assert_eq!(profile.metric(&MetricKey::Composite("desktop_windows".into())), 50.0);
        assert_eq!(profile.traffic_source["(not set)"].count, 2);
    }

    #[test]
    fn values_differing_in_case_share_a_bucket() {
        let s1 = session(SourceSide::A, "1", 10 * 3600, DeviceCategory::Desktop, "Australia");
        let mut s2 = session(SourceSide::A, "2", 11 * 3600, DeviceCategory::Desktop, "australia");
        s2.browser = "chrome".to_string();
        let mut s3 = session(SourceSide::A, "3", 12 * 3600, DeviceCategory::Desktop, "AU");
        s3.browser = "CHROME ".to_string();

        let profile = build_profile([&s1, &s2, &s3], &profile_options());
        assert_eq!(profile.browser.len(), 1);
        assert_eq!(profile.browser["Chrome"].count, 3);
        assert_eq!(profile.country.len(), 1);
        assert_eq!(profile.country["Australia"].count, 3);
        assert_eq!(profile.metric(&MetricKey::share(Dimension::Browser, "chrome")), 100.0);
        assert_eq!(profile.metric(&MetricKey::share(Dimension::Country, "australia")), 100.0);
        assert_eq!(profile.metric(&MetricKey::Composite("extension_capable_browser".into())), 100.0);

        let metrics = profile.to_metric_map();
        assert_eq!(metrics.get("browser_pct.chrome"), Some(&100.0));
        assert_eq!(metrics.get("country_count.australia"), Some(&3.0));
    }

    #[test]
    fn empty_category_is_all_zero() {
        let profile = build_profile(std::iter::empty(), &profile_options());
        assert!(profile.is_empty());
        assert_eq!(profile.purchase_rate, 0.0);
        assert_eq!(profile.avg_engagement_sec, 0.0);
        assert_eq!(profile.business_hours_pct, 0.0);
        assert_eq!(profile.metric(&MetricKey::share(Dimension::Device, "desktop")), 0.0);
        assert!(profile.to_metric_map().values().all(|value| value.is_finite() && *value == 0.0));
    }

    #[test]
    fn business_hours_use_local_time() {
        let mut options = profile_options();
        options.timezone = chrono_tz::Australia::Melbourne;
        // 23:00 UTC is 10:00 the next morning in Melbourne (AEDT).
        let s = session(SourceSide::A, "1", 23 * 3600, DeviceCategory::Desktop, "AU");
        let profile = build_profile([&s], &options);
        assert_eq!(profile.business_hours_pct, 100.0);
    }

    #[test]
    fn metric_keys_round_trip_through_strings() {
        for raw in [
            "sessions",
            "os_pct.windows",
            "country_count.china",
            "traffic_source_pct.google",
            "composite_pct.desktop_windows",
            "business_hours_pct",
        ] {
            let key: MetricKey = raw.parse().unwrap();
            assert_eq!(key.to_string(), raw);
        }
        assert!("nonsense".parse::<MetricKey>().is_err());
        assert!("planet_pct.mars".parse::<MetricKey>().is_err());
    }

    #[test]
    fn repeated_builds_are_identical() {
        let s1 = session(SourceSide::A, "1", 100, DeviceCategory::Tablet, "NZ");
        let s2 = session(SourceSide::A, "2", 200, DeviceCategory::Desktop, "AU");
        let first = build_profile([&s1, &s2], &profile_options());
        let second = build_profile([&s1, &s2], &profile_options());
        assert_eq!(first, second);
        assert_eq!(first.to_metric_map(), second.to_metric_map());
    }
}
