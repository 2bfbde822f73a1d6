use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

use crate::error::ReconcileError;
use crate::services::reconcile::pipeline::ReconcileOptions;
use crate::services::reconcile::profile::{CompositeShareSpec, ProfileOptions};
use crate::services::reconcile::types::SourceSide;

const CONFIG_PATH_ENV: &str = "RECONCILE_CONFIG_PATH";

fn overrides_path() -> Option<PathBuf> {
    std::env::var(CONFIG_PATH_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Optional JSON file layered over the environment. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigOverrides {
    #[serde(default)]
    time_window_seconds: Option<u64>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    business_hours_start: Option<u32>,
    #[serde(default)]
    business_hours_end: Option<u32>,
    #[serde(default)]
    purchase_event_name: Option<String>,
    #[serde(default)]
    canonical_side: Option<String>,
    #[serde(default)]
    source_a_label: Option<String>,
    #[serde(default)]
    source_b_label: Option<String>,
    #[serde(default)]
    extension_capable_browsers: Option<Vec<String>>,
    #[serde(default)]
    exclude_bot_user_agents: Option<bool>,
    #[serde(default)]
    fetch_timeout_seconds: Option<u64>,
    #[serde(default)]
    cache_enabled: Option<bool>,
    #[serde(default)]
    cache_root: Option<String>,
    #[serde(default)]
    cache_ttl_seconds: Option<u64>,
}

fn load_overrides() -> Option<ConfigOverrides> {
    let path = overrides_path()?;
    if !path.exists() {
        tracing::warn!(path = %path.display(), "config overrides file not found; using env defaults");
        return None;
    }
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read config overrides; using env defaults"
            );
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse config overrides; using env defaults"
            );
            None
        }
    }
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn apply_overrides(config: &mut ReconcileConfig, overrides: &ConfigOverrides) {
    if let Some(value) = overrides.time_window_seconds {
        config.time_window_seconds = value;
    }
    if let Some(value) = trimmed(overrides.timezone.as_deref()) {
        config.timezone = value.to_string();
    }
    if let Some(value) = overrides.business_hours_start {
        config.business_hours_start = value;
    }
    if let Some(value) = overrides.business_hours_end {
        config.business_hours_end = value;
    }
    if let Some(value) = trimmed(overrides.purchase_event_name.as_deref()) {
        config.purchase_event_name = value.to_string();
    }
    if let Some(value) = trimmed(overrides.canonical_side.as_deref()) {
        config.canonical_side = value.to_string();
    }
    if let Some(value) = trimmed(overrides.source_a_label.as_deref()) {
        config.source_a_label = value.to_string();
    }
    if let Some(value) = trimmed(overrides.source_b_label.as_deref()) {
        config.source_b_label = value.to_string();
    }
    if let Some(browsers) = overrides.extension_capable_browsers.as_ref() {
        config.extension_capable_browsers = clean_list(browsers.iter().map(String::as_str));
    }
    if let Some(value) = overrides.exclude_bot_user_agents {
        config.exclude_bot_user_agents = value;
    }
    if let Some(value) = overrides.fetch_timeout_seconds.filter(|v| *v != 0) {
        config.fetch_timeout_seconds = value;
    }
    if let Some(value) = overrides.cache_enabled {
        config.cache_enabled = value;
    }
    if let Some(value) = trimmed(overrides.cache_root.as_deref()) {
        config.cache_root = PathBuf::from(value);
    }
    if let Some(value) = overrides.cache_ttl_seconds {
        config.cache_ttl_seconds = value;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileConfig {
    pub time_window_seconds: u64,
    pub timezone: String,
    pub business_hours_start: u32,
    pub business_hours_end: u32,
    pub purchase_event_name: String,
    pub canonical_side: String,
    pub source_a_label: String,
    pub source_b_label: String,
    pub extension_capable_browsers: Vec<String>,
    pub exclude_bot_user_agents: bool,
    pub fetch_timeout_seconds: u64,
    pub cache_enabled: bool,
    pub cache_root: PathBuf,
    /// Zero disables expiry.
    pub cache_ttl_seconds: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            time_window_seconds: 300,
            timezone: "UTC".to_string(),
            business_hours_start: 9,
            business_hours_end: 17,
            purchase_event_name: "purchase".to_string(),
            canonical_side: "a".to_string(),
            source_a_label: "source_a".to_string(),
            source_b_label: "source_b".to_string(),
            extension_capable_browsers: vec![
                "Chrome".to_string(),
                "Firefox".to_string(),
                "Edge".to_string(),
            ],
            exclude_bot_user_agents: true,
            fetch_timeout_seconds: 120,
            cache_enabled: true,
            cache_root: std::env::temp_dir().join("session-reconcile/cache"),
            cache_ttl_seconds: 3600,
        }
    }
}

impl ReconcileConfig {
    /// Environment (`RECONCILE_*`, `.env` honoured by the caller) first, then the JSON
    /// overrides file named by `RECONCILE_CONFIG_PATH`.
    pub fn from_env() -> Result<Self, ReconcileError> {
        let defaults = Self::default();
        let mut config = Self {
            time_window_seconds: env_u64("RECONCILE_TIME_WINDOW_SECONDS", defaults.time_window_seconds),
            timezone: env_string("RECONCILE_TIMEZONE", &defaults.timezone),
            business_hours_start: env_u32("RECONCILE_BUSINESS_HOURS_START", defaults.business_hours_start),
            business_hours_end: env_u32("RECONCILE_BUSINESS_HOURS_END", defaults.business_hours_end),
            purchase_event_name: env_string("RECONCILE_PURCHASE_EVENT_NAME", &defaults.purchase_event_name),
            canonical_side: env_string("RECONCILE_CANONICAL_SIDE", &defaults.canonical_side),
            source_a_label: env_string("RECONCILE_SOURCE_A_LABEL", &defaults.source_a_label),
            source_b_label: env_string("RECONCILE_SOURCE_B_LABEL", &defaults.source_b_label),
            extension_capable_browsers: env_list("RECONCILE_EXTENSION_CAPABLE_BROWSERS")
                .unwrap_or(defaults.extension_capable_browsers),
            exclude_bot_user_agents: env_bool("RECONCILE_EXCLUDE_BOT_USER_AGENTS", defaults.exclude_bot_user_agents),
            fetch_timeout_seconds: env_u64("RECONCILE_FETCH_TIMEOUT_SECONDS", defaults.fetch_timeout_seconds)
                .max(1),
            cache_enabled: env_bool("RECONCILE_CACHE_ENABLED", defaults.cache_enabled),
            cache_root: env_optional_string("RECONCILE_CACHE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_root),
            cache_ttl_seconds: env_u64("RECONCILE_CACHE_TTL_SECONDS", defaults.cache_ttl_seconds),
        };

        if let Some(overrides) = load_overrides() {
            apply_overrides(&mut config, &overrides);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconcileError> {
        self.tz()?;
        self.side()?;
        if self.business_hours_start > 23 || self.business_hours_end > 24 {
            return Err(ReconcileError::Config(format!(
                "business hours {}..{} must lie within 0..24",
                self.business_hours_start, self.business_hours_end
            )));
        }
        if self.business_hours_start == self.business_hours_end {
            return Err(ReconcileError::Config(
                "business_hours_start and business_hours_end must differ".to_string(),
            ));
        }
        if self.purchase_event_name.trim().is_empty() {
            return Err(ReconcileError::Config("purchase_event_name must not be empty".to_string()));
        }
        if self.source_a_label == self.source_b_label {
            return Err(ReconcileError::Config(format!(
                "source labels must differ (both are `{}`)",
                self.source_a_label
            )));
        }
        if self.fetch_timeout_seconds == 0 {
            return Err(ReconcileError::Config("fetch_timeout_seconds must be positive".to_string()));
        }
        self.cache_ttl()?;
        if self.cache_enabled && self.cache_root.as_os_str().is_empty() {
            return Err(ReconcileError::Config("cache_root resolved to an empty path".to_string()));
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz, ReconcileError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ReconcileError::Config(format!("unknown time zone `{}`", self.timezone)))
    }

    pub fn side(&self) -> Result<SourceSide, ReconcileError> {
        match self.canonical_side.trim().to_ascii_lowercase().as_str() {
            "a" => Ok(SourceSide::A),
            "b" => Ok(SourceSide::B),
            other => Err(ReconcileError::Config(format!(
                "canonical_side must be `a` or `b`, got `{other}`"
            ))),
        }
    }

    pub fn cache_ttl(&self) -> Result<Option<chrono::TimeDelta>, ReconcileError> {
        if self.cache_ttl_seconds == 0 {
            return Ok(None);
        }
        i64::try_from(self.cache_ttl_seconds)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .map(Some)
            .ok_or_else(|| {
                ReconcileError::Config(format!(
                    "cache_ttl_seconds {} is out of range",
                    self.cache_ttl_seconds
                ))
            })
    }

    pub fn profile_options(&self) -> Result<ProfileOptions, ReconcileError> {
        Ok(ProfileOptions {
            timezone: self.tz()?,
            business_hours_start: self.business_hours_start,
            business_hours_end: self.business_hours_end,
            composites: vec![
                CompositeShareSpec::extension_capable_browser(&self.extension_capable_browsers),
                CompositeShareSpec::desktop_windows(),
            ],
        })
    }

    pub fn reconcile_options(&self) -> Result<ReconcileOptions, ReconcileError> {
        Ok(ReconcileOptions {
            time_window: Duration::from_secs(self.time_window_seconds),
            timezone: self.tz()?,
            canonical_side: self.side()?,
            purchase_event_name: self.purchase_event_name.trim().to_string(),
            exclude_bot_user_agents: self.exclude_bot_user_agents,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_seconds),
            profile: self.profile_options()?,
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key)
        .ok()
        .map(|value| value.trim().to_lowercase())
    {
        Some(value) if value == "1" || value == "true" || value == "yes" => true,
        Some(value) if value == "0" || value == "false" || value == "no" => false,
        _ => default,
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// Comma-separated list; `None` when unset or empty.
fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = env_optional_string(key)?;
    let items = clean_list(raw.split(','));
    (!items.is_empty()).then_some(items)
}

fn clean_list<'a>(items: impl Iterator<Item = &'a str>) -> Vec<String> {
    items
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
