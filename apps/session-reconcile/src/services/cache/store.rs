use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use duckdb::{params, Connection};
use serde::{Deserialize, Serialize};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use super::{is_expired, CacheKey, ResultCache, CACHE_SCHEMA_VERSION};
use crate::error::ReconcileError;
use crate::services::reconcile::parity::ParityReport;
use crate::services::reconcile::profile::CategoryProfile;
use crate::services::reconcile::types::{
    CategoryCounts, CategoryTotals, DailyCount, DeviceCategory, Diagnostics, HourlyCount,
    LabeledSession, Reconciliation, ReconciliationResult, RunParams, SessionCategory,
    SessionSummary, SourceLabels, SourceSide,
};
use crate::services::sources::parquet_duckdb::{escape_single_quotes, open_connection};
use crate::time::DateRange;

const METADATA_FILE: &str = "metadata.json";
const HOURLY_TABLES: [&str; 3] = ["hourly", "hourly_weekday", "hourly_weekend"];

/// Scalar part of a cached result; the tables live next to it as parquet files.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMetadata {
    schema_version: u32,
    key: String,
    stored_at: DateTime<Utc>,
    range: DateRange,
    labels: SourceLabels,
    params: RunParams,
    totals: CategoryTotals,
    profiles: BTreeMap<SessionCategory, CategoryProfile>,
    parity: ParityReport,
    diagnostics: Diagnostics,
    computed_at: DateTime<Utc>,
}

/// On-disk cache: one directory per key holding `metadata.json` plus `daily.parquet`,
/// `hourly.parquet`, `hourly_weekday.parquet`, `hourly_weekend.parquet` and
/// `sessions.parquet`.
///
/// `metadata.json` is written last and atomically, so an entry without it is incomplete
/// and read as a miss.
#[derive(Debug, Clone)]
pub struct ParquetResultStore {
    root: PathBuf,
    ttl: Option<Duration>,
}

impl ParquetResultStore {
    pub fn new(root: PathBuf, ttl: Option<Duration>) -> Self {
        Self { root, ttl }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    fn write_entry(&self, key: &CacheKey, reconciliation: &Reconciliation) -> Result<()> {
        let dir = self.entry_dir(key);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("failed to clear stale entry {}", dir.display()))?;
        }
        ensure_dir_mode(&dir, 0o750)?;

        let result = &reconciliation.result;
        let conn = open_connection(&self.root)?;
        write_daily(&conn, &dir.join("daily.parquet"), &result.daily)?;
        for (name, table) in HOURLY_TABLES.iter().zip([
            &result.hourly,
            &result.hourly_weekday,
            &result.hourly_weekend,
        ]) {
            write_hourly(&conn, &dir.join(format!("{name}.parquet")), name, table)?;
        }
        write_sessions(&conn, &dir.join("sessions.parquet"), &reconciliation.sessions)?;

        let metadata = CacheMetadata {
            schema_version: CACHE_SCHEMA_VERSION,
            key: key.to_string(),
            stored_at: Utc::now(),
            range: result.range,
            labels: result.labels.clone(),
            params: result.params.clone(),
            totals: result.totals,
            profiles: result.profiles.clone(),
            parity: result.parity.clone(),
            diagnostics: result.diagnostics.clone(),
            computed_at: result.computed_at,
        };
        write_json_atomic(&dir.join(METADATA_FILE), &metadata)
    }

    fn read_entry(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<Reconciliation>> {
        let dir = self.entry_dir(key);
        let metadata_path = dir.join(METADATA_FILE);
        if !metadata_path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&metadata_path)
            .with_context(|| format!("failed to read {}", metadata_path.display()))?;
        let metadata: CacheMetadata = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse {}", metadata_path.display()))?;

        if metadata.schema_version != CACHE_SCHEMA_VERSION || is_expired(metadata.stored_at, self.ttl, now) {
            tracing::debug!(key = %key, stored_at = %metadata.stored_at, "cache entry stale; removing");
            std::fs::remove_dir_all(&dir).ok();
            return Ok(None);
        }

        let conn = open_connection(&self.root)?;
        let daily = read_daily(&conn, &dir.join("daily.parquet"))?;
        let mut hourly_tables = Vec::with_capacity(HOURLY_TABLES.len());
        for name in HOURLY_TABLES {
            hourly_tables.push(read_hourly(&conn, &dir.join(format!("{name}.parquet")))?);
        }
        let sessions = read_sessions(&conn, &dir.join("sessions.parquet"))?;
        let [hourly, hourly_weekday, hourly_weekend]: [Vec<HourlyCount>; 3] = hourly_tables
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected three hourly tables"))?;

        Ok(Some(Reconciliation {
            result: ReconciliationResult {
                range: metadata.range,
                labels: metadata.labels,
                params: metadata.params,
                totals: metadata.totals,
                profiles: metadata.profiles,
                daily,
                hourly,
                hourly_weekday,
                hourly_weekend,
                parity: metadata.parity,
                diagnostics: metadata.diagnostics,
                computed_at: metadata.computed_at,
            },
            sessions,
        }))
    }

    fn entry_dirs(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("failed to list {}", self.root.display()))?
        {
            let entry = entry?;
            let is_key = entry
                .file_name()
                .to_str()
                .is_some_and(|name| CacheKey::parse(name).is_ok());
            if is_key && entry.file_type()?.is_dir() {
                out.push(entry.path());
            }
        }
        Ok(out)
    }
}

fn cache_error(err: anyhow::Error) -> ReconcileError {
    ReconcileError::Cache(format!("{err:#}"))
}

impl ResultCache for ParquetResultStore {
    fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<Reconciliation>, ReconcileError> {
        self.read_entry(key, now).map_err(cache_error)
    }

    fn put(&self, key: &CacheKey, reconciliation: &Reconciliation) -> Result<(), ReconcileError> {
        let started = std::time::Instant::now();
        self.write_entry(key, reconciliation).map_err(cache_error)?;
        tracing::info!(
            key = %key,
            sessions = reconciliation.sessions.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "reconciliation cached"
        );
        Ok(())
    }

    fn invalidate(&self, key: &CacheKey) -> Result<bool, ReconcileError> {
        let dir = self.entry_dir(key);
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("failed to remove {}", dir.display()))
            .map_err(cache_error)?;
        Ok(true)
    }

    fn invalidate_all(&self) -> Result<u64, ReconcileError> {
        let dirs = self.entry_dirs().map_err(cache_error)?;
        for dir in &dirs {
            std::fs::remove_dir_all(dir)
                .with_context(|| format!("failed to remove {}", dir.display()))
                .map_err(cache_error)?;
        }
        Ok(dirs.len() as u64)
    }
}

fn ensure_dir_mode(path: &Path, mode: u32) -> Result<()> {
    std::fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))?;
    #[cfg(unix)]
    {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .with_context(|| format!("failed to chmod {} to {:o}", path.display(), mode))?;
    }
    Ok(())
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("{} has no parent directory", path.display()))?;
    let contents = serde_json::to_vec_pretty(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&contents)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|err| anyhow::anyhow!("failed to persist {}: {err}", path.display()))?;
    #[cfg(unix)]
    {
        if let Err(err) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            tracing::warn!(path = %path.display(), error = %err, "failed to restrict cache file permissions");
        }
    }
    Ok(())
}

fn copy_to_parquet(conn: &Connection, select_sql: &str, path: &Path) -> Result<()> {
    conn.execute(
        &format!(
            "COPY ({select_sql}) TO '{}' (FORMAT PARQUET)",
            escape_single_quotes(&path.display().to_string())
        ),
        [],
    )
    .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn parquet_source(path: &Path) -> String {
    format!(
        "read_parquet('{}')",
        escape_single_quotes(&path.display().to_string())
    )
}

fn write_daily(conn: &Connection, path: &Path, rows: &[DailyCount]) -> Result<()> {
    conn.execute_batch(
        "CREATE OR REPLACE TABLE daily_rows(day VARCHAR, both_count BIGINT, a_only BIGINT, b_only BIGINT)",
    )?;
    {
        let mut appender = conn.appender("daily_rows")?;
        for row in rows {
            appender.append_row(params![
                row.date.to_string(),
                row.counts.both as i64,
                row.counts.a_only as i64,
                row.counts.b_only as i64,
            ])?;
        }
        appender.flush()?;
    }
    copy_to_parquet(
        conn,
        "SELECT CAST(day AS DATE) AS \"date\", both_count AS \"both\", a_only, b_only FROM daily_rows ORDER BY day",
        path,
    )
}

fn write_hourly(conn: &Connection, path: &Path, name: &str, rows: &[HourlyCount]) -> Result<()> {
    let table = format!("{name}_rows");
    conn.execute_batch(&format!(
        "CREATE OR REPLACE TABLE {table}(hour INTEGER, both_count BIGINT, a_only BIGINT, b_only BIGINT)"
    ))?;
    {
        let mut appender = conn.appender(&table)?;
        for row in rows {
            appender.append_row(params![
                row.hour as i32,
                row.counts.both as i64,
                row.counts.a_only as i64,
                row.counts.b_only as i64,
            ])?;
        }
        appender.flush()?;
    }
    copy_to_parquet(
        conn,
        &format!("SELECT hour, both_count AS \"both\", a_only, b_only FROM {table} ORDER BY hour"),
        path,
    )
}

fn write_sessions(conn: &Connection, path: &Path, sessions: &[LabeledSession]) -> Result<()> {
    conn.execute_batch(
        "CREATE OR REPLACE TABLE session_rows(
            ordinal BIGINT, category VARCHAR, side VARCHAR, session_id VARCHAR, counterpart_id VARCHAR,
            start_micros BIGINT, device_category VARCHAR, operating_system VARCHAR, browser VARCHAR,
            country VARCHAR, traffic_source VARCHAR, event_count BIGINT, has_purchase BOOLEAN,
            engagement_ms BIGINT)",
    )?;
    {
        let mut appender = conn.appender("session_rows")?;
        for (ordinal, labeled) in sessions.iter().enumerate() {
            let s = &labeled.session;
            appender.append_row(params![
                ordinal as i64,
                labeled.category.as_str(),
                s.side.as_str(),
                s.session_id,
                labeled.counterpart_id,
                s.start_timestamp.timestamp_micros(),
                s.device_category.as_str(),
                s.operating_system,
                s.browser,
                s.country,
                s.traffic_source,
                s.event_count as i64,
                s.has_purchase,
                i64::try_from(s.engagement_time.as_millis()).unwrap_or(i64::MAX),
            ])?;
        }
        appender.flush()?;
    }
    copy_to_parquet(
        conn,
        "SELECT ordinal, category, side, session_id, counterpart_id,
                make_timestamp(start_micros) AS start_timestamp, start_micros,
                device_category, operating_system, browser, country, traffic_source,
                event_count, has_purchase, engagement_ms
         FROM session_rows ORDER BY ordinal",
        path,
    )
}

fn counts(both: i64, a_only: i64, b_only: i64) -> CategoryCounts {
    CategoryCounts {
        both: both.max(0) as u64,
        a_only: a_only.max(0) as u64,
        b_only: b_only.max(0) as u64,
    }
}

fn read_daily(conn: &Connection, path: &Path) -> Result<Vec<DailyCount>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT CAST(\"date\" AS VARCHAR), \"both\", a_only, b_only FROM {} ORDER BY \"date\"",
        parquet_source(path)
    ))?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let raw: String = row.get(0)?;
        let date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .with_context(|| format!("bad cached date `{raw}`"))?;
        out.push(DailyCount {
            date,
            counts: counts(row.get(1)?, row.get(2)?, row.get(3)?),
        });
    }
    Ok(out)
}

fn read_hourly(conn: &Connection, path: &Path) -> Result<Vec<HourlyCount>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT hour, \"both\", a_only, b_only FROM {} ORDER BY hour",
        parquet_source(path)
    ))?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let hour: i32 = row.get(0)?;
        out.push(HourlyCount {
            hour: hour.max(0) as u32,
            counts: counts(row.get(1)?, row.get(2)?, row.get(3)?),
        });
    }
    Ok(out)
}

fn read_sessions(conn: &Connection, path: &Path) -> Result<Vec<LabeledSession>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT category, side, session_id, counterpart_id, start_micros, device_category,
                operating_system, browser, country, traffic_source, event_count, has_purchase,
                engagement_ms
         FROM {} ORDER BY ordinal",
        parquet_source(path)
    ))?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let category: String = row.get(0)?;
        let side: String = row.get(1)?;
        let device: String = row.get(5)?;
        let start_micros: i64 = row.get(4)?;
        let event_count: i64 = row.get(10)?;
        let engagement_ms: i64 = row.get(12)?;
        out.push(LabeledSession {
            category: SessionCategory::parse(&category)
                .ok_or_else(|| anyhow::anyhow!("bad cached category `{category}`"))?,
            session: SessionSummary {
                side: match side.as_str() {
                    "a" => SourceSide::A,
                    "b" => SourceSide::B,
                    other => anyhow::bail!("bad cached side `{other}`"),
                },
                session_id: row.get(2)?,
                start_timestamp: DateTime::<Utc>::from_timestamp_micros(start_micros)
                    .ok_or_else(|| anyhow::anyhow!("bad cached timestamp {start_micros}"))?,
                device_category: DeviceCategory::parse(&device)
                    .ok_or_else(|| anyhow::anyhow!("bad cached device `{device}`"))?,
                operating_system: row.get(6)?,
                browser: row.get(7)?,
                country: row.get(8)?,
                traffic_source: row.get(9)?,
                event_count: event_count.max(0) as u64,
                has_purchase: row.get(11)?,
                engagement_time: StdDuration::from_millis(engagement_ms.max(0) as u64),
            },
            counterpart_id: row.get(3)?,
        });
    }
    Ok(out)
}
