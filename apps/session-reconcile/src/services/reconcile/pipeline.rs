//! End-to-end reconciliation run.
//!
//! [`reconcile_sessions`] is the synchronous core over two already-parsed session sets.
//! [`Reconciler`] wraps it with the cache lookup, the concurrent source fetches and the
//! boundary parse.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use chrono_tz::Tz;

use super::categorize::categorize;
use super::matcher::match_sessions;
use super::parity::build_parity;
use super::profile::{build_profiles, ProfileOptions};
use super::timeseries::build_timeseries;
use super::types::{
    Diagnostics, Reconciliation, ReconciliationResult, RunParams, SessionCategory, SessionSummary,
    SourceFingerprints, SourceLabels, SourceSide,
};
use crate::error::ReconcileError;
use crate::services::cache::{CacheKey, ResultCache};
use crate::services::sources::schema::{to_session_summaries, ParseOptions, ParsedSessions};
use crate::services::sources::{SessionSource, TabularBatch};
use crate::time::{resolve_fetch_window, DateRange, FetchWindow};

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub time_window: Duration,
    pub timezone: Tz,
    /// Side whose attributes represent a matched pair.
    pub canonical_side: SourceSide,
    pub purchase_event_name: String,
    pub exclude_bot_user_agents: bool,
    pub fetch_timeout: Duration,
    pub profile: ProfileOptions,
}

impl ReconcileOptions {
    pub fn run_params(&self) -> RunParams {
        let mut composites = self.profile.composites.clone();
        composites.sort();
        RunParams {
            time_window_seconds: self.time_window.as_secs(),
            timezone: self.timezone.name().to_string(),
            canonical_side: self.canonical_side,
            purchase_event_name: self.purchase_event_name.clone(),
            exclude_bot_user_agents: self.exclude_bot_user_agents,
            business_hours_start: self.profile.business_hours_start,
            business_hours_end: self.profile.business_hours_end,
            composites,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Matches, labels and summarizes two session sets.
///
/// `diagnostics` carries row-level counters from the parse; session and tie counts are
/// filled in here.
pub fn reconcile_sessions(
    a: &[SessionSummary],
    b: &[SessionSummary],
    range: DateRange,
    labels: SourceLabels,
    options: &ReconcileOptions,
    mut diagnostics: Diagnostics,
) -> Result<Reconciliation, ReconcileError> {
    let started = Instant::now();
    let assignment = match_sessions(a, b, options.time_window);
    tracing::info!(
        phase = "match",
        a_sessions = a.len(),
        b_sessions = b.len(),
        pairs = assignment.len(),
        ties = assignment.ties().len(),
        duration_ms = elapsed_ms(started),
        "sessions matched"
    );

    let started = Instant::now();
    let categorized = categorize(a, b, &assignment, options.canonical_side)?;
    categorized.check_invariants()?;
    let totals = categorized.totals();
    tracing::info!(
        phase = "categorize",
        both = totals.both,
        a_only = totals.a_only,
        b_only = totals.b_only,
        duration_ms = elapsed_ms(started),
        "sessions categorized"
    );

    let started = Instant::now();
    let profiles = build_profiles(&categorized, &options.profile);
    for category in SessionCategory::ALL {
        if profiles.get(&category).is_some_and(|profile| profile.is_empty()) {
            tracing::debug!(category = %category, "category has no sessions; metrics are zero");
        }
    }
    let series = build_timeseries(&categorized, range, options.timezone);
    let parity = build_parity(a, b, &assignment);
    tracing::info!(
        phase = "summarize",
        days = series.daily.len(),
        duration_ms = elapsed_ms(started),
        "profiles and timeseries built"
    );

    diagnostics.a_sessions = a.len() as u64;
    diagnostics.b_sessions = b.len() as u64;
    diagnostics.ties = assignment.ties().len() as u64;
    if series.out_of_range > 0 {
        diagnostics.warnings.push(format!(
            "{} sessions start outside {range} in {}; daily table widened",
            series.out_of_range, options.timezone
        ));
    }

    let result = ReconciliationResult {
        range,
        labels,
        params: options.run_params(),
        totals,
        profiles,
        daily: series.daily,
        hourly: series.hourly,
        hourly_weekday: series.hourly_weekday,
        hourly_weekend: series.hourly_weekend,
        parity,
        diagnostics,
        computed_at: Utc::now(),
    };
    Ok(Reconciliation {
        result,
        sessions: categorized.into_sessions(),
    })
}

/// Runs reconciliations against two sources, optionally memoized in a [`ResultCache`].
#[derive(Clone)]
pub struct Reconciler {
    options: ReconcileOptions,
    cache: Option<Arc<dyn ResultCache>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("options", &self.options)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

impl Reconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options, cache: None }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Key the result for these two sources and `range` is cached under.
    pub fn cache_key<A, B>(&self, source_a: &A, source_b: &B, range: &DateRange) -> CacheKey
    where
        A: SessionSource,
        B: SessionSource,
    {
        let labels = SourceLabels {
            a: source_a.label().to_string(),
            b: source_b.label().to_string(),
        };
        let fingerprints = SourceFingerprints {
            a: source_a.fingerprint(),
            b: source_b.fingerprint(),
        };
        CacheKey::for_run(&labels, &fingerprints, range, &self.options.run_params())
    }

    pub async fn run<A, B>(&self, source_a: &A, source_b: &B, range: DateRange) -> Result<Reconciliation, ReconcileError>
    where
        A: SessionSource,
        B: SessionSource,
    {
        let run_started = Instant::now();
        let labels = SourceLabels {
            a: source_a.label().to_string(),
            b: source_b.label().to_string(),
        };
        let window = resolve_fetch_window(&self.options.timezone, range)?;
        for warning in &window.warnings {
            tracing::warn!(range = %range, timezone = %self.options.timezone, "{warning}");
        }

        let key = self.cache_key(source_a, source_b, &range);
        if let Some(hit) = self.cache_lookup(&key).await {
            tracing::info!(
                key = %key,
                range = %range,
                duration_ms = elapsed_ms(run_started),
                "reconciliation served from cache"
            );
            return Ok(hit);
        }

        let started = Instant::now();
        let timeout = self.options.fetch_timeout;
        let (batch_a, batch_b) = tokio::try_join!(
            fetch_with_timeout(source_a, SourceSide::A, &window, timeout),
            fetch_with_timeout(source_b, SourceSide::B, &window, timeout),
        )?;
        tracing::info!(
            phase = "fetch",
            a_rows = batch_a.len(),
            b_rows = batch_b.len(),
            duration_ms = elapsed_ms(started),
            "sources fetched"
        );

        let options = self.options.clone();
        let reconciliation = tokio::task::spawn_blocking(move || {
            compute(batch_a, batch_b, &window, labels, &options)
        })
        .await
        .map_err(|err| ReconcileError::Task(err.to_string()))??;

        self.cache_store(&key, &reconciliation).await;
        tracing::info!(
            key = %key,
            range = %range,
            total = reconciliation.result.totals.total,
            duration_ms = elapsed_ms(run_started),
            "reconciliation complete"
        );
        Ok(reconciliation)
    }

    /// Drops the cached result for one source pair and range.
    pub async fn invalidate<A, B>(&self, source_a: &A, source_b: &B, range: &DateRange) -> Result<bool, ReconcileError>
    where
        A: SessionSource,
        B: SessionSource,
    {
        let Some(cache) = self.cache.clone() else {
            return Ok(false);
        };
        let key = self.cache_key(source_a, source_b, range);
        tokio::task::spawn_blocking(move || cache.invalidate(&key))
            .await
            .map_err(|err| ReconcileError::Task(err.to_string()))?
    }

    async fn cache_lookup(&self, key: &CacheKey) -> Option<Reconciliation> {
        let cache = self.cache.clone()?;
        let lookup_key = key.clone();
        match tokio::task::spawn_blocking(move || cache.get(&lookup_key)).await {
            Ok(Ok(hit)) => hit,
            Ok(Err(err)) => {
                tracing::warn!(key = %key, error = %err, "cache read failed; recomputing");
                None
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "cache read task failed; recomputing");
                None
            }
        }
    }

    async fn cache_store(&self, key: &CacheKey, reconciliation: &Reconciliation) {
        let Some(cache) = self.cache.clone() else {
            return;
        };
        let store_key = key.clone();
        let value = reconciliation.clone();
        match tokio::task::spawn_blocking(move || cache.put(&store_key, &value)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(key = %key, error = %err, "cache write failed"),
            Err(err) => tracing::warn!(key = %key, error = %err, "cache write task failed"),
        }
    }
}

async fn fetch_with_timeout<S: SessionSource>(
    source: &S,
    side: SourceSide,
    window: &FetchWindow,
    timeout: Duration,
) -> Result<TabularBatch, ReconcileError> {
    let failure = |message: String| ReconcileError::DataSource {
        side,
        label: source.label().to_string(),
        range: window.range,
        message,
    };
    match tokio::time::timeout(timeout, source.fetch(window)).await {
        Ok(Ok(batch)) => Ok(batch),
        Ok(Err(err)) => Err(failure(format!("{err:#}"))),
        Err(_) => Err(failure(format!("timed out after {}s", timeout.as_secs()))),
    }
}

fn parse_side(
    side: SourceSide,
    label: &str,
    batch: &TabularBatch,
    window: &FetchWindow,
    options: &ReconcileOptions,
) -> Result<ParsedSessions, ReconcileError> {
    let parse_options = ParseOptions {
        purchase_event_name: &options.purchase_event_name,
        exclude_bot_user_agents: options.exclude_bot_user_agents,
        window: Some(window),
    };
    to_session_summaries(side, label, batch, &parse_options)
}

fn compute(
    batch_a: TabularBatch,
    batch_b: TabularBatch,
    window: &FetchWindow,
    labels: SourceLabels,
    options: &ReconcileOptions,
) -> Result<Reconciliation, ReconcileError> {
    let started = Instant::now();
    let parsed_a = parse_side(SourceSide::A, &labels.a, &batch_a, window, options)?;
    let parsed_b = parse_side(SourceSide::B, &labels.b, &batch_b, window, options)?;
    tracing::info!(
        phase = "parse",
        a_sessions = parsed_a.sessions.len(),
        b_sessions = parsed_b.sessions.len(),
        duration_ms = elapsed_ms(started),
        "sources parsed"
    );

    let mut diagnostics = Diagnostics {
        a_rows: parsed_a.stats.rows,
        b_rows: parsed_b.stats.rows,
        bot_rows_excluded: parsed_a.stats.bot_rows_excluded + parsed_b.stats.bot_rows_excluded,
        empty_session_ids: parsed_a.stats.empty_session_ids + parsed_b.stats.empty_session_ids,
        out_of_range_rows: parsed_a.stats.out_of_window + parsed_b.stats.out_of_window,
        warnings: window.warnings.clone(),
        ..Diagnostics::default()
    };
    for (label, parsed) in [(&labels.a, &parsed_a), (&labels.b, &parsed_b)] {
        if parsed.stats.duplicate_sessions > 0 {
            diagnostics.warnings.push(format!(
                "{label}: {} duplicate session rows ignored",
                parsed.stats.duplicate_sessions
            ));
        }
    }

    let range = window.range;
    reconcile_sessions(&parsed_a.sessions, &parsed_b.sessions, range, labels, options, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::MemoryResultCache;
    use crate::services::reconcile::types::DeviceCategory;
    use crate::services::sources::{Grain, StaticSource};
    use crate::test_support::{reconcile_options, session, ts};
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn day_range() -> DateRange {
        let day = NaiveDate::from_ymd_opt(2026, 1, 6).unwrap();
        DateRange::new(day, day).unwrap()
    }

    fn session_batch(rows: &[(&str, i64, &str, &str)]) -> TabularBatch {
        let mut batch = TabularBatch::new(
            Grain::Sessions,
            [
                "session_id",
                "start_timestamp",
                "device_category",
                "operating_system",
                "browser",
                "country",
                "traffic_source",
                "event_count",
                "has_purchase",
                "engagement_time",
            ]
            .map(String::from)
            .to_vec(),
        );
        for (id, secs, device, country) in rows {
            batch.push_row([
                Some(id.to_string()),
                Some(ts(*secs).to_rfc3339()),
                Some(device.to_string()),
                Some("Windows".to_string()),
                Some("Chrome".to_string()),
                Some(country.to_string()),
                None,
                Some("3".to_string()),
                Some("false".to_string()),
                Some("1500".to_string()),
            ]);
        }
        batch
    }

    fn scenario_sources() -> (StaticSource, StaticSource) {
        (
            StaticSource::new(
                "sst",
                session_batch(&[("1", 1000, "desktop", "AU"), ("2", 5000, "mobile", "AU")]),
            ),
            StaticSource::new(
                "direct",
                session_batch(&[("101", 1003, "desktop", "Australia"), ("102", 9000, "desktop", "NZ")]),
            ),
        )
    }

    #[test]
    fn core_reconciles_the_reference_scenario() {
        let a = vec![
            session(SourceSide::A, "1", 1000, DeviceCategory::Desktop, "Australia"),
            session(SourceSide::A, "2", 5000, DeviceCategory::Mobile, "Australia"),
        ];
        let b = vec![
            session(SourceSide::B, "101", 1003, DeviceCategory::Desktop, "Australia"),
            session(SourceSide::B, "102", 9000, DeviceCategory::Desktop, "New Zealand"),
        ];
        let labels = SourceLabels {
            a: "sst".to_string(),
            b: "direct".to_string(),
        };
        let out = reconcile_sessions(&a, &b, day_range(), labels, &reconcile_options(), Diagnostics::default())
            .unwrap();

        let totals = out.result.totals;
        assert_eq!((totals.both, totals.a_only, totals.b_only, totals.total), (1, 1, 1, 3));
        assert_eq!(out.sessions.len(), 3);
        let both = &out.sessions[0];
        assert_eq!(both.category, SessionCategory::Both);
        assert_eq!(both.session.session_id, "1");
        assert_eq!(both.counterpart_id.as_deref(), Some("101"));
        assert_eq!(out.result.daily.len(), 1);
        assert_eq!(out.result.hourly.len(), 24);
        assert_eq!(out.result.diagnostics.a_sessions, 2);
        assert_eq!(out.result.diagnostics.b_sessions, 2);
    }

    #[test]
    fn empty_inputs_produce_zeroed_result() {
        let labels = SourceLabels {
            a: "sst".to_string(),
            b: "direct".to_string(),
        };
        let out = reconcile_sessions(&[], &[], day_range(), labels, &reconcile_options(), Diagnostics::default())
            .unwrap();
        assert_eq!(out.result.totals.total, 0);
        assert_eq!(out.result.profiles.len(), 3);
        for profile in out.result.profiles.values() {
            assert!(profile.is_empty());
            assert_eq!(profile.purchase_rate, 0.0);
            assert_eq!(profile.avg_engagement_sec, 0.0);
        }
        assert!(out.result.daily.iter().all(|row| row.counts.total() == 0));
    }

    #[tokio::test]
    async fn run_parses_sources_and_normalizes_countries() {
        let (a, b) = scenario_sources();
        let reconciler = Reconciler::new(reconcile_options());
        let out = reconciler.run(&a, &b, day_range()).await.unwrap();

        let totals = out.result.totals;
        assert_eq!((totals.both, totals.a_only, totals.b_only), (1, 1, 1));
        assert_eq!(out.result.labels.a, "sst");
        assert_eq!(out.result.diagnostics.a_rows, 2);
        let both = out.result.profile(SessionCategory::Both).unwrap();
        assert_eq!(both.sessions, 1);
        assert!((both.avg_engagement_sec - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rows_outside_the_window_are_dropped_and_counted() {
        let a = StaticSource::new("sst", session_batch(&[("1", 1000, "desktop", "AU"), ("2", 2 * 86_400, "desktop", "AU")]));
        let b = StaticSource::new("direct", session_batch(&[("101", 1003, "desktop", "AU")]));
        let out = Reconciler::new(reconcile_options()).run(&a, &b, day_range()).await.unwrap();
        assert_eq!(out.result.totals.total, 1);
        assert_eq!(out.result.diagnostics.out_of_range_rows, 1);
    }

    #[tokio::test]
    async fn schema_mismatch_fails_the_run() {
        let a = StaticSource::new(
            "sst",
            TabularBatch::new(Grain::Sessions, vec!["session_id".to_string()]),
        );
        let (_, b) = scenario_sources();
        let err = Reconciler::new(reconcile_options()).run(&a, &b, day_range()).await.unwrap_err();
        assert_eq!(err.code(), "schema_mismatch");
        assert_eq!(err.side(), Some(SourceSide::A));
        assert!(err.to_string().contains("2026-01-06"));
    }

    struct StalledSource;

    impl SessionSource for StalledSource {
        fn label(&self) -> &str {
            "stalled"
        }

        async fn fetch(&self, _window: &FetchWindow) -> anyhow::Result<TabularBatch> {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
            Ok(TabularBatch::new(Grain::Sessions, Vec::new()))
        }
    }

    struct FailingSource;

    impl SessionSource for FailingSource {
        fn label(&self) -> &str {
            "broken"
        }

        async fn fetch(&self, _window: &FetchWindow) -> anyhow::Result<TabularBatch> {
            anyhow::bail!("warehouse job cancelled")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_timeout_is_a_data_source_error() {
        let (a, _) = scenario_sources();
        let err = Reconciler::new(reconcile_options())
            .run(&a, &StalledSource, day_range())
            .await
            .unwrap_err();
        match err {
            ReconcileError::DataSource { side, label, range, message } => {
                assert_eq!(side, SourceSide::B);
                assert_eq!(label, "stalled");
                assert_eq!(range, day_range());
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_failure_carries_source_context() {
        let (_, b) = scenario_sources();
        let err = Reconciler::new(reconcile_options())
            .run(&FailingSource, &b, day_range())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "data_source_error");
        assert!(err.to_string().contains("broken"));
        assert!(err.to_string().contains("warehouse job cancelled"));
    }

    struct CountingSource {
        inner: StaticSource,
        calls: AtomicUsize,
    }

    impl SessionSource for CountingSource {
        fn label(&self) -> &str {
            self.inner.label()
        }

        fn fingerprint(&self) -> String {
            self.inner.fingerprint()
        }

        async fn fetch(&self, window: &FetchWindow) -> anyhow::Result<TabularBatch> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(window).await
        }
    }

    #[tokio::test]
    async fn second_run_is_served_from_cache_until_invalidated() {
        let (a, b) = scenario_sources();
        let a = CountingSource {
            inner: a,
            calls: AtomicUsize::new(0),
        };
        let cache = Arc::new(MemoryResultCache::new(None));
        let reconciler = Reconciler::new(reconcile_options()).with_cache(cache.clone());

        let first = reconciler.run(&a, &b, day_range()).await.unwrap();
        let second = reconciler.run(&a, &b, day_range()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);

        assert!(reconciler.invalidate(&a, &b, &day_range()).await.unwrap());
        reconciler.run(&a, &b, day_range()).await.unwrap();
        assert_eq!(a.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn changed_source_content_is_not_served_from_cache() {
        let (a, b) = scenario_sources();
        let cache = Arc::new(MemoryResultCache::new(None));
        let reconciler = Reconciler::new(reconcile_options()).with_cache(cache.clone());

        let first = reconciler.run(&a, &b, day_range()).await.unwrap();
        assert_eq!(first.result.totals.b_only, 1);

        let rewritten = StaticSource::new("direct", session_batch(&[("101", 1003, "desktop", "Australia")]));
        let second = reconciler.run(&a, &rewritten, day_range()).await.unwrap();
        let totals = second.result.totals;
        assert_eq!((totals.both, totals.a_only, totals.b_only), (1, 1, 0));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn changed_profile_options_are_not_served_from_cache() {
        let (a, b) = scenario_sources();
        let cache = Arc::new(MemoryResultCache::new(None));
        let first = Reconciler::new(reconcile_options())
            .with_cache(cache.clone())
            .run(&a, &b, day_range())
            .await
            .unwrap();
        let both = first.result.profile(SessionCategory::Both).unwrap();
        assert_eq!(both.business_hours_pct, 0.0);
        assert_eq!(both.composite_pct.len(), 2);

        let mut options = reconcile_options();
        options.profile.business_hours_start = 0;
        options.profile.business_hours_end = 1;
        options.profile.composites.clear();
        let second = Reconciler::new(options)
            .with_cache(cache.clone())
            .run(&a, &b, day_range())
            .await
            .unwrap();
        let both = second.result.profile(SessionCategory::Both).unwrap();
        assert_eq!(both.business_hours_pct, 100.0);
        assert!(both.composite_pct.is_empty());
        assert_eq!(cache.len(), 2);
    }
}
