use anyhow::{Context, Result};
use chrono::{Duration, TimeZone, Utc};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use session_reconcile::config::ReconcileConfig;
use session_reconcile::services::reconcile::types::{
    DeviceCategory, Diagnostics, SessionSummary, SourceLabels, SourceSide,
};
use session_reconcile::services::reconcile::{reconcile_sessions, ReconcileOptions};
use session_reconcile::time::DateRange;
use std::path::PathBuf;
use std::time::{Duration as StdDuration, Instant};

#[derive(Debug, Parser)]
#[command(about = "Synthetic benchmark for the session matcher and summary builders.")]
struct Args {
    /// Sessions generated for source A.
    #[arg(long, default_value_t = 50_000)]
    sessions: usize,

    /// Share of A sessions that source B also sees (0..1).
    #[arg(long, default_value_t = 0.8)]
    overlap: f64,

    /// Extra B-only sessions as a share of A sessions.
    #[arg(long, default_value_t = 0.1)]
    b_extra: f64,

    /// Maximum clock skew (seconds) applied to B copies of shared sessions.
    #[arg(long, default_value_t = 5)]
    max_skew_seconds: i64,

    /// Days the synthetic sessions span.
    #[arg(long, default_value_t = 7)]
    days: i64,

    /// Matching window in seconds.
    #[arg(long, default_value_t = 300)]
    window_seconds: u64,

    /// Number of runs to collect for p50/p95.
    #[arg(long, default_value_t = 5)]
    runs: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Optional Markdown report path.
    #[arg(long)]
    report: Option<PathBuf>,
}

const COUNTRIES: [&str; 6] = [
    "Australia",
    "United States",
    "China",
    "Germany",
    "Japan",
    "New Zealand",
];
const BROWSERS: [&str; 4] = ["Chrome", "Safari", "Firefox", "Edge"];

fn random_session(rng: &mut StdRng, side: SourceSide, id: String, span_secs: i64) -> SessionSummary {
    let start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).single().unwrap_or_default()
        + Duration::seconds(rng.gen_range(0..span_secs));
    let device = DeviceCategory::ALL[rng.gen_range(0..DeviceCategory::ALL.len())];
    SessionSummary {
        side,
        session_id: id,
        start_timestamp: start,
        device_category: device,
        operating_system: if device == DeviceCategory::Desktop { "Windows" } else { "Android" }.to_string(),
        browser: BROWSERS[rng.gen_range(0..BROWSERS.len())].to_string(),
        country: COUNTRIES[rng.gen_range(0..COUNTRIES.len())].to_string(),
        traffic_source: rng.gen_bool(0.7).then(|| "google".to_string()),
        event_count: rng.gen_range(1..40),
        has_purchase: rng.gen_bool(0.03),
        engagement_time: StdDuration::from_millis(rng.gen_range(0..600_000)),
    }
}

fn generate(args: &Args) -> (Vec<SessionSummary>, Vec<SessionSummary>) {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let span_secs = args.days.max(1) * 86_400;
    let overlap = args.overlap.clamp(0.0, 1.0);
    let mut a = Vec::with_capacity(args.sessions);
    let mut b = Vec::with_capacity(args.sessions);
    for idx in 0..args.sessions {
        let session = random_session(&mut rng, SourceSide::A, format!("a{idx}"), span_secs);
        if rng.gen_bool(overlap) {
            let mut copy = session.clone();
            copy.side = SourceSide::B;
            copy.session_id = format!("b{idx}");
            let skew = args.max_skew_seconds.max(0);
            copy.start_timestamp += Duration::seconds(rng.gen_range(-skew..=skew));
            b.push(copy);
        }
        a.push(session);
    }
    let extra = (args.sessions as f64 * args.b_extra.max(0.0)) as usize;
    for idx in 0..extra {
        b.push(random_session(&mut rng, SourceSide::B, format!("bx{idx}"), span_secs));
    }
    (a, b)
}

fn percentile_ms(samples: &[u64], pct: f64) -> Option<u64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let pct = pct.clamp(0.0, 1.0);
    let idx = ((sorted.len() - 1) as f64 * pct).round() as usize;
    sorted.get(idx).copied()
}

fn fmt_opt_u64(opt: Option<u64>) -> String {
    opt.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let config = ReconcileConfig {
        time_window_seconds: args.window_seconds,
        ..ReconcileConfig::default()
    };
    let options: ReconcileOptions = config.reconcile_options()?;
    let (a, b) = generate(&args);
    let first = a
        .iter()
        .chain(&b)
        .map(|s| s.start_timestamp.date_naive())
        .min()
        .context("no sessions generated")?;
    let last = a
        .iter()
        .chain(&b)
        .map(|s| s.start_timestamp.date_naive())
        .max()
        .context("no sessions generated")?;
    let range = DateRange::new(first, last)?;
    let labels = SourceLabels {
        a: "synthetic_a".to_string(),
        b: "synthetic_b".to_string(),
    };

    let mut wall_ms = Vec::with_capacity(args.runs);
    let mut last_totals = None;
    for run in 0..args.runs.max(1) {
        let started = Instant::now();
        let out = reconcile_sessions(&a, &b, range, labels.clone(), &options, Diagnostics::default())?;
        let elapsed = started.elapsed().as_millis() as u64;
        eprintln!(
            "run {}: {} ms (both={} a_only={} b_only={})",
            run + 1,
            elapsed,
            out.result.totals.both,
            out.result.totals.a_only,
            out.result.totals.b_only
        );
        wall_ms.push(elapsed);
        last_totals = Some(out.result.totals);
    }

    let p50 = percentile_ms(&wall_ms, 0.50);
    let p95 = percentile_ms(&wall_ms, 0.95);
    let totals = last_totals.unwrap_or_default();
    let mut report = String::new();
    report.push_str("# Session reconcile benchmark\n\n");
    report.push_str(&format!(
        "- A sessions: {}\n- B sessions: {}\n- Window: {}s\n- Seed: {}\n- Runs: {}\n\n",
        a.len(),
        b.len(),
        args.window_seconds,
        args.seed,
        wall_ms.len()
    ));
    report.push_str("| metric | value |\n|---|---|\n");
    report.push_str(&format!("| wall p50 (ms) | {} |\n", fmt_opt_u64(p50)));
    report.push_str(&format!("| wall p95 (ms) | {} |\n", fmt_opt_u64(p95)));
    report.push_str(&format!("| both | {} |\n", totals.both));
    report.push_str(&format!("| a_only | {} |\n", totals.a_only));
    report.push_str(&format!("| b_only | {} |\n", totals.b_only));

    if let Some(path) = args.report.as_ref() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        std::fs::write(path, &report).with_context(|| format!("failed to write {}", path.display()))?;
    }
    print!("{report}");
    Ok(())
}
