use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use session_reconcile::cli::{self, Command, RunArgs};
use session_reconcile::config::ReconcileConfig;
use session_reconcile::services::cache::{CacheKey, ParquetResultStore, ResultCache};
use session_reconcile::services::reconcile::hypothesis::{self, Hypothesis, HypothesisAssessment};
use session_reconcile::services::reconcile::types::{
    CategoryTotals, LabeledSession, Reconciliation, ReconciliationResult,
};
use session_reconcile::services::reconcile::Reconciler;
use session_reconcile::services::sources::FileSource;
use session_reconcile::time::DateRange;
use std::path::Path;
use std::sync::Arc;

#[derive(Serialize)]
struct RunOutput<'a> {
    cache_key: String,
    result: &'a ReconciliationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    sessions: Option<&'a [LabeledSession]>,
}

#[derive(Serialize)]
struct HypothesesOutput {
    cache_key: String,
    range: DateRange,
    totals: CategoryTotals,
    assessments: Vec<HypothesisAssessment>,
}

fn emit<T: Serialize>(value: &T, out: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(path) = out {
        std::fs::write(path, &json).with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "output written");
    }
    println!("{json}");
    Ok(())
}

fn open_store(config: &ReconcileConfig) -> Result<ParquetResultStore> {
    Ok(ParquetResultStore::new(config.cache_root.clone(), config.cache_ttl()?))
}

async fn reconcile(config: &ReconcileConfig, run: &RunArgs) -> Result<(CacheKey, Reconciliation)> {
    let range = DateRange::parse(&run.start, &run.end)?;
    let tmp_path = config.cache_root.clone();
    let source_a = FileSource::open(
        config.source_a_label.clone(),
        run.a_paths.clone(),
        run.a_grain.into(),
        &tmp_path,
    )?;
    let source_b = FileSource::open(
        config.source_b_label.clone(),
        run.b_paths.clone(),
        run.b_grain.into(),
        &tmp_path,
    )?;

    let mut reconciler = Reconciler::new(config.reconcile_options()?);
    if config.cache_enabled {
        reconciler = reconciler.with_cache(Arc::new(open_store(config)?));
    }
    let reconciliation = reconciler.run(&source_a, &source_b, range).await?;
    let key = reconciler.cache_key(&source_a, &source_b, &range);
    Ok((key, reconciliation))
}

fn load_definitions(path: &Path) -> Result<Vec<Hypothesis>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = ReconcileConfig::from_env()?;

    match args.command {
        Command::Run(run) => {
            run.apply(&mut config)?;
            let (key, reconciliation) = reconcile(&config, &run).await?;
            let output = RunOutput {
                cache_key: key.to_string(),
                result: &reconciliation.result,
                sessions: run.sessions.then_some(reconciliation.sessions.as_slice()),
            };
            emit(&output, run.out.as_deref())?;
        }
        Command::Hypotheses { run, definitions } => {
            run.apply(&mut config)?;
            let hypotheses = match definitions.as_deref() {
                Some(path) => load_definitions(path)?,
                None => hypothesis::presets(),
            };
            let (key, reconciliation) = reconcile(&config, &run).await?;
            let result = &reconciliation.result;
            let output = HypothesesOutput {
                cache_key: key.to_string(),
                range: result.range,
                totals: result.totals,
                assessments: hypothesis::evaluate_all(&hypotheses, &result.profiles),
            };
            emit(&output, run.out.as_deref())?;
        }
        Command::CacheInvalidate(target) => {
            let store = open_store(&config)?;
            let removed = match target.key.as_deref() {
                Some(raw) => u64::from(store.invalidate(&CacheKey::parse(raw)?)?),
                None => store.invalidate_all()?,
            };
            tracing::info!(root = %store.root().display(), removed, "cache invalidated");
            emit(&serde_json::json!({ "removed": removed }), None)?;
        }
    }
    Ok(())
}
