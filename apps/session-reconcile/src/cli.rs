use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::ReconcileConfig;
use crate::error::ReconcileError;
use crate::services::sources::Grain;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "session-reconcile",
    version,
    about = "Fuzzy-match sessions from two tracking pipelines and profile the overlap"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Reconcile two exports and print the result as JSON.
    Run(RunArgs),
    /// Reconcile, then score the preset (or supplied) hypotheses against the profiles.
    Hypotheses {
        #[command(flatten)]
        run: RunArgs,
        /// JSON array of hypothesis definitions replacing the presets.
        #[arg(long)]
        definitions: Option<PathBuf>,
    },
    /// Drop cached results.
    CacheInvalidate(InvalidateArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrainArg {
    Events,
    Sessions,
}

impl From<GrainArg> for Grain {
    fn from(value: GrainArg) -> Self {
        match value {
            GrainArg::Events => Grain::Events,
            GrainArg::Sessions => Grain::Sessions,
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Source A export(s): one CSV file or one or more parquet files.
    #[arg(long = "a", required = true, num_args = 1..)]
    pub a_paths: Vec<PathBuf>,
    /// Source B export(s).
    #[arg(long = "b", required = true, num_args = 1..)]
    pub b_paths: Vec<PathBuf>,
    #[arg(long, value_enum, default_value_t = GrainArg::Sessions)]
    pub a_grain: GrainArg,
    #[arg(long, value_enum, default_value_t = GrainArg::Sessions)]
    pub b_grain: GrainArg,
    #[arg(long)]
    pub a_label: Option<String>,
    #[arg(long)]
    pub b_label: Option<String>,
    /// First local date, YYYY-MM-DD or YYYYMMDD.
    #[arg(long)]
    pub start: String,
    /// Last local date (inclusive).
    #[arg(long)]
    pub end: String,
    #[arg(long)]
    pub window_seconds: Option<u64>,
    #[arg(long)]
    pub timezone: Option<String>,
    #[arg(long)]
    pub canonical_side: Option<String>,
    #[arg(long, default_value_t = false)]
    pub no_cache: bool,
    /// Include every labelled session in the output.
    #[arg(long, default_value_t = false)]
    pub sessions: bool,
    /// Also write the JSON output to this file.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

impl RunArgs {
    /// Layers the per-run flags over `config` and re-validates.
    pub fn apply(&self, config: &mut ReconcileConfig) -> Result<(), ReconcileError> {
        if let Some(value) = self.window_seconds {
            config.time_window_seconds = value;
        }
        if let Some(value) = self.timezone.as_deref() {
            config.timezone = value.trim().to_string();
        }
        if let Some(value) = self.canonical_side.as_deref() {
            config.canonical_side = value.trim().to_string();
        }
        if let Some(value) = self.a_label.as_deref() {
            config.source_a_label = value.trim().to_string();
        }
        if let Some(value) = self.b_label.as_deref() {
            config.source_b_label = value.trim().to_string();
        }
        if self.no_cache {
            config.cache_enabled = false;
        }
        config.validate()
    }
}

#[derive(ClapArgs, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct InvalidateArgs {
    /// Cache key printed by a previous run.
    #[arg(long)]
    pub key: Option<String>,
    #[arg(long)]
    pub all: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_overrides() {
        let args = Args::try_parse_from([
            "session-reconcile",
            "run",
            "--a",
            "sst-1.parquet",
            "sst-2.parquet",
            "--b",
            "direct.csv",
            "--a-grain",
            "events",
            "--start",
            "2026-01-06",
            "--end",
            "2026-01-12",
            "--window-seconds",
            "120",
            "--timezone",
            "Australia/Sydney",
        ])
        .unwrap();
        let Command::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.a_paths.len(), 2);
        assert_eq!(run.a_grain, GrainArg::Events);
        assert_eq!(run.b_grain, GrainArg::Sessions);

        let mut config = ReconcileConfig::default();
        run.apply(&mut config).unwrap();
        assert_eq!(config.time_window_seconds, 120);
        assert_eq!(config.timezone, "Australia/Sydney");
    }

    #[test]
    fn invalid_override_is_a_config_error() {
        let args = Args::try_parse_from([
            "session-reconcile",
            "hypotheses",
            "--a",
            "a.csv",
            "--b",
            "b.csv",
            "--start",
            "20260106",
            "--end",
            "20260106",
            "--timezone",
            "Nowhere/Special",
        ])
        .unwrap();
        let Command::Hypotheses { run, definitions } = args.command else {
            panic!("expected hypotheses");
        };
        assert!(definitions.is_none());
        let err = run.apply(&mut ReconcileConfig::default()).unwrap_err();
        assert_eq!(err.code(), "invalid_config");
    }

    #[test]
    fn invalidate_requires_key_or_all() {
        assert!(Args::try_parse_from(["session-reconcile", "cache-invalidate"]).is_err());
        assert!(Args::try_parse_from(["session-reconcile", "cache-invalidate", "--all", "--key", "ab"]).is_err());
        let args = Args::try_parse_from(["session-reconcile", "cache-invalidate", "--all"]).unwrap();
        assert!(matches!(args.command, Command::CacheInvalidate(InvalidateArgs { all: true, .. })));
    }
}
