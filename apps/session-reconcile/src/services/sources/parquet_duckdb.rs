use std::path::PathBuf;

use anyhow::{Context, Result};
use duckdb::Connection;

use super::schema::{Grain, TabularBatch};
use super::SessionSource;
use crate::time::FetchWindow;

/// Parquet exports read through an in-memory DuckDB connection.
///
/// Every column is cast to VARCHAR so typed and untyped exports go through the same
/// boundary parser.
#[derive(Debug, Clone)]
pub struct ParquetSource {
    label: String,
    paths: Vec<PathBuf>,
    grain: Grain,
    tmp_path: PathBuf,
}

impl ParquetSource {
    pub fn new(label: impl Into<String>, paths: Vec<PathBuf>, grain: Grain, tmp_path: PathBuf) -> Self {
        Self {
            label: label.into(),
            paths,
            grain,
            tmp_path,
        }
    }
}

pub(crate) fn escape_single_quotes(input: &str) -> String {
    input.replace('\'', "''")
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn open_connection(tmp_path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    let tmp_dir = tmp_path.join("duckdb");
    std::fs::create_dir_all(&tmp_dir).ok();

    // Best-effort settings.
    let _ = conn.execute("PRAGMA threads=2", []);
    let _ = conn.execute("PRAGMA enable_progress_bar=false", []);
    let _ = conn.execute("SET TimeZone='UTC'", []);
    let _ = conn.execute(
        &format!(
            "SET temp_directory='{}'",
            escape_single_quotes(&tmp_dir.display().to_string())
        ),
        [],
    );
    Ok(conn)
}

fn read_parquet_as_text(paths: &[PathBuf], grain: Grain, tmp_path: &std::path::Path) -> Result<TabularBatch> {
    let conn = open_connection(tmp_path)?;
    let files_sql = paths
        .iter()
        .map(|p| format!("'{}'", escape_single_quotes(&p.display().to_string())))
        .collect::<Vec<_>>()
        .join(", ");
    let source_sql = format!("read_parquet([{files_sql}], union_by_name=1)");

    let mut describe = conn.prepare(&format!("DESCRIBE SELECT * FROM {source_sql}"))?;
    let mut rows = describe.query([])?;
    let mut columns: Vec<String> = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get(0)?);
    }
    let mut batch = TabularBatch::new(grain, columns.clone());
    if columns.is_empty() {
        return Ok(batch);
    }

    let select_sql = columns
        .iter()
        .map(|name| format!("CAST({} AS VARCHAR)", quote_ident(name)))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!("SELECT {select_sql} FROM {source_sql}"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut values: Vec<Option<String>> = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(row.get(idx)?);
        }
        batch.push_row(values);
    }
    Ok(batch)
}

impl SessionSource for ParquetSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn fingerprint(&self) -> String {
        super::file_fingerprint(&self.paths, self.grain)
    }

    async fn fetch(&self, window: &FetchWindow) -> Result<TabularBatch> {
        anyhow::ensure!(!self.paths.is_empty(), "no parquet files for source {}", self.label);
        let paths = self.paths.clone();
        let grain = self.grain;
        let tmp_path = self.tmp_path.clone();
        let started = std::time::Instant::now();
        let batch = tokio::task::spawn_blocking(move || read_parquet_as_text(&paths, grain, &tmp_path))
            .await
            .context("duckdb reader task panicked")?
            .with_context(|| format!("failed to read parquet for source {}", self.label))?;
        tracing::info!(
            source = %self.label,
            files = self.paths.len(),
            rows = batch.len(),
            range = %window.range,
            duration_ms = started.elapsed().as_millis() as u64,
            "parquet source loaded"
        );
        Ok(batch)
    }
}
