use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::schema::{Grain, TabularBatch};
use super::SessionSource;
use crate::time::FetchWindow;

/// CSV export with a header row. Empty cells are treated as missing values.
#[derive(Debug, Clone)]
pub struct CsvSource {
    label: String,
    path: PathBuf,
    grain: Grain,
}

impl CsvSource {
    pub fn new(label: impl Into<String>, path: PathBuf, grain: Grain) -> Self {
        Self {
            label: label.into(),
            path,
            grain,
        }
    }
}

fn read_csv(path: &Path, grain: Grain) -> Result<TabularBatch> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let columns = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();

    let mut batch = TabularBatch::new(grain, columns);
    for (idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("{}: malformed record {}", path.display(), idx + 1))?;
        batch.push_row(record.iter().map(|value| (!value.is_empty()).then_some(value)));
    }
    Ok(batch)
}

impl SessionSource for CsvSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn fingerprint(&self) -> String {
        super::file_fingerprint(std::slice::from_ref(&self.path), self.grain)
    }

    async fn fetch(&self, window: &FetchWindow) -> Result<TabularBatch> {
        let path = self.path.clone();
        let grain = self.grain;
        let started = std::time::Instant::now();
        let batch = tokio::task::spawn_blocking(move || read_csv(&path, grain))
            .await
            .context("csv reader task panicked")??;
        tracing::info!(
            source = %self.label,
            path = %self.path.display(),
            rows = batch.len(),
            range = %window.range,
            duration_ms = started.elapsed().as_millis() as u64,
            "csv source loaded"
        );
        Ok(batch)
    }
}
