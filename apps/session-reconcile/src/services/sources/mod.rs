pub mod csv_source;
pub mod parquet_duckdb;
pub mod schema;

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::time::FetchWindow;

pub use csv_source::CsvSource;
pub use parquet_duckdb::ParquetSource;
pub use schema::{Grain, TabularBatch};

/// Producer of one pipeline's rows for a date window.
///
/// Implementations own their I/O, including any retry or cancellation contract; the
/// reconciler only bounds each call with a timeout and reports failures as data-source
/// errors.
pub trait SessionSource {
    fn label(&self) -> &str;

    /// Identity of the rows `fetch` would return, folded into the result cache key. Sources
    /// that cannot describe their content return an empty string and are identified by
    /// label alone.
    fn fingerprint(&self) -> String {
        String::new()
    }

    fn fetch(&self, window: &FetchWindow) -> impl Future<Output = Result<TabularBatch>> + Send;
}

fn hex(digest: impl AsRef<[u8]>) -> String {
    digest.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

fn hash_field(hasher: &mut Sha256, value: &[u8]) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value);
}

/// Digest of each file's canonical path, size and modification time. A file that cannot
/// be stat'ed still contributes its path, so the fetch reports the real error.
pub(crate) fn file_fingerprint(paths: &[PathBuf], grain: Grain) -> String {
    let mut hasher = Sha256::new();
    hash_field(&mut hasher, grain.as_str().as_bytes());
    for path in paths {
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.clone());
        hash_field(&mut hasher, canonical.to_string_lossy().as_bytes());
        match std::fs::metadata(path) {
            Ok(meta) => {
                hasher.update(meta.len().to_le_bytes());
                let modified = meta
                    .modified()
                    .ok()
                    .and_then(|at| at.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|since| since.as_nanos())
                    .unwrap_or_default();
                hasher.update(modified.to_le_bytes());
            }
            Err(_) => hash_field(&mut hasher, b"unreadable"),
        }
    }
    hex(hasher.finalize())
}

fn batch_fingerprint(batch: &TabularBatch) -> String {
    let mut hasher = Sha256::new();
    hash_field(&mut hasher, batch.grain.as_str().as_bytes());
    for column in &batch.columns {
        hash_field(&mut hasher, column.as_bytes());
    }
    for row in &batch.rows {
        hasher.update((row.len() as u64).to_le_bytes());
        for cell in row {
            match cell {
                Some(value) => {
                    hasher.update([1u8]);
                    hash_field(&mut hasher, value.as_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
    }
    hex(hasher.finalize())
}

/// Pre-built batch handed in by a library caller.
#[derive(Debug, Clone)]
pub struct StaticSource {
    label: String,
    batch: TabularBatch,
}

impl StaticSource {
    pub fn new(label: impl Into<String>, batch: TabularBatch) -> Self {
        Self {
            label: label.into(),
            batch,
        }
    }
}

impl SessionSource for StaticSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn fingerprint(&self) -> String {
        batch_fingerprint(&self.batch)
    }

    async fn fetch(&self, _window: &FetchWindow) -> Result<TabularBatch> {
        Ok(self.batch.clone())
    }
}

/// A local export, picked by file extension.
#[derive(Debug, Clone)]
pub enum FileSource {
    Csv(CsvSource),
    Parquet(ParquetSource),
}

impl FileSource {
    pub fn open(label: impl Into<String>, paths: Vec<PathBuf>, grain: Grain, tmp_path: &Path) -> Result<Self> {
        let label = label.into();
        let first = paths
            .first()
            .ok_or_else(|| anyhow::anyhow!("no input files given for source {label}"))?;
        let is_parquet = first
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"));
        if is_parquet {
            Ok(Self::Parquet(ParquetSource::new(label, paths, grain, tmp_path.to_path_buf())))
        } else {
            anyhow::ensure!(
                paths.len() == 1,
                "CSV source {label} takes exactly one file, got {}",
                paths.len()
            );
            Ok(Self::Csv(CsvSource::new(label, first.clone(), grain)))
        }
    }
}

impl SessionSource for FileSource {
    fn label(&self) -> &str {
        match self {
            Self::Csv(source) => source.label(),
            Self::Parquet(source) => source.label(),
        }
    }

    fn fingerprint(&self) -> String {
        match self {
            Self::Csv(source) => source.fingerprint(),
            Self::Parquet(source) => source.fingerprint(),
        }
    }

    async fn fetch(&self, window: &FetchWindow) -> Result<TabularBatch> {
        match self {
            Self::Csv(source) => source.fetch(window).await,
            Self::Parquet(source) => source.fetch(window).await,
        }
    }
}
