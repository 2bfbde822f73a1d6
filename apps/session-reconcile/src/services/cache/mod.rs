//! Memoization of reconciliation results.
//!
//! Entries are addressed by a SHA-256 digest of everything that determines a result: source
//! labels and content fingerprints, the date range, every run parameter (matching, parsing and
//! profile options) and the schema version. There are no partial updates:
//! a miss, an expired entry or an unreadable entry all mean full recomputation.

pub mod store;

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::ReconcileError;
use crate::services::reconcile::profile::CompositeShareSpec;
use crate::services::reconcile::types::{Reconciliation, RunParams, SourceFingerprints, SourceLabels};
use crate::time::DateRange;

pub use store::ParquetResultStore;

/// Bumped whenever the cached layout or result semantics change.
pub const CACHE_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

#[derive(Serialize)]
struct CacheKeyMaterial<'a> {
    schema_version: u32,
    source_a: &'a str,
    source_b: &'a str,
    fingerprint_a: &'a str,
    fingerprint_b: &'a str,
    start_date: String,
    end_date: String,
    time_window_seconds: u64,
    timezone: &'a str,
    canonical_side: &'a str,
    purchase_event_name: &'a str,
    exclude_bot_user_agents: bool,
    business_hours_start: u32,
    business_hours_end: u32,
    composites: &'a [CompositeShareSpec],
}

impl CacheKey {
    pub fn for_run(
        labels: &SourceLabels,
        fingerprints: &SourceFingerprints,
        range: &DateRange,
        params: &RunParams,
    ) -> Self {
        let material = CacheKeyMaterial {
            schema_version: CACHE_SCHEMA_VERSION,
            source_a: &labels.a,
            source_b: &labels.b,
            fingerprint_a: &fingerprints.a,
            fingerprint_b: &fingerprints.b,
            start_date: range.start.to_string(),
            end_date: range.end.to_string(),
            time_window_seconds: params.time_window_seconds,
            timezone: &params.timezone,
            canonical_side: params.canonical_side.as_str(),
            purchase_event_name: &params.purchase_event_name,
            exclude_bot_user_agents: params.exclude_bot_user_agents,
            business_hours_start: params.business_hours_start,
            business_hours_end: params.business_hours_end,
            composites: &params.composites,
        };
        // Field order is fixed by the struct, so the JSON is canonical.
        let bytes = serde_json::to_vec(&material).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Accepts a previously printed key.
    pub fn parse(raw: &str) -> Result<Self, ReconcileError> {
        let trimmed = raw.trim().to_ascii_lowercase();
        if trimmed.len() != 64 || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ReconcileError::Cache(format!(
                "`{raw}` is not a 64-character hex cache key"
            )));
        }
        Ok(Self(trimmed))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait ResultCache: Send + Sync {
    /// Returns the entry for `key` if present and not expired as of `now`.
    fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<Reconciliation>, ReconcileError>;

    fn get(&self, key: &CacheKey) -> Result<Option<Reconciliation>, ReconcileError> {
        self.get_at(key, Utc::now())
    }

    fn put(&self, key: &CacheKey, reconciliation: &Reconciliation) -> Result<(), ReconcileError>;

    /// Removes one entry; returns whether it existed.
    fn invalidate(&self, key: &CacheKey) -> Result<bool, ReconcileError>;

    /// Removes every entry; returns how many were removed.
    fn invalidate_all(&self) -> Result<u64, ReconcileError>;
}

pub(crate) fn is_expired(stored_at: DateTime<Utc>, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
    ttl.is_some_and(|ttl| now - stored_at >= ttl)
}

/// In-process cache with an optional time-to-live.
#[derive(Debug, Default)]
pub struct MemoryResultCache {
    ttl: Option<Duration>,
    entries: RwLock<HashMap<CacheKey, (DateTime<Utc>, Reconciliation)>>,
}

impl MemoryResultCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> ReconcileError {
    ReconcileError::Cache("memory cache lock poisoned".to_string())
}

impl ResultCache for MemoryResultCache {
    fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<Reconciliation>, ReconcileError> {
        {
            let entries = self.entries.read().map_err(poisoned)?;
            match entries.get(key) {
                None => return Ok(None),
                Some((stored_at, reconciliation)) if !is_expired(*stored_at, self.ttl, now) => {
                    return Ok(Some(reconciliation.clone()));
                }
                Some(_) => {}
            }
        }
        self.entries.write().map_err(poisoned)?.remove(key);
        Ok(None)
    }

    fn put(&self, key: &CacheKey, reconciliation: &Reconciliation) -> Result<(), ReconcileError> {
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(key.clone(), (Utc::now(), reconciliation.clone()));
        Ok(())
    }

    fn invalidate(&self, key: &CacheKey) -> Result<bool, ReconcileError> {
        Ok(self.entries.write().map_err(poisoned)?.remove(key).is_some())
    }

    fn invalidate_all(&self) -> Result<u64, ReconcileError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let count = entries.len() as u64;
        entries.clear();
        Ok(count)
    }
}
