//! Cross-source session reconciliation.
//!
//! Two tracking pipelines observe the same visits but mint their own session ids. Sessions
//! are paired by start time (within a window) plus equal device category and country, then
//! split into `both`, `a_only` and `b_only` and profiled per category.

pub mod aggregate;
pub mod categorize;
pub mod dimensions;
pub mod hypothesis;
pub mod matcher;
pub mod parity;
pub mod pipeline;
pub mod profile;
pub mod timeseries;
pub mod types;

pub use pipeline::{reconcile_sessions, ReconcileOptions, Reconciler};
pub use types::{Reconciliation, ReconciliationResult, SessionCategory, SessionSummary, SourceSide};
