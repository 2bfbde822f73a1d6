use crate::services::reconcile::types::SourceSide;
use crate::time::DateRange;

/// Fatal conditions surfaced by a reconciliation run.
///
/// Every variant carries enough context (source, date range, column) for a caller to retry
/// the run by hand. Non-fatal conditions (ties during matching, empty categories) are never
/// represented here.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("data source {label} ({side}) failed for {range}: {message}")]
    DataSource {
        side: SourceSide,
        label: String,
        range: DateRange,
        message: String,
    },
    #[error(
        "data source {label} ({side}) is missing required column `{column}` (available: {available}){}",
        for_range(.range)
    )]
    SchemaMismatch {
        side: SourceSide,
        label: String,
        /// Requested range, when the batch was fetched for one.
        range: Option<DateRange>,
        column: String,
        available: String,
    },
    #[error("data source {label} ({side}) row {row}: invalid `{column}`: {reason}{}", for_range(.range))]
    InvalidRow {
        side: SourceSide,
        label: String,
        range: Option<DateRange>,
        row: usize,
        column: String,
        reason: String,
    },
    #[error("invalid date range: {0}")]
    InvalidRange(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("reconciliation invariant violated: {0}")]
    Invariant(String),
    #[error("result cache failure: {0}")]
    Cache(String),
    #[error("reconciliation task failed: {0}")]
    Task(String),
}

fn for_range(range: &Option<DateRange>) -> String {
    range.map(|range| format!(" (requested {range})")).unwrap_or_default()
}

impl ReconcileError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DataSource { .. } => "data_source_error",
            Self::SchemaMismatch { .. } => "schema_mismatch",
            Self::InvalidRow { .. } => "invalid_row",
            Self::InvalidRange(_) => "invalid_range",
            Self::Config(_) => "invalid_config",
            Self::Invariant(_) => "invariant_violation",
            Self::Cache(_) => "cache_error",
            Self::Task(_) => "task_failed",
        }
    }

    /// Source side the failure is attributed to, when there is one.
    pub fn side(&self) -> Option<SourceSide> {
        match self {
            Self::DataSource { side, .. }
            | Self::SchemaMismatch { side, .. }
            | Self::InvalidRow { side, .. } => Some(*side),
            _ => None,
        }
    }

    pub fn to_details(&self) -> serde_json::Value {
        match self {
            Self::DataSource {
                side, label, range, ..
            } => serde_json::json!({
                "side": side,
                "source": label,
                "start_date": range.start,
                "end_date": range.end,
            }),
            Self::SchemaMismatch {
                side,
                label,
                range,
                column,
                ..
            } => serde_json::json!({
                "side": side,
                "source": label,
                "column": column,
                "start_date": range.map(|range| range.start),
                "end_date": range.map(|range| range.end),
            }),
            Self::InvalidRow {
                side,
                label,
                range,
                row,
                column,
                ..
            } => serde_json::json!({
                "side": side,
                "source": label,
                "row": row,
                "column": column,
                "start_date": range.map(|range| range.start),
                "end_date": range.map(|range| range.end),
            }),
            _ => serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn data_source_error_names_range_and_source() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2026, 1, 6).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 13).unwrap(),
        )
        .unwrap();
        let err = ReconcileError::DataSource {
            side: SourceSide::B,
            label: "direct".to_string(),
            range,
            message: "query timed out after 120s".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("direct"));
        assert!(message.contains("2026-01-06"));
        assert!(message.contains("2026-01-13"));
        assert_eq!(err.code(), "data_source_error");
        assert_eq!(err.side(), Some(SourceSide::B));
        assert_eq!(err.to_details()["source"], "direct");
    }

    #[test]
    fn schema_mismatch_reports_column() {
        let err = ReconcileError::SchemaMismatch {
            side: SourceSide::A,
            label: "sst".to_string(),
            range: None,
            column: "start_timestamp".to_string(),
            available: "session_id, country".to_string(),
        };
        assert_eq!(err.code(), "schema_mismatch");
        assert!(err.to_string().contains("`start_timestamp`"));
        assert_eq!(err.to_details()["column"], "start_timestamp");
        assert!(err.to_details()["start_date"].is_null());
    }

    #[test]
    fn invalid_row_names_requested_range() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2026, 1, 6).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 13).unwrap(),
        )
        .unwrap();
        let err = ReconcileError::InvalidRow {
            side: SourceSide::B,
            label: "direct".to_string(),
            range: Some(range),
            row: 4,
            column: "start_timestamp".to_string(),
            reason: "unparseable".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("row 4"));
        assert!(message.contains("2026-01-06"));
        assert!(message.contains("2026-01-13"));
        assert_eq!(err.to_details()["start_date"], "2026-01-06");
    }
}
