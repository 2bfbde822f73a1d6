use std::collections::BTreeMap;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::categorize::CategorizedSessions;
use super::types::{CategoryCounts, DailyCount, HourlyCount};
use crate::time::{local_parts, DateRange};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeseries {
    pub daily: Vec<DailyCount>,
    pub hourly: Vec<HourlyCount>,
    pub hourly_weekday: Vec<HourlyCount>,
    pub hourly_weekend: Vec<HourlyCount>,
    /// Sessions whose local start date fell outside the requested range.
    pub out_of_range: u64,
}

/// Buckets every labelled session by its local start date and hour.
///
/// The daily table covers every date of `range`, widened to any date a session actually
/// starts on, so no session is dropped. Hourly tables always hold hours 0 through 23.
pub fn build_timeseries(categorized: &CategorizedSessions, range: DateRange, timezone: Tz) -> Timeseries {
    let mut daily: BTreeMap<NaiveDate, CategoryCounts> =
        range.days().into_iter().map(|day| (day, CategoryCounts::default())).collect();
    let mut hourly = [CategoryCounts::default(); 24];
    let mut hourly_weekday = [CategoryCounts::default(); 24];
    let mut hourly_weekend = [CategoryCounts::default(); 24];
    let mut out_of_range = 0u64;

    for labeled in categorized.iter() {
        let local = local_parts(&timezone, labeled.session.start_timestamp);
        if !range.contains(local.date) {
            out_of_range += 1;
        }
        daily.entry(local.date).or_default().increment(labeled.category);
        let hour = local.hour as usize;
        hourly[hour].increment(labeled.category);
        if local.is_weekend() {
            hourly_weekend[hour].increment(labeled.category);
        } else {
            hourly_weekday[hour].increment(labeled.category);
        }
    }

    if out_of_range > 0 {
        tracing::warn!(
            out_of_range,
            %range,
            "sessions start outside the requested range; daily table widened"
        );
    }

    Timeseries {
        daily: densify_days(daily),
        hourly: to_hourly(&hourly),
        hourly_weekday: to_hourly(&hourly_weekday),
        hourly_weekend: to_hourly(&hourly_weekend),
        out_of_range,
    }
}

fn densify_days(counts: BTreeMap<NaiveDate, CategoryCounts>) -> Vec<DailyCount> {
    let (Some(first), Some(last)) = (
        counts.keys().next().copied(),
        counts.keys().next_back().copied(),
    ) else {
        return Vec::new();
    };
    first
        .iter_days()
        .take_while(|day| *day <= last)
        .map(|date| DailyCount {
            date,
            counts: counts.get(&date).copied().unwrap_or_default(),
        })
        .collect()
}

fn to_hourly(counts: &[CategoryCounts; 24]) -> Vec<HourlyCount> {
    counts
        .iter()
        .enumerate()
        .map(|(hour, counts)| HourlyCount {
            hour: hour as u32,
            counts: *counts,
        })
        .collect()
}
