use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::dimensions::country_key;
use super::types::{DeviceCategory, SessionSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedPair {
    pub a_index: usize,
    pub b_index: usize,
    /// `b.start - a.start` in microseconds.
    pub delta_micros: i64,
}

/// Several unmatched B candidates were equally close to one A session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieRecord {
    pub a_session_id: String,
    pub chosen_b_session_id: String,
    pub other_b_session_ids: Vec<String>,
    pub abs_delta_micros: i64,
}

/// Partial bijection between A and B session indices.
///
/// Only [`match_sessions`] builds one; `assign` refuses any pair that would reuse a session,
/// so an assignment can never hold the same session twice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchAssignment {
    pairs: Vec<MatchedPair>,
    a_partner: Vec<Option<usize>>,
    b_partner: Vec<Option<usize>>,
    ties: Vec<TieRecord>,
}

impl MatchAssignment {
    fn new(a_len: usize, b_len: usize) -> Self {
        Self {
            pairs: Vec::new(),
            a_partner: vec![None; a_len],
            b_partner: vec![None; b_len],
            ties: Vec::new(),
        }
    }

    fn assign(&mut self, a_index: usize, b_index: usize, delta_micros: i64) -> bool {
        if self.a_partner[a_index].is_some() || self.b_partner[b_index].is_some() {
            return false;
        }
        self.a_partner[a_index] = Some(b_index);
        self.b_partner[b_index] = Some(a_index);
        self.pairs.push(MatchedPair {
            a_index,
            b_index,
            delta_micros,
        });
        true
    }

    pub fn pairs(&self) -> &[MatchedPair] {
        &self.pairs
    }

    pub fn partner_of_a(&self, a_index: usize) -> Option<usize> {
        self.a_partner.get(a_index).copied().flatten()
    }

    pub fn partner_of_b(&self, b_index: usize) -> Option<usize> {
        self.b_partner.get(b_index).copied().flatten()
    }

    pub fn is_b_matched(&self, b_index: usize) -> bool {
        self.partner_of_b(b_index).is_some()
    }

    pub fn ties(&self) -> &[TieRecord] {
        &self.ties
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn a_len(&self) -> usize {
        self.a_partner.len()
    }

    pub fn b_len(&self) -> usize {
        self.b_partner.len()
    }
}

type BucketKey = (DeviceCategory, String);

/// B sessions grouped by the attributes a pair must share, each bucket sorted by
/// `(start micros, input index)`.
fn index_candidates(b: &[SessionSummary]) -> HashMap<BucketKey, Vec<(i64, usize)>> {
    let mut buckets: HashMap<BucketKey, Vec<(i64, usize)>> = HashMap::new();
    for (idx, session) in b.iter().enumerate() {
        buckets
            .entry((session.device_category, country_key(&session.country)))
            .or_default()
            .push((session.start_timestamp.timestamp_micros(), idx));
    }
    for bucket in buckets.values_mut() {
        bucket.sort_unstable();
    }
    buckets
}

/// Greedy nearest-neighbour pairing of A sessions onto B sessions.
///
/// A sessions are visited in input order. Each takes the still-unmatched B session with the
/// same device category and country whose start time is closest and within `time_window`
/// (inclusive); equal distances go to the lower B index. Choices are never revisited, so a
/// later A session can lose a closer partner to an earlier one. The result is deterministic
/// but not a minimum-cost matching.
pub fn match_sessions(
    a: &[SessionSummary],
    b: &[SessionSummary],
    time_window: Duration,
) -> MatchAssignment {
    let window_micros = i64::try_from(time_window.as_micros()).unwrap_or(i64::MAX);
    let buckets = index_candidates(b);
    let mut assignment = MatchAssignment::new(a.len(), b.len());

    for (a_index, session) in a.iter().enumerate() {
        let key = (session.device_category, country_key(&session.country));
        let Some(bucket) = buckets.get(&key) else {
            continue;
        };

        let start = session.start_timestamp.timestamp_micros();
        let lo_bound = start.saturating_sub(window_micros);
        let hi_bound = start.saturating_add(window_micros);
        let lo = bucket.partition_point(|(ts, _)| *ts < lo_bound);
        let hi = bucket.partition_point(|(ts, _)| *ts <= hi_bound);

        let mut best: Option<(i64, usize, i64)> = None;
        let mut tied: Vec<usize> = Vec::new();
        for &(ts, b_index) in &bucket[lo..hi] {
            if assignment.is_b_matched(b_index) {
                continue;
            }
            let delta = ts - start;
            let abs = delta.abs();
            match best {
                Some((best_abs, best_idx, _)) if (abs, b_index) >= (best_abs, best_idx) => {
                    if abs == best_abs {
                        tied.push(b_index);
                    }
                }
                Some((best_abs, best_idx, _)) => {
                    if abs == best_abs {
                        tied.push(best_idx);
                    } else {
                        tied.clear();
                    }
                    best = Some((abs, b_index, delta));
                }
                None => best = Some((abs, b_index, delta)),
            }
        }

        let Some((abs, b_index, delta)) = best else {
            continue;
        };
        assignment.assign(a_index, b_index, delta);

        if !tied.is_empty() {
            tied.sort_unstable();
            let record = TieRecord {
                a_session_id: session.session_id.clone(),
                chosen_b_session_id: b[b_index].session_id.clone(),
                other_b_session_ids: tied.iter().map(|idx| b[*idx].session_id.clone()).collect(),
                abs_delta_micros: abs,
            };
            tracing::debug!(
                a_session_id = %record.a_session_id,
                chosen = %record.chosen_b_session_id,
                others = record.other_b_session_ids.len(),
                abs_delta_micros = abs,
                "equally close match candidates; lowest input index chosen"
            );
            assignment.ties.push(record);
        }
    }

    assignment
}
