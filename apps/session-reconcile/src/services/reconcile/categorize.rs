use crate::error::ReconcileError;

use super::matcher::MatchAssignment;
use super::types::{CategoryTotals, LabeledSession, SessionCategory, SessionSummary, SourceSide};

/// The three disjoint session sets derived from one assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct CategorizedSessions {
    pub both: Vec<LabeledSession>,
    pub a_only: Vec<LabeledSession>,
    pub b_only: Vec<LabeledSession>,
    pub canonical_side: SourceSide,
    a_total: usize,
    b_total: usize,
}

impl CategorizedSessions {
    pub fn get(&self, category: SessionCategory) -> &[LabeledSession] {
        match category {
            SessionCategory::Both => &self.both,
            SessionCategory::AOnly => &self.a_only,
            SessionCategory::BOnly => &self.b_only,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabeledSession> {
        self.both.iter().chain(&self.a_only).chain(&self.b_only)
    }

    pub fn totals(&self) -> CategoryTotals {
        let both = self.both.len() as u64;
        let a_only = self.a_only.len() as u64;
        let b_only = self.b_only.len() as u64;
        CategoryTotals {
            both,
            a_only,
            b_only,
            total: both + a_only + b_only,
        }
    }

    /// Re-checks the count identities `both + a_only == |A|` and `both + b_only == |B|`.
    pub fn check_invariants(&self) -> Result<(), ReconcileError> {
        if self.both.len() + self.a_only.len() != self.a_total {
            return Err(ReconcileError::Invariant(format!(
                "both ({}) + a_only ({}) != source A sessions ({})",
                self.both.len(),
                self.a_only.len(),
                self.a_total
            )));
        }
        if self.both.len() + self.b_only.len() != self.b_total {
            return Err(ReconcileError::Invariant(format!(
                "both ({}) + b_only ({}) != source B sessions ({})",
                self.both.len(),
                self.b_only.len(),
                self.b_total
            )));
        }
        Ok(())
    }

    pub fn into_sessions(self) -> Vec<LabeledSession> {
        let mut out = self.both;
        out.extend(self.a_only);
        out.extend(self.b_only);
        out
    }
}

/// Labels every session of both sources.
///
/// Matched pairs become one `Both` record carrying the `canonical_side` session's attributes
/// (and therefore its start timestamp for time bucketing).
pub fn categorize(
    a: &[SessionSummary],
    b: &[SessionSummary],
    assignment: &MatchAssignment,
    canonical_side: SourceSide,
) -> Result<CategorizedSessions, ReconcileError> {
    if assignment.a_len() != a.len() || assignment.b_len() != b.len() {
        return Err(ReconcileError::Invariant(format!(
            "assignment built for {}x{} sessions, categorizing {}x{}",
            assignment.a_len(),
            assignment.b_len(),
            a.len(),
            b.len()
        )));
    }

    let both = assignment
        .pairs()
        .iter()
        .map(|pair| {
            let (canonical, counterpart) = match canonical_side {
                SourceSide::A => (&a[pair.a_index], &b[pair.b_index]),
                SourceSide::B => (&b[pair.b_index], &a[pair.a_index]),
            };
            LabeledSession {
                category: SessionCategory::Both,
                session: canonical.clone(),
                counterpart_id: Some(counterpart.session_id.clone()),
            }
        })
        .collect();

    let a_only = unmatched(a, SourceSide::A, |idx| assignment.partner_of_a(idx));
    let b_only = unmatched(b, SourceSide::B, |idx| assignment.partner_of_b(idx));

    let categorized = CategorizedSessions {
        both,
        a_only,
        b_only,
        canonical_side,
        a_total: a.len(),
        b_total: b.len(),
    };
    categorized.check_invariants()?;
    Ok(categorized)
}

fn unmatched(
    sessions: &[SessionSummary],
    side: SourceSide,
    partner: impl Fn(usize) -> Option<usize>,
) -> Vec<LabeledSession> {
    sessions
        .iter()
        .enumerate()
        .filter(|(idx, _)| partner(*idx).is_none())
        .map(|(_, session)| LabeledSession {
            category: SessionCategory::only(side),
            session: session.clone(),
            counterpart_id: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::reconcile::matcher::match_sessions;
    use crate::services::reconcile::types::DeviceCategory;
    use crate::test_support::session;
    use std::collections::HashSet;
    use std::time::Duration;

    fn fixture() -> (Vec<SessionSummary>, Vec<SessionSummary>) {
        let a = vec![
            session(SourceSide::A, "1", 1000, DeviceCategory::Desktop, "AU"),
            session(SourceSide::A, "2", 5000, DeviceCategory::Mobile, "AU"),
        ];
        let b = vec![
            session(SourceSide::B, "101", 1003, DeviceCategory::Desktop, "AU"),
            session(SourceSide::B, "102", 9000, DeviceCategory::Desktop, "NZ"),
        ];
        (a, b)
    }

    #[test]
    fn partitions_sessions_into_three_sets() {
        let (a, b) = fixture();
        let assignment = match_sessions(&a, &b, Duration::from_secs(300));
        let categorized = categorize(&a, &b, &assignment, SourceSide::A).unwrap();

        let totals = categorized.totals();
        assert_eq!((totals.both, totals.a_only, totals.b_only, totals.total), (1, 1, 1, 3));
        assert_eq!(categorized.both[0].session.session_id, "1");
        assert_eq!(categorized.both[0].counterpart_id.as_deref(), Some("101"));
        assert_eq!(categorized.a_only[0].session.session_id, "2");
        assert_eq!(categorized.b_only[0].session.session_id, "102");
        assert_eq!(categorized.b_only[0].category, SessionCategory::BOnly);
    }

    #[test]
    fn canonical_side_controls_both_attributes() {
        let (a, b) = fixture();
        let assignment = match_sessions(&a, &b, Duration::from_secs(300));
        let categorized = categorize(&a, &b, &assignment, SourceSide::B).unwrap();
        assert_eq!(categorized.both[0].session.session_id, "101");
        assert_eq!(categorized.both[0].session.side, SourceSide::B);
        assert_eq!(categorized.both[0].counterpart_id.as_deref(), Some("1"));
    }

    #[test]
    fn every_session_is_labelled_once() {
        let (a, b) = fixture();
        let assignment = match_sessions(&a, &b, Duration::from_secs(300));
        let categorized = categorize(&a, &b, &assignment, SourceSide::A).unwrap();

        let mut a_ids: HashSet<String> = HashSet::new();
        let mut b_ids: HashSet<String> = HashSet::new();
        for labeled in categorized.iter() {
            match labeled.category {
                SessionCategory::Both => {
                    assert!(a_ids.insert(labeled.session.session_id.clone()));
                    assert!(b_ids.insert(labeled.counterpart_id.clone().unwrap()));
                }
                SessionCategory::AOnly => assert!(a_ids.insert(labeled.session.session_id.clone())),
                SessionCategory::BOnly => assert!(b_ids.insert(labeled.session.session_id.clone())),
            }
        }
        assert_eq!(a_ids.len(), a.len());
        assert_eq!(b_ids.len(), b.len());
        assert_eq!(categorized.into_sessions().len(), 3);
    }

    #[test]
    fn mismatched_assignment_is_an_invariant_error() {
        let (a, b) = fixture();
        let assignment = match_sessions(&a, &b, Duration::from_secs(300));
        let err = categorize(&a[..1], &b, &assignment, SourceSide::A).unwrap_err();
        assert_eq!(err.code(), "invariant_violation");
    }

    #[test]
    fn empty_sources_categorize_to_nothing() {
        let assignment = match_sessions(&[], &[], Duration::from_secs(300));
        let categorized = categorize(&[], &[], &assignment, SourceSide::A).unwrap();
        assert_eq!(categorized.totals(), CategoryTotals::default());
    }
}
