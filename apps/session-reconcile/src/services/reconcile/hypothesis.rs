//! Weighted-evidence scoring of candidate explanations for single-source sessions.
//!
//! This is a deterministic heuristic: each indicator compares a profile metric against a
//! fixed threshold and awards full, half or no credit. It is not a statistical test and
//! produces no p-values; sample sizes are reported so readers can judge for themselves.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::profile::{CategoryProfile, Dimension, MetricKey};
use super::types::SessionCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    /// The subject's own value.
    Absolute,
    /// Subject share minus reference share, in percentage points.
    ShareDelta,
    /// Subject count minus reference count, for share metrics read as counts.
    CountDelta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Higher,
    Lower,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    pub name: String,
    pub metric: MetricKey,
    pub measure: Measure,
    pub direction: Direction,
    /// Full credit when the observed value strictly clears this threshold.
    pub strong: f64,
    /// Half credit when only this threshold is cleared.
    #[serde(default)]
    pub weak: Option<f64>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Overrides the hypothesis subject for this indicator.
    #[serde(default)]
    pub subject: Option<SessionCategory>,
    /// Overrides the hypothesis baseline for this indicator.
    #[serde(default)]
    pub against: Option<SessionCategory>,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScale {
    pub high: f64,
    pub medium: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl ConfidenceScale {
    pub fn classify(&self, score: f64) -> Confidence {
        if score >= self.high {
            Confidence::High
        } else if score >= self.medium {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub name: String,
    pub description: String,
    pub subject: SessionCategory,
    #[serde(default = "default_baseline")]
    pub baseline: SessionCategory,
    pub indicators: Vec<Indicator>,
    pub scale: ConfidenceScale,
}

fn default_baseline() -> SessionCategory {
    SessionCategory::Both
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorOutcome {
    pub name: String,
    pub metric: MetricKey,
    pub subject: SessionCategory,
    pub subject_value: f64,
    pub reference: Option<SessionCategory>,
    pub reference_value: Option<f64>,
    pub observed: f64,
    pub credit: f64,
    pub max_credit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisAssessment {
    pub name: String,
    pub description: String,
    pub subject: SessionCategory,
    pub baseline: SessionCategory,
    pub subject_sessions: u64,
    pub baseline_sessions: u64,
    pub score: f64,
    pub max_score: f64,
    pub confidence: Confidence,
    pub indicators: Vec<IndicatorOutcome>,
}

fn credit_for(indicator: &Indicator, observed: f64) -> f64 {
    let clears = |threshold: f64| match (indicator.measure, indicator.direction) {
        (_, Direction::Higher) => observed > threshold,
        (Measure::Absolute, Direction::Lower) => observed < threshold,
        (_, Direction::Lower) => -observed > threshold,
    };
    if clears(indicator.strong) {
        indicator.weight
    } else if indicator.weak.is_some_and(clears) {
        indicator.weight * 0.5
    } else {
        0.0
    }
}

pub fn evaluate(
    hypothesis: &Hypothesis,
    profiles: &BTreeMap<SessionCategory, CategoryProfile>,
) -> HypothesisAssessment {
    let empty = CategoryProfile::default();
    let profile_of = |category: SessionCategory| profiles.get(&category).unwrap_or(&empty);

    let indicators: Vec<IndicatorOutcome> = hypothesis
        .indicators
        .iter()
        .map(|indicator| {
            let subject = indicator.subject.unwrap_or(hypothesis.subject);
            let metric = match indicator.measure {
                Measure::CountDelta => indicator.metric.as_count(),
                _ => indicator.metric.clone(),
            };
            let subject_value = profile_of(subject).metric(&metric);
            let (reference, reference_value, observed) = match indicator.measure {
                Measure::Absolute => (None, None, subject_value),
                Measure::ShareDelta | Measure::CountDelta => {
                    let reference = indicator.against.unwrap_or(hypothesis.baseline);
                    let reference_value = profile_of(reference).metric(&metric);
                    (
                        Some(reference),
                        Some(reference_value),
                        subject_value - reference_value,
                    )
                }
            };
            IndicatorOutcome {
                name: indicator.name.clone(),
                metric,
                subject,
                subject_value,
                reference,
                reference_value,
                observed,
                credit: credit_for(indicator, observed),
                max_credit: indicator.weight,
            }
        })
        .collect();

    let score: f64 = indicators.iter().map(|outcome| outcome.credit).sum();
    let max_score: f64 = indicators.iter().map(|outcome| outcome.max_credit).sum();
    let confidence = hypothesis.scale.classify(score);
    tracing::debug!(
        hypothesis = %hypothesis.name,
        score,
        max_score,
        ?confidence,
        "hypothesis evaluated"
    );

    HypothesisAssessment {
        name: hypothesis.name.clone(),
        description: hypothesis.description.clone(),
        subject: hypothesis.subject,
        baseline: hypothesis.baseline,
        subject_sessions: profile_of(hypothesis.subject).sessions,
        baseline_sessions: profile_of(hypothesis.baseline).sessions,
        score,
        max_score,
        confidence,
        indicators,
    }
}

pub fn evaluate_all(
    hypotheses: &[Hypothesis],
    profiles: &BTreeMap<SessionCategory, CategoryProfile>,
) -> Vec<HypothesisAssessment> {
    hypotheses.iter().map(|h| evaluate(h, profiles)).collect()
}

fn indicator(
    name: &str,
    metric: MetricKey,
    measure: Measure,
    direction: Direction,
    strong: f64,
    weak: Option<f64>,
) -> Indicator {
    Indicator {
        name: name.to_string(),
        metric,
        measure,
        direction,
        strong,
        weak,
        weight: 1.0,
        subject: None,
        against: None,
    }
}

/// Sessions only the first pipeline sees come from browsers running ad-blocking extensions
/// that suppress the second pipeline's client-side tag.
pub fn ad_blocker(subject: SessionCategory) -> Hypothesis {
    Hypothesis {
        name: "ad_blocker".to_string(),
        description: "Single-source sessions come from desktop browsers with ad-blocking extensions"
            .to_string(),
        subject,
        baseline: SessionCategory::Both,
        indicators: vec![
            indicator(
                "desktop share above 70%",
                MetricKey::share(Dimension::Device, "desktop"),
                Measure::Absolute,
                Direction::Higher,
                70.0,
                None,
            ),
            indicator(
                "extension-capable browser share above baseline",
                MetricKey::Composite("extension_capable_browser".to_string()),
                Measure::ShareDelta,
                Direction::Higher,
                3.0,
                Some(0.0),
            ),
            indicator(
                "Safari share below baseline",
                MetricKey::share(Dimension::Browser, "Safari"),
                Measure::ShareDelta,
                Direction::Lower,
                0.0,
                None,
            ),
        ],
        scale: ConfidenceScale {
            high: 2.5,
            medium: 1.5,
        },
    }
}

/// Sessions come from managed corporate networks whose proxies block one pipeline.
pub fn corporate_network(subject: SessionCategory) -> Hypothesis {
    Hypothesis {
        name: "corporate_network".to_string(),
        description: "Single-source sessions come from corporate networks during business hours"
            .to_string(),
        subject,
        baseline: SessionCategory::Both,
        indicators: vec![
            indicator(
                "desktop share above 75% (65% partial)",
                MetricKey::share(Dimension::Device, "desktop"),
                Measure::Absolute,
                Direction::Higher,
                75.0,
                Some(65.0),
            ),
            indicator(
                "Windows share 5pp above baseline",
                MetricKey::share(Dimension::OperatingSystem, "Windows"),
                Measure::ShareDelta,
                Direction::Higher,
                5.0,
                None,
            ),
            indicator(
                "business-hours share above baseline",
                MetricKey::BusinessHoursPct,
                Measure::ShareDelta,
                Direction::Higher,
                3.0,
                Some(0.0),
            ),
        ],
        scale: ConfidenceScale {
            high: 2.5,
            medium: 1.5,
        },
    }
}

/// One pipeline's endpoint is unreachable from a country, so that country's sessions show
/// up only in the other pipeline.
pub fn regional_block(subject: SessionCategory, country: &str) -> Hypothesis {
    let share = MetricKey::share(Dimension::Country, country);
    let mirror = match subject {
        SessionCategory::AOnly => SessionCategory::BOnly,
        SessionCategory::BOnly => SessionCategory::AOnly,
        SessionCategory::Both => SessionCategory::Both,
    };
    Hypothesis {
        name: "regional_block".to_string(),
        description: format!("Single-source sessions come from {country}, where one pipeline is blocked"),
        subject,
        baseline: SessionCategory::Both,
        indicators: vec![
            indicator(
                "country share above baseline",
                share.clone(),
                Measure::ShareDelta,
                Direction::Higher,
                5.0,
                Some(0.0),
            ),
            Indicator {
                weight: 0.5,
                subject: Some(mirror),
                ..indicator(
                    "country share in the other single-source set below baseline",
                    share.clone(),
                    Measure::ShareDelta,
                    Direction::Lower,
                    0.0,
                    None,
                )
            },
            Indicator {
                against: Some(mirror),
                ..indicator(
                    "more country sessions than the other single-source set",
                    share,
                    Measure::CountDelta,
                    Direction::Higher,
                    0.0,
                    None,
                )
            },
        ],
        scale: ConfidenceScale {
            high: 2.0,
            medium: 1.0,
        },
    }
}

/// The three explanations evaluated for the default source pairing, where source A is the
/// server-side pipeline and source B the client-side tag.
pub fn presets() -> Vec<Hypothesis> {
    vec![
        ad_blocker(SessionCategory::AOnly),
        corporate_network(SessionCategory::BOnly),
        regional_block(SessionCategory::AOnly, "China"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::reconcile::profile::{build_profile, CategoryProfile, Share};
    use crate::services::reconcile::types::{DeviceCategory, SourceSide};
    use crate::test_support::{profile_options, session};

    fn profile_with(device_desktop: f64, browsers: &[(&str, f64)], extension: f64) -> CategoryProfile {
        let mut profile = CategoryProfile {
            sessions: 100,
            ..CategoryProfile::default()
        };
        profile.device.insert(
            "desktop".to_string(),
            Share {
                count: device_desktop as u64,
                pct: device_desktop,
            },
        );
        for (name, pct) in browsers {
            profile.browser.insert(
                name.to_string(),
                Share {
                    count: *pct as u64,
                    pct: *pct,
                },
            );
        }
        profile
            .composite_pct
            .insert("extension_capable_browser".to_string(), extension);
        profile
    }

    #[test]
    fn ad_blocker_scores_full_evidence() {
        let mut profiles = BTreeMap::new();
        profiles.insert(SessionCategory::AOnly, profile_with(80.0, &[("Safari", 10.0)], 75.0));
        profiles.insert(SessionCategory::Both, profile_with(50.0, &[("Safari", 30.0)], 60.0));

        let assessment = evaluate(&ad_blocker(SessionCategory::AOnly), &profiles);
        assert_eq!(assessment.score, 3.0);
        assert_eq!(assessment.max_score, 3.0);
        assert_eq!(assessment.confidence, Confidence::High);
        assert_eq!(assessment.indicators[2].observed, -20.0);
    }

    #[test]
    fn weak_threshold_awards_half_credit() {
        let mut profiles = BTreeMap::new();
        profiles.insert(SessionCategory::AOnly, profile_with(60.0, &[("Safari", 30.0)], 62.0));
        profiles.insert(SessionCategory::Both, profile_with(50.0, &[("Safari", 30.0)], 60.0));

        let assessment = evaluate(&ad_blocker(SessionCategory::AOnly), &profiles);
        assert_eq!(assessment.indicators[0].credit, 0.0);
        assert_eq!(assessment.indicators[1].credit, 0.5);
        assert_eq!(assessment.indicators[2].credit, 0.0);
        assert_eq!(assessment.confidence, Confidence::Low);
    }

    #[test]
    fn corporate_partial_desktop_share() {
        let mut subject = profile_with(70.0, &[], 0.0);
        subject.business_hours_pct = 55.0;
        subject.operating_system.insert(
            "Windows".to_string(),
            Share {
                count: 60,
                pct: 60.0,
            },
        );
        let mut baseline = profile_with(50.0, &[], 0.0);
        baseline.business_hours_pct = 50.0;
        baseline.operating_system.insert(
            "Windows".to_string(),
            Share {
                count: 40,
                pct: 40.0,
            },
        );
        let profiles = BTreeMap::from([
            (SessionCategory::BOnly, subject),
            (SessionCategory::Both, baseline),
        ]);

        let assessment = evaluate(&corporate_network(SessionCategory::BOnly), &profiles);
        assert_eq!(assessment.score, 2.5);
        assert_eq!(assessment.confidence, Confidence::High);
    }

    #[test]
    fn regional_block_uses_counts_against_other_single_source_set() {
        let country = |pct: f64, count: u64| {
            let mut profile = CategoryProfile {
                sessions: 100,
                ..CategoryProfile::default()
            };
            profile.country.insert("China".to_string(), Share { count, pct });
            profile
        };
        let profiles = BTreeMap::from([
            (SessionCategory::AOnly, country(12.0, 24)),
            (SessionCategory::BOnly, country(1.0, 2)),
            (SessionCategory::Both, country(3.0, 300)),
        ]);

        let assessment = evaluate(&regional_block(SessionCategory::AOnly, "China"), &profiles);
        assert_eq!(assessment.max_score, 2.5);
        assert_eq!(assessment.indicators[0].credit, 1.0);
        assert_eq!(assessment.indicators[1].subject, SessionCategory::BOnly);
        assert_eq!(assessment.indicators[1].credit, 0.5);
        assert_eq!(assessment.indicators[2].reference, Some(SessionCategory::BOnly));
        assert_eq!(assessment.indicators[2].observed, 22.0);
        assert_eq!(assessment.score, 2.5);
        assert_eq!(assessment.confidence, Confidence::High);
    }

    #[test]
    fn empty_categories_score_low_without_panicking() {
        let profiles = BTreeMap::new();
        for hypothesis in presets() {
            let assessment = evaluate(&hypothesis, &profiles);
            assert_eq!(assessment.subject_sessions, 0);
            assert!(assessment.score.is_finite());
            assert_eq!(assessment.confidence, Confidence::Low);
        }
    }

    #[test]
    fn evaluates_built_profiles() {
        let s = session(SourceSide::A, "1", 10 * 3600, DeviceCategory::Desktop, "AU");
        let profiles = BTreeMap::from([
            (SessionCategory::AOnly, build_profile([&s], &profile_options())),
            (SessionCategory::Both, build_profile(std::iter::empty(), &profile_options())),
        ]);
        let assessment = evaluate(&ad_blocker(SessionCategory::AOnly), &profiles);
        // 100% desktop, 100pp more Chrome-family, Safari equal at 0.
        assert_eq!(assessment.score, 2.0);
        assert_eq!(assessment.confidence, Confidence::Medium);
    }

    #[test]
    fn hypotheses_deserialize_from_json() {
        let raw = serde_json::json!({
            "name": "mobile_heavy",
            "description": "single-source sessions skew mobile",
            "subject": "b_only",
            "indicators": [{
                "name": "mobile share",
                "metric": "device_pct.mobile",
                "measure": "share_delta",
                "direction": "higher",
                "strong": 10.0,
                "weak": 5.0
            }],
            "scale": {"high": 1.0, "medium": 0.5}
        });
        let hypothesis: Hypothesis = serde_json::from_value(raw).unwrap();
        assert_eq!(hypothesis.baseline, SessionCategory::Both);
        assert_eq!(hypothesis.indicators[0].weight, 1.0);
        assert_eq!(
            hypothesis.indicators[0].metric,
            MetricKey::share(Dimension::Device, "mobile")
        );
    }
}
