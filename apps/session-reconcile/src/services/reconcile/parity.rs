use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::dimensions::dimension_key;
use super::matcher::MatchAssignment;
use super::profile::Dimension;
use super::types::SessionSummary;

const TOP_MISMATCHES: usize = 10;
const COMPARED_DIMENSIONS: [Dimension; 3] = [
    Dimension::Browser,
    Dimension::OperatingSystem,
    Dimension::TrafficSource,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MismatchPattern {
    pub a_value: String,
    pub b_value: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionParity {
    pub dimension: Dimension,
    pub compared: u64,
    pub agreed: u64,
    pub agreement_pct: f64,
    pub top_mismatches: Vec<MismatchPattern>,
}

/// How often the two pipelines report the same attribute value for the same session.
/// Only matched pairs are compared; device and country always agree by construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParityReport {
    pub pairs: u64,
    pub dimensions: Vec<DimensionParity>,
}

impl ParityReport {
    pub fn get(&self, dimension: Dimension) -> Option<&DimensionParity> {
        self.dimensions.iter().find(|entry| entry.dimension == dimension)
    }
}

pub fn build_parity(
    a: &[SessionSummary],
    b: &[SessionSummary],
    assignment: &MatchAssignment,
) -> ParityReport {
    let dimensions = COMPARED_DIMENSIONS
        .into_iter()
        .map(|dimension| {
            let mut agreed = 0u64;
            let mut mismatches: HashMap<(String, String), u64> = HashMap::new();
            for pair in assignment.pairs() {
                let a_value = dimension.value_of(&a[pair.a_index]);
                let b_value = dimension.value_of(&b[pair.b_index]);
                if dimension_key(a_value) == dimension_key(b_value) {
                    agreed += 1;
                } else {
                    *mismatches
                        .entry((a_value.to_string(), b_value.to_string()))
                        .or_default() += 1;
                }
            }

            let mut top: Vec<MismatchPattern> = mismatches
                .into_iter()
                .map(|((a_value, b_value), count)| MismatchPattern {
                    a_value,
                    b_value,
                    count,
                })
                .collect();
            top.sort_by(|x, y| {
                y.count
                    .cmp(&x.count)
                    .then_with(|| x.a_value.cmp(&y.a_value))
                    .then_with(|| x.b_value.cmp(&y.b_value))
            });
            top.truncate(TOP_MISMATCHES);

            let compared = assignment.len() as u64;
            DimensionParity {
                dimension,
                compared,
                agreed,
                agreement_pct: if compared == 0 {
                    0.0
                } else {
                    agreed as f64 / compared as f64 * 100.0
                },
                top_mismatches: top,
            }
        })
        .collect();

    ParityReport {
        pairs: assignment.len() as u64,
        dimensions,
    }
}
