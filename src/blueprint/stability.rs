//! Composite stability scoring.
//!
//! Weighted blend of coverage (0.4), complexity (0.3), churn (0.2), and
//! dependency count (0.1). The inputs live on different timescales
//! (complexity is static, churn covers the last 7 days, coverage is
//! as-of-report), so the score is flagged heuristic in output.

use super::{ChurnMetrics, ComplexityLevel, ComplexityMetrics, CoverageMetrics};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const WEIGHT_COVERAGE: f32 = 0.4;
pub const WEIGHT_COMPLEXITY: f32 = 0.3;
pub const WEIGHT_CHURN: f32 = 0.2;
pub const WEIGHT_DEPENDENCIES: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StabilityLevel {
    Safe,
    Medium,
    HighRisk,
}

impl StabilityLevel {
    pub fn from_score(score: f32) -> Self {
        if score >= 0.75 {
            Self::Safe
        } else if score >= 0.5 {
            Self::Medium
        } else {
            Self::HighRisk
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Safe => "\u{1F7E2} SAFE",
            Self::Medium => "\u{1F7E1} MEDIUM",
            Self::HighRisk => "\u{1F534} HIGH RISK",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityScore {
    pub score: f32,
    pub level: StabilityLevel,
    pub factors: BTreeMap<String, f32>,
    /// Mixed timescales make this advisory, not a measurement.
    pub heuristic: bool,
}

/// Compute the composite score. Needs at least two of the three measured
/// inputs to say anything meaningful.
pub fn score_stability(
    complexity: Option<&ComplexityMetrics>,
    churn: Option<&ChurnMetrics>,
    coverage: Option<&CoverageMetrics>,
    dependency_count: usize,
) -> Option<StabilityScore> {
    let available =
        complexity.is_some() as u8 + churn.is_some() as u8 + coverage.is_some() as u8;
    if available < 2 {
        return None;
    }

    let mut factors = BTreeMap::new();

    let coverage_factor = match coverage {
        Some(c) => {
            let factor = (c.percent / 100.0).clamp(0.0, 1.0);
            factors.insert("coverage".to_string(), c.percent);
            factor
        }
        None => 0.5,
    };

    let complexity_factor = match complexity {
        Some(c) => {
            let normalized = match c.level {
                ComplexityLevel::Low => 0.2,
                ComplexityLevel::Medium => 0.5,
                ComplexityLevel::High => 0.9,
            };
            factors.insert("complexity".to_string(), normalized);
            1.0 - normalized
        }
        None => 0.5,
    };

    let churn_factor = match churn {
        Some(c) => {
            let normalized = (c.edit_frequency / 10.0).min(1.0);
            factors.insert("churn".to_string(), c.edit_frequency);
            1.0 - normalized
        }
        None => 0.5,
    };

    let dep_normalized = (dependency_count as f32 / 10.0).min(1.0);
    factors.insert("dependencies".to_string(), dependency_count as f32);
    let dep_factor = if dependency_count > 0 {
        1.0 - dep_normalized
    } else {
        0.7
    };

    let score = (coverage_factor * WEIGHT_COVERAGE
        + complexity_factor * WEIGHT_COMPLEXITY
        + churn_factor * WEIGHT_CHURN
        + dep_factor * WEIGHT_DEPENDENCIES)
        .clamp(0.0, 1.0);

    Some(StabilityScore {
        score: (score * 100.0).round() / 100.0,
        level: StabilityLevel::from_score(score),
        factors,
        heuristic: true,
    })
}
