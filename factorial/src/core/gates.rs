//! Pass/fail quality gates over computed metrics.
//!
//! Pure. A failed gate is a result, not an error; the CLI decides the exit code.

use serde::{Deserialize, Serialize};

use crate::core::effects::Metrics;
use crate::core::types::Thresholds;

pub const VARIANCE_GATE: &str = "max_profile_variance";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub name: String,
    pub passed: bool,
    pub actual: f64,
    pub threshold: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEvaluation {
    pub all_passed: bool,
    /// Interaction gates in metric order, then the variance gate.
    pub results: Vec<GateResult>,
    pub summary: String,
}

impl GateEvaluation {
    pub fn failed(&self) -> impl Iterator<Item = &GateResult> {
        self.results.iter().filter(|result| !result.passed)
    }
}

/// One gate per interaction effect plus one on the max profile std dev.
pub fn evaluate_gates(metrics: &Metrics, thresholds: &Thresholds) -> GateEvaluation {
    let mut results = Vec::with_capacity(metrics.interaction_effects.len() + 1);

    for interaction in &metrics.interaction_effects {
        let key = interaction.key();
        let actual = interaction.effect_size.abs();
        let threshold = thresholds.max_interaction_magnitude;
        let passed = actual <= threshold;
        let message = if passed {
            format!("PASS: interaction {key} |effect| {actual:.3} within threshold {threshold:.3}")
        } else {
            format!("FAIL: interaction {key} |effect| {actual:.3} exceeds threshold {threshold:.3}")
        };
        results.push(GateResult {
            name: format!("interaction:{key}"),
            passed,
            actual,
            threshold,
            message,
        });
    }

    let actual = metrics.variance_summary.max_variance;
    let threshold = thresholds.max_profile_variance;
    let passed = actual <= threshold;
    let message = if passed {
        format!("PASS: max profile std dev {actual:.3} within threshold {threshold:.3}")
    } else {
        format!("FAIL: max profile std dev {actual:.3} exceeds threshold {threshold:.3}")
    };
    results.push(GateResult {
        name: VARIANCE_GATE.to_string(),
        passed,
        actual,
        threshold,
        message,
    });

    let total = results.len();
    let failed = results.iter().filter(|result| !result.passed).count();
    let summary = if failed == 0 {
        format!("All {total} quality gates passed")
    } else {
        format!("{failed} of {total} quality gates FAILED")
    };

    GateEvaluation {
        all_passed: failed == 0,
        results,
        summary,
    }
}
