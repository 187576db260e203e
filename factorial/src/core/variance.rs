//! Per-profile score stability across repetitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::EvaluationResult;

/// Score statistics for one profile over its successful repetitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileVariance {
    pub profile_id: String,
    pub scores: Vec<f64>,
    pub mean: f64,
    pub std_dev: f64,
    pub is_unstable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VarianceSummary {
    /// Sorted by profile id.
    pub profiles: Vec<ProfileVariance>,
    /// Mean of per-profile standard deviations.
    pub overall_mean_variance: f64,
    /// Max of per-profile standard deviations.
    pub max_variance: f64,
    pub unstable_count: usize,
    /// Sorted by profile id.
    pub unstable_profiles: Vec<String>,
}

impl VarianceSummary {
    pub fn profile(&self, profile_id: &str) -> Option<&ProfileVariance> {
        self.profiles.iter().find(|p| p.profile_id == profile_id)
    }
}

/// Group successful results by profile and flag `std_dev > threshold`.
///
/// Failed evaluations are skipped; a profile with no successful result is
/// absent from the summary. Fewer than two samples give `std_dev = 0`.
pub fn compute_variance(results: &[EvaluationResult], max_variance_threshold: f64) -> VarianceSummary {
    let mut grouped: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for result in results {
        if let Some(score) = result.score() {
            grouped
                .entry(result.profile_id.as_str())
                .or_default()
                .push(score);
        }
    }

    let profiles: Vec<ProfileVariance> = grouped
        .into_iter()
        .map(|(profile_id, scores)| {
            let std_dev = sample_std_dev(&scores);
            ProfileVariance {
                profile_id: profile_id.to_string(),
                mean: mean(&scores).unwrap_or(0.0),
                std_dev,
                is_unstable: std_dev > max_variance_threshold,
                scores,
            }
        })
        .collect();

    let std_devs: Vec<f64> = profiles.iter().map(|p| p.std_dev).collect();
    let unstable_profiles: Vec<String> = profiles
        .iter()
        .filter(|p| p.is_unstable)
        .map(|p| p.profile_id.clone())
        .collect();

    VarianceSummary {
        overall_mean_variance: mean(&std_devs).unwrap_or(0.0),
        max_variance: std_devs.iter().copied().fold(0.0, f64::max),
        unstable_count: unstable_profiles.len(),
        unstable_profiles,
        profiles,
    }
}

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n−1 denominator); 0 for fewer than two values.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    let sum_sq: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}
