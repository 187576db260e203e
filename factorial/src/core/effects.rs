//! Main and interaction effect sizes from per-profile mean scores.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::{ExperimentSpec, Profile};
use crate::core::variance::{VarianceSummary, mean};

/// Score range attributable to one factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainEffect {
    pub factor: String,
    pub effect_size: f64,
}

/// Difference-in-differences between two factors' reference levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEffect {
    pub factors: [String; 2],
    pub effect_size: f64,
}

impl InteractionEffect {
    /// Order-independent key, e.g. `demographic×experience`.
    pub fn key(&self) -> String {
        interaction_key(&self.factors[0], &self.factors[1])
    }
}

pub fn interaction_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}×{b}")
    } else {
        format!("{b}×{a}")
    }
}

/// Mean score of all profiles at one level of a factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelMean {
    pub level: String,
    /// `None` when no profile at this level has a successful evaluation.
    pub mean: Option<f64>,
    /// Profiles contributing to the mean.
    pub profiles: usize,
}

/// Everything persisted to `metrics.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub profile_count: usize,
    pub total_evaluations: usize,
    pub failed_evaluations: usize,
    pub success_rate: f64,
    /// Ranked by `|effect_size|` descending.
    pub main_effects: Vec<MainEffect>,
    pub interaction_effects: Vec<InteractionEffect>,
    /// Factor name → per-level means in declared level order.
    pub level_means: BTreeMap<String, Vec<LevelMean>>,
    pub variance_summary: VarianceSummary,
}

/// Compute effects over per-profile means taken from `variance`.
///
/// Profiles without a successful evaluation contribute nothing. An empty
/// interaction cell contributes `0` to the difference-in-differences.
pub fn compute_metrics(
    spec: &ExperimentSpec,
    profiles: &[Profile],
    variance: &VarianceSummary,
    total: usize,
    failed: usize,
) -> Metrics {
    let profile_means: Vec<(&Profile, f64)> = profiles
        .iter()
        .filter_map(|profile| variance.profile(&profile.id).map(|v| (profile, v.mean)))
        .collect();

    let mut level_means = BTreeMap::new();
    let mut main_effects = Vec::with_capacity(spec.factors.len());
    for factor in &spec.factors {
        let means: Vec<LevelMean> = factor
            .levels
            .iter()
            .map(|level| {
                let filter = [(factor.name.as_str(), level.as_str())];
                let scores = scores_where(&profile_means, &filter);
                LevelMean {
                    level: level.clone(),
                    mean: mean(&scores),
                    profiles: scores.len(),
                }
            })
            .collect();
        let observed: Vec<f64> = means.iter().filter_map(|m| m.mean).collect();
        let effect_size = match (
            observed.iter().copied().reduce(f64::max),
            observed.iter().copied().reduce(f64::min),
        ) {
            (Some(max), Some(min)) => max - min,
            _ => 0.0,
        };
        main_effects.push(MainEffect {
            factor: factor.name.clone(),
            effect_size,
        });
        level_means.insert(factor.name.clone(), means);
    }
    main_effects.sort_by(|a, b| b.effect_size.abs().total_cmp(&a.effect_size.abs()));

    let interaction_effects = interaction_pairs(spec)
        .into_iter()
        .map(|[first, second]| {
            let effect_size = interaction_effect(spec, &profile_means, &first, &second);
            InteractionEffect {
                factors: [first, second],
                effect_size,
            }
        })
        .collect();

    let success_rate = if total == 0 {
        0.0
    } else {
        (total - failed.min(total)) as f64 / total as f64
    };

    Metrics {
        profile_count: profiles.len(),
        total_evaluations: total,
        failed_evaluations: failed,
        success_rate,
        main_effects,
        interaction_effects,
        level_means,
        variance_summary: variance.clone(),
    }
}

/// Pairs listed in the spec, or every pair in declaration order.
pub fn interaction_pairs(spec: &ExperimentSpec) -> Vec<[String; 2]> {
    if !spec.interactions.is_empty() {
        return spec.interactions.clone();
    }
    let names: Vec<&str> = spec.factors.iter().map(|f| f.name.as_str()).collect();
    let mut pairs = Vec::new();
    for (i, first) in names.iter().enumerate() {
        for second in &names[i + 1..] {
            pairs.push([first.to_string(), second.to_string()]);
        }
    }
    pairs
}

/// `(m(H,H) − m(H,L)) − (m(L,H) − m(L,L))` over the reference levels.
fn interaction_effect(
    spec: &ExperimentSpec,
    profile_means: &[(&Profile, f64)],
    first: &str,
    second: &str,
) -> f64 {
    let (Some(f1), Some(f2)) = (spec.factors.get(first), spec.factors.get(second)) else {
        return 0.0;
    };
    let cell = |a: &str, b: &str| {
        mean(&scores_where(profile_means, &[(first, a), (second, b)])).unwrap_or(0.0)
    };
    let (low1, high1) = (f1.low_level(), f1.high_level());
    let (low2, high2) = (f2.low_level(), f2.high_level());
    (cell(high1, high2) - cell(high1, low2)) - (cell(low1, high2) - cell(low1, low2))
}

fn scores_where(profile_means: &[(&Profile, f64)], filter: &[(&str, &str)]) -> Vec<f64> {
    profile_means
        .iter()
        .filter(|(profile, _)| {
            filter
                .iter()
                .all(|(factor, level)| profile.level(factor) == Some(*level))
        })
        .map(|(_, mean)| *mean)
        .collect()
}
