//! Effect-size deltas between two runs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::effects::Metrics;

pub const DEFAULT_REGRESSION_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDelta {
    /// Factor name, or interaction key (`a×b`, sorted).
    pub name: String,
    pub old: f64,
    pub new: f64,
    pub delta: f64,
    pub regression: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDiff {
    pub main_effects: Vec<EffectDelta>,
    pub interaction_effects: Vec<EffectDelta>,
    pub regression_threshold: f64,
}

impl EffectDiff {
    pub fn regressions(&self) -> impl Iterator<Item = &EffectDelta> {
        self.main_effects
            .iter()
            .chain(&self.interaction_effects)
            .filter(|delta| delta.regression)
    }

    pub fn has_regressions(&self) -> bool {
        self.regressions().next().is_some()
    }
}

/// Compare run `old` (A) against run `new` (B).
///
/// Entries follow B's effects; a name missing from A counts as `0`.
/// Main effects regress on any `|Δ| > threshold`. Interactions regress only
/// when the magnitude grew and `|Δ| > threshold`.
pub fn diff_effects(old: &Metrics, new: &Metrics, threshold: f64) -> EffectDiff {
    let old_main: HashMap<&str, f64> = old
        .main_effects
        .iter()
        .map(|effect| (effect.factor.as_str(), effect.effect_size))
        .collect();
    let main_effects = new
        .main_effects
        .iter()
        .map(|effect| {
            let before = old_main.get(effect.factor.as_str()).copied().unwrap_or(0.0);
            let delta = effect.effect_size - before;
            EffectDelta {
                name: effect.factor.clone(),
                old: before,
                new: effect.effect_size,
                delta,
                regression: delta.abs() > threshold,
            }
        })
        .collect();

    let old_interactions: HashMap<String, f64> = old
        .interaction_effects
        .iter()
        .map(|effect| (effect.key(), effect.effect_size))
        .collect();
    let interaction_effects = new
        .interaction_effects
        .iter()
        .map(|effect| {
            let name = effect.key();
            let before = old_interactions.get(&name).copied().unwrap_or(0.0);
            let delta = effect.effect_size - before;
            let grew = effect.effect_size.abs() > before.abs();
            EffectDelta {
                name,
                old: before,
                new: effect.effect_size,
                delta,
                regression: grew && delta.abs() > threshold,
            }
        })
        .collect();

    EffectDiff {
        main_effects,
        interaction_effects,
        regression_threshold: threshold,
    }
}
