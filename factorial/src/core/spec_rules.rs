//! Semantic rules for experiment specs that a parser cannot enforce.

use std::collections::HashSet;

use crate::core::types::ExperimentSpec;
use crate::error::SpecViolation;

pub const MIN_REPETITIONS: u32 = 2;
pub const MIN_FACTORS: usize = 2;
pub const MIN_LEVELS: usize = 2;
pub const MAX_TEMPERATURE: f64 = 2.0;
pub const MAX_RETRIES_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

/// Check every semantic rule and collect all violations:
/// - `repetitions >= 2`
/// - at least two factors, each with two or more unique non-empty levels
/// - reference levels and phrase keys name declared levels
/// - interaction pairs name two distinct declared factors, listed once
/// - positive finite thresholds
/// - model temperature in `[0, 2]`, `max_retries` in `1..=10`
pub fn validate_spec(spec: &ExperimentSpec) -> Vec<SpecViolation> {
    let mut errors = Vec::new();

    if spec.repetitions < MIN_REPETITIONS {
        errors.push(SpecViolation::new(
            "repetitions",
            format!("must be >= {MIN_REPETITIONS} (got {})", spec.repetitions),
        ));
    }

    if spec.prompt_version.trim().is_empty() {
        errors.push(SpecViolation::new("prompt_version", "must not be empty"));
    } else if spec.prompt_version.contains(['/', '\\']) || spec.prompt_version.contains("..") {
        errors.push(SpecViolation::new(
            "prompt_version",
            format!("must be a plain name (got '{}')", spec.prompt_version),
        ));
    }

    validate_factors(spec, &mut errors);
    validate_interactions(spec, &mut errors);

    validate_threshold(
        "thresholds.max_interaction_magnitude",
        spec.thresholds.max_interaction_magnitude,
        &mut errors,
    );
    validate_threshold(
        "thresholds.max_profile_variance",
        spec.thresholds.max_profile_variance,
        &mut errors,
    );

    let model = &spec.model;
    if model.provider.trim().is_empty() {
        errors.push(SpecViolation::new("model.provider", "must not be empty"));
    }
    if model.name.trim().is_empty() {
        errors.push(SpecViolation::new("model.name", "must not be empty"));
    }
    if !(0.0..=MAX_TEMPERATURE).contains(&model.temperature) {
        errors.push(SpecViolation::new(
            "model.temperature",
            format!("must be within [0, 2] (got {})", model.temperature),
        ));
    }
    if !MAX_RETRIES_RANGE.contains(&model.max_retries) {
        errors.push(SpecViolation::new(
            "model.max_retries",
            format!("must be within [1, 10] (got {})", model.max_retries),
        ));
    }

    errors
}

fn validate_factors(spec: &ExperimentSpec, errors: &mut Vec<SpecViolation>) {
    if spec.factors.len() < MIN_FACTORS {
        errors.push(SpecViolation::new(
            "factors",
            format!(
                "at least {MIN_FACTORS} factors required (got {})",
                spec.factors.len()
            ),
        ));
    }

    let mut names = HashSet::new();
    for factor in &spec.factors {
        let path = format!("factors.{}", factor.name);
        if factor.name.trim().is_empty() {
            errors.push(SpecViolation::new("factors", "factor name must not be empty"));
        }
        if !names.insert(factor.name.as_str()) {
            errors.push(SpecViolation::new(
                "factors",
                format!("duplicate factor '{}'", factor.name),
            ));
        }

        if factor.levels.len() < MIN_LEVELS {
            errors.push(SpecViolation::new(
                format!("{path}.levels"),
                format!(
                    "at least {MIN_LEVELS} levels required (got {})",
                    factor.levels.len()
                ),
            ));
        }
        let mut levels = HashSet::new();
        for level in &factor.levels {
            if level.trim().is_empty() {
                errors.push(SpecViolation::new(
                    format!("{path}.levels"),
                    "level must not be empty",
                ));
            } else if !levels.insert(level.as_str()) {
                errors.push(SpecViolation::new(
                    format!("{path}.levels"),
                    format!("duplicate level '{level}'"),
                ));
            }
        }

        for (key, value) in [("low", &factor.low), ("high", &factor.high)] {
            match value {
                Some(level) if !levels.contains(level.as_str()) => {
                    errors.push(SpecViolation::new(
                        format!("{path}.{key}"),
                        format!("'{level}' is not one of the declared levels"),
                    ));
                }
                _ => {}
            }
        }
        if factor.levels.len() >= MIN_LEVELS && factor.low_level() == factor.high_level() {
            errors.push(SpecViolation::new(
                path.clone(),
                format!(
                    "low and high reference levels must differ (both '{}')",
                    factor.low_level()
                ),
            ));
        }

        for level in factor.phrases.keys() {
            if !levels.contains(level.as_str()) {
                errors.push(SpecViolation::new(
                    format!("{path}.phrases"),
                    format!("'{level}' is not one of the declared levels"),
                ));
            }
        }
    }
}

fn validate_interactions(spec: &ExperimentSpec, errors: &mut Vec<SpecViolation>) {
    let mut seen = HashSet::new();
    for (index, [left, right]) in spec.interactions.iter().enumerate() {
        let path = format!("interactions[{index}]");
        for name in [left, right] {
            if spec.factors.get(name).is_none() {
                errors.push(SpecViolation::new(
                    path.clone(),
                    format!("unknown factor '{name}'"),
                ));
            }
        }
        if left == right {
            errors.push(SpecViolation::new(
                path.clone(),
                format!("factor '{left}' cannot interact with itself"),
            ));
            continue;
        }
        let key = if left < right {
            (left.as_str(), right.as_str())
        } else {
            (right.as_str(), left.as_str())
        };
        if !seen.insert(key) {
            errors.push(SpecViolation::new(
                path,
                format!("duplicate pair '{left}', '{right}'"),
            ));
        }
    }
}

fn validate_threshold(path: &str, value: f64, errors: &mut Vec<SpecViolation>) {
    if !value.is_finite() || value <= 0.0 {
        errors.push(SpecViolation::new(
            path,
            format!("must be a positive number (got {value})"),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Factor;
    use crate::test_support::hiring_spec;

    fn paths(errors: &[SpecViolation]) -> Vec<&str> {
        errors.iter().map(|e| e.path.as_str()).collect()
    }

    /// The reference hiring spec is valid as-is.
    #[test]
    fn accepts_hiring_spec() {
        assert!(validate_spec(&hiring_spec()).is_empty());
    }

    /// Every violation is reported, not just the first.
    #[test]
    fn reports_all_violations_with_paths() {
        let mut spec = hiring_spec();
        spec.repetitions = 1;
        spec.model.temperature = 3.0;
        spec.model.max_retries = 0;
        spec.thresholds.max_profile_variance = 0.0;

        let errors = validate_spec(&spec);
        assert_eq!(
            paths(&errors),
            vec![
                "repetitions",
                "thresholds.max_profile_variance",
                "model.temperature",
                "model.max_retries",
            ]
        );
        assert_eq!(errors[0].message, "must be >= 2 (got 1)");
    }

    /// Factors need at least two unique levels, and specs need two factors.
    #[test]
    fn rejects_thin_factors() {
        let mut spec = hiring_spec();
        spec.factors = crate::core::types::Factors::new(vec![Factor::new(
            "experience",
            &["junior", "junior"],
        )]);
        spec.interactions.clear();

        let errors = validate_spec(&spec);
        let rendered: Vec<String> = errors.iter().map(ToString::to_string).collect();
        assert!(rendered.contains(&"factors: at least 2 factors required (got 1)".to_string()));
        assert!(
            rendered.contains(&"factors.experience.levels: duplicate level 'junior'".to_string())
        );
    }

    /// Reference levels and phrase keys must name declared levels.
    #[test]
    fn rejects_unknown_reference_levels() {
        let mut spec = hiring_spec();
        let mut factors: Vec<Factor> = spec.factors.iter().cloned().collect();
        factors[0].high = Some("principal".to_string());
        factors[1]
            .phrases
            .insert("extreme".to_string(), "an extreme match".to_string());
        spec.factors = crate::core::types::Factors::new(factors);

        let errors = validate_spec(&spec);
        assert_eq!(
            paths(&errors),
            vec!["factors.experience.high", "factors.skill_match.phrases"]
        );
    }

    /// Interaction pairs must name two distinct declared factors once.
    #[test]
    fn rejects_bad_interaction_pairs() {
        let mut spec = hiring_spec();
        spec.interactions = vec![
            ["experience".to_string(), "demographic".to_string()],
            ["demographic".to_string(), "experience".to_string()],
            ["experience".to_string(), "experience".to_string()],
            ["experience".to_string(), "salary".to_string()],
        ];

        let rendered: Vec<String> = validate_spec(&spec)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            rendered,
            vec![
                "interactions[1]: duplicate pair 'demographic', 'experience'",
                "interactions[2]: factor 'experience' cannot interact with itself",
                "interactions[3]: unknown factor 'salary'",
            ]
        );
    }

    /// Path separators in prompt_version would escape the prompts directory.
    #[test]
    fn rejects_prompt_version_with_separators() {
        let mut spec = hiring_spec();
        spec.prompt_version = "../secrets".to_string();
        assert_eq!(paths(&validate_spec(&spec)), vec!["prompt_version"]);
    }
}
