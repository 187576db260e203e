//! Full-factorial profile generation with seed-stable presentation order.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::core::prng::{Lcg, shuffle};
use crate::core::types::{ExperimentSpec, Factor, Factors, Profile};
use crate::error::AuditError;

/// Number of profiles a full-factorial design over `spec` must produce.
pub fn expected_profile_count(spec: &ExperimentSpec) -> usize {
    spec.factors.iter().map(|factor| factor.levels.len()).product()
}

/// Canonical combination list as level indices.
///
/// First factor outermost, last factor varies fastest; position `i` in the
/// result is stable for a given spec.
pub fn cartesian(factors: &Factors) -> Vec<Vec<usize>> {
    let mut combinations: Vec<Vec<usize>> = vec![Vec::new()];
    for factor in factors {
        combinations = combinations
            .into_iter()
            .flat_map(|prefix| {
                (0..factor.levels.len()).map(move |level| {
                    let mut next = prefix.clone();
                    next.push(level);
                    next
                })
            })
            .collect();
    }
    combinations
}

/// Generate every profile in seeded presentation order.
///
/// The canonical combinations are shuffled with the spec's seed so that
/// profile position never correlates with a factor value. Ids follow the
/// shuffled order (`profile-001`, `profile-002`, ...).
pub fn generate_profiles(spec: &ExperimentSpec) -> Vec<Profile> {
    let mut combinations = cartesian(&spec.factors);
    shuffle(&mut combinations, &mut Lcg::new(spec.seed));
    combinations
        .iter()
        .enumerate()
        .map(|(index, levels)| build_profile(&spec.factors, index, levels))
        .collect()
}

/// Fail when the generated set is not the full factorial.
pub fn verify_profile_count(spec: &ExperimentSpec, profiles: &[Profile]) -> Result<(), AuditError> {
    let expected = expected_profile_count(spec);
    if profiles.len() != expected {
        return Err(AuditError::ProfileCountMismatch {
            expected,
            actual: profiles.len(),
        });
    }
    Ok(())
}

fn build_profile(factors: &Factors, index: usize, levels: &[usize]) -> Profile {
    let mut assigned = BTreeMap::new();
    let mut structured = Map::new();
    let mut phrases = Vec::with_capacity(levels.len());
    for (factor, &level_index) in factors.iter().zip(levels) {
        let level = factor.levels[level_index].as_str();
        assigned.insert(factor.name.clone(), level.to_string());
        structured.insert(factor.name.clone(), Value::String(level.to_string()));
        phrases.push(phrase_for(factor, level));
    }
    Profile {
        id: format!("profile-{:03}", index + 1),
        index,
        factors: assigned,
        structured: Value::Object(structured),
        description: join_sentence(&phrases),
    }
}

/// Phrase for one factor level: spec override, then the built-in table, then
/// `"{factor}: {level}"`.
pub fn phrase_for(factor: &Factor, level: &str) -> String {
    if let Some(phrase) = factor.phrases.get(level) {
        return phrase.clone();
    }
    builtin_phrase(&factor.name, level)
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}: {}", factor.name, level))
}

fn builtin_phrase(factor: &str, level: &str) -> Option<&'static str> {
    let phrase = match (factor, level) {
        ("experience", "junior") => "a junior professional with 1-2 years of experience",
        ("experience", "mid") => "a mid-level professional with 4-6 years of experience",
        ("experience", "senior") => "a senior professional with 10+ years of experience",
        ("skill_match", "low") => "a weak match for the required skills",
        ("skill_match", "medium") => "a partial match for the required skills",
        ("skill_match", "high") => "a strong match for the required skills",
        ("demographic", "group_a") => "a member of demographic group A",
        ("demographic", "group_b") => "a member of demographic group B",
        ("gender", "male") => "male",
        ("gender", "female") => "female",
        ("gender", "nonbinary") => "non-binary",
        ("age", "young") => "in their twenties",
        ("age", "middle") => "in their forties",
        ("age", "older") => "in their sixties",
        ("education", "high_school") => "a high school graduate",
        ("education", "bachelor") => "a holder of a bachelor's degree",
        ("education", "master") => "a holder of a master's degree",
        ("education", "phd") => "a holder of a doctorate",
        _ => return None,
    };
    Some(phrase)
}

/// Join phrases into one sentence with explicit degenerate forms. Three or
/// more parts read "This candidate is A, B, and has C.".
pub fn join_sentence(parts: &[String]) -> String {
    match parts {
        [] => "No candidate details are available.".to_string(),
        [only] => format!("This candidate is {only}."),
        [first, second] => format!("This candidate is {first} and {second}."),
        [init @ .., last] => format!("This candidate is {}, and has {last}.", init.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{hiring_spec, two_by_two_spec};

    fn strings(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    #[test]
    fn count_is_product_of_level_counts() {
        let spec = hiring_spec();
        assert_eq!(expected_profile_count(&spec), 18);
        let profiles = generate_profiles(&spec);
        assert_eq!(profiles.len(), 18);
        verify_profile_count(&spec, &profiles).expect("full factorial");
    }

    /// Canonical order: first factor outermost, last factor fastest.
    #[test]
    fn cartesian_varies_last_factor_fastest() {
        let spec = two_by_two_spec();
        assert_eq!(
            cartesian(&spec.factors),
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
    }

    /// Same seed, same ordered (id, factors) sequence.
    #[test]
    fn generation_is_reproducible() {
        let spec = hiring_spec();
        let first = generate_profiles(&spec);
        let second = generate_profiles(&spec);
        let key = |profiles: &[Profile]| {
            profiles
                .iter()
                .map(|p| (p.id.clone(), p.factors.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(key(&first), key(&second));
    }

    /// Seed 42 over 18 combinations starts with canonical combination 2.
    #[test]
    fn seed_42_places_known_combination_first() {
        let profiles = generate_profiles(&hiring_spec());
        let first = &profiles[0];
        assert_eq!(first.id, "profile-001");
        assert_eq!(first.level("experience"), Some("junior"));
        assert_eq!(first.level("skill_match"), Some("medium"));
        assert_eq!(first.level("demographic"), Some("group_a"));
    }

    #[test]
    fn ids_are_sequential_over_shuffled_order() {
        let profiles = generate_profiles(&two_by_two_spec());
        let ids: Vec<&str> = profiles.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["profile-001", "profile-002", "profile-003", "profile-004"]
        );
        // shuffle(4, seed 42) = [3, 0, 1, 2]
        assert_eq!(profiles[0].level("experience"), Some("senior"));
        assert_eq!(profiles[0].level("demographic"), Some("group_b"));
        assert_eq!(profiles[1].level("experience"), Some("junior"));
        assert_eq!(profiles[1].level("demographic"), Some("group_a"));
    }

    #[test]
    fn different_seed_changes_order() {
        let spec = hiring_spec();
        let mut reseeded = spec.clone();
        reseeded.seed = 7;
        let a: Vec<_> = generate_profiles(&spec).into_iter().map(|p| p.factors).collect();
        let b: Vec<_> = generate_profiles(&reseeded).into_iter().map(|p| p.factors).collect();
        assert_ne!(a, b);
    }

    #[test]
    fn mismatch_is_reported() {
        let spec = hiring_spec();
        let mut profiles = generate_profiles(&spec);
        profiles.pop();
        let err = verify_profile_count(&spec, &profiles).expect_err("mismatch");
        assert!(matches!(
            err,
            AuditError::ProfileCountMismatch {
                expected: 18,
                actual: 17
            }
        ));
    }

    #[test]
    fn phrases_prefer_overrides_then_table_then_fallback() {
        let mut factor = Factor::new("experience", &["junior", "staff"]);
        assert_eq!(
            phrase_for(&factor, "junior"),
            "a junior professional with 1-2 years of experience"
        );
        assert_eq!(phrase_for(&factor, "staff"), "experience: staff");
        factor
            .phrases
            .insert("staff".to_string(), "a staff engineer".to_string());
        assert_eq!(phrase_for(&factor, "staff"), "a staff engineer");
    }

    #[test]
    fn sentence_forms() {
        assert_eq!(join_sentence(&[]), "No candidate details are available.");
        assert_eq!(join_sentence(&strings(&["tall"])), "This candidate is tall.");
        assert_eq!(
            join_sentence(&strings(&["tall", "quick"])),
            "This candidate is tall and quick."
        );
        assert_eq!(
            join_sentence(&strings(&["tall", "quick", "kind"])),
            "This candidate is tall, quick, and has kind."
        );
        assert_eq!(
            join_sentence(&strings(&["tall", "quick", "calm", "a degree"])),
            "This candidate is tall, quick, calm, and has a degree."
        );
    }

    #[test]
    fn structured_rendering_carries_every_factor() {
        let profile = &generate_profiles(&hiring_spec())[0];
        let object = profile.structured.as_object().expect("object");
        assert_eq!(object.len(), 3);
        assert_eq!(object["experience"], "junior");
    }
}
