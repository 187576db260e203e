//! Shared deterministic types for the experiment engine.
//!
//! These types define stable contracts between the generator, the evaluation
//! client and the persisted run artifacts. Serialized field names are part of
//! the on-disk format that the diff engine reads back, so renames are breaking.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Evaluation mode declared by the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Scoring,
    Ranking,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Scoring => "scoring",
            Mode::Ranking => "ranking",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated experiment configuration. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    /// Optional human label used in reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub seed: u64,
    pub repetitions: u32,
    #[serde(default)]
    pub mode: Mode,
    pub prompt_version: String,
    /// Factors in declaration order.
    pub factors: Factors,
    /// Factor pairs to compute interactions for. Empty means every pair.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interactions: Vec<[String; 2]>,
    pub thresholds: Thresholds,
    pub model: ModelConfig,
}

/// Quality-gate thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub max_interaction_magnitude: f64,
    pub max_profile_variance: f64,
}

/// Model settings recorded with every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub name: String,
    pub temperature: f64,
    pub max_retries: u32,
}

/// A named experimental dimension with discrete levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Factor {
    pub name: String,
    pub levels: Vec<String>,
    /// Explicit "low" reference level for interactions (defaults to first level).
    pub low: Option<String>,
    /// Explicit "high" reference level for interactions (defaults to last level).
    pub high: Option<String>,
    /// Level → phrase overrides for the natural-language rendering.
    pub phrases: BTreeMap<String, String>,
}

impl Factor {
    pub fn new(name: &str, levels: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            levels: levels.iter().map(|level| level.to_string()).collect(),
            low: None,
            high: None,
            phrases: BTreeMap::new(),
        }
    }

    /// Reference level treated as "low" in difference-in-differences.
    pub fn low_level(&self) -> &str {
        self.low
            .as_deref()
            .or_else(|| self.levels.first().map(String::as_str))
            .unwrap_or_default()
    }

    /// Reference level treated as "high" in difference-in-differences.
    pub fn high_level(&self) -> &str {
        self.high
            .as_deref()
            .or_else(|| self.levels.last().map(String::as_str))
            .unwrap_or_default()
    }
}

/// Factors keyed by name, preserving declaration order from the source file.
///
/// Serialized as a map (`name: {levels: [...]}`); deserialization walks the
/// map entries in document order so the canonical combination order follows
/// what the author wrote rather than key sort order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Factors(Vec<Factor>);

impl Factors {
    pub fn new(factors: Vec<Factor>) -> Self {
        Self(factors)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Factor> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Factor> {
        self.0.iter().find(|factor| factor.name == name)
    }

    pub fn as_slice(&self) -> &[Factor] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a Factors {
    type Item = &'a Factor;
    type IntoIter = std::slice::Iter<'a, Factor>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Serialize, Deserialize)]
struct FactorBody {
    levels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    low: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    high: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    phrases: BTreeMap<String, String>,
}

impl Serialize for Factors {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for factor in &self.0 {
            let body = FactorBody {
                levels: factor.levels.clone(),
                low: factor.low.clone(),
                high: factor.high.clone(),
                phrases: factor.phrases.clone(),
            };
            map.serialize_entry(&factor.name, &body)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Factors {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(FactorsVisitor)
    }
}

struct FactorsVisitor;

impl<'de> Visitor<'de> for FactorsVisitor {
    type Value = Factors;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of factor name to {levels: [...]}")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Factors, A::Error> {
        let mut factors = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((name, body)) = access.next_entry::<String, FactorBody>()? {
            factors.push(Factor {
                name,
                levels: body.levels,
                low: body.low,
                high: body.high,
                phrases: body.phrases,
            });
        }
        Ok(Factors(factors))
    }
}

/// One synthetic subject: a single combination of factor levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Stable, sortable identifier (`profile-001`).
    pub id: String,
    /// Position in presentation (shuffled) order, 0-based.
    pub index: usize,
    /// Factor name → assigned level.
    pub factors: BTreeMap<String, String>,
    /// Structured rendering passed along with artifacts.
    pub structured: serde_json::Value,
    /// Natural-language rendering substituted into the prompt.
    pub description: String,
}

impl Profile {
    pub fn level(&self, factor: &str) -> Option<&str> {
        self.factors.get(factor).map(String::as_str)
    }
}

/// Schema-validated model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreOutput {
    pub score: f64,
    pub justification: String,
}

/// Outcome of scoring one profile once. One per (profile, repetition).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub profile_id: String,
    /// 1-based repetition number.
    pub repetition: u32,
    pub output: Option<ScoreOutput>,
    /// Last raw model response (empty when the model never answered).
    pub raw_response: String,
    pub success: bool,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvaluationResult {
    /// Score when the evaluation succeeded.
    pub fn score(&self) -> Option<f64> {
        if !self.success {
            return None;
        }
        self.output.as_ref().map(|output| output.score)
    }
}
