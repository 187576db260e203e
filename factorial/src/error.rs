//! Error taxonomy for the experiment engine.
//!
//! Configuration errors fail fast with every violation listed. Evaluation
//! failures are not errors at all: they are recorded on the
//! [`EvaluationResult`](crate::core::types::EvaluationResult) and the run goes
//! on. Gate failures are a result ([`GateEvaluation`](crate::core::gates::GateEvaluation)),
//! never an `Err`.

use std::fmt;

/// One field-level problem found while validating a spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecViolation {
    /// Dotted field path, e.g. `factors.experience.levels`.
    pub path: String,
    pub message: String,
}

impl SpecViolation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SpecViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Fatal errors surfaced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("spec validation failed:\n- {}", list_violations(.0))]
    SpecValidation(Vec<SpecViolation>),

    #[error("profile count mismatch: expected {expected}, generated {actual}")]
    ProfileCountMismatch { expected: usize, actual: usize },

    #[error("unsupported mode '{0}' (only 'scoring' runs are implemented)")]
    UnsupportedMode(String),

    #[error("unknown model provider '{0}' (expected 'command' or 'openai')")]
    UnknownProvider(String),

    #[error("invalid prompt template {path}: {reason}")]
    Template { path: String, reason: String },

    #[error("cannot load run {path}: {reason}")]
    DiffLoad { path: String, reason: String },

    #[error("run cancelled before all evaluations completed")]
    Cancelled,
}

impl AuditError {
    /// Violations carried by a [`AuditError::SpecValidation`], empty otherwise.
    pub fn violations(&self) -> &[SpecViolation] {
        match self {
            AuditError::SpecValidation(violations) => violations,
            _ => &[],
        }
    }
}

fn list_violations(violations: &[SpecViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n- ")
}
