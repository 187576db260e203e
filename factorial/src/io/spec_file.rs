//! Experiment spec loading (YAML or JSON) with full violation reporting.
//!
//! Loading runs in three stages, each stopping the load with every problem
//! it found:
//! 1. syntax: the text must parse as a YAML or JSON document;
//! 2. structure: the document is checked against
//!    `schemas/experiment_spec.schema.json`;
//! 3. semantics: the typed spec goes through [`validate_spec`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, ValidationError, Validator};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::spec_rules::validate_spec;
use crate::core::types::ExperimentSpec;
use crate::error::{AuditError, SpecViolation};
use crate::io::digest::sha256_hex;

/// Path reported for problems the parser finds before any field is known.
pub const DOCUMENT_PATH: &str = "<document>";

const SPEC_SCHEMA: &str = include_str!("../../schemas/experiment_spec.schema.json");

static SPEC_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(SPEC_SCHEMA).unwrap();
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecFormat {
    Yaml,
    Json,
}

impl SpecFormat {
    /// `.json` is JSON; everything else is read as YAML (a JSON superset).
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SpecFormat::Json,
            _ => SpecFormat::Yaml,
        }
    }
}

/// A validated spec plus the provenance recorded in run metadata.
#[derive(Debug, Clone)]
pub struct LoadedSpec {
    pub spec: ExperimentSpec,
    /// SHA-256 of the source bytes.
    pub spec_hash: String,
    pub source: PathBuf,
}

impl LoadedSpec {
    /// Wrap an in-memory spec; the hash covers its canonical JSON form.
    pub fn from_spec(spec: ExperimentSpec) -> Result<Self> {
        let canonical = serde_json::to_vec(&spec).context("serialize spec")?;
        Ok(Self {
            spec,
            spec_hash: sha256_hex(&canonical),
            source: PathBuf::from("<memory>"),
        })
    }

    /// Directory relative paths in the spec are resolved against.
    pub fn base_dir(&self) -> &Path {
        match self.source.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

/// Read, parse and validate a spec file.
///
/// Validation failures surface as [`AuditError::SpecValidation`] carrying
/// every violation.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_spec(path: &Path) -> Result<LoadedSpec> {
    let contents = fs::read(path).with_context(|| format!("read spec {}", path.display()))?;
    let text = std::str::from_utf8(&contents).map_err(|err| {
        AuditError::SpecValidation(vec![SpecViolation::new(
            DOCUMENT_PATH,
            format!("spec is not valid UTF-8: {err}"),
        )])
    })?;
    let spec = parse_spec_str(text, SpecFormat::from_path(path))?;
    debug!(factors = spec.factors.len(), seed = spec.seed, "spec loaded");
    Ok(LoadedSpec {
        spec,
        spec_hash: sha256_hex(&contents),
        source: path.to_path_buf(),
    })
}

/// Parse and validate spec text.
pub fn parse_spec_str(contents: &str, format: SpecFormat) -> Result<ExperimentSpec, AuditError> {
    let document: Value = parse_text(contents, format).map_err(document_error)?;

    let mut violations: Vec<SpecViolation> = SPEC_VALIDATOR
        .iter_errors(&document)
        .map(|err| schema_violation(&err))
        .collect();
    if !violations.is_empty() {
        violations.sort_by(|a, b| a.path.cmp(&b.path));
        return Err(AuditError::SpecValidation(violations));
    }

    // Typed values come from the text so factor declaration order survives.
    let spec: ExperimentSpec = parse_text(contents, format).map_err(document_error)?;
    let violations = validate_spec(&spec);
    if !violations.is_empty() {
        return Err(AuditError::SpecValidation(violations));
    }
    Ok(spec)
}

fn parse_text<T: serde::de::DeserializeOwned>(
    contents: &str,
    format: SpecFormat,
) -> Result<T, String> {
    match format {
        SpecFormat::Yaml => serde_yaml::from_str(contents).map_err(|err| err.to_string()),
        SpecFormat::Json => serde_json::from_str(contents).map_err(|err| err.to_string()),
    }
}

fn document_error(message: String) -> AuditError {
    AuditError::SpecValidation(vec![SpecViolation::new(DOCUMENT_PATH, message)])
}

/// Missing properties are reported at the property itself rather than at
/// the object that lacks it.
fn schema_violation(err: &ValidationError<'_>) -> SpecViolation {
    let pointer = err.instance_path().as_str();
    match err.kind() {
        ValidationErrorKind::Required {
            property: Value::String(name),
        } => SpecViolation::new(
            field_path(&format!("{pointer}/{name}")),
            "required field is missing",
        ),
        _ => SpecViolation::new(field_path(pointer), err.to_string()),
    }
}

/// `/factors/experience/levels` becomes `factors.experience.levels` and
/// `/interactions/1` becomes `interactions[1]`.
fn field_path(pointer: &str) -> String {
    let mut path = String::new();
    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            path.push_str(&format!("[{segment}]"));
        } else {
            if !path.is_empty() {
                path.push('.');
            }
            path.push_str(&segment);
        }
    }
    if path.is_empty() {
        DOCUMENT_PATH.to_string()
    } else {
        path
    }
}
