//! Model output extraction and schema validation.
//!
//! Models are asked for JSON only but often wrap it in prose. Parsing starts
//! at the first `{` and stops at the end of that one JSON value, so text
//! after the object is ignored. The value is then checked against
//! `schemas/score_output.schema.json`.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde_json::Value;

use crate::core::types::ScoreOutput;

const SCORE_SCHEMA: &str = include_str!("../../schemas/score_output.schema.json");

static SCORE_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(SCORE_SCHEMA).unwrap();
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .unwrap()
});

/// Why a raw response was rejected. Every variant is retryable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OutputError {
    #[error("empty response")]
    Empty,
    #[error("no JSON object found in response")]
    NoJsonObject,
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("schema validation failed: {}", .0.join("; "))]
    Schema(Vec<String>),
}

/// The JSON object starting at the first `{` in `raw`, with its exact
/// source span. Braces inside strings and any trailing text are ignored.
pub fn extract_json_object(raw: &str) -> Result<(&str, Value), OutputError> {
    let start = raw.find('{').ok_or(OutputError::NoJsonObject)?;
    let tail = &raw[start..];
    let mut stream = serde_json::Deserializer::from_str(tail).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Ok((&tail[..stream.byte_offset()], value)),
        Some(Err(err)) => Err(OutputError::InvalidJson(err.to_string())),
        None => Err(OutputError::NoJsonObject),
    }
}

/// Extract, parse and validate a model response.
pub fn validate_output(raw: &str) -> Result<ScoreOutput, OutputError> {
    if raw.trim().is_empty() {
        return Err(OutputError::Empty);
    }
    let (_, value) = extract_json_object(raw)?;

    let messages: Vec<String> = SCORE_VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(OutputError::Schema(messages));
    }

    serde_json::from_value(value).map_err(|err| OutputError::InvalidJson(err.to_string()))
}
