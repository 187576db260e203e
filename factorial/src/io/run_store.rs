//! Persisted run artifacts under `<runs_dir>/<run_id>/`.
//!
//! ```text
//! run_metadata.json         written once at run start
//! inputs/profiles.json      generated profiles, presentation order
//! logs/evaluations.jsonl    one parsed record per evaluation, append-only
//! logs/raw_responses.jsonl  one raw model response per evaluation, append-only
//! metrics.json              metrics + gate verdicts
//! report.md                 rendered run report
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::effects::Metrics;
use crate::core::gates::GateEvaluation;
use crate::core::types::{EvaluationResult, Mode, ModelConfig, Profile, ScoreOutput, Thresholds};
use crate::error::AuditError;

pub const RUN_METADATA_FILE: &str = "run_metadata.json";
pub const PROFILES_FILE: &str = "inputs/profiles.json";
pub const EVALUATIONS_LOG: &str = "logs/evaluations.jsonl";
pub const RAW_RESPONSES_LOG: &str = "logs/raw_responses.jsonl";
pub const METRICS_FILE: &str = "metrics.json";
pub const REPORT_FILE: &str = "report.md";

/// Snapshot taken at run start. Written once, read back by the diff engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    /// RFC 3339, UTC.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub model: ModelConfig,
    pub prompt_version: String,
    pub prompt_hash: String,
    pub spec_hash: String,
    pub seed: u64,
    pub repetitions: u32,
    pub mode: Mode,
    pub profile_count: usize,
    pub thresholds: Thresholds,
    #[serde(default)]
    pub git_commit: Option<String>,
}

/// Contents of `metrics.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsDocument {
    #[serde(flatten)]
    pub metrics: Metrics,
    pub gates: GateEvaluation,
}

/// Line in `logs/evaluations.jsonl`.
#[derive(Debug, Serialize)]
struct EvaluationRecord<'a> {
    profile_id: &'a str,
    repetition: u32,
    success: bool,
    retry_count: u32,
    output: Option<&'a ScoreOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Line in `logs/raw_responses.jsonl`.
#[derive(Debug, Serialize)]
struct RawResponseRecord<'a> {
    profile_id: &'a str,
    repetition: u32,
    raw_response: &'a str,
}

/// Abstract persistence for one run. Called from a single writer.
pub trait RunStore {
    fn write_metadata(&self, metadata: &RunMetadata) -> Result<()>;
    fn write_profiles(&self, profiles: &[Profile]) -> Result<()>;
    /// Append one evaluation to both logs.
    fn append_evaluation(&self, result: &EvaluationResult) -> Result<()>;
    fn write_metrics(&self, document: &MetricsDocument) -> Result<()>;
    fn write_report(&self, markdown: &str) -> Result<()>;
}

/// Filesystem store rooted at one run directory.
#[derive(Debug, Clone)]
pub struct FsRunStore {
    dir: PathBuf,
}

impl FsRunStore {
    /// Create `<runs_dir>/<run_id>/` and its subdirectories.
    ///
    /// Fails if the run directory already exists.
    pub fn create(runs_dir: &Path, run_id: &str) -> Result<Self> {
        fs::create_dir_all(runs_dir)
            .with_context(|| format!("create runs dir {}", runs_dir.display()))?;
        let dir = runs_dir.join(run_id);
        fs::create_dir(&dir).with_context(|| format!("create run dir {}", dir.display()))?;
        for sub in ["inputs", "logs"] {
            let path = dir.join(sub);
            fs::create_dir_all(&path).with_context(|| format!("create {}", path.display()))?;
        }
        debug!(dir = %dir.display(), "run directory created");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn append_line<T: Serialize>(&self, relative: &str, value: &T) -> Result<()> {
        let path = self.dir.join(relative);
        let mut line = serde_json::to_string(value).context("serialize log line")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", path.display()))
    }
}

impl RunStore for FsRunStore {
    fn write_metadata(&self, metadata: &RunMetadata) -> Result<()> {
        write_json_atomic(&self.dir.join(RUN_METADATA_FILE), metadata)
    }

    fn write_profiles(&self, profiles: &[Profile]) -> Result<()> {
        write_json_atomic(&self.dir.join(PROFILES_FILE), &profiles)
    }

    fn append_evaluation(&self, result: &EvaluationResult) -> Result<()> {
        self.append_line(
            EVALUATIONS_LOG,
            &EvaluationRecord {
                profile_id: &result.profile_id,
                repetition: result.repetition,
                success: result.success,
                retry_count: result.retry_count,
                output: result.output.as_ref(),
                error: result.error.as_deref(),
            },
        )?;
        self.append_line(
            RAW_RESPONSES_LOG,
            &RawResponseRecord {
                profile_id: &result.profile_id,
                repetition: result.repetition,
                raw_response: &result.raw_response,
            },
        )
    }

    fn write_metrics(&self, document: &MetricsDocument) -> Result<()> {
        write_json_atomic(&self.dir.join(METRICS_FILE), document)
    }

    fn write_report(&self, markdown: &str) -> Result<()> {
        write_text_atomic(&self.dir.join(REPORT_FILE), markdown)
    }
}

/// `run-YYYYMMDD-HHMMSS-xxxxxx` with a random lowercase alphanumeric suffix.
pub fn new_run_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("run-{}-{suffix}", now.format("%Y%m%d-%H%M%S"))
}

/// A run read back from disk.
#[derive(Debug, Clone)]
pub struct PersistedRun {
    pub dir: PathBuf,
    pub metadata: RunMetadata,
    pub metrics: MetricsDocument,
}

/// Load `run_metadata.json` and `metrics.json` from `dir`.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn load_run(dir: &Path) -> Result<PersistedRun, AuditError> {
    let fail = |reason: String| AuditError::DiffLoad {
        path: dir.display().to_string(),
        reason,
    };
    if !dir.is_dir() {
        return Err(fail("not a directory".to_string()));
    }
    let metadata: RunMetadata =
        read_json(&dir.join(RUN_METADATA_FILE)).map_err(|err| fail(format!("{err:#}")))?;
    let metrics: MetricsDocument =
        read_json(&dir.join(METRICS_FILE)).map_err(|err| fail(format!("{err:#}")))?;
    Ok(PersistedRun {
        dir: dir.to_path_buf(),
        metadata,
        metrics,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    write_text_atomic(path, &buf)
}

fn write_text_atomic(path: &Path, contents: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("artifact path has no file name {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))
}
