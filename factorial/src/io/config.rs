//! Audit tool configuration stored in `audit.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::diff::DEFAULT_REGRESSION_THRESHOLD;

pub const DEFAULT_CONFIG_FILE: &str = "audit.toml";

/// Audit configuration (TOML).
///
/// Edited by humans; every field has a default so a missing file or a
/// partial file both work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    /// Directory that receives one subdirectory per run.
    pub runs_dir: PathBuf,

    /// Prompt templates directory, resolved relative to the spec file.
    pub prompts_dir: PathBuf,

    /// Wall-clock budget for one model call.
    pub call_timeout_secs: u64,

    /// First retry delay; doubles per attempt up to `retry_backoff_max_ms`.
    pub retry_backoff_ms: u64,
    pub retry_backoff_max_ms: u64,

    /// Parallel evaluation workers.
    pub concurrency: usize,

    /// Truncate model subprocess output beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Default `|Δ|` for `audit diff`.
    pub regression_threshold: f64,

    pub command: CommandConfig,
    pub http: HttpConfig,
}

/// Subprocess backend (`provider: command`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CommandConfig {
    /// Program and arguments; receives the request JSON on stdin.
    pub program: Vec<String>,
}

/// OpenAI-compatible backend (`provider: openai`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            runs_dir: PathBuf::from("runs"),
            prompts_dir: PathBuf::from("prompts"),
            call_timeout_secs: 120,
            retry_backoff_ms: 500,
            retry_backoff_max_ms: 8_000,
            concurrency: 1,
            output_limit_bytes: 100_000,
            regression_threshold: DEFAULT_REGRESSION_THRESHOLD,
            command: CommandConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl AuditConfig {
    pub fn validate(&self) -> Result<()> {
        if self.call_timeout_secs == 0 {
            return Err(anyhow!("call_timeout_secs must be > 0"));
        }
        if self.retry_backoff_max_ms < self.retry_backoff_ms {
            return Err(anyhow!(
                "retry_backoff_max_ms must be >= retry_backoff_ms"
            ));
        }
        if self.concurrency == 0 {
            return Err(anyhow!("concurrency must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if !self.regression_threshold.is_finite() || self.regression_threshold < 0.0 {
            return Err(anyhow!("regression_threshold must be a non-negative number"));
        }
        if self.command.program.iter().any(|arg| arg.is_empty()) {
            return Err(anyhow!("command.program must not contain empty arguments"));
        }
        if self.http.base_url.trim().is_empty() {
            return Err(anyhow!("http.base_url must not be empty"));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AuditConfig::default()`.
pub fn load_config(path: &Path) -> Result<AuditConfig> {
    if !path.exists() {
        let cfg = AuditConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AuditConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AuditConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
