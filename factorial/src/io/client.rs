//! Model backends behind the [`ModelClient`] seam.
//!
//! The evaluation client only sees `complete(request) -> raw text`. Tests use
//! scripted clients that return canned responses without spawning processes
//! or opening sockets.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::core::types::ModelConfig;
use crate::error::AuditError;
use crate::io::config::{AuditConfig, HttpConfig};
use crate::io::process::run_with_timeout;

pub const PROVIDER_COMMAND: &str = "command";
pub const PROVIDER_OPENAI: &str = "openai";

/// One scoring request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub model: String,
    pub temperature: f64,
    #[serde(skip)]
    pub timeout: Duration,
}

/// Abstraction over model backends. Shared across evaluation workers.
pub trait ModelClient: Sync {
    /// Return the model's raw text answer.
    fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

impl<C: ModelClient + ?Sized> ModelClient for Box<C> {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        (**self).complete(request)
    }
}

/// Backend that pipes the request JSON into a local program and reads the
/// answer from its stdout.
#[derive(Debug, Clone)]
pub struct CommandClient {
    program: Vec<String>,
    output_limit_bytes: usize,
}

impl CommandClient {
    pub fn new(program: Vec<String>, output_limit_bytes: usize) -> Result<Self> {
        if program.is_empty() {
            return Err(anyhow!(
                "provider 'command' requires [command] program in the config"
            ));
        }
        Ok(Self {
            program,
            output_limit_bytes,
        })
    }
}

impl ModelClient for CommandClient {
    #[instrument(skip_all, fields(program = %self.program[0], timeout_secs = request.timeout.as_secs()))]
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut cmd = Command::new(&self.program[0]);
        cmd.args(&self.program[1..]);
        let input = serde_json::to_vec(request).context("serialize completion request")?;

        let output = run_with_timeout(cmd, Some(input), request.timeout, self.output_limit_bytes)
            .with_context(|| format!("run {}", self.program[0]))?;
        if output.timed_out {
            return Err(anyhow!("model command timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            let stderr = output.stderr_text();
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            ));
        }
        debug!(bytes = output.stdout.len(), "model command answered");
        Ok(output.stdout_text())
    }
}

/// OpenAI-compatible chat completions backend.
pub struct HttpClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
}

impl HttpClient {
    pub fn new(base_url: &str, api_key: String) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("factorial/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    /// Build from config, reading the key from `api_key_env`.
    pub fn from_config(config: &HttpConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("read API key from ${}", config.api_key_env))?;
        Self::new(&config.base_url, api_key)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ModelClient for HttpClient {
    #[instrument(skip_all, fields(model = %request.model, timeout_secs = request.timeout.as_secs()))]
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&chat_body(request))
            .send()
            .context("send chat completion")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("chat completion returned {status}: {}", body.trim()));
        }
        let body: Value = response.json().context("parse chat completion")?;
        extract_content(&body)
    }
}

fn chat_body(request: &CompletionRequest) -> Value {
    json!({
        "model": request.model,
        "temperature": request.temperature,
        "response_format": {"type": "json_object"},
        "messages": [
            {"role": "system", "content": request.system_prompt},
            {"role": "user", "content": request.user_prompt},
        ],
    })
}

fn extract_content(body: &Value) -> Result<String> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("chat completion has no message content"))
}

/// Pick the backend named by `model.provider`.
pub fn build_client(model: &ModelConfig, config: &AuditConfig) -> Result<Box<dyn ModelClient>> {
    match model.provider.as_str() {
        PROVIDER_COMMAND => Ok(Box::new(CommandClient::new(
            config.command.program.clone(),
            config.output_limit_bytes,
        )?)),
        PROVIDER_OPENAI => Ok(Box::new(HttpClient::from_config(&config.http)?)),
        other => Err(AuditError::UnknownProvider(other.to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system_prompt: "Return JSON only.".to_string(),
            user_prompt: "Candidate: tall".to_string(),
            model: "scorer".to_string(),
            temperature: 0.0,
            timeout: Duration::from_secs(10),
        }
    }

    fn model(provider: &str) -> ModelConfig {
        ModelConfig {
            provider: provider.to_string(),
            name: "scorer".to_string(),
            temperature: 0.0,
            max_retries: 3,
        }
    }

    #[test]
    fn unknown_provider_is_typed() {
        let err = build_client(&model("anthropic-bedrock"), &AuditConfig::default())
            .err()
            .expect("unknown");
        assert!(matches!(
            err.downcast_ref::<AuditError>(),
            Some(AuditError::UnknownProvider(name)) if name == "anthropic-bedrock"
        ));
    }

    #[test]
    fn command_provider_requires_program() {
        let err = build_client(&model("command"), &AuditConfig::default())
            .err()
            .expect("missing program");
        assert!(err.to_string().contains("[command] program"));
    }

    #[test]
    fn openai_provider_requires_key() {
        let mut config = AuditConfig::default();
        config.http.api_key_env = "FACTORIAL_TEST_KEY_THAT_IS_NEVER_SET".to_string();
        let err = build_client(&model("openai"), &config).err().expect("missing key");
        assert!(err.to_string().contains("FACTORIAL_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn chat_body_requests_json_object() {
        let body = chat_body(&request());
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Candidate: tall");
    }

    #[test]
    fn extracts_first_choice_content() {
        let body = json!({"choices": [{"message": {"content": "{\"score\": 4}"}}]});
        assert_eq!(extract_content(&body).expect("content"), "{\"score\": 4}");
        assert!(extract_content(&json!({"choices": []})).is_err());
    }

    #[test]
    fn endpoint_joins_base_url() {
        let client = HttpClient::new("http://localhost:8080/v1/", "key".to_string()).expect("client");
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[cfg(unix)]
    #[test]
    fn command_client_sends_request_on_stdin() {
        let client = CommandClient::new(vec!["cat".to_string()], 10_000).expect("client");
        let raw = client.complete(&request()).expect("complete");
        let echoed: Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(echoed["user_prompt"], "Candidate: tall");
        assert_eq!(echoed["model"], "scorer");
    }

    #[cfg(unix)]
    #[test]
    fn command_client_reports_failure_status() {
        let client = CommandClient::new(
            vec!["sh".to_string(), "-c".to_string(), "echo boom >&2; exit 3".to_string()],
            10_000,
        )
        .expect("client");
        let err = client.complete(&request()).expect_err("failure");
        assert!(err.to_string().contains("boom"));
    }
}
