//! Evaluation client: one scoring request per (profile, repetition) with
//! schema validation and bounded retry.
//!
//! ```text
//! Attempt -> ParseAndValidate -> Success (return)
//!                             -> Invalid -> retry while retry_count <= max_retries
//!                                        -> Exhausted (success = false, run continues)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::instrument;

use crate::core::output::{OutputError, validate_output};
use crate::core::types::{EvaluationResult, ModelConfig, ScoreOutput};
use crate::io::client::{CompletionRequest, ModelClient};
use crate::io::template::PromptTemplate;
use crate::observer::{AttemptFailure, EvalObserver};

const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Cooperative cancellation shared by every worker of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep up to `duration`, waking early on cancellation.
    fn sleep(&self, duration: Duration) {
        let mut remaining = duration;
        while !remaining.is_zero() && !self.is_cancelled() {
            let step = remaining.min(CANCEL_POLL);
            thread::sleep(step);
            remaining -= step;
        }
    }
}

/// Retry bound and capped exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry.
    pub backoff: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    /// No delay between attempts.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Duration::ZERO,
            backoff_max: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before 1-based `attempt`: none for the first, then
    /// `backoff * 2^(attempt - 2)` capped at `backoff_max`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
        self.backoff
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

enum AttemptOutcome {
    Success { output: ScoreOutput, raw: String },
    Invalid { raw: String, error: OutputError },
    Transport(anyhow::Error),
}

/// Scores profiles against one template and model.
pub struct EvaluationClient<'a, C: ModelClient + ?Sized> {
    client: &'a C,
    template: &'a PromptTemplate,
    model: &'a ModelConfig,
    policy: RetryPolicy,
    call_timeout: Duration,
    observer: &'a dyn EvalObserver,
    cancel: CancelToken,
}

impl<'a, C: ModelClient + ?Sized> EvaluationClient<'a, C> {
    pub fn new(
        client: &'a C,
        template: &'a PromptTemplate,
        model: &'a ModelConfig,
        observer: &'a dyn EvalObserver,
    ) -> Self {
        Self {
            client,
            template,
            model,
            policy: RetryPolicy::immediate(model.max_retries),
            call_timeout: Duration::from_secs(120),
            observer,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Score one profile once. Never fails: exhaustion is a recorded result.
    #[instrument(skip_all, fields(profile_id = %profile_id, repetition = repetition))]
    pub fn evaluate(&self, profile_id: &str, description: &str, repetition: u32) -> EvaluationResult {
        let request = CompletionRequest {
            system_prompt: self.template.system().to_string(),
            user_prompt: self.template.render_user(description),
            model: self.model.name.clone(),
            temperature: self.model.temperature,
            timeout: self.call_timeout,
        };

        let mut retry_count = 0u32;
        let mut last_raw = String::new();
        let mut last_error = String::new();
        while retry_count <= self.policy.max_retries {
            self.cancel.sleep(self.policy.delay_before(retry_count + 1));
            if self.cancel.is_cancelled() {
                last_error = "cancelled".to_string();
                break;
            }

            let reason = match self.attempt(&request) {
                AttemptOutcome::Success { output, raw } => {
                    let result = EvaluationResult {
                        profile_id: profile_id.to_string(),
                        repetition,
                        output: Some(output),
                        raw_response: raw,
                        success: true,
                        retry_count,
                        error: None,
                    };
                    self.observer.evaluation_finished(&result);
                    return result;
                }
                AttemptOutcome::Invalid { raw, error } => {
                    last_raw = raw;
                    error.to_string()
                }
                AttemptOutcome::Transport(err) => format!("{err:#}"),
            };

            self.observer.attempt_failed(&AttemptFailure {
                profile_id: profile_id.to_string(),
                repetition,
                attempt: retry_count + 1,
                max_attempts: self.policy.max_attempts(),
                reason: reason.clone(),
            });
            last_error = reason;
            retry_count += 1;
        }

        let result = EvaluationResult {
            profile_id: profile_id.to_string(),
            repetition,
            output: None,
            raw_response: last_raw,
            success: false,
            retry_count,
            error: Some(last_error),
        };
        self.observer.evaluation_finished(&result);
        result
    }

    fn attempt(&self, request: &CompletionRequest) -> AttemptOutcome {
        match self.client.complete(request) {
            Ok(raw) => match validate_output(&raw) {
                Ok(output) => AttemptOutcome::Success { output, raw },
                Err(error) => AttemptOutcome::Invalid { raw, error },
            },
            Err(err) => AttemptOutcome::Transport(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingObserver, ScriptedClient, hiring_spec, hiring_template};

    fn valid(score: f64) -> Result<String, String> {
        Ok(format!(r#"{{"score": {score}, "justification": "fits the role"}}"#))
    }

    #[test]
    fn first_valid_answer_returns_immediately() {
        let spec = hiring_spec();
        let template = hiring_template();
        let client = ScriptedClient::new(vec![valid(6.5)]);
        let observer = RecordingObserver::default();
        let evaluator = EvaluationClient::new(&client, &template, &spec.model, &observer);

        let result = evaluator.evaluate("profile-001", "This candidate is tall.", 1);
        assert!(result.success);
        assert_eq!(result.score(), Some(6.5));
        assert_eq!(result.retry_count, 0);
        assert_eq!(client.calls(), 1);
        let request = &client.requests()[0];
        assert!(request.user_prompt.contains("This candidate is tall."));
        assert_eq!(request.model, spec.model.name);
    }

    /// Invalid and failed calls are retried and logged per attempt.
    #[test]
    fn retries_until_valid() {
        let spec = hiring_spec();
        let template = hiring_template();
        let client = ScriptedClient::new(vec![
            Ok(r#"{"score": 15, "justification": "off the scale"}"#.to_string()),
            Err("connection reset".to_string()),
            Ok(format!("Here you go: {}", valid(4.0).expect("ok"))),
        ]);
        let observer = RecordingObserver::default();
        let evaluator = EvaluationClient::new(&client, &template, &spec.model, &observer);

        let result = evaluator.evaluate("profile-002", "desc", 2);
        assert!(result.success);
        assert_eq!(result.retry_count, 2);
        let failures = observer.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].attempt, 1);
        assert_eq!(failures[0].repetition, 2);
        assert!(failures[0].reason.contains("schema validation failed"));
        assert!(failures[1].reason.contains("connection reset"));
    }

    /// Exhaustion records the gap: no output, last raw response, reason.
    #[test]
    fn exhaustion_is_recorded_not_fatal() {
        let mut spec = hiring_spec();
        spec.model.max_retries = 2;
        let template = hiring_template();
        let client = ScriptedClient::new(vec![
            Ok("no json here".to_string()),
            Ok("still none".to_string()),
            Ok("I refuse".to_string()),
            valid(9.0),
        ]);
        let observer = RecordingObserver::default();
        let evaluator = EvaluationClient::new(&client, &template, &spec.model, &observer);

        let result = evaluator.evaluate("profile-003", "desc", 1);
        assert!(!result.success);
        assert!(result.output.is_none());
        assert_eq!(result.raw_response, "I refuse");
        assert_eq!(result.retry_count, 3);
        assert_eq!(result.error.as_deref(), Some("no JSON object found in response"));
        assert_eq!(client.calls(), 3);
        assert_eq!(observer.finished().len(), 1);
    }

    /// Transport-only failures leave the raw response empty.
    #[test]
    fn transport_failures_keep_empty_raw() {
        let mut spec = hiring_spec();
        spec.model.max_retries = 1;
        let template = hiring_template();
        let client = ScriptedClient::new(vec![Err("timeout".to_string()), Err("timeout".to_string())]);
        let observer = RecordingObserver::default();
        let result = EvaluationClient::new(&client, &template, &spec.model, &observer)
            .evaluate("profile-004", "desc", 1);
        assert!(!result.success);
        assert_eq!(result.raw_response, "");
        assert_eq!(result.retry_count, 2);
    }

    #[test]
    fn cancelled_token_stops_before_calling() {
        let spec = hiring_spec();
        let template = hiring_template();
        let client = ScriptedClient::new(vec![valid(5.0)]);
        let observer = RecordingObserver::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = EvaluationClient::new(&client, &template, &spec.model, &observer)
            .with_cancel(cancel)
            .evaluate("profile-005", "desc", 1);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("cancelled"));
        assert_eq!(client.calls(), 0);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff: Duration::from_millis(500),
            backoff_max: Duration::from_millis(1500),
        };
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(500));
        assert_eq!(policy.delay_before(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_before(4), Duration::from_millis(1500));
        assert_eq!(policy.delay_before(40), Duration::from_millis(1500));
        assert_eq!(policy.max_attempts(), 6);
    }
}
