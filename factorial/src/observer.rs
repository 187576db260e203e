//! Evaluation telemetry injected into the evaluation client.
//!
//! The client never logs on its own; it reports to an [`EvalObserver`] passed
//! in by the caller. [`TracingObserver`] is the production default.

use tracing::{debug, warn};

use crate::core::types::EvaluationResult;

/// One failed attempt inside an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub profile_id: String,
    pub repetition: u32,
    /// 1-based.
    pub attempt: u32,
    pub max_attempts: u32,
    pub reason: String,
}

/// Receives evaluation telemetry. Shared by concurrent workers.
pub trait EvalObserver: Sync {
    fn attempt_failed(&self, failure: &AttemptFailure);
    fn evaluation_finished(&self, result: &EvaluationResult);
}

/// Forwards telemetry to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl EvalObserver for TracingObserver {
    fn attempt_failed(&self, failure: &AttemptFailure) {
        warn!(
            profile_id = %failure.profile_id,
            repetition = failure.repetition,
            attempt = failure.attempt,
            max_attempts = failure.max_attempts,
            reason = %failure.reason,
            "evaluation attempt failed"
        );
    }

    fn evaluation_finished(&self, result: &EvaluationResult) {
        if result.success {
            debug!(
                profile_id = %result.profile_id,
                repetition = result.repetition,
                retry_count = result.retry_count,
                score = ?result.score(),
                "evaluation succeeded"
            );
        } else {
            warn!(
                profile_id = %result.profile_id,
                repetition = result.repetition,
                retry_count = result.retry_count,
                error = result.error.as_deref().unwrap_or_default(),
                "evaluation exhausted retries"
            );
        }
    }
}
