//! Run tracker: profiles → evaluations → statistics → gates → artifacts.
//!
//! Evaluations may run on a worker pool, but every artifact write happens on
//! the calling thread (single writer) and metrics are computed only after all
//! scheduled evaluations have come back.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, instrument};

use crate::core::effects::{Metrics, compute_metrics};
use crate::core::gates::{GateEvaluation, evaluate_gates};
use crate::core::profiles::{generate_profiles, verify_profile_count};
use crate::core::types::{EvaluationResult, ExperimentSpec, Mode, ModelConfig, Profile};
use crate::core::variance::compute_variance;
use crate::error::AuditError;
use crate::evaluate::{CancelToken, EvaluationClient, RetryPolicy};
use crate::io::client::ModelClient;
use crate::io::config::AuditConfig;
use crate::io::git::head_commit;
use crate::io::run_store::{MetricsDocument, RunMetadata, RunStore, new_run_id};
use crate::io::spec_file::LoadedSpec;
use crate::io::template::PromptTemplate;
use crate::observer::EvalObserver;
use crate::report::render_run_report;

/// Everything fixed before the first model call.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub spec: ExperimentSpec,
    pub template: PromptTemplate,
    /// Presentation order.
    pub profiles: Vec<Profile>,
    pub metadata: RunMetadata,
}

impl RunPlan {
    /// Check the mode, generate and verify profiles, and snapshot metadata.
    ///
    /// `git_dir` is where the commit lookup runs; `None` skips it.
    #[instrument(skip_all, fields(prompt_version = %loaded.spec.prompt_version))]
    pub fn prepare(loaded: &LoadedSpec, template: PromptTemplate, git_dir: Option<&Path>) -> Result<Self> {
        let spec = &loaded.spec;
        if spec.mode != Mode::Scoring {
            return Err(AuditError::UnsupportedMode(spec.mode.to_string()).into());
        }

        let profiles = generate_profiles(spec);
        verify_profile_count(spec, &profiles)?;

        let now = Utc::now();
        let metadata = RunMetadata {
            run_id: new_run_id(now),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            name: spec.name.clone(),
            model: spec.model.clone(),
            prompt_version: spec.prompt_version.clone(),
            prompt_hash: template.hash.clone(),
            spec_hash: loaded.spec_hash.clone(),
            seed: spec.seed,
            repetitions: spec.repetitions,
            mode: spec.mode,
            profile_count: profiles.len(),
            thresholds: spec.thresholds,
            git_commit: git_dir.and_then(head_commit),
        };
        debug!(run_id = %metadata.run_id, profiles = profiles.len(), "run planned");

        Ok(Self {
            spec: spec.clone(),
            template,
            profiles,
            metadata,
        })
    }

    /// `(profile position, repetition)` in generation order, repetitions 1..=k.
    pub fn jobs(&self) -> Vec<(usize, u32)> {
        (0..self.profiles.len())
            .flat_map(|profile| (1..=self.spec.repetitions).map(move |rep| (profile, rep)))
            .collect()
    }

    pub fn scheduled_evaluations(&self) -> usize {
        self.profiles.len() * self.spec.repetitions as usize
    }
}

/// Evaluation knobs taken from `audit.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalSettings {
    pub policy: RetryPolicy,
    pub call_timeout: Duration,
    pub concurrency: usize,
}

impl EvalSettings {
    pub fn from_config(config: &AuditConfig, model: &ModelConfig) -> Self {
        Self {
            policy: RetryPolicy {
                max_retries: model.max_retries,
                backoff: Duration::from_millis(config.retry_backoff_ms),
                backoff_max: Duration::from_millis(config.retry_backoff_max_ms),
            },
            call_timeout: config.call_timeout(),
            concurrency: config.concurrency,
        }
    }

    /// One worker, no backoff.
    pub fn sequential(max_retries: u32) -> Self {
        Self {
            policy: RetryPolicy::immediate(max_retries),
            call_timeout: Duration::from_secs(120),
            concurrency: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    /// In job order (profile order, then repetition).
    pub results: Vec<EvaluationResult>,
    pub metrics: Metrics,
    pub gates: GateEvaluation,
    pub report: String,
}

/// Execute a planned run end to end.
///
/// Evaluation failures are recorded and never abort the run. Cancellation
/// returns [`AuditError::Cancelled`] without computing metrics.
///
/// The caller owns `cancel` and may trip it from any thread; workers check
/// it before each attempt and while backing off. The `audit` binary installs
/// no signal handler, so its token is never tripped and Ctrl-C ends the
/// process directly.
#[instrument(skip_all, fields(run_id = %plan.metadata.run_id, concurrency = settings.concurrency))]
pub fn run_experiment<C, S>(
    plan: &RunPlan,
    settings: &EvalSettings,
    client: &C,
    store: &S,
    observer: &dyn EvalObserver,
    cancel: &CancelToken,
) -> Result<RunOutcome>
where
    C: ModelClient + ?Sized,
    S: RunStore + ?Sized,
{
    store.write_metadata(&plan.metadata)?;
    store.write_profiles(&plan.profiles)?;

    let jobs = plan.jobs();
    info!(
        profiles = plan.profiles.len(),
        evaluations = jobs.len(),
        "run started"
    );

    let evaluator = EvaluationClient::new(client, &plan.template, &plan.spec.model, observer)
        .with_policy(settings.policy)
        .with_call_timeout(settings.call_timeout)
        .with_cancel(cancel.clone());
    let results = evaluate_all(plan, &jobs, &evaluator, settings.concurrency, store, cancel)?;

    let failed = results.iter().filter(|result| !result.success).count();
    let variance = compute_variance(&results, plan.spec.thresholds.max_profile_variance);
    let metrics = compute_metrics(&plan.spec, &plan.profiles, &variance, results.len(), failed);
    let gates = evaluate_gates(&metrics, &plan.spec.thresholds);

    store.write_metrics(&MetricsDocument {
        metrics: metrics.clone(),
        gates: gates.clone(),
    })?;
    let report = render_run_report(&plan.metadata, &metrics, &gates)?;
    store.write_report(&report)?;

    info!(
        failed,
        all_passed = gates.all_passed,
        summary = %gates.summary,
        "run finished"
    );
    Ok(RunOutcome {
        run_id: plan.metadata.run_id.clone(),
        results,
        metrics,
        gates,
        report,
    })
}

/// Fan jobs out to workers, write each result as it arrives, and join.
fn evaluate_all<C, S>(
    plan: &RunPlan,
    jobs: &[(usize, u32)],
    evaluator: &EvaluationClient<'_, C>,
    concurrency: usize,
    store: &S,
    cancel: &CancelToken,
) -> Result<Vec<EvaluationResult>>
where
    C: ModelClient + ?Sized,
    S: RunStore + ?Sized,
{
    let workers = concurrency.clamp(1, jobs.len().max(1));
    let next = AtomicUsize::new(0);
    let mut slots: Vec<Option<EvaluationResult>> = vec![None; jobs.len()];

    thread::scope(|scope| -> Result<()> {
        let (tx, rx) = mpsc::channel::<(usize, EvaluationResult)>();
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            scope.spawn(move || {
                while !cancel.is_cancelled() {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(&(position, repetition)) = jobs.get(index) else {
                        break;
                    };
                    let profile = &plan.profiles[position];
                    let result = evaluator.evaluate(&profile.id, &profile.description, repetition);
                    if tx.send((index, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        for (index, result) in rx {
            if let Err(err) = store.append_evaluation(&result) {
                // Stop the workers; the scope joins them before returning.
                cancel.cancel();
                return Err(err);
            }
            slots[index] = Some(result);
        }
        Ok(())
    })?;

    let completed = slots.iter().filter(|slot| slot.is_some()).count();
    if cancel.is_cancelled() || completed != jobs.len() {
        info!(completed, scheduled = jobs.len(), "run cancelled");
        return Err(AuditError::Cancelled.into());
    }
    Ok(slots.into_iter().flatten().collect())
}

/// Template path for `prompt_version`: `<spec dir>/<prompts_dir>/<version>.txt`.
pub fn resolve_template_path(loaded: &LoadedSpec, config: &AuditConfig) -> PathBuf {
    loaded
        .base_dir()
        .join(&config.prompts_dir)
        .join(format!("{}.txt", loaded.spec.prompt_version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::client::CompletionRequest;
    use crate::test_support::{
        FnClient, MemoryRunStore, RecordingObserver, ScriptedClient, hiring_spec, hiring_template,
        two_by_two_spec,
    };

    fn plan_for(spec: ExperimentSpec) -> RunPlan {
        let loaded = LoadedSpec::from_spec(spec).expect("loaded");
        RunPlan::prepare(&loaded, hiring_template(), None).expect("plan")
    }

    fn constant(score: f64) -> FnClient<impl Fn(&CompletionRequest) -> Result<String> + Sync> {
        FnClient::new(move |_: &CompletionRequest| {
            Ok(format!(r#"{{"score": {score}, "justification": "steady"}}"#))
        })
    }

    #[test]
    fn schedules_profiles_times_repetitions() {
        let plan = plan_for(hiring_spec());
        assert_eq!(plan.profiles.len(), 18);
        assert_eq!(plan.scheduled_evaluations(), 36);
        let jobs = plan.jobs();
        assert_eq!(jobs.len(), 36);
        assert_eq!(&jobs[..3], &[(0, 1), (0, 2), (1, 1)]);
        assert_eq!(plan.metadata.profile_count, 18);
        assert_eq!(plan.metadata.git_commit, None);
        assert!(plan.metadata.run_id.starts_with("run-"));
    }

    #[test]
    fn ranking_mode_is_rejected_before_any_call() {
        let mut spec = hiring_spec();
        spec.mode = Mode::Ranking;
        let loaded = LoadedSpec::from_spec(spec).expect("loaded");
        let err = RunPlan::prepare(&loaded, hiring_template(), None).expect_err("unsupported");
        assert!(matches!(
            err.downcast_ref::<AuditError>(),
            Some(AuditError::UnsupportedMode(mode)) if mode == "ranking"
        ));
    }

    #[test]
    fn writes_every_artifact_once() {
        let plan = plan_for(two_by_two_spec());
        let store = MemoryRunStore::default();
        let observer = RecordingObserver::default();
        let outcome = run_experiment(
            &plan,
            &EvalSettings::sequential(plan.spec.model.max_retries),
            &constant(5.0),
            &store,
            &observer,
            &CancelToken::new(),
        )
        .expect("run");

        assert_eq!(outcome.results.len(), 8);
        assert!(outcome.gates.all_passed);
        assert_eq!(store.metadata().expect("metadata").run_id, outcome.run_id);
        assert_eq!(store.profiles().len(), 4);
        assert_eq!(store.evaluations().len(), 8);
        let metrics = store.metrics().expect("metrics");
        assert_eq!(metrics.metrics, outcome.metrics);
        assert_eq!(store.report().as_deref(), Some(outcome.report.as_str()));
    }

    /// Failed evaluations leave gaps but the run completes.
    #[test]
    fn exhausted_evaluations_do_not_abort() {
        let plan = plan_for(two_by_two_spec());
        let store = MemoryRunStore::default();
        let observer = RecordingObserver::default();
        let client = ScriptedClient::new(Vec::new());
        let outcome = run_experiment(
            &plan,
            &EvalSettings::sequential(1),
            &client,
            &store,
            &observer,
            &CancelToken::new(),
        )
        .expect("run");

        assert_eq!(outcome.metrics.failed_evaluations, 8);
        assert_eq!(outcome.metrics.success_rate, 0.0);
        assert!(outcome.results.iter().all(|r| r.retry_count == 2));
        assert_eq!(observer.failures().len(), 16);
    }

    /// A worker pool yields the same ordered results as one worker.
    #[test]
    fn concurrency_preserves_job_order() {
        let plan = plan_for(hiring_spec());
        let run = |concurrency: usize| {
            let settings = EvalSettings {
                concurrency,
                ..EvalSettings::sequential(3)
            };
            run_experiment(
                &plan,
                &settings,
                &constant(7.0),
                &MemoryRunStore::default(),
                &RecordingObserver::default(),
                &CancelToken::new(),
            )
            .expect("run")
        };
        let single = run(1);
        let pooled = run(4);
        let key = |outcome: &RunOutcome| {
            outcome
                .results
                .iter()
                .map(|r| (r.profile_id.clone(), r.repetition))
                .collect::<Vec<_>>()
        };
        assert_eq!(key(&single), key(&pooled));
        assert_eq!(single.metrics, pooled.metrics);
    }

    /// Cancellation never produces metrics from a partial result set.
    #[test]
    fn cancellation_skips_metrics() {
        let plan = plan_for(two_by_two_spec());
        let store = MemoryRunStore::default();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let client = FnClient::new(move |_: &CompletionRequest| {
            trigger.cancel();
            Ok(r#"{"score": 5, "justification": "ok"}"#.to_string())
        });
        let err = run_experiment(
            &plan,
            &EvalSettings::sequential(3),
            &client,
            &store,
            &RecordingObserver::default(),
            &cancel,
        )
        .expect_err("cancelled");
        assert!(matches!(err.downcast_ref::<AuditError>(), Some(AuditError::Cancelled)));
        assert!(store.metrics().is_none());
        assert!(store.report().is_none());
    }

    /// A token cancelled before the run starts stops it before any model call.
    #[test]
    fn cancelled_token_prevents_model_calls() {
        let plan = plan_for(two_by_two_spec());
        let store = MemoryRunStore::default();
        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let client = FnClient::new(move |_: &CompletionRequest| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(r#"{"score": 5, "justification": "ok"}"#.to_string())
        });
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = run_experiment(
            &plan,
            &EvalSettings::sequential(3),
            &client,
            &store,
            &RecordingObserver::default(),
            &cancel,
        )
        .expect_err("cancelled");
        assert!(matches!(err.downcast_ref::<AuditError>(), Some(AuditError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(store.metrics().is_none());
    }

    #[test]
    fn template_path_follows_spec_directory() {
        let mut loaded = LoadedSpec::from_spec(hiring_spec()).expect("loaded");
        loaded.source = PathBuf::from("audits/hiring.yaml");
        let path = resolve_template_path(&loaded, &AuditConfig::default());
        assert_eq!(path, PathBuf::from("audits/prompts/hiring-v1.txt"));
    }
}
