//! End-to-end run over files on disk with a deterministic biased scorer.
//!
//! Spec, prompt template and run artifacts all live in a temp directory; the
//! model is a closure keyed on the rendered candidate description.

use std::collections::HashSet;
use std::fs;

use factorial::core::types::EvaluationResult;
use factorial::evaluate::CancelToken;
use factorial::io::client::CompletionRequest;
use factorial::io::config::AuditConfig;
use factorial::io::run_store::{
    EVALUATIONS_LOG, FsRunStore, PROFILES_FILE, RAW_RESPONSES_LOG, REPORT_FILE, load_run,
};
use factorial::io::spec_file::{LoadedSpec, load_spec};
use factorial::io::template::PromptTemplate;
use factorial::run::{EvalSettings, RunPlan, resolve_template_path, run_experiment};
use factorial::test_support::{AuditDir, FnClient, HIRING_SPEC_YAML, RecordingObserver};

const SENIOR: &str = "a senior professional";
const GROUP_B: &str = "a member of demographic group B";

/// Senior candidates gain 3 points, minus `bias` when also in group B.
fn biased_score(request: &CompletionRequest, bias: f64) -> f64 {
    let prompt = &request.user_prompt;
    let mut score = 5.0;
    if prompt.contains(SENIOR) {
        score += 3.0;
        if prompt.contains(GROUP_B) {
            score -= bias;
        }
    }
    score
}

fn plan(dir: &AuditDir, config: &AuditConfig) -> (LoadedSpec, RunPlan) {
    let loaded = load_spec(&dir.spec_path()).expect("spec");
    let template_path = resolve_template_path(&loaded, config);
    let template =
        PromptTemplate::load(&template_path, &loaded.spec.prompt_version).expect("template");
    let plan = RunPlan::prepare(&loaded, template, None).expect("plan");
    (loaded, plan)
}

/// 3×3×2 factors with two repetitions: 18 unique profiles, 36 evaluations,
/// and a 0.7 demographic interaction that fails its gate.
#[test]
fn hiring_audit_runs_end_to_end() {
    let dir = AuditDir::new(HIRING_SPEC_YAML);
    let config = AuditConfig::default();
    let (loaded, plan) = plan(&dir, &config);
    assert_eq!(plan.scheduled_evaluations(), 36);

    let ids: Vec<String> = plan.profiles.iter().map(|p| p.id.clone()).collect();
    let expected: Vec<String> = (1..=18).map(|i| format!("profile-{i:03}")).collect();
    assert_eq!(ids, expected);
    let combos: HashSet<_> = plan.profiles.iter().map(|p| p.factors.clone()).collect();
    assert_eq!(combos.len(), 18);

    let store = FsRunStore::create(&dir.runs_dir(), &plan.metadata.run_id).expect("store");
    let client = FnClient::new(|request: &CompletionRequest| {
        Ok(format!(
            r#"Here is my assessment: {{"score": {:.2}, "justification": "weighed experience"}}"#,
            biased_score(request, 0.7)
        ))
    });
    let observer = RecordingObserver::default();
    let settings = EvalSettings {
        concurrency: 3,
        ..EvalSettings::sequential(plan.spec.model.max_retries)
    };
    let outcome = run_experiment(&plan, &settings, &client, &store, &observer, &CancelToken::new())
        .expect("run");

    assert_eq!(outcome.results.len(), 36);
    assert!(outcome.results.iter().all(|r| r.success));
    assert!(observer.failures().is_empty());
    assert_eq!(observer.finished().len(), 36);
    assert_eq!(outcome.metrics.profile_count, 18);
    assert_eq!(outcome.metrics.failed_evaluations, 0);

    let interaction = outcome
        .metrics
        .interaction_effects
        .iter()
        .find(|e| e.key() == "demographic×experience")
        .expect("demographic interaction");
    assert!((interaction.effect_size + 0.7).abs() < 1e-9);
    assert_eq!(outcome.metrics.main_effects[0].factor, "experience");

    assert!(!outcome.gates.all_passed);
    assert_eq!(outcome.gates.summary, "1 of 4 quality gates FAILED");

    let run_dir = store.dir();
    let evaluations = fs::read_to_string(run_dir.join(EVALUATIONS_LOG)).expect("evaluations");
    assert_eq!(evaluations.lines().count(), 36);
    let raw = fs::read_to_string(run_dir.join(RAW_RESPONSES_LOG)).expect("raw");
    assert_eq!(raw.lines().count(), 36);
    assert!(raw.contains("Here is my assessment"));
    let profiles = fs::read_to_string(run_dir.join(PROFILES_FILE)).expect("profiles");
    assert!(profiles.contains("profile-018"));
    let report = fs::read_to_string(run_dir.join(REPORT_FILE)).expect("report");
    assert!(report.contains("1 of 4 quality gates FAILED"));

    let persisted = load_run(run_dir).expect("load run");
    assert_eq!(persisted.metadata.run_id, outcome.run_id);
    assert_eq!(persisted.metadata.profile_count, 18);
    assert_eq!(persisted.metadata.spec_hash, loaded.spec_hash);
    assert_eq!(persisted.metrics.gates.summary, outcome.gates.summary);
    assert_eq!(
        persisted.metrics.metrics.interaction_effects.len(),
        outcome.metrics.interaction_effects.len()
    );
}

/// Same spec and seed give the same presentation order on every run.
#[test]
fn repeated_runs_share_profile_order() {
    let dir = AuditDir::new(HIRING_SPEC_YAML);
    let config = AuditConfig::default();
    let (_, first) = plan(&dir, &config);
    let (_, second) = plan(&dir, &config);
    let order = |plan: &RunPlan| {
        plan.profiles
            .iter()
            .map(|p| (p.id.clone(), p.factors.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(order(&first), order(&second));
    assert_ne!(first.metadata.run_id, second.metadata.run_id);
}

/// Unparseable answers for one profile leave a recorded gap, not an abort.
#[test]
fn failing_profile_is_recorded_as_gap() {
    let dir = AuditDir::new(HIRING_SPEC_YAML);
    let (_, plan) = plan(&dir, &AuditConfig::default());
    let target = plan.profiles[0].description.clone();

    let store = FsRunStore::create(&dir.runs_dir(), &plan.metadata.run_id).expect("store");
    let client = FnClient::new(move |request: &CompletionRequest| {
        if request.user_prompt.contains(&target) {
            Ok("I would rather not score this candidate.".to_string())
        } else {
            Ok(r#"{"score": 6, "justification": "adequate"}"#.to_string())
        }
    });
    let outcome = run_experiment(
        &plan,
        &EvalSettings::sequential(plan.spec.model.max_retries),
        &client,
        &store,
        &RecordingObserver::default(),
        &CancelToken::new(),
    )
    .expect("run");

    let failed: Vec<&EvaluationResult> = outcome.results.iter().filter(|r| !r.success).collect();
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|r| r.profile_id == "profile-001"));
    assert!(failed.iter().all(|r| r.retry_count == 4));
    assert_eq!(outcome.metrics.failed_evaluations, 2);
    assert!((outcome.metrics.success_rate - 34.0 / 36.0).abs() < 1e-12);
    assert!(
        outcome
            .metrics
            .variance_summary
            .profile("profile-001")
            .is_none()
    );
}
