//! CLI command implementations.
//!
//! Each command returns the process exit code; hard errors propagate as
//! `Err` and are mapped to [`exit_codes::FAILURE`] by `main`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use factorial::core::profiles::{expected_profile_count, generate_profiles};
use factorial::diff::generate_diff;
use factorial::evaluate::CancelToken;
use factorial::io::client::build_client;
use factorial::io::config::{AuditConfig, load_config, write_config};
use factorial::io::run_store::FsRunStore;
use factorial::io::spec_file::load_spec;
use factorial::io::template::PromptTemplate;
use factorial::observer::TracingObserver;
use factorial::run::{EvalSettings, RunPlan, resolve_template_path, run_experiment};

use crate::exit_codes;

/// Execute one audit run and print its report.
pub fn run_audit(
    config_path: &Path,
    spec_path: &Path,
    prompt: Option<&Path>,
    runs_dir: Option<&Path>,
) -> Result<i32> {
    let config = load_config(config_path)?;
    let loaded = load_spec(spec_path)?;
    let template_path = match prompt {
        Some(path) => path.to_path_buf(),
        None => resolve_template_path(&loaded, &config),
    };
    let template = PromptTemplate::load(&template_path, &loaded.spec.prompt_version)?;
    let plan = RunPlan::prepare(&loaded, template, Some(loaded.base_dir()))?;
    debug!(run_id = %plan.metadata.run_id, template = %template_path.display(), "run prepared");

    let client = build_client(&plan.spec.model, &config)?;
    let runs_dir = runs_dir.map_or_else(|| config.runs_dir.clone(), Path::to_path_buf);
    let store = FsRunStore::create(&runs_dir, &plan.metadata.run_id)?;
    let settings = EvalSettings::from_config(&config, &plan.spec.model);

    info!(run_id = %plan.metadata.run_id, evaluations = plan.scheduled_evaluations(), "starting run");
    // No signal handler: this token is never tripped and Ctrl-C exits directly.
    let outcome = run_experiment(
        &plan,
        &settings,
        client.as_ref(),
        &store,
        &TracingObserver,
        &CancelToken::new(),
    )
    .context("run audit")?;

    print!("{}", outcome.report);
    println!(
        "run: run_id={} dir={} failed={}/{} gates={}",
        outcome.run_id,
        store.dir().display(),
        outcome.metrics.failed_evaluations,
        outcome.metrics.total_evaluations,
        outcome.gates.summary
    );
    Ok(if outcome.gates.all_passed {
        exit_codes::OK
    } else {
        exit_codes::FAILURE
    })
}

/// Compare two run directories and print the regression report.
pub fn diff_runs(
    config_path: &Path,
    run_a: &Path,
    run_b: &Path,
    threshold: Option<f64>,
    out: Option<&Path>,
) -> Result<i32> {
    let threshold = match threshold {
        Some(value) => value,
        None => load_config(config_path)?.regression_threshold,
    };
    if !threshold.is_finite() || threshold < 0.0 {
        bail!("regression threshold must be a non-negative number, got {threshold}");
    }
    let report = generate_diff(run_a, run_b, threshold)?;
    if let Some(out) = out {
        fs::write(out, &report.markdown).with_context(|| format!("write {}", out.display()))?;
    }
    print!("{}", report.markdown);
    Ok(if report.has_regressions() {
        exit_codes::REGRESSIONS
    } else {
        exit_codes::OK
    })
}

/// Validate a spec file without running it.
pub fn validate_spec_file(spec_path: &Path) -> Result<i32> {
    let loaded = load_spec(spec_path)?;
    let spec = &loaded.spec;
    let profiles = expected_profile_count(spec);
    println!(
        "validate: ok spec={} factors={} profiles={} evaluations={}",
        spec_path.display(),
        spec.factors.len(),
        profiles,
        profiles * spec.repetitions as usize
    );
    Ok(exit_codes::OK)
}

/// Print the generated profiles (presentation order) as JSON.
pub fn print_profiles(spec_path: &Path) -> Result<i32> {
    let loaded = load_spec(spec_path)?;
    let profiles = generate_profiles(&loaded.spec);
    let json = serde_json::to_string_pretty(&profiles).context("serialize profiles")?;
    println!("{json}");
    Ok(exit_codes::OK)
}

/// Write a default `audit.toml` unless one exists.
pub fn init_config(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &AuditConfig::default())?;
    println!("init: wrote {}", config_path.display());
    Ok(exit_codes::OK)
}
