//! Markdown reports rendered from embedded minijinja templates.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::diff::{EffectDelta, EffectDiff};
use crate::core::effects::Metrics;
use crate::core::gates::GateEvaluation;
use crate::io::run_store::RunMetadata;

const RUN_REPORT_TEMPLATE: &str = include_str!("../templates/run_report.md");
const DIFF_REPORT_TEMPLATE: &str = include_str!("../templates/diff_report.md");

#[derive(Debug, Serialize)]
struct EffectRow {
    name: String,
    effect: String,
    detail: String,
}

#[derive(Debug, Serialize)]
struct DeltaRow {
    name: String,
    old: String,
    new: String,
    delta: String,
    flag: &'static str,
}

impl From<&EffectDelta> for DeltaRow {
    fn from(delta: &EffectDelta) -> Self {
        Self {
            name: delta.name.clone(),
            old: format!("{:.3}", delta.old),
            new: format!("{:.3}", delta.new),
            delta: format!("{:+.3}", delta.delta),
            flag: if delta.regression { "**yes**" } else { "no" },
        }
    }
}

fn engine() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template("run_report.md", RUN_REPORT_TEMPLATE)
        .context("load run report template")?;
    env.add_template("diff_report.md", DIFF_REPORT_TEMPLATE)
        .context("load diff report template")?;
    Ok(env)
}

/// `name: old → new (Δ ±delta)`.
pub fn delta_line(delta: &EffectDelta) -> String {
    format!(
        "{}: {:.3} → {:.3} (Δ {:+.3})",
        delta.name, delta.old, delta.new, delta.delta
    )
}

/// Report for one finished run, gate summary first.
pub fn render_run_report(
    metadata: &RunMetadata,
    metrics: &Metrics,
    gates: &GateEvaluation,
) -> Result<String> {
    let main_effects: Vec<EffectRow> = metrics
        .main_effects
        .iter()
        .map(|effect| EffectRow {
            name: effect.factor.clone(),
            effect: format!("{:.3}", effect.effect_size),
            detail: metrics
                .level_means
                .get(&effect.factor)
                .map(|levels| {
                    levels
                        .iter()
                        .map(|level| match level.mean {
                            Some(mean) => format!("{}={mean:.3}", level.level),
                            None => format!("{}=n/a", level.level),
                        })
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default(),
        })
        .collect();
    let interactions: Vec<EffectRow> = metrics
        .interaction_effects
        .iter()
        .map(|effect| EffectRow {
            name: effect.key(),
            effect: format!("{:+.3}", effect.effect_size),
            detail: String::new(),
        })
        .collect();
    let gate_lines: Vec<&str> = gates.results.iter().map(|g| g.message.as_str()).collect();
    let variance = &metrics.variance_summary;
    let unstable = if variance.unstable_profiles.is_empty() {
        "none".to_string()
    } else {
        variance.unstable_profiles.join(", ")
    };

    let env = engine()?;
    let template = env.get_template("run_report.md")?;
    let rendered = template.render(context! {
        name => metadata.name.as_deref(),
        run_id => &metadata.run_id,
        timestamp => &metadata.timestamp,
        provider => &metadata.model.provider,
        model => &metadata.model.name,
        temperature => metadata.model.temperature,
        prompt_version => &metadata.prompt_version,
        prompt_hash => short_hash(&metadata.prompt_hash),
        seed => metadata.seed,
        repetitions => metadata.repetitions,
        profile_count => metadata.profile_count,
        git_commit => metadata.git_commit.as_deref().unwrap_or("unknown"),
        gate_summary => &gates.summary,
        gates => gate_lines,
        total => metrics.total_evaluations,
        failed => metrics.failed_evaluations,
        success_rate => format!("{:.1}%", metrics.success_rate * 100.0),
        main_effects => main_effects,
        interactions => interactions,
        mean_std_dev => format!("{:.3}", variance.overall_mean_variance),
        max_std_dev => format!("{:.3}", variance.max_variance),
        unstable_count => variance.unstable_count,
        unstable => unstable,
    })?;
    Ok(rendered)
}

/// Regression report comparing run A (baseline) with run B.
pub fn render_diff_report(a: &RunMetadata, b: &RunMetadata, diff: &EffectDiff) -> Result<String> {
    let regressions: Vec<String> = diff.regressions().map(delta_line).collect();
    let summary = if regressions.is_empty() {
        format!(
            "No regressions detected (threshold {:.3})",
            diff.regression_threshold
        )
    } else {
        format!(
            "{} regression(s) detected (threshold {:.3})",
            regressions.len(),
            diff.regression_threshold
        )
    };
    let main_effects: Vec<DeltaRow> = diff.main_effects.iter().map(DeltaRow::from).collect();
    let interactions: Vec<DeltaRow> = diff
        .interaction_effects
        .iter()
        .map(DeltaRow::from)
        .collect();

    let env = engine()?;
    let template = env.get_template("diff_report.md")?;
    let rendered = template.render(context! {
        run_a => &a.run_id,
        run_b => &b.run_id,
        prompt_a => &a.prompt_version,
        prompt_b => &b.prompt_version,
        threshold => format!("{:.3}", diff.regression_threshold),
        summary => summary,
        regressions => regressions,
        main_effects => main_effects,
        interactions => interactions,
    })?;
    Ok(rendered)
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
