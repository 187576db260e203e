//! Diff engine: compare two persisted runs and report effect regressions.

use std::path::Path;

use anyhow::Result;
use tracing::{info, instrument};

use crate::core::diff::{EffectDiff, diff_effects};
use crate::io::run_store::{PersistedRun, load_run};
use crate::report::render_diff_report;

#[derive(Debug, Clone)]
pub struct DiffReport {
    pub run_a: PersistedRun,
    pub run_b: PersistedRun,
    pub diff: EffectDiff,
    pub markdown: String,
}

impl DiffReport {
    pub fn has_regressions(&self) -> bool {
        self.diff.has_regressions()
    }
}

/// Load runs A (baseline) and B and compare their effects.
///
/// A missing or corrupt run fails with [`crate::error::AuditError::DiffLoad`].
#[instrument(skip_all, fields(run_a = %run_dir_a.display(), run_b = %run_dir_b.display(), regression_threshold = regression_threshold))]
pub fn generate_diff(run_dir_a: &Path, run_dir_b: &Path, regression_threshold: f64) -> Result<DiffReport> {
    let run_a = load_run(run_dir_a)?;
    let run_b = load_run(run_dir_b)?;
    let diff = diff_effects(
        &run_a.metrics.metrics,
        &run_b.metrics.metrics,
        regression_threshold,
    );
    let markdown = render_diff_report(&run_a.metadata, &run_b.metadata, &diff)?;
    info!(
        regressions = diff.regressions().count(),
        "diff generated"
    );
    Ok(DiffReport {
        run_a,
        run_b,
        diff,
        markdown,
    })
}
