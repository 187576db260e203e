//! Diagnostic tracing for the engine and the `audit` CLI.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, written to stderr.
//!   Not persisted, not part of the audit record.
//!
//! - **Run artifacts (`io/run_store`)**: the audit record under
//!   `<runs_dir>/<run_id>/`. Always written, unaffected by `RUST_LOG`.
//!
//! Per-attempt evaluation telemetry goes through the injected
//! [`EvalObserver`](crate::observer::EvalObserver); the default observer
//! forwards to the subscriber installed here.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=factorial=debug audit run --spec demos/hiring.yaml
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    // A second init (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
