//! Best-effort git lookup for run provenance.

use std::path::Path;
use std::process::Command;

use tracing::debug;

/// Full SHA of `HEAD` in `dir`, or `None` when git or the repository is
/// unavailable. Never fails the caller.
pub fn head_commit(dir: &Path) -> Option<String> {
    let output = match Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(dir)
        .output()
    {
        Ok(output) => output,
        Err(err) => {
            debug!(err = %err, "git unavailable, skipping commit lookup");
            return None;
        }
    };
    if !output.status.success() {
        debug!(
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "git rev-parse failed, skipping commit lookup"
        );
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!sha.is_empty()).then_some(sha)
}
