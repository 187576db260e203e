//! Stable exit codes for audit CLI commands.

/// Command succeeded; for `run`, every quality gate passed.
pub const OK: i32 = 0;
/// Invalid spec/config/template, a failed quality gate, or any other error.
pub const FAILURE: i32 = 1;
/// `audit diff` found at least one effect regression.
pub const REGRESSIONS: i32 = 2;
