//! Deterministic factorial experiment engine for auditing bias in LLM scoring.
//!
//! A run expands an [`core::types::ExperimentSpec`] into a full-factorial set of
//! synthetic profiles, scores every profile several times through a model,
//! and turns the scores into variance statistics, main/interaction effects and
//! pass/fail quality gates. Two persisted runs can later be diffed to catch
//! bias regressions after a prompt change. The crate keeps the same split
//! throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (profile generation, output
//!   validation, statistics, gates, effect diffs). No I/O.
//! - **[`io`]**: Side-effecting operations (spec/template/config files, model
//!   backends, run artifacts, git lookup).
//!
//! Orchestration modules ([`evaluate`], [`run`], [`diff`], [`report`]) wire
//! core logic to I/O and are what the `audit` CLI calls.

pub mod core;
pub mod diff;
pub mod error;
pub mod evaluate;
pub mod io;
pub mod logging;
pub mod observer;
pub mod report;
pub mod run;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
