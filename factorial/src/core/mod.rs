//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests and audits.

pub mod diff;
pub mod effects;
pub mod gates;
pub mod output;
pub mod profiles;
pub mod prng;
pub mod spec_rules;
pub mod types;
pub mod variance;
