//! I/O helpers: files, model backends, subprocesses and run artifacts.

pub mod client;
pub mod config;
pub mod digest;
pub mod git;
pub mod process;
pub mod run_store;
pub mod spec_file;
pub mod template;
