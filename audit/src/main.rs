//! `audit`: factorial bias audits for LLM scoring prompts.
//!
//! Generates every combination of the spec's factor levels, scores each
//! profile repeatedly through the configured model, and gates the run on
//! interaction effects and score stability. `audit diff` compares two runs.

mod cli;
mod exit_codes;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use factorial::io::config::DEFAULT_CONFIG_FILE;
use factorial::logging;

#[derive(Parser)]
#[command(name = "audit", version, about = "Factorial bias audits for LLM scoring")]
struct Cli {
    /// Tool configuration (missing file means defaults).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an experiment; exits non-zero when a quality gate fails.
    Run {
        /// Experiment spec (YAML or JSON).
        #[arg(long)]
        spec: PathBuf,
        /// Prompt template; defaults to `<prompts_dir>/<prompt_version>.txt`.
        #[arg(long)]
        prompt: Option<PathBuf>,
        /// Overrides `runs_dir` from the config.
        #[arg(long)]
        runs_dir: Option<PathBuf>,
    },
    /// Compare two run directories (A is the baseline).
    Diff {
        run_a: PathBuf,
        run_b: PathBuf,
        /// Minimum `|Δ|` that counts as a regression.
        #[arg(long)]
        threshold: Option<f64>,
        /// Also write the markdown report here.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Validate a spec and print the planned profile count.
    Validate {
        #[arg(long)]
        spec: PathBuf,
    },
    /// Print generated profiles in presentation order.
    Profiles {
        #[arg(long)]
        spec: PathBuf,
    },
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILURE);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            spec,
            prompt,
            runs_dir,
        } => cli::run_audit(&cli.config, &spec, prompt.as_deref(), runs_dir.as_deref()),
        Command::Diff {
            run_a,
            run_b,
            threshold,
            out,
        } => cli::diff_runs(&cli.config, &run_a, &run_b, threshold, out.as_deref()),
        Command::Validate { spec } => cli::validate_spec_file(&spec),
        Command::Profiles { spec } => cli::print_profiles(&spec),
        Command::Init { force } => cli::init_config(&cli.config, force),
    }
}
