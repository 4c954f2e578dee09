//! Self-correcting pipeline synthesis agent.
//!
//! Profiles a data directory, has a generative model write a merge program,
//! executes it with bounded self-correction, and documents the result.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};

use pipewright::core::types::{AttemptRecord, ExecutionOutcome};
use pipewright::correction::LoopStop;
use pipewright::document::DocumentOutcome;
use pipewright::exit_codes;
use pipewright::io::config::{DEFAULT_CONFIG_FILE, PipewrightConfig, load_config, write_config};
use pipewright::io::generator::build_generator;
use pipewright::io::sandbox::PythonSandbox;
use pipewright::io::signatures::extract_signatures;
use pipewright::logging;
use pipewright::pipeline::{DatasetOutcome, PipelineOutcome, run_pipeline};

#[derive(Parser)]
#[command(
    name = "pipewright",
    version,
    about = "Synthesize, run and self-correct a data-merge pipeline"
)]
struct Cli {
    /// Configuration file (missing file means defaults).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the column/sample signature of every input file as JSON.
    Profile {
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Generate, execute and correct the pipeline, then document it.
    Run {
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Corrective rounds after the first execution.
        #[arg(long)]
        max_attempts: Option<u32>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Profile { data_dir } => cmd_profile(&cli.config, data_dir),
        Command::Run {
            data_dir,
            max_attempts,
        } => cmd_run(&cli.config, data_dir, max_attempts),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &PipewrightConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_profile(path: &Path, data_dir: Option<PathBuf>) -> Result<i32> {
    let mut config = load_config(path)?;
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    let signatures = extract_signatures(&config.data_dir)?;
    println!("{}", serde_json::to_string_pretty(&signatures)?);
    Ok(exit_codes::OK)
}

fn cmd_run(path: &Path, data_dir: Option<PathBuf>, max_attempts: Option<u32>) -> Result<i32> {
    let mut config = load_config(path)?;
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    if let Some(max) = max_attempts {
        config.max_attempts = max;
    }
    config.validate()?;

    let generator = build_generator(&config.model)?;
    let sandbox = PythonSandbox::new(&config.sandbox);
    let outcome = run_pipeline(&config, generator.as_ref(), &sandbox, print_attempt)?;
    Ok(report(&outcome))
}

fn print_attempt(record: &AttemptRecord) {
    match &record.outcome {
        ExecutionOutcome::Success => {
            println!("attempt {}: ok ({} ms)", record.attempt, record.duration_ms);
        }
        ExecutionOutcome::Failure(fault) => {
            println!("attempt {}: failed: {fault}", record.attempt);
        }
    }
}

fn report(outcome: &PipelineOutcome) -> i32 {
    println!(
        "run {} profiled {} file(s); records in {}",
        outcome.run_id,
        outcome.files_profiled,
        outcome.run_dir.display()
    );
    match &outcome.correction.stop {
        LoopStop::Succeeded { .. } => {
            match &outcome.dataset {
                Some(DatasetOutcome::Promoted { path }) => println!("dataset: {}", path.display()),
                Some(DatasetOutcome::Missing) => {
                    println!("dataset: not written by the final program")
                }
                Some(DatasetOutcome::Failed { reason }) => println!("dataset: failed: {reason}"),
                None => {}
            }
            match &outcome.document {
                Some(DocumentOutcome::Written { path }) => println!("report: {}", path.display()),
                Some(DocumentOutcome::Failed { reason }) => println!("report: failed: {reason}"),
                None => {}
            }
            exit_codes::OK
        }
        LoopStop::Exhausted { last_fault } => {
            println!(
                "gave up after {} execution(s); last error: {last_fault}",
                outcome.correction.executions()
            );
            exit_codes::EXHAUSTED
        }
    }
}
