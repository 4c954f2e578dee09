//! End-to-end run: profile inputs, synthesize and correct the program, document it.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{error, info, instrument, warn};

use crate::core::budget::AttemptBudget;
use crate::core::types::AttemptRecord;
use crate::correction::{LoopOutcome, LoopStop, run_correction_loop};
use crate::document::{DocumentOutcome, document};
use crate::io::config::PipewrightConfig;
use crate::io::generator::Generator;
use crate::io::prompt::PromptBuilder;
use crate::io::sandbox::Sandbox;
use crate::io::signatures::extract_signatures;
use crate::io::workspace::{ContextSettings, ExecutionContext};

/// What happened to the final program's dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetOutcome {
    Promoted { path: PathBuf },
    /// The program succeeded without writing the declared output file.
    Missing,
    /// The file was written but could not be copied to its destination.
    Failed { reason: String },
}

/// Summary of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub run_id: String,
    pub run_dir: PathBuf,
    /// Input files that were profiled successfully.
    pub files_profiled: usize,
    pub correction: LoopOutcome,
    /// `None` unless the loop succeeded.
    pub dataset: Option<DatasetOutcome>,
    /// `None` unless the loop succeeded.
    pub document: Option<DocumentOutcome>,
}

impl PipelineOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.correction.stop, LoopStop::Succeeded { .. })
    }
}

/// Run the whole agent once with `config`.
///
/// Errors are reserved for configuration and filesystem problems outside the
/// loop (missing data directory, unwritable state directory). Exhaustion and a
/// failed dataset promotion are reported through [`PipelineOutcome`].
#[instrument(skip_all, fields(data_dir = %config.data_dir.display()))]
pub fn run_pipeline<G, S, F>(
    config: &PipewrightConfig,
    generator: &G,
    sandbox: &S,
    on_attempt: F,
) -> Result<PipelineOutcome>
where
    G: Generator + ?Sized,
    S: Sandbox + ?Sized,
    F: FnMut(&AttemptRecord),
{
    let data_dir = fs::canonicalize(&config.data_dir)
        .with_context(|| format!("resolve data directory {}", config.data_dir.display()))?;
    let signatures = extract_signatures(&data_dir)?;
    if signatures.is_empty() {
        warn!("no readable input files; the model will have to discover them at runtime");
    }

    let dataset_file = config.output.dataset_file_name()?;
    let mut ctx = ExecutionContext::create(ContextSettings {
        state_dir: config.state_dir.clone(),
        data_dir: data_dir.clone(),
        dataset_file: dataset_file.clone(),
        bindings: config.sandbox.bindings.clone(),
        isolate_attempts: config.isolate_attempts,
    })?;
    let prompts =
        PromptBuilder::new(&data_dir, &dataset_file).with_bindings(config.sandbox.bindings.clone());

    let correction = run_correction_loop(
        generator,
        sandbox,
        &prompts,
        &mut ctx,
        AttemptBudget::new(config.max_attempts),
        &prompts.generation(&signatures),
        on_attempt,
    );

    let mut dataset = None;
    let mut documentation = None;
    if let LoopStop::Succeeded { code } = &correction.stop {
        dataset = Some(match ctx.promote_dataset(&config.output.dataset) {
            Ok(true) => DatasetOutcome::Promoted {
                path: config.output.dataset.clone(),
            },
            Ok(false) => {
                warn!(file = %dataset_file, "program succeeded without writing the dataset");
                DatasetOutcome::Missing
            }
            Err(err) => {
                let reason = format!("{err:#}");
                error!(%reason, "dataset promotion failed");
                DatasetOutcome::Failed { reason }
            }
        });
        documentation = Some(document(generator, &prompts, code, &config.output.report));
    }

    info!(
        run_id = ctx.run_id(),
        executions = correction.executions(),
        dataset_promoted = matches!(dataset, Some(DatasetOutcome::Promoted { .. })),
        "pipeline finished"
    );
    Ok(PipelineOutcome {
        run_id: ctx.run_id().to_string(),
        run_dir: ctx.run_dir().to_path_buf(),
        files_profiled: signatures.len(),
        correction,
        dataset,
        document: documentation,
    })
}
