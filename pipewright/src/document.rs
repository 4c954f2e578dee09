//! Lineage report generation for a successful pipeline.

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::io::config::write_atomic;
use crate::io::generator::Generator;
use crate::io::prompt::PromptBuilder;

/// Result of the documentation request. Never affects the produced dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    Written { path: PathBuf },
    Failed { reason: String },
}

/// Ask the model to describe `final_code` and write the report to `report_path`.
#[instrument(skip_all, fields(report = %report_path.display()))]
pub fn document<G: Generator + ?Sized>(
    generator: &G,
    prompts: &PromptBuilder,
    final_code: &str,
    report_path: &Path,
) -> DocumentOutcome {
    let prompt = prompts.documentation(final_code);
    let text = match generator.generate(&prompt) {
        Ok(Some(text)) if !text.trim().is_empty() => text,
        Ok(_) => return failed("model returned no report text".to_string()),
        Err(err) => return failed(format!("report request failed: {err:#}")),
    };

    let mut report = text.trim().to_string();
    report.push('\n');
    if let Err(err) = write_atomic(report_path, &report) {
        return failed(format!("{err:#}"));
    }
    info!(bytes = report.len(), "lineage report written");
    DocumentOutcome::Written {
        path: report_path.to_path_buf(),
    }
}

fn failed(reason: String) -> DocumentOutcome {
    warn!(reason = %reason, "documentation failed");
    DocumentOutcome::Failed { reason }
}
