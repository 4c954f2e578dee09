//! Attempt records under `runs/<run-id>/attempts/<n>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{AttemptRecord, ExecutionOutcome};

/// File name of the structured outcome inside an attempt directory.
pub const OUTCOME_NAME: &str = "outcome.json";

#[derive(Debug, Serialize)]
struct OutcomeDocument<'a> {
    run_id: &'a str,
    attempt: u32,
    duration_ms: u64,
    code_bytes: usize,
    outcome: &'a ExecutionOutcome,
}

/// Write `outcome.json` for `record` into `attempt_dir` and return its path.
///
/// The candidate text itself is written by the execution engine next to it.
pub fn write_attempt(attempt_dir: &Path, run_id: &str, record: &AttemptRecord) -> Result<PathBuf> {
    fs::create_dir_all(attempt_dir)
        .with_context(|| format!("create attempt dir {}", attempt_dir.display()))?;
    let doc = OutcomeDocument {
        run_id,
        attempt: record.attempt,
        duration_ms: record.duration_ms,
        code_bytes: record.code.len(),
        outcome: &record.outcome,
    };
    let path = attempt_dir.join(OUTCOME_NAME);
    let mut buf = serde_json::to_string_pretty(&doc).context("serialize attempt outcome")?;
    buf.push('\n');
    fs::write(&path, buf).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
