//! Shared deterministic types for the generation-execution loop.
//!
//! These types define stable contracts between the loop and its adapters. They
//! should not depend on external state or I/O.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Schema and sample summary of one input file.
///
/// Each `sample` row is aligned with `columns`; cells are rendered as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub columns: Vec<String>,
    pub sample: Vec<Vec<String>>,
}

/// Signatures keyed by filename, ordered lexicographically.
pub type SignatureMap = BTreeMap<String, Signature>;

/// Classification of an execution fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultKind {
    /// The candidate contained no program text.
    EmptyProgram,
    /// The program raised an exception; `name` is the exception type.
    Raised { name: String },
    /// The program exited non-zero without a recognizable traceback.
    Exit { code: Option<i32> },
    /// The program exceeded its wall-clock budget and was killed.
    Timeout,
    /// The interpreter (or its workspace) could not be prepared or started.
    Spawn,
}

/// A structured execution fault.
///
/// `Display` renders the cause text that is fed back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    #[serde(flatten)]
    pub kind: FaultKind,
    pub message: String,
    /// 1-indexed line in the candidate program, when the substrate reports one.
    pub line: Option<u32>,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn empty_program() -> Self {
        Self::new(
            FaultKind::EmptyProgram,
            "no program text was produced (empty or missing model response)",
        )
    }

    pub fn with_line(mut self, line: Option<u32>) -> Self {
        self.line = line;
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FaultKind::Raised { name } if self.message.is_empty() => f.write_str(name),
            FaultKind::Raised { name } => write!(f, "{name}: {}", self.message),
            FaultKind::Exit { code: Some(code) } => {
                write!(f, "exited with status {code}: {}", self.message)
            }
            FaultKind::Exit { code: None } => {
                write!(f, "terminated by signal: {}", self.message)
            }
            FaultKind::Timeout | FaultKind::Spawn | FaultKind::EmptyProgram => {
                f.write_str(&self.message)
            }
        }
    }
}

/// Result of executing one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Success,
    Failure(Fault),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }

    pub fn fault(&self) -> Option<&Fault> {
        match self {
            ExecutionOutcome::Success => None,
            ExecutionOutcome::Failure(fault) => Some(fault),
        }
    }
}

/// One executed round of the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    /// 1-indexed execution number within the run.
    pub attempt: u32,
    pub code: String,
    pub outcome: ExecutionOutcome,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_fault_renders_exception_name_and_message() {
        let fault = Fault::new(
            FaultKind::Raised {
                name: "KeyError".to_string(),
            },
            "'CCN'",
        )
        .with_line(Some(7));
        assert_eq!(fault.to_string(), "KeyError: 'CCN'");
    }

    #[test]
    fn exit_fault_distinguishes_signal_from_status() {
        let by_status = Fault::new(FaultKind::Exit { code: Some(2) }, "boom");
        let by_signal = Fault::new(FaultKind::Exit { code: None }, "boom");
        assert_eq!(by_status.to_string(), "exited with status 2: boom");
        assert_eq!(by_signal.to_string(), "terminated by signal: boom");
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(ExecutionOutcome::Failure(Fault::new(
            FaultKind::Timeout,
            "timed out",
        )))
        .expect("serialize");
        assert_eq!(json["status"], "failure");
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["message"], "timed out");
    }
}
