//! Test-only doubles for the generator and execution engine, plus scratch workspaces.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{ExecutionOutcome, Fault, FaultKind, Signature, SignatureMap};
use crate::io::generator::Generator;
use crate::io::sandbox::Sandbox;
use crate::io::workspace::{ContextSettings, ExecutionContext};

/// Build a `Raised` fault the way the execution engine reports exceptions.
pub fn raised(name: &str, message: &str) -> Fault {
    Fault::new(
        FaultKind::Raised {
            name: name.to_string(),
        },
        message,
    )
}

/// A two-file signature map shaped like the hospital cost-report inputs.
pub fn sample_signatures() -> SignatureMap {
    let mut map = SignatureMap::new();
    map.insert(
        "cah_all_years.csv".to_string(),
        Signature {
            columns: vec!["CCN".to_string(), "data_year".to_string(), "state".to_string()],
            sample: vec![
                vec!["41300".to_string(), "2019".to_string(), "AR".to_string()],
                vec!["451301".to_string(), "2020".to_string(), "TX".to_string()],
            ],
        },
    );
    map.insert(
        "cah_hospital_trends.xlsx".to_string(),
        Signature {
            columns: vec!["Provider CCN".to_string(), "trend".to_string()],
            sample: vec![vec!["41300".to_string(), "up".to_string()]],
        },
    );
    map
}

/// Generator that replays scripted responses and records every prompt.
///
/// `Err(message)` entries simulate client failures.
pub struct ScriptedGenerator {
    responses: RefCell<VecDeque<Result<Option<String>, String>>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<Result<Option<String>, String>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Every call answers with the next text.
    pub fn texts<I, T>(texts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::new(texts.into_iter().map(|t| Ok(Some(t.into()))).collect())
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }

    pub fn assert_drained(&self) {
        let remaining = self.responses.borrow().len();
        assert_eq!(remaining, 0, "{remaining} scripted responses were never requested");
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, prompt: &str) -> anyhow::Result<Option<String>> {
        self.prompts.borrow_mut().push(prompt.to_string());
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted generator has no response left")),
        }
    }
}

/// Execution engine that replays scripted outcomes and records executed code.
///
/// Like the real engine, empty candidates fail with `EmptyProgram` before
/// anything runs; they do not consume a scripted outcome.
pub struct ScriptedSandbox {
    outcomes: RefCell<VecDeque<ExecutionOutcome>>,
    executed: RefCell<Vec<String>>,
    dataset: Option<String>,
}

impl ScriptedSandbox {
    pub fn new(outcomes: impl IntoIterator<Item = ExecutionOutcome>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into_iter().collect()),
            executed: RefCell::new(Vec::new()),
            dataset: None,
        }
    }

    /// Write `contents` as the dataset into the workspace on every success.
    pub fn writing_dataset(mut self, contents: &str) -> Self {
        self.dataset = Some(contents.to_string());
        self
    }

    /// Candidates handed to `execute`, including empty ones.
    pub fn executed(&self) -> Vec<String> {
        self.executed.borrow().clone()
    }

    pub fn assert_drained(&self) {
        let remaining = self.outcomes.borrow().len();
        assert_eq!(remaining, 0, "{remaining} scripted outcomes were never used");
    }
}

impl Sandbox for ScriptedSandbox {
    fn execute(&self, code: &str, ctx: &mut ExecutionContext) -> ExecutionOutcome {
        self.executed.borrow_mut().push(code.to_string());
        if code.trim().is_empty() {
            return ExecutionOutcome::Failure(Fault::empty_program());
        }
        let outcome = self.outcomes.borrow_mut().pop_front().unwrap_or_else(|| {
            ExecutionOutcome::Failure(Fault::new(
                FaultKind::Spawn,
                "scripted sandbox has no outcome left",
            ))
        });
        if outcome.is_success()
            && let (Some(contents), Some(path)) = (&self.dataset, ctx.workspace_dataset())
        {
            fs::write(&path, contents).expect("write scripted dataset");
        }
        outcome
    }
}

/// Scratch directory with a `data/` folder and a state directory.
pub struct TestWorkspace {
    temp: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        fs::create_dir_all(temp.path().join("data")).context("create data dir")?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root().join("data")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root().join(".pipewright")
    }

    pub fn write_data(&self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.data_dir().join(name);
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    /// A fresh run context writing `merged.csv`, with no module bindings.
    pub fn context(&self, isolate_attempts: bool) -> Result<ExecutionContext> {
        ExecutionContext::create(ContextSettings {
            state_dir: self.state_dir(),
            data_dir: self.data_dir(),
            dataset_file: "merged.csv".to_string(),
            bindings: BTreeMap::new(),
            isolate_attempts,
        })
    }
}
