//! Per-run execution context and attempt workspaces.
//!
//! Layout under the state directory:
//!
//! ```text
//! runs/<run-id>/
//!   attempts/<n>/candidate.py   program text executed in round n
//!   attempts/<n>/exec.log       captured interpreter output
//!   attempts/<n>/outcome.json   structured outcome
//!   attempts/<n>/workspace/     working directory (isolated mode)
//!   workspace/                  working directory shared by all rounds (shared mode)
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

/// Settings that shape an [`ExecutionContext`].
#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub state_dir: PathBuf,
    /// Absolute path of the input data directory.
    pub data_dir: PathBuf,
    /// File name the program writes its unified dataset to.
    pub dataset_file: String,
    /// Modules pre-bound in the program namespace (alias -> module).
    pub bindings: BTreeMap<String, String>,
    pub isolate_attempts: bool,
}

/// Mutable binding environment handed to the execution engine.
///
/// Owned by the correction loop and reused for every round of a run. With
/// isolation enabled each round receives a fresh working directory; otherwise
/// all rounds share one, so files left by a failed round stay visible.
#[derive(Debug)]
pub struct ExecutionContext {
    run_id: String,
    run_dir: PathBuf,
    settings: ContextSettings,
    attempt: u32,
    workspace: Option<PathBuf>,
}

impl ExecutionContext {
    /// Create the run directory for a new run.
    pub fn create(settings: ContextSettings) -> Result<Self> {
        let run_id = new_run_id();
        Self::create_with_id(settings, run_id)
    }

    pub fn create_with_id(settings: ContextSettings, run_id: String) -> Result<Self> {
        let run_dir = settings.state_dir.join("runs").join(&run_id);
        if run_dir.exists() {
            return Err(anyhow!("run directory {} already exists", run_dir.display()));
        }
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("create run dir {}", run_dir.display()))?;
        // Programs run with their workspace as cwd, so every path handed out must be absolute.
        let run_dir = fs::canonicalize(&run_dir)
            .with_context(|| format!("resolve run dir {}", run_dir.display()))?;
        info!(run_id, run_dir = %run_dir.display(), isolate = settings.isolate_attempts, "created run");
        Ok(Self {
            run_id,
            run_dir,
            settings,
            attempt: 0,
            workspace: None,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.settings.data_dir
    }

    pub fn dataset_file(&self) -> &str {
        &self.settings.dataset_file
    }

    pub fn bindings(&self) -> &BTreeMap<String, String> {
        &self.settings.bindings
    }

    /// Number of rounds started so far (1-indexed once a round begins).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Directory holding the logs of round `attempt`.
    pub fn attempt_dir(&self, attempt: u32) -> PathBuf {
        self.run_dir.join("attempts").join(attempt.to_string())
    }

    /// Working directory of the current round, if one has begun.
    pub fn workspace(&self) -> Option<&Path> {
        self.workspace.as_deref()
    }

    /// Start a new round and return its working directory.
    pub fn begin_attempt(&mut self) -> Result<PathBuf> {
        self.attempt += 1;
        let attempt_dir = self.attempt_dir(self.attempt);
        fs::create_dir_all(&attempt_dir)
            .with_context(|| format!("create attempt dir {}", attempt_dir.display()))?;

        let workspace = if self.settings.isolate_attempts {
            attempt_dir.join("workspace")
        } else {
            self.run_dir.join("workspace")
        };
        fs::create_dir_all(&workspace)
            .with_context(|| format!("create workspace {}", workspace.display()))?;
        debug!(attempt = self.attempt, workspace = %workspace.display(), "attempt workspace ready");
        self.workspace = Some(workspace.clone());
        Ok(workspace)
    }

    /// Path of the dataset inside the current workspace.
    pub fn workspace_dataset(&self) -> Option<PathBuf> {
        self.workspace
            .as_ref()
            .map(|ws| ws.join(&self.settings.dataset_file))
    }

    /// Copy the dataset written by the current round to `dest`.
    ///
    /// Returns `false` when the round did not leave a dataset in its workspace.
    pub fn promote_dataset(&self, dest: &Path) -> Result<bool> {
        let Some(source) = self.workspace_dataset() else {
            return Ok(false);
        };
        if !source.is_file() {
            return Ok(false);
        }
        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }
        fs::copy(&source, dest).with_context(|| {
            format!("copy dataset {} to {}", source.display(), dest.display())
        })?;
        info!(dest = %dest.display(), "dataset promoted");
        Ok(true)
    }
}

fn new_run_id() -> String {
    static SEQ: AtomicU32 = AtomicU32::new(0);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("run-{millis}-{}-{seq}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(root: &Path, isolate: bool) -> ContextSettings {
        ContextSettings {
            state_dir: root.join(".pipewright"),
            data_dir: root.join("data"),
            dataset_file: "merged.csv".to_string(),
            bindings: BTreeMap::new(),
            isolate_attempts: isolate,
        }
    }

    #[test]
    fn isolated_attempts_get_fresh_workspaces() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx =
            ExecutionContext::create_with_id(settings(temp.path(), true), "run-1".to_string())
                .expect("create");

        let first = ctx.begin_attempt().expect("attempt 1");
        fs::write(first.join("partial.csv"), "x").expect("write partial");
        let second = ctx.begin_attempt().expect("attempt 2");

        assert_ne!(first, second);
        assert!(!second.join("partial.csv").exists());
        assert_eq!(ctx.attempt(), 2);
        assert!(second.ends_with("runs/run-1/attempts/2/workspace"));
    }

    #[test]
    fn shared_workspace_keeps_side_effects() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx =
            ExecutionContext::create_with_id(settings(temp.path(), false), "run-1".to_string())
                .expect("create");

        let first = ctx.begin_attempt().expect("attempt 1");
        fs::write(first.join("partial.csv"), "x").expect("write partial");
        let second = ctx.begin_attempt().expect("attempt 2");

        assert_eq!(first, second);
        assert!(second.join("partial.csv").exists());
        assert!(ctx.attempt_dir(2).is_dir());
    }

    #[test]
    fn promote_copies_dataset_when_present() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx =
            ExecutionContext::create_with_id(settings(temp.path(), true), "run-1".to_string())
                .expect("create");
        let dest = temp.path().join("out").join("merged.csv");

        assert!(!ctx.promote_dataset(&dest).expect("no workspace yet"));

        let ws = ctx.begin_attempt().expect("attempt");
        assert!(!ctx.promote_dataset(&dest).expect("nothing written"));

        fs::write(ws.join("merged.csv"), "CCN\n041300\n").expect("write dataset");
        assert!(ctx.promote_dataset(&dest).expect("promote"));
        assert_eq!(fs::read_to_string(&dest).expect("read"), "CCN\n041300\n");
    }

    #[test]
    fn generated_run_ids_are_unique() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = ExecutionContext::create(settings(temp.path(), true)).expect("first");
        let second = ExecutionContext::create(settings(temp.path(), true)).expect("second");
        assert_ne!(first.run_id(), second.run_id());
        assert!(first.run_id().starts_with("run-"));
    }

    #[test]
    fn refuses_to_reuse_a_run_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        ExecutionContext::create_with_id(settings(temp.path(), true), "run-1".to_string())
            .expect("create");
        let err =
            ExecutionContext::create_with_id(settings(temp.path(), true), "run-1".to_string())
                .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
