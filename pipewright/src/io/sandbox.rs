//! Execution engine for candidate programs.
//!
//! The [`Sandbox`] trait is the boundary between the correction loop and the
//! execution substrate. Implementations must never return an error: every
//! fault raised while preparing or running a candidate is reported as
//! [`ExecutionOutcome::Failure`]. Tests use scripted sandboxes that return
//! predetermined outcomes without spawning processes.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::traceback::parse_traceback;
use crate::core::types::{ExecutionOutcome, Fault, FaultKind};
use crate::io::config::SandboxConfig;
use crate::io::process::{CommandOutput, run_command_with_timeout};
use crate::io::workspace::ExecutionContext;

/// File name of the candidate program inside its attempt directory.
pub const SCRIPT_NAME: &str = "candidate.py";
/// File name of the captured interpreter output inside its attempt directory.
pub const EXEC_LOG_NAME: &str = "exec.log";

/// Environment variable carrying the absolute input directory.
pub const DATA_DIR_ENV: &str = "PIPEWRIGHT_DATA_DIR";
/// Environment variable carrying the dataset file name the program must write.
pub const OUTPUT_ENV: &str = "PIPEWRIGHT_OUTPUT";

/// Lines of interpreter output quoted when no traceback could be parsed.
const TAIL_LINES: usize = 20;

/// Abstraction over execution substrates.
pub trait Sandbox {
    /// Run `code` in the current round of `ctx`.
    fn execute(&self, code: &str, ctx: &mut ExecutionContext) -> ExecutionOutcome;
}

/// Runs candidates as a child interpreter process.
///
/// Each candidate is written to `candidate.py` in its attempt directory and
/// executed with the attempt workspace as working directory, a wall-clock
/// limit, and bounded output capture.
#[derive(Debug, Clone)]
pub struct PythonSandbox {
    interpreter: Vec<String>,
    bootstrap: bool,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl PythonSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            bootstrap: config.bootstrap,
            timeout: Duration::from_secs(config.execution_timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, script: &Path, ctx: &ExecutionContext, workspace: &Path) -> Command {
        let mut cmd = Command::new(&self.interpreter[0]);
        cmd.args(&self.interpreter[1..]);
        if self.bootstrap {
            cmd.arg("-c").arg(bootstrap_source(ctx.bindings()));
        }
        cmd.arg(script)
            .current_dir(workspace)
            .env(DATA_DIR_ENV, ctx.data_dir())
            .env(OUTPUT_ENV, ctx.dataset_file())
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONUNBUFFERED", "1");
        cmd
    }

    fn classify(&self, output: &CommandOutput) -> ExecutionOutcome {
        if output.timed_out {
            return ExecutionOutcome::Failure(Fault::new(
                FaultKind::Timeout,
                format!(
                    "execution exceeded {}s and was killed",
                    self.timeout.as_secs_f64()
                ),
            ));
        }
        if output.status.success() {
            return ExecutionOutcome::Success;
        }
        let stderr = output.stderr_text();
        if let Some(fault) = parse_traceback(&stderr, SCRIPT_NAME) {
            return ExecutionOutcome::Failure(fault);
        }
        let detail = if stderr.trim().is_empty() {
            output.stdout_text()
        } else {
            stderr
        };
        let detail = tail(&detail, TAIL_LINES);
        ExecutionOutcome::Failure(Fault::new(
            FaultKind::Exit {
                code: output.status.code(),
            },
            if detail.is_empty() {
                "no output".to_string()
            } else {
                detail
            },
        ))
    }
}

impl Sandbox for PythonSandbox {
    #[instrument(skip_all, fields(attempt = ctx.attempt(), code_bytes = code.len()))]
    fn execute(&self, code: &str, ctx: &mut ExecutionContext) -> ExecutionOutcome {
        if code.trim().is_empty() {
            warn!("empty candidate, not executing");
            return ExecutionOutcome::Failure(Fault::empty_program());
        }

        let Some(workspace) = ctx.workspace().map(Path::to_path_buf) else {
            return ExecutionOutcome::Failure(Fault::new(
                FaultKind::Spawn,
                "no attempt workspace has been prepared",
            ));
        };
        let attempt_dir = ctx.attempt_dir(ctx.attempt());
        let script = attempt_dir.join(SCRIPT_NAME);
        let mut source = code.to_string();
        source.push('\n');
        if let Err(err) = fs::create_dir_all(&attempt_dir).and_then(|()| fs::write(&script, source))
        {
            return ExecutionOutcome::Failure(Fault::new(
                FaultKind::Spawn,
                format!("write {}: {err}", script.display()),
            ));
        }

        info!(script = %script.display(), workspace = %workspace.display(), "executing candidate");
        let cmd = self.command(&script, ctx, &workspace);
        let output = match run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                return ExecutionOutcome::Failure(Fault::new(
                    FaultKind::Spawn,
                    format!("{err:#}"),
                ));
            }
        };

        let log_path = attempt_dir.join(EXEC_LOG_NAME);
        if let Err(err) = fs::write(&log_path, output.render_log()) {
            warn!(err = %err, path = %log_path.display(), "failed to write exec log");
        }

        let outcome = self.classify(&output);
        debug!(success = outcome.is_success(), "candidate finished");
        outcome
    }
}

/// Python source that binds `bindings` into a fresh namespace and executes the
/// script named by `sys.argv[1]` in it, preserving its file name and line numbers.
pub fn bootstrap_source(bindings: &BTreeMap<String, String>) -> String {
    let pairs = bindings
        .iter()
        .map(|(alias, module)| format!("({alias:?}, {module:?})"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "import importlib, sys\n\
         path = sys.argv[1]\n\
         ns = {{\"__name__\": \"__main__\", \"__file__\": path}}\n\
         for alias, module in [{pairs}]:\n    \
         ns[alias] = importlib.import_module(module)\n\
         with open(path, encoding=\"utf-8\") as handle:\n    \
         source = handle.read()\n\
         exec(compile(source, path, \"exec\"), ns)\n"
    )
}

fn tail(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::workspace::ContextSettings;

    fn context(root: &Path) -> ExecutionContext {
        let data_dir = root.join("data");
        fs::create_dir_all(&data_dir).expect("data dir");
        ExecutionContext::create_with_id(
            ContextSettings {
                state_dir: root.join("state"),
                data_dir,
                dataset_file: "merged.csv".to_string(),
                bindings: BTreeMap::new(),
                isolate_attempts: true,
            },
            "run-test".to_string(),
        )
        .expect("context")
    }

    fn sh_sandbox() -> PythonSandbox {
        PythonSandbox::new(&SandboxConfig {
            interpreter: vec!["sh".to_string()],
            bootstrap: false,
            execution_timeout_secs: 10,
            output_limit_bytes: 10_000,
            bindings: BTreeMap::new(),
        })
    }

    #[test]
    fn empty_program_fails_before_anything_runs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = context(temp.path());
        ctx.begin_attempt().expect("attempt");

        let outcome = sh_sandbox().execute("  \n ", &mut ctx);

        assert_eq!(outcome, ExecutionOutcome::Failure(Fault::empty_program()));
        assert!(!ctx.attempt_dir(1).join(SCRIPT_NAME).exists());
    }

    #[test]
    fn missing_workspace_is_a_failure_not_a_panic() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = context(temp.path());

        let outcome = sh_sandbox().execute("echo hi", &mut ctx);
        let fault = outcome.fault().expect("fault");
        assert_eq!(fault.kind, FaultKind::Spawn);
    }

    #[test]
    fn bootstrap_binds_every_alias() {
        let bindings: BTreeMap<String, String> = [("np", "numpy"), ("pd", "pandas")]
            .into_iter()
            .map(|(a, m)| (a.to_string(), m.to_string()))
            .collect();
        let source = bootstrap_source(&bindings);
        assert!(source.contains(r#"[("np", "numpy"), ("pd", "pandas")]"#));
        assert!(source.contains("exec(compile(source, path, \"exec\"), ns)"));
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("", 2), "");
    }

    #[cfg(unix)]
    #[test]
    fn runs_in_workspace_with_environment() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = context(temp.path());
        let workspace = ctx.begin_attempt().expect("attempt");

        let outcome = sh_sandbox().execute(
            "printf '%s' \"$PIPEWRIGHT_DATA_DIR\" > \"$PIPEWRIGHT_OUTPUT\"",
            &mut ctx,
        );

        assert_eq!(outcome, ExecutionOutcome::Success);
        let written = fs::read_to_string(workspace.join("merged.csv")).expect("dataset");
        assert_eq!(Path::new(&written), ctx.data_dir());
        assert!(ctx.attempt_dir(1).join(SCRIPT_NAME).is_file());
        assert!(ctx.attempt_dir(1).join(EXEC_LOG_NAME).is_file());
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_reports_stderr_tail() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = context(temp.path());
        ctx.begin_attempt().expect("attempt");

        let outcome = sh_sandbox().execute("echo 'column CCN not found' >&2\nexit 3", &mut ctx);

        let fault = outcome.fault().expect("fault");
        assert_eq!(fault.kind, FaultKind::Exit { code: Some(3) });
        assert_eq!(fault.message, "column CCN not found");
    }

    #[cfg(unix)]
    #[test]
    fn traceback_on_stderr_becomes_structured_fault() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = context(temp.path());
        ctx.begin_attempt().expect("attempt");

        let script = "cat >&2 <<'EOF'\nTraceback (most recent call last):\n  File \"/x/candidate.py\", line 2, in <module>\nKeyError: 'CCN'\nEOF\nexit 1";
        let outcome = sh_sandbox().execute(script, &mut ctx);

        let fault = outcome.fault().expect("fault");
        assert_eq!(fault.to_string(), "KeyError: 'CCN'");
        assert_eq!(fault.line, Some(2));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = context(temp.path());
        ctx.begin_attempt().expect("attempt");

        let sandbox = sh_sandbox().with_timeout(Duration::from_millis(200));
        let outcome = sandbox.execute("exec sleep 5", &mut ctx);

        assert_eq!(outcome.fault().expect("fault").kind, FaultKind::Timeout);
    }

    #[test]
    fn unknown_interpreter_is_a_spawn_fault() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = context(temp.path());
        ctx.begin_attempt().expect("attempt");

        let sandbox = PythonSandbox::new(&SandboxConfig {
            interpreter: vec!["definitely-not-an-interpreter-pipewright".to_string()],
            ..SandboxConfig::default()
        });
        let outcome = sandbox.execute("print(1)", &mut ctx);

        assert_eq!(outcome.fault().expect("fault").kind, FaultKind::Spawn);
    }

    /// Exercises the real bootstrap against a local Python with pandas installed.
    #[test]
    #[ignore = "requires python3 with pandas and numpy"]
    fn python_bootstrap_exposes_bindings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ctx = ExecutionContext::create_with_id(
            ContextSettings {
                state_dir: temp.path().join("state"),
                data_dir: temp.path().to_path_buf(),
                dataset_file: "merged.csv".to_string(),
                bindings: SandboxConfig::default().bindings,
                isolate_attempts: true,
            },
            "run-py".to_string(),
        )
        .expect("context");
        let workspace = ctx.begin_attempt().expect("attempt");
        let sandbox = PythonSandbox::new(&SandboxConfig::default());

        let ok = sandbox.execute(
            "df = pd.DataFrame({'CCN': [41300]})\n\
             df['CCN'] = df['CCN'].astype(str).str.zfill(6)\n\
             df.to_csv(os.environ['PIPEWRIGHT_OUTPUT'], index=False)",
            &mut ctx,
        );
        assert_eq!(ok, ExecutionOutcome::Success);
        assert!(workspace.join("merged.csv").is_file());

        ctx.begin_attempt().expect("attempt");
        let failed = sandbox.execute("x = 1\ndf = pd.DataFrame()\ndf['CCN']", &mut ctx);
        let fault = failed.fault().expect("fault");
        assert_eq!(
            fault.kind,
            FaultKind::Raised {
                name: "KeyError".to_string()
            }
        );
        assert_eq!(fault.line, Some(3));
    }
}
