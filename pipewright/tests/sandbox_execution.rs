//! Correction loop against the real subprocess engine.
//!
//! Candidates are shell scripts run through `sh` so the tests do not depend
//! on a local Python installation.
#![cfg(unix)]

use std::collections::BTreeMap;
use std::fs;

use pipewright::core::types::FaultKind;
use pipewright::correction::LoopStop;
use pipewright::io::config::{PipewrightConfig, SandboxConfig};
use pipewright::io::sandbox::{PythonSandbox, SCRIPT_NAME};
use pipewright::pipeline::run_pipeline;
use pipewright::test_support::{ScriptedGenerator, TestWorkspace};

const LEAVES_PARTIAL_FILE: &str = "touch partial.csv\necho 'merge failed' >&2\nexit 1";
const NEEDS_CLEAN_WORKSPACE: &str = "```sh\nif [ -e partial.csv ]; then echo 'stale partial.csv' >&2; exit 5; fi\nprintf 'CCN\\n041300\\n' > \"$PIPEWRIGHT_OUTPUT\"\n```";

fn config(ws: &TestWorkspace, isolate_attempts: bool) -> PipewrightConfig {
    let mut config = PipewrightConfig {
        data_dir: ws.data_dir(),
        state_dir: ws.state_dir(),
        isolate_attempts,
        sandbox: SandboxConfig {
            interpreter: vec!["sh".to_string()],
            bootstrap: false,
            execution_timeout_secs: 10,
            output_limit_bytes: 10_000,
            bindings: BTreeMap::new(),
        },
        ..PipewrightConfig::default()
    };
    config.output.dataset = ws.root().join("merged.csv");
    config.output.report = ws.root().join("report.md");
    config
}

#[test]
fn isolated_attempts_do_not_see_earlier_side_effects() {
    let ws = TestWorkspace::new().expect("workspace");
    let config = config(&ws, true);
    let generator = ScriptedGenerator::texts([LEAVES_PARTIAL_FILE, NEEDS_CLEAN_WORKSPACE, "# Report"]);
    let sandbox = PythonSandbox::new(&config.sandbox);

    let outcome = run_pipeline(&config, &generator, &sandbox, |_| {}).expect("pipeline");

    assert!(outcome.succeeded(), "stop: {:?}", outcome.correction.stop);
    assert_eq!(outcome.correction.executions(), 2);
    let first_fault = outcome.correction.attempts[0]
        .outcome
        .fault()
        .expect("first attempt failed");
    assert_eq!(first_fault.kind, FaultKind::Exit { code: Some(1) });
    assert!(generator.prompts()[1].contains("merge failed"));
    assert_eq!(
        fs::read_to_string(&config.output.dataset).expect("dataset"),
        "CCN\n041300\n"
    );
    for attempt in ["1", "2"] {
        let dir = outcome.run_dir.join("attempts").join(attempt);
        assert!(dir.join(SCRIPT_NAME).is_file());
        assert!(dir.join("exec.log").is_file());
        assert!(dir.join("outcome.json").is_file());
    }
}

#[test]
fn shared_workspace_keeps_side_effects_between_rounds() {
    let ws = TestWorkspace::new().expect("workspace");
    let config = PipewrightConfig {
        max_attempts: 1,
        ..config(&ws, false)
    };
    let generator = ScriptedGenerator::texts([LEAVES_PARTIAL_FILE, NEEDS_CLEAN_WORKSPACE]);
    let sandbox = PythonSandbox::new(&config.sandbox);

    let outcome = run_pipeline(&config, &generator, &sandbox, |_| {}).expect("pipeline");

    let LoopStop::Exhausted { last_fault } = &outcome.correction.stop else {
        panic!("expected exhaustion, got {:?}", outcome.correction.stop);
    };
    assert_eq!(last_fault.kind, FaultKind::Exit { code: Some(5) });
    assert_eq!(last_fault.message, "stale partial.csv");
    assert!(outcome.run_dir.join("workspace").join("partial.csv").is_file());
    assert!(!config.output.dataset.exists());
}
