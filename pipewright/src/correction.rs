//! The self-correcting generation-execution loop.
//!
//! ```text
//! Generating -> Executing -> Succeeded
//!                   |
//!                   +-> Correcting -> Executing -> ...   (while budget remains)
//!                   +-> Exhausted                        (budget spent)
//! ```
//!
//! One candidate is requested from the initial prompt and executed. Every
//! failure spends one unit of the [`AttemptBudget`] and asks the model for a
//! complete replacement, built from the failed candidate and its fault. A run
//! therefore performs at most `max_attempts + 1` executions. Exhaustion is a
//! normal return value, not an error.

use std::time::Instant;

use tracing::{error, info, instrument, warn};

use crate::core::budget::AttemptBudget;
use crate::core::sanitize::sanitize;
use crate::core::types::{AttemptRecord, ExecutionOutcome, Fault, FaultKind};
use crate::io::attempt_log::write_attempt;
use crate::io::generator::Generator;
use crate::io::prompt::PromptBuilder;
use crate::io::sandbox::Sandbox;
use crate::io::workspace::ExecutionContext;

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// A candidate executed cleanly; `code` is the final artifact.
    Succeeded { code: String },
    /// Every corrective round failed; `last_fault` is the final cause.
    Exhausted { last_fault: Fault },
}

/// Summary of one loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub stop: LoopStop,
    /// Every executed round, in order.
    pub attempts: Vec<AttemptRecord>,
    /// Correction prompts sent to the generator.
    pub corrections: u32,
}

impl LoopOutcome {
    pub fn executions(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn final_code(&self) -> Option<&str> {
        match &self.stop {
            LoopStop::Succeeded { code } => Some(code),
            LoopStop::Exhausted { .. } => None,
        }
    }
}

/// Drive candidates through `sandbox` until one succeeds or `budget` runs out.
///
/// `on_attempt` observes every executed round after it has been recorded.
#[instrument(skip_all, fields(run_id = ctx.run_id(), max_attempts = budget.max_attempts()))]
pub fn run_correction_loop<G, S, F>(
    generator: &G,
    sandbox: &S,
    prompts: &PromptBuilder,
    ctx: &mut ExecutionContext,
    mut budget: AttemptBudget,
    initial_prompt: &str,
    mut on_attempt: F,
) -> LoopOutcome
where
    G: Generator + ?Sized,
    S: Sandbox + ?Sized,
    F: FnMut(&AttemptRecord),
{
    let mut code = request_candidate(generator, initial_prompt);
    let mut attempts = Vec::new();
    let mut corrections = 0u32;

    loop {
        let started = Instant::now();
        let outcome = match ctx.begin_attempt() {
            Ok(_) => sandbox.execute(&code, ctx),
            Err(err) => ExecutionOutcome::Failure(Fault::new(FaultKind::Spawn, format!("{err:#}"))),
        };
        let record = AttemptRecord {
            attempt: ctx.attempt(),
            code: code.clone(),
            outcome,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        if let Err(err) = write_attempt(&ctx.attempt_dir(record.attempt), ctx.run_id(), &record) {
            warn!(attempt = record.attempt, err = %format!("{err:#}"), "failed to record attempt");
        }
        on_attempt(&record);
        let fault = record.outcome.fault().cloned();
        attempts.push(record);

        let Some(fault) = fault else {
            info!(executions = attempts.len(), corrections, "candidate succeeded");
            return LoopOutcome {
                stop: LoopStop::Succeeded { code },
                attempts,
                corrections,
            };
        };

        if !budget.record_failure() {
            warn!(executions = attempts.len(), fault = %fault, "attempt budget exhausted");
            return LoopOutcome {
                stop: LoopStop::Exhausted { last_fault: fault },
                attempts,
                corrections,
            };
        }

        warn!(
            attempt = budget.attempts(),
            max_attempts = budget.max_attempts(),
            fault = %fault,
            "execution failed, requesting correction"
        );
        let prompt = prompts.correction(&code, &fault);
        corrections += 1;
        code = request_candidate(generator, &prompt);
    }
}

/// Ask for a candidate and sanitize it. A generation fault yields an empty candidate.
fn request_candidate<G: Generator + ?Sized>(generator: &G, prompt: &str) -> String {
    match generator.generate(prompt) {
        Ok(text) => {
            let code = sanitize(text.as_deref());
            if code.is_empty() {
                warn!("model returned no program text");
            }
            code
        }
        Err(err) => {
            error!(err = %format!("{err:#}"), "generation request failed");
            String::new()
        }
    }
}
