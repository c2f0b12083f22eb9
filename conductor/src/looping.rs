//! Doer→checker retry loop engine.
//!
//! One loop instance supervises a top-level doer session: wait for the doer,
//! summarize its result, run the checker, and either stop (accept/terminate)
//! or spawn a retry doer as a child of the original session. Retry doers and
//! agent checkers are ordinary tracked sessions; nothing the loop does is
//! invisible to the operator. Inner spawns never start their own loop, so
//! the outer loop stays the single verification authority.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::session::SessionState;
use crate::core::verdict::{Verdict, parse_verdict};
use crate::io::contract::{HistoryEntry, render_checker, render_retry};
use crate::io::process::run_command_with_timeout;
use crate::io::store::write_atomic;
use crate::io::summarize::summarize_or_truncate;
use crate::io::watch::wait_for_terminal;
use crate::spawn::{OpsEnv, SpawnRequest, spawn_session};

const SUMMARY_GOAL: &str =
    "Summarize this session result in 1-2 sentences for a reviewer. Plain text only.";

/// How doer output gets verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckerSpec {
    /// Shell command; exit code decides the verdict.
    Command(String),
    /// Natural-language review instruction executed by a checker session.
    Agent(String),
}

impl CheckerSpec {
    /// `"agent:<instruction>"` selects the agent checker; anything else is a
    /// shell command.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Some(instruction) = raw.strip_prefix("agent:") {
            let instruction = instruction.trim();
            if instruction.is_empty() {
                return Err(anyhow!("agent checker instruction must not be empty"));
            }
            return Ok(CheckerSpec::Agent(instruction.to_string()));
        }
        if raw.is_empty() {
            return Err(anyhow!("checker specification must not be empty"));
        }
        Ok(CheckerSpec::Command(raw.to_string()))
    }

    fn raw(&self) -> String {
        match self {
            CheckerSpec::Command(cmd) => cmd.clone(),
            CheckerSpec::Agent(instruction) => format!("agent:{instruction}"),
        }
    }
}

/// One completed doer/checker round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub doer_session_id: String,
    pub verdict: Verdict,
    pub feedback: String,
}

/// Durable loop bookkeeping, rewritten in full after every iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    pub checker: String,
    pub max_iterations: u32,
    pub current_iteration: u32,
    pub history: Vec<IterationRecord>,
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    Accepted {
        iterations: u32,
        feedback: String,
    },
    Terminated {
        iterations: u32,
        feedback: String,
    },
    MaxIterationsReached {
        iterations: u32,
        last_feedback: String,
    },
    /// The doer ended aborted/failed/exited; there was nothing to check.
    DoerFailed {
        doer_session_id: String,
        state: SessionState,
    },
}

/// Loop inputs beyond the ambient environment.
#[derive(Debug, Clone)]
pub struct LoopParams {
    pub checker: CheckerSpec,
    pub max_iterations: u32,
    /// Model override for agent checkers, passed to the agent CLI.
    pub checker_model: Option<String>,
}

/// Supervise `top_id` until the checker accepts, terminates, the iteration
/// budget runs out, or a doer dies.
#[instrument(skip_all, fields(top_id, max_iterations = params.max_iterations))]
pub fn run_loop(env: &OpsEnv<'_>, top_id: &str, params: &LoopParams) -> Result<LoopOutcome> {
    if params.max_iterations < 1 {
        return Err(anyhow!("max iterations must be at least 1"));
    }
    let top = env
        .store
        .load(top_id)?
        .ok_or_else(|| anyhow!("loop target session {top_id} not found"))?;

    let mut state = LoopState {
        checker: params.checker.raw(),
        max_iterations: params.max_iterations,
        current_iteration: 0,
        history: Vec::new(),
    };
    let mut doer_id = top_id.to_string();

    for iteration in 1..=params.max_iterations {
        state.current_iteration = iteration;

        let final_state = wait_for_terminal(env.store, std::slice::from_ref(&doer_id))?[0];
        if !final_state.is_success() {
            warn!(doer_id, state = %final_state, "doer ended without usable output");
            persist_loop_state(env, top_id, &state)?;
            return Ok(LoopOutcome::DoerFailed {
                doer_session_id: doer_id,
                state: final_state,
            });
        }

        let result = env.store.result_text(&doer_id)?.unwrap_or_default();
        let summary = summarize_or_truncate(
            env.summarizer,
            &result,
            SUMMARY_GOAL,
            env.config.summary_max_length,
        );

        let (verdict, feedback) =
            run_checker(env, params, top_id, iteration, &summary, &state.history)?;
        debug!(iteration, verdict = verdict.as_str(), "checker verdict");

        state.history.push(IterationRecord {
            iteration,
            doer_session_id: doer_id.clone(),
            verdict,
            feedback: feedback.clone(),
        });
        persist_loop_state(env, top_id, &state)?;

        match verdict {
            Verdict::Accept => {
                info!(iteration, "checker accepted");
                return Ok(LoopOutcome::Accepted {
                    iterations: iteration,
                    feedback,
                });
            }
            Verdict::Terminate => {
                info!(iteration, "checker terminated the loop");
                return Ok(LoopOutcome::Terminated {
                    iterations: iteration,
                    feedback,
                });
            }
            Verdict::Retry => {
                if iteration == params.max_iterations {
                    return Ok(LoopOutcome::MaxIterationsReached {
                        iterations: iteration,
                        last_feedback: feedback,
                    });
                }
                let prompt = render_retry(&top.task, &summary, &feedback)?;
                let mut request = SpawnRequest::new(&top.task, top_id);
                request.prompt = Some(prompt);
                doer_id = spawn_session(env, &request)
                    .context("spawn retry doer")?;
                info!(retry_doer = %doer_id, "spawned retry doer");
            }
        }
    }
    unreachable!("loop exits via verdict handling")
}

fn persist_loop_state(env: &OpsEnv<'_>, top_id: &str, state: &LoopState) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(state).context("serialize loop state")?;
    buf.push('\n');
    write_atomic(&env.store.loop_state_path(top_id), &buf)
}

fn run_checker(
    env: &OpsEnv<'_>,
    params: &LoopParams,
    top_id: &str,
    iteration: u32,
    doer_summary: &str,
    history: &[IterationRecord],
) -> Result<(Verdict, String)> {
    match &params.checker {
        CheckerSpec::Command(command) => Ok(run_command_checker(env, command)),
        CheckerSpec::Agent(instruction) => run_agent_checker(
            env,
            params,
            top_id,
            instruction,
            iteration,
            doer_summary,
            history,
        ),
    }
}

/// Exit 0 accepts, nonzero retries, timeout retries. A checker that cannot
/// even be invoked terminates the loop: a broken checker is never satisfied
/// by retrying the doer.
fn run_command_checker(env: &OpsEnv<'_>, command: &str) -> (Verdict, String) {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).current_dir(&env.workdir);
    let output = match run_command_with_timeout(
        cmd,
        Duration::from_secs(env.config.checker_timeout_secs),
        env.config.checker_output_limit_bytes,
    ) {
        Ok(output) => output,
        Err(err) => {
            return (
                Verdict::Terminate,
                format!("checker command could not be executed: {err:#}"),
            );
        }
    };

    if output.timed_out {
        return (
            Verdict::Retry,
            format!(
                "checker timed out after {}s",
                env.config.checker_timeout_secs
            ),
        );
    }
    if output.status.success() {
        let mut feedback = output.stdout_text().trim().to_string();
        feedback.push_str(&output.stdout_truncated_notice("checker"));
        return (Verdict::Accept, feedback.trim().to_string());
    }
    let combined = format!(
        "{}\n{}",
        output.stdout_text().trim(),
        output.stderr_text().trim()
    );
    let combined = combined.trim();
    let feedback = if combined.is_empty() {
        format!(
            "checker exited with code {:?} and produced no output",
            output.status.code()
        )
    } else {
        combined.to_string()
    };
    (Verdict::Retry, feedback)
}

/// The checker is itself a tracked session. Its own failure is a retry, not
/// a termination: the reviewer may be flaky even when the work is fine.
fn run_agent_checker(
    env: &OpsEnv<'_>,
    params: &LoopParams,
    top_id: &str,
    instruction: &str,
    iteration: u32,
    doer_summary: &str,
    history: &[IterationRecord],
) -> Result<(Verdict, String)> {
    let entries: Vec<HistoryEntry> = history
        .iter()
        .map(|r| HistoryEntry::new(r.iteration, r.verdict, &r.feedback))
        .collect();
    let contract = render_checker(
        instruction,
        doer_summary,
        iteration,
        params.max_iterations,
        &entries,
    )?;

    let mut request = SpawnRequest::new(&format!("check iteration {iteration}"), top_id);
    request.prompt = Some(contract);
    if let Some(model) = &params.checker_model {
        request.command_override =
            Some(format!("{} --model {model}", env.config.agent_command));
    }
    let checker_id = spawn_session(env, &request).context("spawn checker session")?;

    let final_state = wait_for_terminal(env.store, std::slice::from_ref(&checker_id))?[0];
    if !final_state.is_success() {
        return Ok((
            Verdict::Retry,
            format!("checker session {checker_id} ended {final_state}; retrying the doer"),
        ));
    }
    let response = env.store.result_text(&checker_id)?.unwrap_or_default();
    let verdict = parse_verdict(&response);
    Ok((verdict, response.trim().to_string()))
}
