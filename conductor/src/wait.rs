//! The wait operation: block on sessions, report results, map exit codes.

use anyhow::{Result, anyhow};
use tracing::instrument;

use crate::core::session::SessionState;
use crate::exit_codes;
use crate::io::lru::LruCache;
use crate::io::store::NotFoundError;
use crate::io::summarize::summarize_or_truncate;
use crate::spawn::OpsEnv;

const WAIT_SUMMARY_GOAL: &str =
    "Summarize this session result in one short line for a status report. Plain text only.";

/// What wait prints and how the process should exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitReport {
    /// One block per waited session, in request order.
    pub outputs: Vec<String>,
    pub exit_code: i32,
}

/// Wait until every referenced session is terminal.
///
/// Sessions that completed successfully have their LRU entry refreshed:
/// reading a result counts as using the materialized session. `failed`
/// outranks `aborted`/`exited` in the exit code.
#[instrument(skip_all, fields(count = references.len()))]
pub fn wait_sessions(
    env: &OpsEnv<'_>,
    lru: &LruCache,
    references: &[String],
    summarize: bool,
) -> Result<WaitReport> {
    if references.is_empty() {
        return Err(anyhow!("wait needs at least one session id or alias"));
    }
    let mut ids = Vec::with_capacity(references.len());
    for reference in references {
        let id = env.store.resolve(reference)?.ok_or_else(|| {
            anyhow!(NotFoundError {
                reference: reference.clone(),
            })
        })?;
        ids.push(id);
    }

    let states = crate::io::watch::wait_for_terminal(env.store, &ids)?;

    let mut outputs = Vec::with_capacity(ids.len());
    for (id, state) in ids.iter().zip(&states) {
        if state.is_cache_eligible() {
            lru.touch(env.project_id, id)?;
        }
        outputs.push(render_output(env, id, *state, summarize)?);
    }

    Ok(WaitReport {
        outputs,
        exit_code: exit_code_for(&states),
    })
}

fn render_output(
    env: &OpsEnv<'_>,
    id: &str,
    state: SessionState,
    summarize: bool,
) -> Result<String> {
    let body = match state {
        SessionState::Failed => env
            .store
            .failed_reason(id)?
            .unwrap_or_else(|| "(no failure reason recorded)".to_string()),
        _ => env
            .store
            .result_text(id)?
            .unwrap_or_else(|| "(no result recorded)".to_string()),
    };
    if summarize {
        let summary = summarize_or_truncate(
            env.summarizer,
            &body,
            WAIT_SUMMARY_GOAL,
            env.config.summary_max_length,
        );
        Ok(format!("{id} [{state}] {summary}"))
    } else {
        Ok(body.trim_end().to_string())
    }
}

fn exit_code_for(states: &[SessionState]) -> i32 {
    if states.contains(&SessionState::Failed) {
        exit_codes::FAILED
    } else if states
        .iter()
        .any(|s| matches!(s, SessionState::Aborted | SessionState::Exited))
    {
        exit_codes::ABORTED
    } else {
        exit_codes::OK
    }
}
