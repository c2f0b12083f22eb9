//! The complete operation: lifecycle hooks report how a session ended.

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::session::SessionState;
use crate::io::lru::LruCache;
use crate::io::project;
use crate::io::store::{NotFoundError, SessionStore};
use crate::spawn::OpsEnv;

/// Optional artifacts reported alongside a terminal state.
#[derive(Debug, Clone, Default)]
pub struct CompletionOutcome {
    pub result: Option<String>,
    pub failed_reason: Option<String>,
    /// External conversation id of the agent process, needed for `resume`.
    pub agent_id: Option<String>,
}

/// Record a session's terminal outcome.
///
/// Driven by lifecycle hooks running inside the session, so it must stay
/// tolerant: every artifact is optional, and eviction failures in other
/// projects degrade to warnings. Completing a `done` session registers it in
/// the LRU and may evict older completed sessions anywhere on the host.
#[instrument(skip_all, fields(reference, state = %state))]
pub fn complete_session(
    env: &OpsEnv<'_>,
    lru: &LruCache,
    reference: &str,
    state: SessionState,
    outcome: &CompletionOutcome,
) -> Result<Vec<(String, String)>> {
    if !matches!(
        state,
        SessionState::Done | SessionState::Failed | SessionState::Exited
    ) {
        return Err(anyhow!(
            "complete only accepts done, failed, or exited (got {state})"
        ));
    }
    let id = env.store.resolve(reference)?.ok_or_else(|| {
        anyhow!(NotFoundError {
            reference: reference.to_string(),
        })
    })?;

    if let Some(result) = &outcome.result {
        env.store.write_result(&id, result)?;
    }
    if let Some(reason) = &outcome.failed_reason {
        env.store.write_failed_reason(&id, reason)?;
    }
    if let Some(agent_id) = &outcome.agent_id {
        env.store.write_agent_id(&id, agent_id)?;
    }
    env.store.update_state(&id, state)?;
    info!(id, state = %state, "session completed");

    if !state.is_cache_eligible() {
        return Ok(Vec::new());
    }

    lru.add_or_touch(env.project_id, &id)?;
    let evicted = lru.check_and_evict(env.ctx, env.config.max_completed_sessions)?;
    for (project_id, session_id) in &evicted {
        mark_evicted(env, project_id, session_id);
    }
    Ok(evicted)
}

/// Flip an evicted session's record to `evicted`. Cross-project records are
/// best-effort: their store may live on a path this process cannot reach.
fn mark_evicted(env: &OpsEnv<'_>, project_id: &str, session_id: &str) {
    let result = if project_id == env.project_id {
        env.store.update_state(session_id, SessionState::Evicted)
    } else {
        project::project_data_dir(project_id)
            .map(|base| SessionStore::new(&base))
            .and_then(|store| store.update_state(session_id, SessionState::Evicted))
    };
    if let Err(err) = result {
        warn!(
            project_id,
            session_id,
            err = %err,
            "could not mark evicted session record"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::ConductorConfig;
    use crate::test_support::{FakeContext, FakeSummarizer, TestStore};

    fn env<'a>(
        ts: &'a TestStore,
        ctx: &'a FakeContext,
        config: &'a ConductorConfig,
    ) -> OpsEnv<'a> {
        OpsEnv {
            store: &ts.store,
            ctx,
            summarizer: &FakeSummarizer,
            config,
            project_id: "proj-test",
            workdir: ts.temp.path().to_path_buf(),
        }
    }

    #[test]
    fn done_records_result_and_registers_in_lru() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);
        let lru = LruCache::new(ts.temp.path());

        ts.add_session("0", SessionState::Running);
        let outcome = CompletionOutcome {
            result: Some("built it".to_string()),
            agent_id: Some("conv-xyz".to_string()),
            ..CompletionOutcome::default()
        };
        complete_session(&env, &lru, "0", SessionState::Done, &outcome).expect("complete");

        let session = ts.store.load("0").expect("load").expect("present");
        assert_eq!(session.state, SessionState::Done);
        assert_eq!(
            ts.store.result_text("0").expect("read").as_deref(),
            Some("built it")
        );
        assert_eq!(
            ts.store.agent_id("0").expect("read").as_deref(),
            Some("conv-xyz")
        );
        assert_eq!(lru.entries().expect("entries").len(), 1);
    }

    #[test]
    fn failed_records_reason_and_skips_the_lru() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);
        let lru = LruCache::new(ts.temp.path());

        ts.add_session("0", SessionState::Running);
        let outcome = CompletionOutcome {
            failed_reason: Some("tests red".to_string()),
            ..CompletionOutcome::default()
        };
        complete_session(&env, &lru, "0", SessionState::Failed, &outcome).expect("complete");

        let session = ts.store.load("0").expect("load").expect("present");
        assert_eq!(session.state, SessionState::Failed);
        assert_eq!(
            ts.store.failed_reason("0").expect("read").as_deref(),
            Some("tests red")
        );
        assert!(lru.entries().expect("entries").is_empty());
    }

    #[test]
    fn completing_beyond_the_limit_evicts_and_marks_records() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig {
            max_completed_sessions: 1,
            ..ConductorConfig::default()
        };
        let env = env(&ts, &ctx, &config);
        let lru = LruCache::new(ts.temp.path());

        ts.add_session("0", SessionState::Running);
        ts.add_session("1", SessionState::Running);
        let first = CompletionOutcome {
            result: Some("first".to_string()),
            ..CompletionOutcome::default()
        };
        complete_session(&env, &lru, "0", SessionState::Done, &first).expect("complete");
        std::thread::sleep(std::time::Duration::from_millis(10));
        let second = CompletionOutcome {
            result: Some("second".to_string()),
            ..CompletionOutcome::default()
        };
        let evicted =
            complete_session(&env, &lru, "1", SessionState::Done, &second).expect("complete");

        assert_eq!(evicted, vec![("proj-test".to_string(), "0".to_string())]);
        let old = ts.store.load("0").expect("load").expect("present");
        assert_eq!(old.state, SessionState::Evicted);
        let newer = ts.store.load("1").expect("load").expect("present");
        assert_eq!(newer.state, SessionState::Done);
        let remaining = lru.entries().expect("entries");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].session_id, "1");
    }

    #[test]
    fn rejects_states_a_hook_cannot_report() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);
        let lru = LruCache::new(ts.temp.path());

        ts.add_session("0", SessionState::Running);
        let outcome = CompletionOutcome::default();
        let err = complete_session(&env, &lru, "0", SessionState::Running, &outcome)
            .unwrap_err();
        assert!(err.to_string().contains("only accepts"));
        let err = complete_session(&env, &lru, "0", SessionState::Evicted, &outcome)
            .unwrap_err();
        assert!(err.to_string().contains("only accepts"));
    }

    #[test]
    fn unknown_session_is_not_found() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);
        let lru = LruCache::new(ts.temp.path());

        let outcome = CompletionOutcome::default();
        let err = complete_session(&env, &lru, "9", SessionState::Done, &outcome).unwrap_err();
        assert!(err.downcast_ref::<NotFoundError>().is_some());
    }
}
