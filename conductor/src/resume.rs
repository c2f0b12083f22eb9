//! Resume a completed or evicted session in a fresh window.

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument};

use crate::core::session::SessionState;
use crate::io::context::window_target;
use crate::io::lru::LruCache;
use crate::io::project::SESSION_ID_ENV;
use crate::io::store::NotFoundError;
use crate::spawn::OpsEnv;

/// What resume did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// A new window was materialized and the session is running again.
    Resumed { id: String },
    /// The window never went away; nothing to do.
    StillMaterialized { id: String },
}

/// Bring a `done` or `evicted` session back to `running`.
///
/// Needs the stored external-process id (written by the lifecycle hook) to
/// hand the agent its previous conversation. The LRU entry is removed: a
/// running session is no longer a completed one and must not be evicted.
#[instrument(skip_all, fields(reference))]
pub fn resume_session(env: &OpsEnv<'_>, lru: &LruCache, reference: &str) -> Result<ResumeOutcome> {
    let id = env.store.resolve(reference)?.ok_or_else(|| {
        anyhow!(NotFoundError {
            reference: reference.to_string(),
        })
    })?;
    let session = env.store.load(&id)?.ok_or_else(|| {
        anyhow!(NotFoundError {
            reference: id.clone(),
        })
    })?;

    if !matches!(session.state, SessionState::Done | SessionState::Evicted) {
        return Err(anyhow!(
            "session {id} is {}; only done or evicted sessions can be resumed \
             (use `conductor poll {id}` to check on a running one)",
            session.state
        ));
    }

    let target = window_target(env.project_id, &session.window);
    if env.ctx.exists(&target)? {
        info!(id, "window still materialized, recovering in place");
        env.store.update_state(&id, SessionState::Running)?;
        lru.remove(env.project_id, &id)?;
        return Ok(ResumeOutcome::StillMaterialized { id });
    }

    let agent_id = env.store.agent_id(&id)?.ok_or_else(|| {
        anyhow!(
            "session {id} has no recorded agent id, so its conversation cannot \
             be resumed (spawn a new session instead: `conductor spawn <task>`)"
        )
    })?;

    let command = format!("{} --resume {agent_id}", env.config.agent_command);
    let mut child_env = HashMap::new();
    child_env.insert(SESSION_ID_ENV.to_string(), id.clone());
    env.ctx
        .materialize(&target, &command, &env.workdir, &child_env)
        .with_context(|| format!("materialize window for resumed session {id}"))?;

    env.store.update_state(&id, SessionState::Running)?;
    lru.remove(env.project_id, &id)?;
    info!(id, "session resumed");
    Ok(ResumeOutcome::Resumed { id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::ConductorConfig;
    use crate::io::context::ExecutionContext;
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
    fn resumes_an_evicted_session_with_its_agent_id() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);
        let lru = LruCache::new(ts.temp.path());

        ts.add_session("0", SessionState::Evicted);
        ts.store.write_agent_id("0", "conv-abc").expect("write");
        lru.add_or_touch("proj-test", "0").expect("add");

        let outcome = resume_session(&env, &lru, "0").expect("resume");
        assert_eq!(outcome, ResumeOutcome::Resumed { id: "0".to_string() });

        let session = ts.store.load("0").expect("load").expect("present");
        assert_eq!(session.state, SessionState::Running);
        assert!(lru.entries().expect("entries").is_empty());
        assert!(
            ctx.calls()
                .iter()
                .any(|c| c.contains("--resume conv-abc"))
        );
    }

    #[test]
    fn recovers_in_place_when_window_still_exists() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);
        let lru = LruCache::new(ts.temp.path());

        let session = ts.add_session("0", SessionState::Done);
        ctx.add_existing(&window_target("proj-test", &session.window));

        let outcome = resume_session(&env, &lru, "0").expect("resume");
        assert_eq!(
            outcome,
            ResumeOutcome::StillMaterialized { id: "0".to_string() }
        );
        let session = ts.store.load("0").expect("load").expect("present");
        assert_eq!(session.state, SessionState::Running);
        // No new window was created.
        assert!(ctx.calls().iter().all(|c| !c.starts_with("materialize")));
    }

    #[test]
    fn rejects_non_resumable_states_with_remediation() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);
        let lru = LruCache::new(ts.temp.path());

        ts.add_session("0", SessionState::Running);
        let err = resume_session(&env, &lru, "0").unwrap_err();
        assert!(err.to_string().contains("only done or evicted"));
        assert!(err.to_string().contains("conductor poll"));
    }

    #[test]
    fn missing_agent_id_is_a_clear_error() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);
        let lru = LruCache::new(ts.temp.path());

        ts.add_session("0", SessionState::Evicted);
        let err = resume_session(&env, &lru, "0").unwrap_err();
        assert!(err.to_string().contains("no recorded agent id"));
        assert!(err.to_string().contains("conductor spawn"));
    }
}
