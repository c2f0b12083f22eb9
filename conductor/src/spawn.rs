//! Session creation: id allocation, validation, window materialization.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use regex::Regex;
use tracing::{debug, info, instrument};

use crate::core::dag::would_create_cycle;
use crate::core::session::{Session, SessionState};
use crate::io::config::ConductorConfig;
use crate::io::context::{ExecutionContext, window_name, window_target};
use crate::io::contract::render_session;
use crate::io::project::SESSION_ID_ENV;
use crate::io::store::{CycleError, NotFoundError, SessionStore};
use crate::io::summarize::Summarizer;

static ALIAS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").unwrap());

/// Stand-in graph node for a session whose id is not allocated yet. Real ids
/// are dotted decimals, so this never collides with a stored session.
const CANDIDATE_ID: &str = "candidate";

/// Shared handles threaded through the orchestration commands.
pub struct OpsEnv<'a> {
    pub store: &'a SessionStore,
    pub ctx: &'a dyn ExecutionContext,
    pub summarizer: &'a dyn Summarizer,
    pub config: &'a ConductorConfig,
    pub project_id: &'a str,
    pub workdir: PathBuf,
}

/// Everything needed to create one session.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// One-line task description, stored on the record.
    pub task: String,
    /// Full prompt delivered to the window; defaults to the rendered task
    /// contract when `None` (retry doers pass a pre-rendered prompt).
    pub prompt: Option<String>,
    pub parent: String,
    pub alias: String,
    pub depends_on: Vec<String>,
    /// Verification criteria listed in the contract.
    pub verify: Vec<String>,
    /// Command launched in the window instead of the configured agent
    /// command (checker model overrides use this).
    pub command_override: Option<String>,
}

impl SpawnRequest {
    pub fn new(task: &str, parent: &str) -> Self {
        Self {
            task: task.to_string(),
            prompt: None,
            parent: parent.to_string(),
            alias: String::new(),
            depends_on: Vec::new(),
            verify: Vec::new(),
            command_override: None,
        }
    }
}

/// Create a session: validate, allocate an id, materialize the window,
/// persist the record, deliver the contract. Returns the new session id.
///
/// Validation and materialization both happen before the record is saved, so
/// a failure at any point leaves nothing durable behind.
#[instrument(skip_all, fields(parent = %request.parent))]
pub fn spawn_session(env: &OpsEnv<'_>, request: &SpawnRequest) -> Result<String> {
    if request.task.trim().is_empty() {
        return Err(anyhow!("task must not be empty"));
    }

    let existing = env.store.load_all()?;

    if !request.alias.is_empty() {
        if !ALIAS_RE.is_match(&request.alias) {
            return Err(anyhow!(
                "invalid alias '{}' (letters, digits, '._-' only)",
                request.alias
            ));
        }
        if let Some(holder) = existing.iter().find(|s| s.alias == request.alias) {
            return Err(anyhow!(
                "alias '{}' is already used by session {}",
                request.alias,
                holder.id
            ));
        }
    }

    let mut depends_on = Vec::with_capacity(request.depends_on.len());
    for reference in &request.depends_on {
        let id = env.store.resolve(reference)?.ok_or_else(|| {
            anyhow!(NotFoundError {
                reference: reference.clone(),
            })
        })?;
        depends_on.push(id);
    }

    let edges: Vec<(String, Vec<String>)> = existing
        .iter()
        .map(|s| (s.id.clone(), s.depends_on.clone()))
        .collect();
    // Checked before the id is allocated so a rejection leaves the counter
    // untouched. The unallocated session has no inbound edges, so the
    // stand-in id only needs to stay outside the dotted-decimal id space.
    if would_create_cycle(CANDIDATE_ID, &depends_on, &edges) {
        let dependency = depends_on.first().cloned().unwrap_or_default();
        return Err(anyhow!(CycleError { dependency }));
    }

    let id = env.store.allocate_id(&request.parent)?;

    let contract = match &request.prompt {
        Some(prompt) => prompt.clone(),
        None => render_session(&request.task, &depends_on, &request.verify)?,
    };

    let window = window_name(&id);
    let target = window_target(env.project_id, &window);
    let mut child_env = HashMap::new();
    child_env.insert(SESSION_ID_ENV.to_string(), id.clone());
    let command = request
        .command_override
        .as_deref()
        .unwrap_or(&env.config.agent_command);
    env.ctx
        .materialize(&target, command, &env.workdir, &child_env)
        .with_context(|| format!("materialize window for session {id}"))?;
    debug!(id, window, "window materialized");

    let session = Session {
        id: id.clone(),
        task: request.task.clone(),
        parent: request.parent.clone(),
        state: SessionState::Running,
        window,
        created_at: Utc::now(),
        alias: request.alias.clone(),
        depends_on,
    };
    env.store.save(&session)?;
    env.store.write_contract(&id, &contract)?;

    env.ctx.send_input(&target, &contract)?;
    info!(id, "session spawned");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::SessionState;
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
    fn spawn_creates_running_session_with_contract() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);

        let id = spawn_session(&env, &SpawnRequest::new("write the docs", "")).expect("spawn");
        assert_eq!(id, "0");

        let session = ts.store.load("0").expect("load").expect("present");
        assert_eq!(session.state, SessionState::Running);
        assert_eq!(session.task, "write the docs");
        assert_eq!(session.window, "job-0");

        let calls = ctx.calls();
        assert!(calls[0].starts_with("materialize job-0"));
        assert_eq!(calls[1], "send_input job-0");
    }

    #[test]
    fn child_sessions_get_dotted_ids() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);

        let root = spawn_session(&env, &SpawnRequest::new("root", "")).expect("spawn");
        let child = spawn_session(&env, &SpawnRequest::new("child", &root)).expect("spawn");
        assert_eq!(child, "0.0");
        let session = ts.store.load("0.0").expect("load").expect("present");
        assert_eq!(session.parent, "0");
    }

    #[test]
    fn duplicate_alias_is_rejected_before_any_write() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);

        let mut first = SpawnRequest::new("one", "");
        first.alias = "builder".to_string();
        spawn_session(&env, &first).expect("spawn");

        let mut second = SpawnRequest::new("two", "");
        second.alias = "builder".to_string();
        let err = spawn_session(&env, &second).unwrap_err();
        assert!(err.to_string().contains("already used"));
        // Only the first session exists.
        assert_eq!(ts.store.load_all().expect("load_all").len(), 1);
    }

    #[test]
    fn invalid_alias_is_rejected() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);

        let mut request = SpawnRequest::new("task", "");
        request.alias = "has spaces".to_string();
        let err = spawn_session(&env, &request).unwrap_err();
        assert!(err.to_string().contains("invalid alias"));
    }

    #[test]
    fn unknown_dependency_is_not_found() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);

        let mut request = SpawnRequest::new("task", "");
        request.depends_on = vec!["99".to_string()];
        let err = spawn_session(&env, &request).unwrap_err();
        assert!(err.downcast_ref::<NotFoundError>().is_some());
    }

    #[test]
    fn rejected_spawn_does_not_consume_an_id() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);

        let mut request = SpawnRequest::new("task", "");
        request.depends_on = vec!["99".to_string()];
        spawn_session(&env, &request).unwrap_err();

        // Validation runs before allocation, so the root counter never moved
        // and the next spawn still gets the first id.
        assert!(!ts.temp.path().join("next_id").exists());
        let id = spawn_session(&env, &SpawnRequest::new("task", "")).expect("spawn");
        assert_eq!(id, "0");
    }

    #[test]
    fn dependencies_resolve_aliases_to_ids() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);

        let mut dep = SpawnRequest::new("dep", "");
        dep.alias = "prereq".to_string();
        let dep_id = spawn_session(&env, &dep).expect("spawn");

        let mut request = SpawnRequest::new("task", "");
        request.depends_on = vec!["prereq".to_string()];
        let id = spawn_session(&env, &request).expect("spawn");
        assert_eq!(
            ts.store.get_dependencies(&id).expect("deps"),
            vec![dep_id]
        );
    }

    #[test]
    fn materialize_failure_leaves_nothing_durable() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);

        ctx.fail_next_materialize();
        let err = spawn_session(&env, &SpawnRequest::new("task", "")).unwrap_err();
        assert!(err.to_string().contains("materialize"));
        assert!(ts.store.load_all().expect("load_all").is_empty());
    }

    #[test]
    fn contract_is_persisted_and_mentions_dependencies() {
        let ts = TestStore::new();
        let ctx = FakeContext::new(ts.temp.path());
        let config = ConductorConfig::default();
        let env = env(&ts, &ctx, &config);

        let dep_id = spawn_session(&env, &SpawnRequest::new("dep", "")).expect("spawn");
        let mut request = SpawnRequest::new("task", "");
        request.depends_on = vec![dep_id.clone()];
        let id = spawn_session(&env, &request).expect("spawn");

        let contract = std::fs::read_to_string(ts.store.session_dir(&id).join("contract.md"))
            .expect("read contract");
        assert!(contract.contains(&format!("conductor wait {dep_id}")));
    }
}
