//! Deterministic fakes for exercising orchestration flows without tmux or a
//! real agent. Enabled via the `test-support` feature.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use chrono::Utc;

use crate::core::session::{Session, SessionState};
use crate::io::context::{ExecutionContext, WindowTarget};
use crate::io::store::SessionStore;
use crate::io::summarize::Summarizer;

/// A session store rooted in a temporary directory.
pub struct TestStore {
    pub temp: tempfile::TempDir,
    pub store: SessionStore,
}

impl TestStore {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(temp.path());
        Self { temp, store }
    }

    /// Persist a minimal session in the given state.
    pub fn add_session(&self, id: &str, state: SessionState) -> Session {
        let session = make_session(id, state);
        self.store.save(&session).expect("save session");
        session
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Build an in-memory session with plausible defaults.
pub fn make_session(id: &str, state: SessionState) -> Session {
    let parent = match id.rsplit_once('.') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    };
    Session {
        id: id.to_string(),
        task: format!("task {id}"),
        parent,
        state,
        window: format!("job-{}", id.replace('.', "-")),
        created_at: Utc::now(),
        alias: String::new(),
        depends_on: Vec::new(),
    }
}

/// How a scripted doer session finishes once its contract is delivered.
#[derive(Debug, Clone)]
pub struct ScriptedCompletion {
    pub state: SessionState,
    pub result: String,
}

impl ScriptedCompletion {
    pub fn done(result: &str) -> Self {
        Self {
            state: SessionState::Done,
            result: result.to_string(),
        }
    }

    pub fn failed(reason: &str) -> Self {
        Self {
            state: SessionState::Failed,
            result: reason.to_string(),
        }
    }
}

/// Execution context fake.
///
/// Tracks which windows exist and records every call. When a scripted
/// completion is queued, delivering input to a window immediately drives the
/// corresponding session record to its scripted terminal state, standing in
/// for the agent doing the work.
pub struct FakeContext {
    store: SessionStore,
    scripted: Mutex<VecDeque<ScriptedCompletion>>,
    existing: Mutex<HashSet<WindowTarget>>,
    calls: Mutex<Vec<String>>,
    fail_next_materialize: Mutex<bool>,
    fail_next_exists: Mutex<bool>,
}

impl FakeContext {
    /// `store_base` must be the base directory of the store under test so
    /// scripted completions can write session records.
    pub fn new(store_base: &Path) -> Self {
        Self {
            store: SessionStore::new(store_base),
            scripted: Mutex::new(VecDeque::new()),
            existing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            fail_next_materialize: Mutex::new(false),
            fail_next_exists: Mutex::new(false),
        }
    }

    pub fn script(&self, completion: ScriptedCompletion) {
        self.scripted.lock().unwrap().push_back(completion);
    }

    pub fn add_existing(&self, target: &WindowTarget) {
        self.existing.lock().unwrap().insert(target.clone());
    }

    pub fn fail_next_materialize(&self) {
        *self.fail_next_materialize.lock().unwrap() = true;
    }

    pub fn fail_next_exists(&self) {
        *self.fail_next_exists.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn session_id_for(target: &WindowTarget) -> Option<String> {
        target
            .window
            .strip_prefix("job-")
            .map(|rest| rest.replace('-', "."))
    }
}

impl ExecutionContext for FakeContext {
    fn materialize(
        &self,
        target: &WindowTarget,
        command: &str,
        _cwd: &Path,
        _env: &HashMap<String, String>,
    ) -> Result<()> {
        if std::mem::take(&mut *self.fail_next_materialize.lock().unwrap()) {
            return Err(anyhow!("scripted materialize failure"));
        }
        self.record(format!("materialize {} {command}", target.window));
        self.existing.lock().unwrap().insert(target.clone());
        Ok(())
    }

    fn exists(&self, target: &WindowTarget) -> Result<bool> {
        if std::mem::take(&mut *self.fail_next_exists.lock().unwrap()) {
            return Err(anyhow!("scripted exists failure"));
        }
        Ok(self.existing.lock().unwrap().contains(target))
    }

    fn destroy(&self, target: &WindowTarget) -> Result<()> {
        self.record(format!("destroy {}", target.window));
        self.existing.lock().unwrap().remove(target);
        Ok(())
    }

    fn send_input(&self, target: &WindowTarget, _text: &str) -> Result<()> {
        self.record(format!("send_input {}", target.window));
        let completion = self.scripted.lock().unwrap().pop_front();
        if let Some(completion) = completion {
            let id = Self::session_id_for(target)
                .ok_or_else(|| anyhow!("unrecognized window name {}", target.window))?;
            match completion.state {
                SessionState::Failed => {
                    self.store.write_failed_reason(&id, &completion.result)?;
                }
                _ => {
                    self.store.write_result(&id, &completion.result)?;
                }
            }
            self.store.update_state(&id, completion.state)?;
        }
        Ok(())
    }
}

/// Summarizer fake that tags its input instead of calling an agent.
pub struct FakeSummarizer;

impl Summarizer for FakeSummarizer {
    fn summarize(&self, text: &str, _goal: &str, max_length: usize) -> Result<String> {
        let summary = format!("summary: {}", text.trim());
        let mut cut = summary.len().min(max_length);
        while !summary.is_char_boundary(cut) {
            cut -= 1;
        }
        Ok(summary[..cut].to_string())
    }
}
