//! Durable per-project session store.
//!
//! Every session is a directory of single-purpose files, one per field, each
//! replaced atomically (temp file + rename). Readers therefore never observe
//! a torn composite record; a concurrent writer can at worst make two fields
//! reflect different moments in time, which the state machine tolerates.
//!
//! Id allocation is the only locked operation. Everything else relies on the
//! atomic single-file replace.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::ids::{child_id, direct_child_index, is_descendant};
use crate::core::session::{Session, SessionState};
use crate::io::lockfile::with_exclusive_lock;

/// A session reference that resolved to nothing.
#[derive(Debug)]
pub struct NotFoundError {
    pub reference: String,
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session not found: {} (run `conductor poll --all` to list sessions and aliases)",
            self.reference
        )
    }
}

impl std::error::Error for NotFoundError {}

/// A dependency edge that would make the graph cyclic.
#[derive(Debug)]
pub struct CycleError {
    pub dependency: String,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "depending on {} would create a cycle; \
             remove it or depend on a different session",
            self.dependency
        )
    }
}

impl std::error::Error for CycleError {}

/// Canonical locations inside a store base directory.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub base: PathBuf,
    pub next_id: PathBuf,
    pub next_id_lock: PathBuf,
    pub sessions: PathBuf,
}

impl StorePaths {
    pub fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            next_id: base.join("next_id"),
            next_id_lock: base.join("next_id.lock"),
            sessions: base.join("sessions"),
        }
    }
}

/// Handle to one project's session records.
#[derive(Debug, Clone)]
pub struct SessionStore {
    paths: StorePaths,
}

impl SessionStore {
    pub fn new(base: &Path) -> Self {
        Self {
            paths: StorePaths::new(base),
        }
    }

    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.paths.sessions.join(id)
    }

    pub fn loop_state_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("loop_state.json")
    }

    /// Allocate the next session id under the store lock.
    ///
    /// Root ids come from the persisted `next_id` counter. Child ids come
    /// from scanning the parent's existing direct children; grandchildren
    /// are filtered out by requiring no further dot in the suffix. The lock
    /// covers only this read-modify-write, never the caller's follow-up I/O.
    pub fn allocate_id(&self, parent: &str) -> Result<String> {
        with_exclusive_lock(&self.paths.next_id_lock, || {
            if parent.is_empty() {
                let current: u64 = if self.paths.next_id.exists() {
                    fs::read_to_string(&self.paths.next_id)
                        .with_context(|| {
                            format!("read counter {}", self.paths.next_id.display())
                        })?
                        .trim()
                        .parse()
                        .with_context(|| {
                            format!("parse counter {}", self.paths.next_id.display())
                        })?
                } else {
                    0
                };
                write_atomic(&self.paths.next_id, &(current + 1).to_string())?;
                Ok(current.to_string())
            } else {
                let mut max_child: i64 = -1;
                if self.paths.sessions.exists() {
                    for entry in fs::read_dir(&self.paths.sessions)
                        .with_context(|| {
                            format!("scan sessions {}", self.paths.sessions.display())
                        })?
                    {
                        let entry = entry.context("read sessions entry")?;
                        let name = entry.file_name().to_string_lossy().into_owned();
                        if let Some(index) = direct_child_index(parent, &name) {
                            max_child = max_child.max(index as i64);
                        }
                    }
                }
                Ok(child_id(parent, (max_child + 1) as u64))
            }
        })
    }

    /// Persist a session, one atomic file per field.
    pub fn save(&self, session: &Session) -> Result<()> {
        let dir = self.session_dir(&session.id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("create session directory {}", dir.display()))?;
        write_atomic(&dir.join("task"), &session.task)?;
        write_atomic(&dir.join("state"), session.state.as_str())?;
        write_atomic(&dir.join("parent"), &session.parent)?;
        write_atomic(&dir.join("window"), &session.window)?;
        write_atomic(&dir.join("created_at"), &session.created_at.to_rfc3339())?;
        write_atomic(&dir.join("alias"), &session.alias)?;
        if session.depends_on.is_empty() {
            let path = dir.join("depends_on");
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("remove {}", path.display()))?;
            }
        } else {
            write_atomic(&dir.join("depends_on"), &session.depends_on.join(","))?;
        }
        debug!(id = %session.id, state = %session.state, "session saved");
        Ok(())
    }

    /// Load a session, `None` when its directory does not exist.
    ///
    /// Records written before `alias`/`depends_on` existed load with those
    /// fields empty. An unknown state token is an error, not a default.
    pub fn load(&self, id: &str) -> Result<Option<Session>> {
        let dir = self.session_dir(id);
        if !dir.is_dir() {
            return Ok(None);
        }
        let state: SessionState = read_field(&dir, "state")?
            .trim()
            .parse()
            .with_context(|| format!("session {id} has an invalid state file"))?;
        let created_raw = read_field(&dir, "created_at")?;
        let created_at = DateTime::parse_from_rfc3339(created_raw.trim())
            .with_context(|| format!("session {id} has an invalid created_at file"))?
            .with_timezone(&Utc);
        let depends_on = match read_optional_field(&dir, "depends_on")? {
            Some(raw) => raw
                .trim()
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        };
        Ok(Some(Session {
            id: id.to_string(),
            task: read_field(&dir, "task")?,
            parent: read_field(&dir, "parent")?.trim().to_string(),
            state,
            window: read_field(&dir, "window")?.trim().to_string(),
            created_at,
            alias: read_optional_field(&dir, "alias")?
                .unwrap_or_default()
                .trim()
                .to_string(),
            depends_on,
        }))
    }

    /// All sessions, sorted by creation time ascending.
    pub fn load_all(&self) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        if !self.paths.sessions.is_dir() {
            return Ok(sessions);
        }
        for entry in fs::read_dir(&self.paths.sessions)
            .with_context(|| format!("scan sessions {}", self.paths.sessions.display()))?
        {
            let entry = entry.context("read sessions entry")?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            if let Some(session) = self.load(&id)? {
                sessions.push(session);
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(sessions)
    }

    /// Resolve an id or alias to a session id.
    ///
    /// A direct id match takes precedence over an alias match, so an alias
    /// that textually collides with another session's id never shadows it.
    pub fn resolve(&self, reference: &str) -> Result<Option<String>> {
        if self.session_dir(reference).is_dir() {
            return Ok(Some(reference.to_string()));
        }
        for session in self.load_all()? {
            if !session.alias.is_empty() && session.alias == reference {
                return Ok(Some(session.id));
            }
        }
        Ok(None)
    }

    pub fn update_state(&self, id: &str, state: SessionState) -> Result<()> {
        let dir = self.session_dir(id);
        if !dir.is_dir() {
            return Err(anyhow!(NotFoundError {
                reference: id.to_string(),
            }));
        }
        write_atomic(&dir.join("state"), state.as_str())?;
        debug!(id, state = %state, "session state updated");
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let dir = self.session_dir(id);
        if !dir.is_dir() {
            return Err(anyhow!(NotFoundError {
                reference: id.to_string(),
            }));
        }
        fs::remove_dir_all(&dir)
            .with_context(|| format!("remove session directory {}", dir.display()))?;
        Ok(())
    }

    /// Strict descendants of `id`, deepest first.
    pub fn descendants(&self, id: &str) -> Result<Vec<Session>> {
        let mut found: Vec<Session> = self
            .load_all()?
            .into_iter()
            .filter(|s| is_descendant(id, &s.id))
            .collect();
        found.sort_by(|a, b| {
            crate::core::ids::depth(&b.id)
                .cmp(&crate::core::ids::depth(&a.id))
                .then(a.id.cmp(&b.id))
        });
        Ok(found)
    }

    /// Declared dependencies of `id`, empty when the session is missing.
    pub fn get_dependencies(&self, id: &str) -> Result<Vec<String>> {
        Ok(self
            .load(id)?
            .map(|s| s.depends_on)
            .unwrap_or_default())
    }

    pub fn result_text(&self, id: &str) -> Result<Option<String>> {
        read_optional_field(&self.session_dir(id), "result")
    }

    pub fn write_result(&self, id: &str, text: &str) -> Result<()> {
        write_atomic(&self.session_dir(id).join("result"), text)
    }

    pub fn failed_reason(&self, id: &str) -> Result<Option<String>> {
        read_optional_field(&self.session_dir(id), "failed_reason")
    }

    pub fn write_failed_reason(&self, id: &str, text: &str) -> Result<()> {
        write_atomic(&self.session_dir(id).join("failed_reason"), text)
    }

    pub fn write_contract(&self, id: &str, text: &str) -> Result<()> {
        write_atomic(&self.session_dir(id).join("contract.md"), text)
    }

    pub fn agent_id(&self, id: &str) -> Result<Option<String>> {
        Ok(read_optional_field(&self.session_dir(id), "agent_id")?
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    pub fn write_agent_id(&self, id: &str, agent_id: &str) -> Result<()> {
        write_atomic(&self.session_dir(id).join("agent_id"), agent_id)
    }
}

fn read_field(dir: &Path, name: &str) -> Result<String> {
    let path = dir.join(name);
    fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
}

fn read_optional_field(dir: &Path, name: &str) -> Result<Option<String>> {
    let path = dir.join(name);
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(fs::read_to_string(&path).with_context(|| {
        format!("read {}", path.display())
    })?))
}

/// Atomically replace `path` with `contents` (temp file + rename).
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
