//! Session record and the closed session state machine.
//!
//! A session is one tracked unit of orchestrated work: a durable per-field
//! record on disk plus, while active, a live tmux window. States are a closed
//! enumeration; anything else on disk is rejected at the parse boundary.

use std::fmt;
use std::str::FromStr;

use anyhow::{Error, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a session. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Pending,
    Running,
    Done,
    Aborted,
    Failed,
    Exited,
    /// Completed earlier; the window was reclaimed but the record is kept.
    Evicted,
}

impl SessionState {
    /// On-disk token for the `state` file.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Running => "running",
            SessionState::Done => "done",
            SessionState::Aborted => "aborted",
            SessionState::Failed => "failed",
            SessionState::Exited => "exited",
            SessionState::Evicted => "evicted",
        }
    }

    /// True once the session can no longer make progress on its own.
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Pending | SessionState::Running)
    }

    /// True for terminal states that count as successful completion.
    pub fn is_success(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Evicted)
    }

    /// True for states whose sessions belong in the LRU cache while their
    /// window is still materialized.
    pub fn is_cache_eligible(self) -> bool {
        matches!(self, SessionState::Done)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(SessionState::Pending),
            "running" => Ok(SessionState::Running),
            "done" => Ok(SessionState::Done),
            "aborted" => Ok(SessionState::Aborted),
            "failed" => Ok(SessionState::Failed),
            "exited" => Ok(SessionState::Exited),
            "evicted" => Ok(SessionState::Evicted),
            other => Err(anyhow!("invalid session state '{other}'")),
        }
    }
}

/// Durable session record. One file per field under `sessions/<id>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Hierarchical dotted-decimal id ("0", "0.1", "0.1.2").
    pub id: String,
    /// One-line task description.
    pub task: String,
    /// Id of the enclosing session, empty for roots. Immutable after creation.
    pub parent: String,
    pub state: SessionState,
    /// Opaque execution handle (tmux window name), owned by the context
    /// provider and referenced here for lifecycle operations.
    pub window: String,
    pub created_at: DateTime<Utc>,
    /// Optional unique human-chosen label; empty means none.
    pub alias: String,
    /// Session ids that must reach a terminal state before this session's
    /// task logically begins. Advisory; enforced via the generated contract.
    pub depends_on: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_tokens_round_trip() {
        for state in [
            SessionState::Pending,
            SessionState::Running,
            SessionState::Done,
            SessionState::Aborted,
            SessionState::Failed,
            SessionState::Exited,
            SessionState::Evicted,
        ] {
            let parsed: SessionState = state.as_str().parse().expect("parse");
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn invalid_state_is_rejected() {
        let err = "sleeping".parse::<SessionState>().unwrap_err();
        assert!(err.to_string().contains("invalid session state"));
    }

    #[test]
    fn terminal_states_exclude_pending_and_running() {
        assert!(!SessionState::Pending.is_terminal());
        assert!(!SessionState::Running.is_terminal());
        assert!(SessionState::Done.is_terminal());
        assert!(SessionState::Aborted.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Exited.is_terminal());
        assert!(SessionState::Evicted.is_terminal());
    }

    #[test]
    fn only_done_is_cache_eligible() {
        assert!(SessionState::Done.is_cache_eligible());
        assert!(!SessionState::Evicted.is_cache_eligible());
        assert!(!SessionState::Failed.is_cache_eligible());
        assert!(!SessionState::Running.is_cache_eligible());
    }
}
