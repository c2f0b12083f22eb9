//! The poll operation: cheap status lines without result payloads.

use anyhow::{Result, anyhow};
use chrono::Utc;
use serde::Serialize;

use crate::core::session::Session;
use crate::io::store::{NotFoundError, SessionStore};

/// One poll line. Serialized as JSON; never includes the result text, so
/// polling stays cheap regardless of how much output a session produced.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub elapsed: String,
}

impl SessionStatus {
    fn from_session(session: &Session) -> Self {
        let elapsed_secs = (Utc::now() - session.created_at).num_seconds().max(0) as u64;
        Self {
            id: session.id.clone(),
            status: session.state.as_str().to_string(),
            alias: (!session.alias.is_empty()).then(|| session.alias.clone()),
            elapsed: format_elapsed(elapsed_secs),
        }
    }
}

/// Status for the referenced sessions, or every session when `all`.
pub fn poll_sessions(
    store: &SessionStore,
    references: &[String],
    all: bool,
) -> Result<Vec<SessionStatus>> {
    if all {
        return Ok(store
            .load_all()?
            .iter()
            .map(SessionStatus::from_session)
            .collect());
    }
    if references.is_empty() {
        return Err(anyhow!("poll needs session ids, aliases, or --all"));
    }
    let mut statuses = Vec::with_capacity(references.len());
    for reference in references {
        let id = store.resolve(reference)?.ok_or_else(|| {
            anyhow!(NotFoundError {
                reference: reference.clone(),
            })
        })?;
        let session = store.load(&id)?.ok_or_else(|| {
            anyhow!(NotFoundError { reference: id })
        })?;
        statuses.push(SessionStatus::from_session(&session));
    }
    Ok(statuses)
}

/// Humanize a duration in seconds ("5s", "3m20s", "2h5m").
fn format_elapsed(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let m = secs / 60;
        let s = secs % 60;
        if s == 0 { format!("{m}m") } else { format!("{m}m{s}s") }
    } else {
        let h = secs / 3600;
        let m = (secs % 3600) / 60;
        if m == 0 { format!("{h}h") } else { format!("{h}h{m}m") }
    }
}
