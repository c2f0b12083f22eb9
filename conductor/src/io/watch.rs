//! Blocking wait for sessions to reach a terminal state.
//!
//! Uses a filesystem watcher on the session directories so state changes are
//! picked up promptly, with a periodic full re-scan as a fallback for missed
//! events. Event payloads are ignored; every wake re-reads the states from
//! disk, which is cheap at this scale and immune to watcher coalescing.

use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use notify::{RecursiveMode, Watcher};
use tracing::{debug, instrument, warn};

use crate::core::session::SessionState;
use crate::io::store::SessionStore;

const RESCAN_INTERVAL: Duration = Duration::from_millis(500);

/// Block until every listed session is terminal; returns their final states
/// in the same order.
///
/// Returns immediately when all sessions are already terminal. Errors if a
/// session disappears mid-wait (aborted and deleted by another process).
#[instrument(skip_all, fields(count = ids.len()))]
pub fn wait_for_terminal(store: &SessionStore, ids: &[String]) -> Result<Vec<SessionState>> {
    if let Some(states) = scan(store, ids)? {
        debug!("all sessions already terminal");
        return Ok(states);
    }

    // Watch each session directory; atomic field replaces surface as rename
    // events inside the directory.
    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(
        move |result: std::result::Result<notify::Event, notify::Error>| {
            let _ = tx.send(result);
        },
    )
    .context("create session watcher")?;
    for id in ids {
        let dir = store.session_dir(id);
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch session directory {}", dir.display()))?;
    }

    loop {
        match rx.recv_timeout(RESCAN_INTERVAL) {
            Ok(Ok(_event)) => {}
            Ok(Err(err)) => warn!(err = %err, "session watcher error"),
            // Timeout falls through to the periodic re-scan.
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(anyhow!("session watcher channel closed"));
            }
        }
        if let Some(states) = scan(store, ids)? {
            return Ok(states);
        }
    }
}

/// One pass over the watched sessions: `Some(states)` when all terminal.
fn scan(store: &SessionStore, ids: &[String]) -> Result<Option<Vec<SessionState>>> {
    let mut states = Vec::with_capacity(ids.len());
    for id in ids {
        let session = store
            .load(id)?
            .ok_or_else(|| anyhow!("session {id} disappeared while waiting"))?;
        if !session.state.is_terminal() {
            return Ok(None);
        }
        states.push(session.state);
    }
    Ok(Some(states))
}
