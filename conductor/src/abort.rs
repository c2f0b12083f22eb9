//! Abort a session tree: windows destroyed, records deleted.

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::io::context::window_target;
use crate::io::lru::LruCache;
use crate::io::store::NotFoundError;
use crate::spawn::OpsEnv;

/// Outcome of aborting a session tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortResult {
    /// Deleted session ids, deepest first, the requested session last.
    pub aborted_ids: Vec<String>,
    /// Non-fatal problems encountered along the way.
    pub warnings: Vec<String>,
}

/// Abort `reference` and every descendant.
///
/// Windows are destroyed best-effort: a window that cannot be killed becomes
/// a warning, never a stop, so a half-dead tree can always be cleaned up by
/// running abort again. Records are deleted deepest-first so a crash mid-way
/// leaves no orphaned child pointing at a missing ancestor.
#[instrument(skip_all, fields(reference))]
pub fn abort_session(env: &OpsEnv<'_>, lru: &LruCache, reference: &str) -> Result<AbortResult> {
    let id = env.store.resolve(reference)?.ok_or_else(|| {
        anyhow!(NotFoundError {
            reference: reference.to_string(),
        })
    })?;

    let mut ids: Vec<String> = env
        .store
        .descendants(&id)?
        .into_iter()
        .map(|s| s.id)
        .collect();
    ids.push(id.clone());

    let mut warnings = Vec::new();
    for sid in &ids {
        let window = match env.store.load(sid)? {
            Some(session) => session.window,
            None => continue,
        };
        let target = window_target(env.project_id, &window);
        match env.ctx.exists(&target) {
            Ok(true) => {
                if let Err(err) = env.ctx.destroy(&target) {
                    warn!(session = %sid, err = %err, "failed to destroy window");
                    warnings.push(format!("session {sid}: {err:#}"));
                }
            }
            Ok(false) => {}
            Err(err) => {
                warnings.push(format!("session {sid}: window check failed: {err:#}"));
            }
        }
    }

    for sid in &ids {
        lru.remove(env.project_id, sid)?;
        match env.store.delete(sid) {
            Ok(()) => {}
            Err(err) if err.downcast_ref::<NotFoundError>().is_some() => {}
            Err(err) => return Err(err),
        }
    }

    info!(id, count = ids.len(), "session tree aborted");
    Ok(AbortResult {
        aborted_ids: ids,
        warnings,
    })
}
