//! Global LRU cache of materialized completed sessions.
//!
//! Running sessions stay materialized indefinitely; completed (`done`)
//! sessions are capped. Eviction destroys the window but keeps the session
//! record on disk. The cache is one versioned JSON file shared across all
//! projects, guarded by its own advisory lock. Selection of eviction victims
//! happens under the lock; the destructive work happens after release, so the
//! cache lock is never held across a window kill.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::io::context::{ExecutionContext, window_name, window_target};
use crate::io::lockfile::with_exclusive_lock;
use crate::io::store::write_atomic;

const CACHE_VERSION: u32 = 1;

/// One completed session known to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub project_id: String,
    pub session_id: String,
    pub last_accessed: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: Vec<CacheEntry>,
}

impl Default for CacheFile {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            entries: Vec::new(),
        }
    }
}

/// Handle to the shared `lru_cache.json`.
#[derive(Debug, Clone)]
pub struct LruCache {
    cache_path: PathBuf,
    lock_path: PathBuf,
}

impl LruCache {
    /// Cache rooted in the global conductor directory.
    pub fn new(global_dir: &Path) -> Self {
        Self {
            cache_path: global_dir.join("lru_cache.json"),
            lock_path: global_dir.join("lru_cache.lock"),
        }
    }

    /// Current entries. Missing, unreadable, or version-mismatched files all
    /// read as empty; the cache is advisory and self-heals on the next write.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.read_unlocked().entries)
    }

    /// Refresh `last_accessed` for an existing entry. No-op when absent.
    pub fn touch(&self, project_id: &str, session_id: &str) -> Result<()> {
        with_exclusive_lock(&self.lock_path, || {
            let mut cache = self.read_unlocked();
            let mut changed = false;
            for entry in &mut cache.entries {
                if entry.project_id == project_id && entry.session_id == session_id {
                    entry.last_accessed = Utc::now();
                    changed = true;
                }
            }
            if changed {
                self.write_unlocked(&cache)?;
            }
            Ok(())
        })
    }

    /// Insert a completed session, or refresh it if already present.
    pub fn add_or_touch(&self, project_id: &str, session_id: &str) -> Result<()> {
        with_exclusive_lock(&self.lock_path, || {
            let mut cache = self.read_unlocked();
            for entry in &mut cache.entries {
                if entry.project_id == project_id && entry.session_id == session_id {
                    entry.last_accessed = Utc::now();
                    self.write_unlocked(&cache)?;
                    return Ok(());
                }
            }
            cache.entries.push(CacheEntry {
                project_id: project_id.to_string(),
                session_id: session_id.to_string(),
                last_accessed: Utc::now(),
            });
            self.write_unlocked(&cache)
        })
    }

    /// Drop an entry. Idempotent.
    pub fn remove(&self, project_id: &str, session_id: &str) -> Result<()> {
        with_exclusive_lock(&self.lock_path, || {
            let mut cache = self.read_unlocked();
            let before = cache.entries.len();
            cache
                .entries
                .retain(|e| !(e.project_id == project_id && e.session_id == session_id));
            if cache.entries.len() != before {
                self.write_unlocked(&cache)?;
            }
            Ok(())
        })
    }

    /// Evict one session: destroy its window if present, then drop the cache
    /// entry. The session record on disk is untouched; the caller marks it
    /// `evicted` separately. Returns whether a window was actually destroyed.
    pub fn evict(
        &self,
        ctx: &dyn ExecutionContext,
        project_id: &str,
        session_id: &str,
    ) -> Result<bool> {
        let target = window_target(project_id, &window_name(session_id));
        let mut destroyed = false;
        match ctx.exists(&target) {
            Ok(true) => match ctx.destroy(&target) {
                Ok(()) => destroyed = true,
                // The window may have been reclaimed concurrently.
                Err(err) => warn!(session_id, err = %err, "evict: destroy window failed"),
            },
            Ok(false) => {}
            // A failed existence check gets the failed-destroy treatment: the
            // entry still leaves the cache.
            Err(err) => warn!(session_id, err = %err, "evict: window check failed"),
        }
        self.remove(project_id, session_id)?;
        debug!(project_id, session_id, destroyed, "session evicted");
        Ok(destroyed)
    }

    /// Evict oldest entries until at most `limit` remain. Negative `limit`
    /// disables eviction. Victim selection runs under the cache lock; the
    /// destructive phase runs after release, so a concurrent evictor at worst
    /// double-evicts, which is a no-op.
    pub fn check_and_evict(
        &self,
        ctx: &dyn ExecutionContext,
        limit: i64,
    ) -> Result<Vec<(String, String)>> {
        if limit < 0 {
            return Ok(Vec::new());
        }
        let to_evict = with_exclusive_lock(&self.lock_path, || {
            let cache = self.read_unlocked();
            if cache.entries.len() <= limit as usize {
                return Ok(Vec::new());
            }
            let mut sorted = cache.entries;
            sorted.sort_by(|a, b| a.last_accessed.cmp(&b.last_accessed));
            let count = sorted.len() - limit as usize;
            Ok(sorted
                .into_iter()
                .take(count)
                .map(|e| (e.project_id, e.session_id))
                .collect::<Vec<_>>())
        })?;

        for (project_id, session_id) in &to_evict {
            self.evict(ctx, project_id, session_id)?;
        }
        Ok(to_evict)
    }

    fn read_unlocked(&self) -> CacheFile {
        let raw = match fs::read_to_string(&self.cache_path) {
            Ok(raw) if !raw.trim().is_empty() => raw,
            _ => return CacheFile::default(),
        };
        match serde_json::from_str::<CacheFile>(&raw) {
            Ok(cache) if cache.version == CACHE_VERSION => cache,
            Ok(cache) => {
                warn!(version = cache.version, "lru cache version mismatch, resetting");
                CacheFile::default()
            }
            Err(err) => {
                warn!(err = %err, "lru cache unreadable, resetting");
                CacheFile::default()
            }
        }
    }

    fn write_unlocked(&self, cache: &CacheFile) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(cache).context("serialize lru cache")?;
        buf.push('\n');
        write_atomic(&self.cache_path, &buf)
    }
}
