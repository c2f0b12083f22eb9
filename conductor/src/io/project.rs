//! Project identification and storage directory resolution.
//!
//! Session stores are scoped per project; the LRU cache and config are
//! global. Tests and scripts can redirect both through environment
//! variables, so the library itself never touches the home directory
//! implicitly.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use sha2::{Digest, Sha256};

/// Overrides the per-project store base directory.
pub const DATA_DIR_ENV: &str = "CONDUCTOR_DATA_DIR";
/// Overrides the global directory holding the LRU cache and config.
pub const HOME_ENV: &str = "CONDUCTOR_HOME";
/// Set inside spawned windows; identifies the enclosing session for
/// child-id allocation.
pub const SESSION_ID_ENV: &str = "CONDUCTOR_SESSION_ID";

/// Stable identifier for a project root: `dirname-<first 8 hex of sha256>`.
pub fn project_identifier(root: &Path) -> String {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());
    let hash = format!("{:x}", Sha256::digest(root.to_string_lossy().as_bytes()));
    format!("{name}-{}", &hash[..8])
}

/// Global conductor directory (`$CONDUCTOR_HOME` or `~/.conductor`).
pub fn global_dir() -> Result<PathBuf> {
    if let Ok(dir) = env::var(HOME_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(home.join(".conductor"))
}

/// Store base directory for a known project identifier.
pub fn project_data_dir(project_id: &str) -> Result<PathBuf> {
    Ok(global_dir()?.join("projects").join(project_id))
}

/// Store base directory for the current invocation.
///
/// `$CONDUCTOR_DATA_DIR` wins; otherwise the project directory derived from
/// the current working directory.
pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let cwd = env::current_dir().context("determine current directory")?;
    project_data_dir(&project_identifier(&cwd))
}

/// Parent session id inferred from the environment, empty outside a session.
pub fn parent_from_env() -> String {
    env::var(SESSION_ID_ENV).unwrap_or_default()
}
