//! Global configuration, loaded from `config.toml` in the conductor home.
//!
//! Every field has a default so a missing or partial file still yields a
//! usable configuration. Validation happens once at load time; the rest of
//! the code treats the struct as trusted.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Runtime knobs for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Completed sessions kept materialized before LRU eviction. Negative
    /// disables eviction entirely.
    pub max_completed_sessions: i64,
    /// Executable launched in each session window.
    pub agent_command: String,
    /// Wall-clock bound for a command checker, in seconds.
    pub checker_timeout_secs: u64,
    /// Bytes of checker stdout/stderr retained before truncation.
    pub checker_output_limit_bytes: usize,
    /// Character budget for generated result summaries.
    pub summary_max_length: usize,
    /// Wall-clock bound for the summarizer subprocess, in seconds.
    pub summary_timeout_secs: u64,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            max_completed_sessions: 5,
            agent_command: "claude".to_string(),
            checker_timeout_secs: 600,
            checker_output_limit_bytes: 100_000,
            summary_max_length: 300,
            summary_timeout_secs: 30,
        }
    }
}

impl ConductorConfig {
    fn validate(&self) -> Result<()> {
        if self.agent_command.trim().is_empty() {
            bail!("agent_command must not be empty");
        }
        if self.checker_timeout_secs == 0 {
            bail!("checker_timeout_secs must be positive");
        }
        if self.summary_max_length == 0 {
            bail!("summary_max_length must be positive");
        }
        Ok(())
    }

    /// True when the cache limit permits any materialized completed session
    /// to be evicted.
    pub fn eviction_enabled(&self) -> bool {
        self.max_completed_sessions >= 0
    }
}

/// Load configuration from `<global_dir>/config.toml`, falling back to
/// defaults when the file does not exist.
pub fn load_config(global_dir: &Path) -> Result<ConductorConfig> {
    let path = global_dir.join("config.toml");
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(ConductorConfig::default());
    }
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("read config {}", path.display()))?;
    let config: ConductorConfig =
        toml::from_str(&raw).with_context(|| format!("parse config {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Serialize `config` to `<global_dir>/config.toml`.
pub fn write_config(global_dir: &Path, config: &ConductorConfig) -> Result<()> {
    fs::create_dir_all(global_dir)
        .with_context(|| format!("create config directory {}", global_dir.display()))?;
    let path = global_dir.join("config.toml");
    let raw = toml::to_string_pretty(config).context("serialize config")?;
    fs::write(&path, raw).with_context(|| format!("write config {}", path.display()))?;
    Ok(())
}
