//! Execution context provider: where session work actually runs.
//!
//! The orchestrator core never talks to tmux directly; it goes through the
//! [`ExecutionContext`] trait so tests can substitute a fake. The real
//! implementation keeps one detached tmux session per project and one window
//! per conductor session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Addressable location for one session's window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowTarget {
    /// Enclosing tmux session, one per project.
    pub session: String,
    /// Window within that session.
    pub window: String,
}

impl WindowTarget {
    fn tmux_ref(&self) -> String {
        format!("{}:{}", self.session, self.window)
    }
}

/// Window name for a session id ("0.1.2" becomes "job-0-1-2").
pub fn window_name(session_id: &str) -> String {
    format!("job-{}", session_id.replace('.', "-"))
}

/// Target within the per-project tmux session.
pub fn window_target(project_id: &str, window: &str) -> WindowTarget {
    WindowTarget {
        session: format!("conductor-{project_id}"),
        window: window.to_string(),
    }
}

/// Where sessions are materialized and fed input.
pub trait ExecutionContext {
    /// Create the window and start `command` in it, with `cwd` as working
    /// directory and `env` prepended to the command environment.
    fn materialize(
        &self,
        target: &WindowTarget,
        command: &str,
        cwd: &Path,
        env: &HashMap<String, String>,
    ) -> Result<()>;

    fn exists(&self, target: &WindowTarget) -> Result<bool>;

    /// Tear the window down. Must succeed when the window is already gone.
    fn destroy(&self, target: &WindowTarget) -> Result<()>;

    /// Deliver `text` to the process in the window, followed by a newline.
    fn send_input(&self, target: &WindowTarget, text: &str) -> Result<()>;
}

/// tmux-backed execution context.
#[derive(Debug, Clone)]
pub struct TmuxContext {
    workdir: PathBuf,
}

impl TmuxContext {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    fn session_exists(&self, session: &str) -> Result<bool> {
        let output = self.run(&["has-session", "-t", session])?;
        Ok(output.status.success())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("tmux {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("tmux")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn tmux {}", args.join(" ")))
    }
}

impl ExecutionContext for TmuxContext {
    #[instrument(skip_all, fields(window = %target.window))]
    fn materialize(
        &self,
        target: &WindowTarget,
        command: &str,
        cwd: &Path,
        env: &HashMap<String, String>,
    ) -> Result<()> {
        // Environment travels as a command prefix; tmux windows do not
        // inherit the caller's environment once the server is running.
        let mut full_command = String::new();
        let mut keys: Vec<&String> = env.keys().collect();
        keys.sort();
        for key in keys {
            full_command.push_str(&format!("{key}={} ", shell_quote(&env[key])));
        }
        full_command.push_str(command);

        let cwd_str = cwd.to_string_lossy();
        if self.session_exists(&target.session)? {
            debug!(session = %target.session, "creating window in existing tmux session");
            self.run_checked(&[
                "new-window",
                "-d",
                "-t",
                &target.session,
                "-n",
                &target.window,
                "-c",
                &cwd_str,
                &full_command,
            ])?;
        } else {
            debug!(session = %target.session, "creating tmux session");
            self.run_checked(&[
                "new-session",
                "-d",
                "-s",
                &target.session,
                "-n",
                &target.window,
                "-c",
                &cwd_str,
                &full_command,
            ])?;
        }
        Ok(())
    }

    fn exists(&self, target: &WindowTarget) -> Result<bool> {
        if !self.session_exists(&target.session)? {
            return Ok(false);
        }
        let output = self.run_checked(&[
            "list-windows",
            "-t",
            &target.session,
            "-F",
            "#{window_name}",
        ])?;
        let names = String::from_utf8_lossy(&output.stdout);
        Ok(names.lines().any(|name| name.trim() == target.window))
    }

    fn destroy(&self, target: &WindowTarget) -> Result<()> {
        let tmux_ref = target.tmux_ref();
        let output = self.run(&["kill-window", "-t", &tmux_ref])?;
        if !output.status.success() {
            // Already-gone windows are fine; that is the common race.
            warn!(window = %tmux_ref, "kill-window reported failure (window likely gone)");
        }
        Ok(())
    }

    fn send_input(&self, target: &WindowTarget, text: &str) -> Result<()> {
        let tmux_ref = target.tmux_ref();
        // Literal text first, Enter as a separate keypress.
        self.run_checked(&["send-keys", "-t", &tmux_ref, "-l", text])?;
        self.run_checked(&["send-keys", "-t", &tmux_ref, "Enter"])?;
        Ok(())
    }
}

fn shell_quote(value: &str) -> String {
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:".contains(c))
    {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_names_replace_dots_with_dashes() {
        assert_eq!(window_name("0"), "job-0");
        assert_eq!(window_name("0.1.2"), "job-0-1-2");
    }

    #[test]
    fn window_target_scopes_to_project_session() {
        let target = window_target("widget-abc12345", "job-0");
        assert_eq!(target.session, "conductor-widget-abc12345");
        assert_eq!(target.tmux_ref(), "conductor-widget-abc12345:job-0");
    }

    #[test]
    fn shell_quote_passes_safe_values_through() {
        assert_eq!(shell_quote("0.1"), "0.1");
        assert_eq!(shell_quote("/tmp/x"), "/tmp/x");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
