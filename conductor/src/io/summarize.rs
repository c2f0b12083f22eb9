//! Result summarization via the agent CLI.
//!
//! Summaries feed the checker prompt and the `wait --summary` output. The
//! capability is a trait so the loop engine stays testable with a
//! deterministic fake; the real implementation shells out to the agent
//! binary in print mode with a hard timeout.

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::run_command_with_timeout;
use crate::io::project::SESSION_ID_ENV;

/// Turns long free-form text into a short summary toward a stated goal.
pub trait Summarizer {
    fn summarize(&self, text: &str, goal: &str, max_length: usize) -> Result<String>;
}

/// Summarizer backed by `<agent_command> -p`.
#[derive(Debug, Clone)]
pub struct AgentCliSummarizer {
    agent_command: String,
    timeout: Duration,
}

impl AgentCliSummarizer {
    pub fn new(agent_command: &str, timeout_secs: u64) -> Self {
        Self {
            agent_command: agent_command.to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl Summarizer for AgentCliSummarizer {
    #[instrument(skip_all, fields(max_length))]
    fn summarize(&self, text: &str, goal: &str, max_length: usize) -> Result<String> {
        let mut cmd = Command::new(&self.agent_command);
        cmd.arg("-p").arg(format!("{goal}\n\n{text}"));
        // The summarizer must not look like a tracked session to lifecycle
        // hooks running inside the agent.
        cmd.env_remove(SESSION_ID_ENV);

        let output = run_command_with_timeout(cmd, self.timeout, 1024 * 1024)?;
        if output.timed_out {
            return Err(anyhow!("summarizer timed out"));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "summarizer exited with {:?}: {}",
                output.status.code(),
                output.stderr_text().trim()
            ));
        }
        let summary = output.stdout_text().trim().to_string();
        if summary.is_empty() {
            return Err(anyhow!("summarizer produced no output"));
        }
        if summary.len() > max_length {
            return Err(anyhow!(
                "summary length {} exceeds limit {max_length}",
                summary.len()
            ));
        }
        debug!(len = summary.len(), "summary produced");
        Ok(summary)
    }
}

/// Summarize with a raw-truncation fallback; never fails.
pub fn summarize_or_truncate(
    summarizer: &dyn Summarizer,
    text: &str,
    goal: &str,
    max_length: usize,
) -> String {
    match summarizer.summarize(text, goal, max_length) {
        Ok(summary) => summary,
        Err(err) => {
            warn!(err = %err, "summarization failed, truncating raw text");
            truncate(text, max_length)
        }
    }
}

fn truncate(text: &str, max_length: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= max_length {
        return trimmed.to_string();
    }
    let mut cut = max_length;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    trimmed[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSummarizer;

    impl Summarizer for FailingSummarizer {
        fn summarize(&self, _text: &str, _goal: &str, _max_length: usize) -> Result<String> {
            Err(anyhow!("unavailable"))
        }
    }

    struct EchoSummarizer;

    impl Summarizer for EchoSummarizer {
        fn summarize(&self, text: &str, _goal: &str, _max_length: usize) -> Result<String> {
            Ok(format!("summary of {} bytes", text.len()))
        }
    }

    #[test]
    fn fallback_truncates_on_error() {
        let text = "x".repeat(500);
        let out = summarize_or_truncate(&FailingSummarizer, &text, "goal", 100);
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn fallback_respects_char_boundaries() {
        let text = "é".repeat(100);
        let out = summarize_or_truncate(&FailingSummarizer, &text, "goal", 101);
        assert!(out.len() <= 101);
        assert!(out.chars().all(|c| c == 'é'));
    }

    #[test]
    fn successful_summaries_pass_through() {
        let out = summarize_or_truncate(&EchoSummarizer, "abc", "goal", 100);
        assert_eq!(out, "summary of 3 bytes");
    }
}
