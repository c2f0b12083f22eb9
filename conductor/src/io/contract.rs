//! Contract rendering for sessions, checkers, and retries.
//!
//! Contracts are the markdown prompts delivered to a freshly materialized
//! window. They are rendered from embedded templates so the wording lives in
//! one reviewable place.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::verdict::Verdict;

const CONTRACT_TEMPLATE: &str = include_str!("templates/contract.md");
const CHECKER_TEMPLATE: &str = include_str!("templates/checker.md");
const RETRY_TEMPLATE: &str = include_str!("templates/retry.md");

/// One prior doer/checker round, shown to later checker invocations.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub iteration: u32,
    pub verdict: String,
    pub feedback: String,
}

impl HistoryEntry {
    pub fn new(iteration: u32, verdict: Verdict, feedback: &str) -> Self {
        Self {
            iteration,
            verdict: verdict.as_str().to_string(),
            feedback: feedback.to_string(),
        }
    }
}

struct ContractEngine {
    env: Environment<'static>,
}

impl ContractEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("contract", CONTRACT_TEMPLATE)
            .expect("contract template should be valid");
        env.add_template("checker", CHECKER_TEMPLATE)
            .expect("checker template should be valid");
        env.add_template("retry", RETRY_TEMPLATE)
            .expect("retry template should be valid");
        Self { env }
    }
}

/// Initial instructions for a spawned session.
pub fn render_session(task: &str, depends_on: &[String], verify: &[String]) -> Result<String> {
    let engine = ContractEngine::new();
    let template = engine.env.get_template("contract")?;
    let rendered = template.render(context! {
        task => task.trim(),
        depends_on => (!depends_on.is_empty()).then_some(depends_on),
        verify => (!verify.is_empty()).then_some(verify),
    })?;
    Ok(rendered)
}

/// Prompt for a checker session or agent invocation.
pub fn render_checker(
    criteria: &str,
    doer_summary: &str,
    iteration: u32,
    max_iterations: u32,
    history: &[HistoryEntry],
) -> Result<String> {
    let engine = ContractEngine::new();
    let template = engine.env.get_template("checker")?;
    let rendered = template.render(context! {
        criteria => criteria.trim(),
        doer_summary => doer_summary.trim(),
        iteration,
        max_iterations,
        history => (!history.is_empty()).then_some(history),
    })?;
    Ok(rendered)
}

/// Prompt for a retry doer after a `retry` verdict.
pub fn render_retry(task: &str, prior_summary: &str, feedback: &str) -> Result<String> {
    let engine = ContractEngine::new();
    let template = engine.env.get_template("retry")?;
    let rendered = template.render(context! {
        task => task.trim(),
        prior_summary => prior_summary.trim(),
        feedback => feedback.trim(),
    })?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_contract_includes_wait_block_for_dependencies() {
        let deps = vec!["1".to_string(), "2.0".to_string()];
        let rendered = render_session("build the parser", &deps, &[]).expect("render");
        assert!(rendered.contains("# Dependencies"));
        assert!(rendered.contains("conductor wait 1 2.0"));
        assert!(rendered.contains("# Task"));
        assert!(rendered.contains("build the parser"));
        assert!(!rendered.contains("# Verification"));
    }

    #[test]
    fn session_contract_without_dependencies_starts_at_task() {
        let rendered = render_session("fix the bug", &[], &[]).expect("render");
        assert!(!rendered.contains("# Dependencies"));
        assert!(rendered.trim_start().starts_with("# Task"));
    }

    #[test]
    fn session_contract_lists_verification_criteria() {
        let verify = vec!["tests pass".to_string(), "no clippy warnings".to_string()];
        let rendered = render_session("refactor", &[], &verify).expect("render");
        assert!(rendered.contains("# Verification"));
        assert!(rendered.contains("- tests pass"));
        assert!(rendered.contains("- no clippy warnings"));
    }

    #[test]
    fn checker_contract_carries_protocol_and_history() {
        let history = vec![HistoryEntry::new(1, Verdict::Retry, "missing edge case")];
        let rendered =
            render_checker("all tests green", "did the thing", 2, 3, &history).expect("render");
        assert!(rendered.contains("`ACCEPT`"));
        assert!(rendered.contains("`RETRY`"));
        assert!(rendered.contains("`TERMINATE`"));
        assert!(rendered.contains("all tests green"));
        assert!(rendered.contains("did the thing"));
        assert!(rendered.contains("iteration 2 of 3"));
        assert!(rendered.contains("Iteration 1: **RETRY**"));
        assert!(rendered.contains("missing edge case"));
    }

    #[test]
    fn first_checker_iteration_omits_history_section() {
        let rendered = render_checker("criteria", "summary", 1, 3, &[]).expect("render");
        assert!(!rendered.contains("# Prior Iterations"));
    }

    #[test]
    fn retry_prompt_combines_task_summary_and_feedback() {
        let rendered =
            render_retry("write docs", "wrote half the docs", "finish the API section")
                .expect("render");
        assert!(rendered.contains("# Task"));
        assert!(rendered.contains("write docs"));
        assert!(rendered.contains("# Previous Attempt"));
        assert!(rendered.contains("wrote half the docs"));
        assert!(rendered.contains("# Checker Feedback"));
        assert!(rendered.contains("finish the API section"));
        assert!(rendered.contains("# Instruction"));
    }
}
