//! Checker verdicts and the fallback-safe verdict parser.

use serde::{Deserialize, Serialize};

/// A checker's judgment of the doer's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accept,
    Retry,
    Terminate,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Accept => "accept",
            Verdict::Retry => "retry",
            Verdict::Terminate => "terminate",
        }
    }
}

/// Extract a verdict from free-form checker output.
///
/// Lines are scanned last-to-first; the keyword priority is
/// TERMINATE > ACCEPT > RETRY, case-insensitive, independent of position.
/// Ambiguous or missing verdicts never silently accept: no match means
/// `Retry`.
pub fn parse_verdict(text: &str) -> Verdict {
    let mut saw_accept = false;
    for line in text.lines().rev() {
        let upper = line.to_uppercase();
        if upper.contains("TERMINATE") {
            return Verdict::Terminate;
        }
        saw_accept |= upper.contains("ACCEPT");
    }
    if saw_accept { Verdict::Accept } else { Verdict::Retry }
}
