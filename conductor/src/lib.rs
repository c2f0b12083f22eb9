//! Single-host orchestrator for concurrent agent sessions.
//!
//! Conductor tracks units of agent work as durable sessions: each one is a
//! directory of per-field records plus, while active, a tmux window running
//! the agent. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (state machine, id arithmetic,
//!   dependency cycles, verdict parsing). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (session store, locks, tmux,
//!   subprocesses, file watching). Isolated to enable faking in tests.
//!
//! Orchestration modules ([`spawn`], [`looping`], [`wait`], [`abort`],
//! [`resume`], [`complete`], [`status`]) coordinate core logic with I/O to
//! implement CLI commands.

pub mod abort;
pub mod complete;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod resume;
pub mod spawn;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod wait;
