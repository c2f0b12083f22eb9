//! I/O helpers for orchestrator commands.

pub mod config;
pub mod context;
pub mod contract;
pub mod lockfile;
pub mod lru;
pub mod process;
pub mod project;
pub mod store;
pub mod summarize;
pub mod watch;
