//! Stable exit codes for conductor CLI commands.

/// Command succeeded; all waited sessions completed successfully.
pub const OK: i32 = 0;
/// Invalid usage, unresolvable reference, or any other operational error.
pub const INVALID: i32 = 1;
/// A waited session was aborted or its process exited without completing.
pub const ABORTED: i32 = 2;
/// A waited session failed (outranks ABORTED when both occur).
pub const FAILED: i32 = 3;
