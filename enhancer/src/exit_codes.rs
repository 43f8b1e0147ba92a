//! Stable exit codes for `enhancer` commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Pipeline, agent run or I/O failure.
pub const FAILED: i32 = 1;
/// Invalid input or configuration.
pub const INVALID: i32 = 2;
/// A versioned store changed since it was read.
pub const CONFLICT: i32 = 3;
/// Cancelled by SIGINT.
pub const INTERRUPTED: i32 = 130;
