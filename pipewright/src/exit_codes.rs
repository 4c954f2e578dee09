//! Stable exit codes for the CLI.

/// The command succeeded; for `run`, a validated dataset was produced.
pub const OK: i32 = 0;
/// Invalid usage or configuration, unreadable data directory, or another error.
pub const INVALID: i32 = 1;
/// `run` used every corrective round without producing a working program.
pub const EXHAUSTED: i32 = 3;
