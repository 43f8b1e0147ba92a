//! Attempt bookkeeping for a pipeline run: the retry transition rule and the
//! artifact directory layout. Pure functions, no filesystem access.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// What happens after attempt `k` fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterFailure {
    /// Sleep the backoff, then run attempt `next`.
    Retry { next: u32 },
    /// Budget spent; surface the last error.
    Exhausted,
}

/// Transition rule for a failed attempt (1-based `attempt`).
pub fn after_failure(attempt: u32, max_attempts: u32) -> AfterFailure {
    if attempt < max_attempts {
        AfterFailure::Retry { next: attempt + 1 }
    } else {
        AfterFailure::Exhausted
    }
}

/// Run directory name: UTC timestamp with microseconds, `-demo` suffix for demo runs.
pub fn run_dir_name(now: DateTime<Utc>, demo: bool) -> String {
    let stamp = now.format("%Y%m%d-%H%M%S-%6f").to_string();
    if demo { format!("{stamp}-demo") } else { stamp }
}

/// Attempt directory: the run directory itself when only one attempt is
/// allowed, otherwise `attempt-N` beneath it.
pub fn attempt_dir(run_dir: &Path, attempt: u32, max_attempts: u32) -> PathBuf {
    if max_attempts == 1 {
        run_dir.to_path_buf()
    } else {
        run_dir.join(format!("attempt-{attempt}"))
    }
}
