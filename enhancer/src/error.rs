//! Error kinds shared across components.
//!
//! Component-specific errors (`ProcessError`, `StoreError`, `PipelineError`,
//! `RouterError`) live next to the code that raises them; this module holds the
//! two kinds that cross component boundaries.

use std::fmt;

/// Malformed input supplied by the caller. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One of the three remote calls making up an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Capture,
    Feedback,
    Apply,
}

impl Step {
    /// Human-facing name of the collaborator behind this step.
    pub fn service(self) -> &'static str {
        match self {
            Step::Capture => "screenshot service",
            Step::Feedback => "ui feedback service",
            Step::Apply => "router",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Capture => "capture",
            Step::Feedback => "feedback",
            Step::Apply => "apply",
        };
        f.write_str(name)
    }
}

/// A remote step failed: HTTP error status, connectivity failure, or a
/// structurally invalid response. The orchestrator retries all three alike.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{step} step failed: {cause}")]
pub struct StepError {
    pub step: Step,
    pub cause: String,
}

impl StepError {
    pub fn status(step: Step, status: u16, body: &str) -> Self {
        Self {
            step,
            cause: format!("{} error ({status}): {body}", step.service()),
        }
    }

    pub fn unreachable(step: Step, err: impl fmt::Display) -> Self {
        Self {
            step,
            cause: format!("{} unreachable: {err}", step.service()),
        }
    }

    pub fn malformed(step: Step, what: impl Into<String>) -> Self {
        Self {
            step,
            cause: what.into(),
        }
    }
}
