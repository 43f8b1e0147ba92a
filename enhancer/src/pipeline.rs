//! Pipeline orchestration: capture → feedback → apply, with attempt-level
//! retries and per-run artifact directories.
//!
//! A run creates its directory up front, then tries the three steps up to
//! `max_attempts` times with a fixed backoff between tries. Only a successful
//! attempt writes the payload artifacts; a failed one leaves `error.log`.
//! Iterations repeat whole runs strictly in sequence.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::core::attempts::{AfterFailure, after_failure};
use crate::core::types::{CodexOptions, FeedbackPayload, ScreenshotPayload};
use crate::error::{StepError, ValidationError};
use crate::io::artifacts::{
    create_attempt_dir, create_run_dir, decode_image, write_error_log, write_success,
};
use crate::io::config::PipelineConfig;
use crate::io::steps::PipelineSteps;

/// Sleep between failed attempts.
#[async_trait]
pub trait Backoff: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// [`Backoff`] on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioBackoff;

#[async_trait]
impl Backoff for TokioBackoff {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Retry budget and artifact location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub artifacts_root: PathBuf,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            artifacts_root: config.artifacts_root.clone(),
            max_attempts: config.max_attempts,
            retry_backoff: config.retry_backoff(),
        }
    }
}

/// Per-run caller parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub demo: bool,
    /// Overrides [`PipelineSettings::artifacts_root`] for this run.
    pub artifacts_dir: Option<PathBuf>,
    pub codex_options: Option<CodexOptions>,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub artifacts_dir: PathBuf,
    pub attempt: u32,
    /// Sanitized; the raw image lives only in `screenshot.png`.
    pub screenshot: ScreenshotPayload,
    pub feedback: FeedbackPayload,
    pub router: Value,
}

impl RunOutcome {
    /// Stdout of the first successful agent run reported by the router.
    pub fn agent_stdout(&self) -> Option<&str> {
        let results = match &self.router {
            Value::Array(items) => items.as_slice(),
            other => other
                .get("results")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        };
        results
            .iter()
            .filter(|item| item.get("status").and_then(Value::as_str) == Some("ok"))
            .filter_map(|item| item.get("result")?.get("stdout")?.as_str())
            .find(|stdout| !stdout.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationOutcome {
    pub iteration: u32,
    #[serde(flatten)]
    pub run: RunOutcome,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Step(#[from] StepError),
    #[error("screenshot image is not valid base64: {0}")]
    InvalidImage(#[source] base64::DecodeError),
    #[error("unable to write attempt artifacts: {0:#}")]
    Artifacts(anyhow::Error),
    #[error("unable to prepare run directory: {0:#}")]
    RunDirectory(anyhow::Error),
    #[error("pipeline run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether the attempt loop may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Step(_) | PipelineError::InvalidImage(_) | PipelineError::Artifacts(_)
        )
    }
}

pub struct Pipeline<S, B> {
    steps: S,
    backoff: B,
    settings: PipelineSettings,
}

impl<S: PipelineSteps, B: Backoff> Pipeline<S, B> {
    pub fn new(steps: S, backoff: B, settings: PipelineSettings) -> Self {
        Self {
            steps,
            backoff,
            settings,
        }
    }

    pub fn steps(&self) -> &S {
        &self.steps
    }

    pub fn backoff(&self) -> &B {
        &self.backoff
    }

    /// Run the attempt state machine once.
    #[instrument(skip_all, fields(demo = request.demo, max_attempts = self.settings.max_attempts))]
    pub async fn run(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        if let Some(options) = &request.codex_options {
            options.clone().validated()?;
        }
        if self.settings.max_attempts < 1 {
            return Err(ValidationError::new("max_attempts must be at least 1").into());
        }
        let max_attempts = self.settings.max_attempts;
        let root = request
            .artifacts_dir
            .as_deref()
            .unwrap_or(&self.settings.artifacts_root);
        let run_dir =
            create_run_dir(root, Utc::now(), request.demo).map_err(PipelineError::RunDirectory)?;
        info!(run_dir = %run_dir.display(), "pipeline run started");

        let mut attempt = 1;
        loop {
            let dir = create_attempt_dir(&run_dir, attempt, max_attempts)
                .map_err(PipelineError::RunDirectory)?;
            let err = match self.attempt(&dir, attempt, request, cancel).await {
                Ok(outcome) => {
                    info!(attempt, artifacts = %dir.display(), "pipeline attempt succeeded");
                    return Ok(outcome);
                }
                Err(err) => err,
            };
            if let Err(log_err) = write_error_log(&dir, attempt, &err.to_string()) {
                warn!(error = %log_err, "failed to record attempt error");
            }
            if !err.is_retryable() {
                return Err(err);
            }
            match after_failure(attempt, max_attempts) {
                AfterFailure::Retry { next } => {
                    warn!(attempt, error = %err, "pipeline attempt failed, retrying");
                    self.sleep_backoff(cancel).await?;
                    attempt = next;
                }
                AfterFailure::Exhausted => {
                    error!(attempt, error = %err, "pipeline attempts exhausted");
                    return Err(err);
                }
            }
        }
    }

    /// Run `iterations` whole runs back to back; the first failure stops the sequence.
    pub async fn run_iterations(
        &self,
        iterations: u32,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<IterationOutcome>, PipelineError> {
        if iterations < 1 {
            return Err(ValidationError::new("iterations must be at least 1").into());
        }
        let mut outcomes = Vec::with_capacity(iterations as usize);
        for iteration in 1..=iterations {
            info!(iteration, iterations, "starting pipeline iteration");
            let run = self.run(request, cancel).await?;
            outcomes.push(IterationOutcome { iteration, run });
        }
        Ok(outcomes)
    }

    async fn attempt(
        &self,
        dir: &Path,
        attempt: u32,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, PipelineError> {
        let screenshot = cancellable(cancel, self.steps.capture()).await?;
        let image = decode_image(&screenshot).map_err(PipelineError::InvalidImage)?;
        let feedback = cancellable(cancel, self.steps.feedback(&screenshot)).await?;
        let router = cancellable(
            cancel,
            self.steps.apply(&feedback, request.codex_options.as_ref()),
        )
        .await?;

        write_success(dir, &screenshot, &image, &feedback, &router)
            .map_err(PipelineError::Artifacts)?;
        Ok(RunOutcome {
            artifacts_dir: dir.to_path_buf(),
            attempt,
            screenshot: screenshot.sanitized(),
            feedback,
            router,
        })
    }

    async fn sleep_backoff(&self, cancel: &CancellationToken) -> Result<(), PipelineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            _ = self.backoff.sleep(self.settings.retry_backoff) => Ok(()),
        }
    }
}

/// Drop the step future (aborting its request) if `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    step: impl Future<Output = Result<T, StepError>>,
) -> Result<T, PipelineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = step => result.map_err(PipelineError::from),
    }
}
