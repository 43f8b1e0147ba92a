//! Test-only fakes for the pipeline, router and process runner seams.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::core::types::{ApplyRequest, CodexOptions, FeedbackPayload, ScreenshotPayload};
use crate::error::{Step, StepError};
use crate::io::bridge::{ApplyClient, ApplyError};
use crate::io::config::BridgeConfig;
use crate::io::steps::PipelineSteps;
use crate::pipeline::Backoff;

/// [`PipelineSteps`] that pops queued outcomes per step and falls back to a
/// fixed success once a queue is empty.
#[derive(Default)]
pub struct ScriptedSteps {
    captures: Mutex<VecDeque<Result<ScreenshotPayload, StepError>>>,
    feedbacks: Mutex<VecDeque<Result<FeedbackPayload, StepError>>>,
    applies: Mutex<VecDeque<Result<Value, StepError>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    apply_options: Mutex<Vec<Option<CodexOptions>>>,
}

impl ScriptedSteps {
    pub fn new() -> Self {
        Self::default()
    }

    /// `{image_b64: base64("demo")}`.
    pub fn default_screenshot() -> ScreenshotPayload {
        ScreenshotPayload {
            image_b64: STANDARD.encode("demo"),
            metadata: Default::default(),
        }
    }

    /// `{feedback: "Tighten copy"}`.
    pub fn default_feedback() -> FeedbackPayload {
        FeedbackPayload {
            feedback: "Tighten copy".to_string(),
            metadata: Default::default(),
        }
    }

    pub fn push_capture(&self, outcome: Result<ScreenshotPayload, StepError>) {
        self.captures.lock().expect("lock").push_back(outcome);
    }

    pub fn push_feedback(&self, outcome: Result<FeedbackPayload, StepError>) {
        self.feedbacks.lock().expect("lock").push_back(outcome);
    }

    pub fn push_apply(&self, outcome: Result<Value, StepError>) {
        self.applies.lock().expect("lock").push_back(outcome);
    }

    pub fn calls(&self, step: Step) -> usize {
        self.calls
            .lock()
            .expect("lock")
            .get(step_key(step))
            .copied()
            .unwrap_or(0)
    }

    /// Codex options seen by each apply call, in order.
    pub fn apply_options(&self) -> Vec<Option<CodexOptions>> {
        self.apply_options.lock().expect("lock").clone()
    }

    fn record(&self, step: Step) {
        *self
            .calls
            .lock()
            .expect("lock")
            .entry(step_key(step))
            .or_default() += 1;
    }
}

fn step_key(step: Step) -> &'static str {
    match step {
        Step::Capture => "capture",
        Step::Feedback => "feedback",
        Step::Apply => "apply",
    }
}

#[async_trait]
impl PipelineSteps for ScriptedSteps {
    async fn capture(&self) -> Result<ScreenshotPayload, StepError> {
        self.record(Step::Capture);
        let next = self.captures.lock().expect("lock").pop_front();
        next.unwrap_or_else(|| Ok(Self::default_screenshot()))
    }

    async fn feedback(&self, _screenshot: &ScreenshotPayload) -> Result<FeedbackPayload, StepError> {
        self.record(Step::Feedback);
        let next = self.feedbacks.lock().expect("lock").pop_front();
        next.unwrap_or_else(|| Ok(Self::default_feedback()))
    }

    async fn apply(
        &self,
        _feedback: &FeedbackPayload,
        options: Option<&CodexOptions>,
    ) -> Result<Value, StepError> {
        self.record(Step::Apply);
        self.apply_options
            .lock()
            .expect("lock")
            .push(options.cloned());
        let next = self.applies.lock().expect("lock").pop_front();
        next.unwrap_or_else(|| Ok(json!({"status": "ok"})))
    }
}

/// [`Backoff`] that records requested delays instead of sleeping.
#[derive(Default)]
pub struct RecordingBackoff {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingBackoff {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Backoff for RecordingBackoff {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().expect("lock").push(delay);
    }
}

/// [`ApplyClient`] with per-feedback delays and failures. Succeeds with
/// `{feedback, stdout}` unless told otherwise, and tracks how many calls were
/// in flight at once.
#[derive(Default)]
pub struct ScriptedApplyClient {
    delays: HashMap<String, Duration>,
    failures: HashMap<String, ApplyError>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: Mutex<Vec<String>>,
}

impl ScriptedApplyClient {
    pub fn with_delay(mut self, feedback: &str, delay: Duration) -> Self {
        self.delays.insert(feedback.to_string(), delay);
        self
    }

    pub fn with_failure(mut self, feedback: &str, err: ApplyError) -> Self {
        self.failures.insert(feedback.to_string(), err);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Feedback texts in the order their calls finished.
    pub fn completion_order(&self) -> Vec<String> {
        self.completed.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ApplyClient for ScriptedApplyClient {
    async fn apply(&self, request: &ApplyRequest) -> Result<Value, ApplyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(&request.feedback) {
            tokio::time::sleep(*delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed
            .lock()
            .expect("lock")
            .push(request.feedback.clone());
        match self.failures.get(&request.feedback) {
            Some(err) => Err(err.clone()),
            None => Ok(json!({
                "feedback": request.feedback,
                "stdout": format!("applied: {}\n", request.feedback),
                "exit_code": 0,
            })),
        }
    }
}

/// Write an executable `/bin/sh` script named `fake-codex` into `dir`.
pub fn write_fake_codex(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-codex");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake codex");
    let mut perms = fs::metadata(&path).expect("fake codex metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod fake codex");
    path
}

/// Temp workspace with a target repo, a fake codex running `body`, and a
/// bridge config pointing at both.
pub fn bridge_fixture(body: &str) -> (TempDir, BridgeConfig) {
    let temp = tempfile::tempdir().expect("tempdir");
    let repo = temp.path().join("repo");
    fs::create_dir_all(&repo).expect("create repo");
    let codex = write_fake_codex(temp.path(), body);
    let config = BridgeConfig {
        target_repo: repo,
        codex_bin: codex.display().to_string(),
        logs_root: temp.path().join("codex_runs"),
        timeout_secs: 10,
        ..BridgeConfig::default()
    };
    (temp, config)
}
