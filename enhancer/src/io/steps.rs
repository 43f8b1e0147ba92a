//! Remote step clients (capture, feedback, apply).
//!
//! The [`PipelineSteps`] trait decouples the orchestrator from HTTP. Tests use
//! scripted steps that return predetermined outcomes without a network.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::types::{ApplyRequest, CodexOptions, FeedbackPayload, ScreenshotPayload};
use crate::error::{Step, StepError};
use crate::io::config::PipelineConfig;

/// The three remote calls of one attempt.
#[async_trait]
pub trait PipelineSteps: Send + Sync {
    async fn capture(&self) -> Result<ScreenshotPayload, StepError>;

    async fn feedback(&self, screenshot: &ScreenshotPayload) -> Result<FeedbackPayload, StepError>;

    async fn apply(
        &self,
        feedback: &FeedbackPayload,
        options: Option<&CodexOptions>,
    ) -> Result<Value, StepError>;
}

#[derive(Serialize)]
struct FeedbackRequest<'a> {
    screenshot_b64: &'a str,
}

/// Step clients backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpSteps {
    client: reqwest::Client,
    screenshot_endpoint: String,
    feedback_endpoint: String,
    router_endpoint: String,
}

impl HttpSteps {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = build_client(config.request_timeout())?;
        Ok(Self {
            client,
            screenshot_endpoint: config.screenshot_endpoint.clone(),
            feedback_endpoint: config.feedback_endpoint.clone(),
            router_endpoint: config.router_endpoint.clone(),
        })
    }

    async fn post<B, T>(&self, step: Step, url: &str, body: Option<&B>) -> Result<T, StepError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.client.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| StepError::unreachable(step, err))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StepError::status(step, status.as_u16(), &body));
        }
        response
            .json::<T>()
            .await
            .map_err(|err| StepError::malformed(step, format!("{} returned invalid JSON: {err}", step.service())))
    }
}

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("build http client")
}

#[async_trait]
impl PipelineSteps for HttpSteps {
    #[instrument(skip_all, fields(url = %self.screenshot_endpoint))]
    async fn capture(&self) -> Result<ScreenshotPayload, StepError> {
        let raw: Value = self
            .post::<Value, Value>(Step::Capture, &self.screenshot_endpoint, None)
            .await?;
        let payload: ScreenshotPayload = serde_json::from_value(raw)
            .ok()
            .filter(|p: &ScreenshotPayload| !p.image_b64.is_empty())
            .ok_or_else(|| {
                StepError::malformed(Step::Capture, "screenshot response missing image data")
            })?;
        debug!(image_len = payload.image_b64.len(), "screenshot captured");
        Ok(payload)
    }

    #[instrument(skip_all, fields(url = %self.feedback_endpoint))]
    async fn feedback(&self, screenshot: &ScreenshotPayload) -> Result<FeedbackPayload, StepError> {
        let body = FeedbackRequest {
            screenshot_b64: &screenshot.image_b64,
        };
        let raw: Value = self
            .post(Step::Feedback, &self.feedback_endpoint, Some(&body))
            .await?;
        let payload: FeedbackPayload = serde_json::from_value(raw)
            .ok()
            .filter(|p: &FeedbackPayload| !p.feedback.trim().is_empty())
            .ok_or_else(|| {
                StepError::malformed(Step::Feedback, "ui feedback response missing feedback")
            })?;
        debug!(feedback_len = payload.feedback.len(), "feedback received");
        Ok(payload)
    }

    #[instrument(skip_all, fields(url = %self.router_endpoint))]
    async fn apply(
        &self,
        feedback: &FeedbackPayload,
        options: Option<&CodexOptions>,
    ) -> Result<Value, StepError> {
        let body = ApplyRequest {
            feedback: feedback.feedback.clone(),
            codex_options: options.cloned(),
        };
        self.post(Step::Apply, &self.router_endpoint, Some(&body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn steps_for(server: &MockServer) -> HttpSteps {
        let config = PipelineConfig {
            screenshot_endpoint: server.url("/capture"),
            feedback_endpoint: server.url("/feedback"),
            router_endpoint: server.url("/apply-feedback"),
            request_timeout_secs: 5,
            ..PipelineConfig::default()
        };
        HttpSteps::new(&config).expect("client")
    }

    #[tokio::test]
    async fn capture_keeps_metadata() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/capture");
                then.status(200)
                    .json_body(json!({"image_b64": "ZGVtbw==", "url": "http://app"}));
            })
            .await;

        let payload = steps_for(&server).capture().await.expect("capture");
        assert_eq!(payload.image_b64, "ZGVtbw==");
        assert_eq!(payload.metadata["url"], "http://app");
    }

    #[tokio::test]
    async fn capture_without_image_is_malformed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/capture");
                then.status(200).json_body(json!({"url": "http://app"}));
            })
            .await;

        let err = steps_for(&server).capture().await.unwrap_err();
        assert_eq!(err.step, Step::Capture);
        assert_eq!(err.cause, "screenshot response missing image data");
    }

    #[tokio::test]
    async fn http_error_status_surfaces_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/capture");
                then.status(502).body("upstream down");
            })
            .await;

        let err = steps_for(&server).capture().await.unwrap_err();
        assert_eq!(err.cause, "screenshot service error (502): upstream down");
    }

    #[tokio::test]
    async fn feedback_sends_screenshot_and_rejects_blank_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/feedback")
                    .json_body(json!({"screenshot_b64": "ZGVtbw=="}));
                then.status(200).json_body(json!({"feedback": "   "}));
            })
            .await;

        let screenshot = ScreenshotPayload {
            image_b64: "ZGVtbw==".to_string(),
            metadata: Default::default(),
        };
        let err = steps_for(&server).feedback(&screenshot).await.unwrap_err();
        mock.assert_async().await;
        assert_eq!(err.cause, "ui feedback response missing feedback");
    }

    #[tokio::test]
    async fn apply_forwards_codex_options() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/apply-feedback").json_body(json!({
                    "feedback": "Tighten copy",
                    "codex_options": {"model": "gpt-5.1"}
                }));
                then.status(200).json_body(json!({"status": "submitted", "results": []}));
            })
            .await;

        let feedback = FeedbackPayload {
            feedback: "Tighten copy".to_string(),
            metadata: Default::default(),
        };
        let options = CodexOptions {
            model: Some("gpt-5.1".to_string()),
            reasoning_effort: None,
        };
        let result = steps_for(&server)
            .apply(&feedback, Some(&options))
            .await
            .expect("apply");
        mock.assert_async().await;
        assert_eq!(result["status"], "submitted");
    }

    #[tokio::test]
    async fn unreachable_service_names_collaborator() {
        let config = PipelineConfig {
            feedback_endpoint: "http://127.0.0.1:9/feedback".to_string(),
            request_timeout_secs: 2,
            ..PipelineConfig::default()
        };
        let steps = HttpSteps::new(&config).expect("client");
        let screenshot = ScreenshotPayload {
            image_b64: "x".to_string(),
            metadata: Default::default(),
        };
        let err = steps.feedback(&screenshot).await.unwrap_err();
        assert!(err.cause.starts_with("ui feedback service unreachable:"));
    }
}
